// Persistent-mapped staging buffer + transfer-queue submission, grounded on
// device.rs's upload_memimage_to_transfer / cbuf_submit_async /
// wait_for_copy timeline-semaphore pattern.

use ash::vk;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::context::GfxContext;
use crate::error::{RenderError, Result};
use crate::resource_state::{AccessState, ResourceState};

pub struct StagingUploader {
    ctx: Arc<GfxContext>,
    transfer_pool: vk::CommandPool,
    graphics_pool: vk::CommandPool,
    staging: Buffer,
}

impl StagingUploader {
    pub fn new(ctx: Arc<GfxContext>, staging_size: vk::DeviceSize) -> Result<Self> {
        let transfer_pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.families.transfer);
        let transfer_pool = unsafe {
            ctx.device
                .create_command_pool(&transfer_pool_info, None)
                .map_err(RenderError::Vulkan)?
        };
        let graphics_pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.families.graphics);
        let graphics_pool = unsafe {
            ctx.device
                .create_command_pool(&graphics_pool_info, None)
                .map_err(RenderError::Vulkan)?
        };
        let staging = Buffer::new_host_visible(
            ctx.clone(),
            staging_size,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;

        Ok(Self { ctx, transfer_pool, graphics_pool, staging })
    }

    fn one_shot(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cbuf = unsafe {
            self.ctx
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(RenderError::Vulkan)?[0]
        };
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.ctx
                .device
                .begin_command_buffer(cbuf, &begin_info)
                .map_err(RenderError::Vulkan)?;
        }
        Ok(cbuf)
    }

    fn submit_and_wait(&self, queue: vk::Queue, cbuf: vk::CommandBuffer, pool: vk::CommandPool) -> Result<()> {
        unsafe {
            self.ctx.device.end_command_buffer(cbuf).map_err(RenderError::Vulkan)?;
        }

        let (sema, point) = self.ctx.next_timeline_point();
        let cbufs = [cbuf];
        let mut timeline_submit = vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&[point]);
        let signal = [sema];
        let submit = vk::SubmitInfo::builder()
            .command_buffers(&cbufs)
            .signal_semaphores(&signal)
            .push_next(&mut timeline_submit)
            .build();

        unsafe {
            self.ctx
                .device
                .queue_submit(queue, &[submit], vk::Fence::null())
                .map_err(RenderError::Vulkan)?;

            let wait_info = vk::SemaphoreWaitInfo::builder()
                .semaphores(&[sema])
                .values(&[point]);
            self.ctx
                .device
                .wait_semaphores(&wait_info, u64::MAX)
                .map_err(RenderError::Vulkan)?;

            self.ctx.device.free_command_buffers(pool, &cbufs);
        }

        Ok(())
    }

    /// Copies `data` into the staging buffer, then records+submits a
    /// one-shot transfer command buffer copying it into `dst`. When the
    /// transfer and graphics families differ, a release barrier is recorded
    /// on the transfer queue and a matching acquire barrier on the graphics
    /// queue before `dst` becomes usable there as `final_state`.
    pub fn upload_to_buffer(
        &mut self,
        data: &[u8],
        dst: vk::Buffer,
        dst_offset: vk::DeviceSize,
        final_state: AccessState,
    ) -> Result<()> {
        self.staging.write(data)?;
        let size = data.len() as vk::DeviceSize;
        let graphics = self.ctx.families.graphics;
        let transfer = self.ctx.families.transfer;
        let cross_queue = graphics != transfer;

        let transfer_cbuf = self.one_shot(self.transfer_pool)?;
        unsafe {
            let region = vk::BufferCopy::builder()
                .src_offset(0)
                .dst_offset(dst_offset)
                .size(size)
                .build();
            self.ctx.device.cmd_copy_buffer(transfer_cbuf, self.staging.handle, dst, &[region]);

            if cross_queue {
                let release = ResourceState::buffer_release_barrier(
                    dst,
                    AccessState::TransferDst,
                    transfer,
                    graphics,
                    size,
                );
                ResourceState::submit_buffer_barrier(&self.ctx.device, transfer_cbuf, release);
            }
        }
        self.submit_and_wait(self.ctx.transfer_queue, transfer_cbuf, self.transfer_pool)?;

        if cross_queue {
            let graphics_cbuf = self.one_shot(self.graphics_pool)?;
            unsafe {
                let acquire = ResourceState::buffer_acquire_barrier(dst, final_state, transfer, graphics, size);
                ResourceState::submit_buffer_barrier(&self.ctx.device, graphics_cbuf, acquire);
            }
            self.submit_and_wait(self.ctx.graphics_queue, graphics_cbuf, self.graphics_pool)?;
        }

        Ok(())
    }
}

impl Drop for StagingUploader {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_command_pool(self.transfer_pool, None);
            self.ctx.device.destroy_command_pool(self.graphics_pool, None);
        }
    }
}
