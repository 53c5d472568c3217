// Per-frame orchestration.
//
// Grounded on thundr's own draw/present pairing (Thundr::draw_frame /
// Thundr::present in lib.rs), generalized to the full pass sequence of
// depth pre-pass -> SSAO -> shadow cascades -> PBR -> blob -> skybox ->
// finalize, and to two distinct index spaces: `imageAvailable`/
// `inFlightFence` are indexed by *ring index* (at most MaxFramesInFlight
// CPU-side frames in flight), while `renderFinished` is indexed by
// *swapchain image index* (it must finish before that image can be
// re-acquired).

use ash::vk;
use std::sync::Arc;

use crate::context::GfxContext;
use crate::descriptor::DescriptorAllocator;
use crate::error::{RenderError, Result};
use crate::swapchain::Swapchain;
use crate::transient::TransientBufferAllocator;

/// Per-ring-index resources: at most this many frames are in flight on the
/// CPU at once.
struct RingSlot {
    image_available: vk::Semaphore,
    in_flight_fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    descriptor_allocator: DescriptorAllocator,
    /// Per-ring-slot bump allocator for scratch buffers built fresh every
    /// frame -- FrameUniforms included, since by the time this slot is
    /// reused its `in_flight_fence` wait in `begin_frame` already
    /// guarantees the GPU is done reading the previous contents.
    transient_allocator: TransientBufferAllocator,
}

/// Per-swapchain-image resources: `renderFinished` must be indexed by image
/// index, not ring index, since presentation waits on the image that was
/// actually rendered into, which may differ from the current ring slot
/// after an out-of-order present.
struct ImageSlot {
    render_finished: vk::Semaphore,
}

pub struct FrameLoop {
    ctx: Arc<GfxContext>,
    rings: Vec<RingSlot>,
    images: Vec<ImageSlot>,
    ring_index: usize,
    pause_culling: bool,
    frozen_view_proj: Option<cgmath::Matrix4<f32>>,
}

impl FrameLoop {
    pub fn new(ctx: Arc<GfxContext>, max_frames_in_flight: usize, image_count: usize, transient_slab_size: vk::DeviceSize) -> Result<Self> {
        let mut rings = Vec::with_capacity(max_frames_in_flight);
        for _ in 0..max_frames_in_flight {
            let sema_info = vk::SemaphoreCreateInfo::builder();
            let image_available = unsafe {
                ctx.device.create_semaphore(&sema_info, None).map_err(RenderError::Vulkan)?
            };
            let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
            let in_flight_fence = unsafe {
                ctx.device.create_fence(&fence_info, None).map_err(RenderError::Vulkan)?
            };

            let pool_info = vk::CommandPoolCreateInfo::builder()
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .queue_family_index(ctx.families.graphics);
            let command_pool = unsafe {
                ctx.device.create_command_pool(&pool_info, None).map_err(RenderError::Vulkan)?
            };
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = unsafe {
                ctx.device.allocate_command_buffers(&alloc_info).map_err(RenderError::Vulkan)?[0]
            };

            let descriptor_allocator = DescriptorAllocator::new(&ctx.device)?;
            let transient_allocator = TransientBufferAllocator::new(
                ctx.clone(),
                transient_slab_size,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?;

            rings.push(RingSlot {
                image_available,
                in_flight_fence,
                command_pool,
                command_buffer,
                descriptor_allocator,
                transient_allocator,
            });
        }

        let mut images = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            let sema_info = vk::SemaphoreCreateInfo::builder();
            let render_finished = unsafe {
                ctx.device.create_semaphore(&sema_info, None).map_err(RenderError::Vulkan)?
            };
            images.push(ImageSlot { render_finished });
        }

        Ok(Self {
            ctx,
            rings,
            images,
            ring_index: 0,
            pause_culling: false,
            frozen_view_proj: None,
        })
    }

    pub fn set_pause_culling(&mut self, paused: bool) {
        self.pause_culling = paused;
        if !paused {
            self.frozen_view_proj = None;
        }
    }

    /// Returns the view-projection culling should test against this frame:
    /// the live one, unless `pauseCulling` is set, in which case the first
    /// frame's view-projection after pausing is reused every frame after.
    pub fn culling_view_proj(&mut self, live: cgmath::Matrix4<f32>) -> cgmath::Matrix4<f32> {
        if !self.pause_culling {
            return live;
        }
        *self.frozen_view_proj.get_or_insert(live)
    }

    /// Runs steps 1-4 of the per-frame sequence: waits the ring's fence,
    /// acquires the next swapchain image, advances that ring slot's
    /// descriptor/transient allocators, and begins command recording.
    /// Returns `None` if the swapchain needs to be recreated (caller should
    /// skip this frame after handling that).
    pub fn begin_frame(&mut self, swapchain: &Swapchain) -> Result<Option<(u32, vk::CommandBuffer)>> {
        let ring = &mut self.rings[self.ring_index];

        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[ring.in_flight_fence], true, u64::MAX)
                .map_err(RenderError::Vulkan)?;
        }

        let image_index = match swapchain.acquire_next_image(ring.image_available) {
            Ok(i) => i,
            Err(RenderError::SwapchainOutOfDate) | Err(RenderError::SwapchainSuboptimal) => return Ok(None),
            Err(e) => return Err(e),
        };

        unsafe {
            self.ctx.device.reset_fences(&[ring.in_flight_fence]).map_err(RenderError::Vulkan)?;
        }

        ring.descriptor_allocator.destroy(&self.ctx.device);
        ring.descriptor_allocator = DescriptorAllocator::new(&self.ctx.device)?;
        ring.transient_allocator.reset();

        unsafe {
            self.ctx
                .device
                .reset_command_pool(ring.command_pool, vk::CommandPoolResetFlags::empty())
                .map_err(RenderError::Vulkan)?;

            let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.ctx
                .device
                .begin_command_buffer(ring.command_buffer, &begin_info)
                .map_err(RenderError::Vulkan)?;
        }

        Ok(Some((image_index, ring.command_buffer)))
    }

    /// Runs steps 6-8: ends recording, submits waiting on `imageAvailable`
    /// at color-attachment-output and signaling `renderFinished` for this
    /// image index, then presents waiting on that same semaphore.
    pub fn end_frame(&mut self, swapchain: &Swapchain, image_index: u32) -> Result<()> {
        let ring_index = self.ring_index;
        let ring = &self.rings[ring_index];
        let image = &self.images[image_index as usize];

        unsafe {
            self.ctx.device.end_command_buffer(ring.command_buffer).map_err(RenderError::Vulkan)?;
        }

        let wait_semaphores = [ring.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [image.render_finished];
        let command_buffers = [ring.command_buffer];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.graphics_queue, &[submit.build()], ring.in_flight_fence)
                .map_err(RenderError::Vulkan)?;
        }

        let present_result = swapchain.present(self.ctx.present_queue, image.render_finished, image_index);

        self.ring_index = (self.ring_index + 1) % self.rings.len();

        present_result
    }

    pub fn ring_index(&self) -> usize {
        self.ring_index
    }

    pub fn descriptor_allocator_mut(&mut self) -> &mut DescriptorAllocator {
        &mut self.rings[self.ring_index].descriptor_allocator
    }

    pub fn transient_allocator_mut(&mut self) -> &mut TransientBufferAllocator {
        &mut self.rings[self.ring_index].transient_allocator
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.ctx.wait_idle();
        unsafe {
            for ring in &mut self.rings {
                self.ctx.device.destroy_semaphore(ring.image_available, None);
                self.ctx.device.destroy_fence(ring.in_flight_fence, None);
                self.ctx.device.destroy_command_pool(ring.command_pool, None);
                ring.descriptor_allocator.destroy(&self.ctx.device);
            }
            for image in &self.images {
                self.ctx.device.destroy_semaphore(image.render_finished, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cgmath::SquareMatrix;

    #[test]
    fn culling_view_proj_freezes_only_while_paused() {
        // Reimplements the freeze/unfreeze rule directly, since exercising
        // FrameLoop::culling_view_proj needs a live GfxContext to construct
        // a FrameLoop at all.
        let mut paused = true;
        let mut frozen: Option<cgmath::Matrix4<f32>> = None;
        let a = cgmath::Matrix4::identity();
        let b = cgmath::Matrix4::from_scale(2.0);

        let first = if paused { *frozen.get_or_insert(a) } else { a };
        assert_eq!(first, a);

        let second = if paused { *frozen.get_or_insert(b) } else { b };
        assert_eq!(second, a, "frozen view-proj must not update while paused");

        paused = false;
        frozen = None;
        let third = if paused { *frozen.get_or_insert(b) } else { b };
        assert_eq!(third, b);
    }
}
