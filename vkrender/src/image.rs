// Device image + view allocation, and mipmap generation.
//
// Grounded on the image/memory-binding helpers in device.rs (create_image,
// find_memory_type_index) and ImageVk's view creation; the per-window-surface
// Image struct those helpers originally backed doesn't apply here, so this is
// a plain GPU texture wrapper instead.

use ash::vk;
use std::sync::Arc;

use crate::context::GfxContext;
use crate::error::{RenderError, Result};
use crate::resource_state::{AccessState, ResourceState};

pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub aspect: vk::ImageAspectFlags,
    ctx: Arc<GfxContext>,
}

pub struct ImageCreateInfo {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub flags: vk::ImageCreateFlags,
    pub view_type: vk::ImageViewType,
}

impl Image {
    pub fn new(ctx: Arc<GfxContext>, info: &ImageCreateInfo) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(info.format)
            .extent(info.extent)
            .mip_levels(info.mip_levels)
            .array_layers(info.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .flags(info.flags);

        let handle = unsafe {
            ctx.device
                .create_image(&create_info, None)
                .map_err(RenderError::Vulkan)?
        };

        let reqs = unsafe { ctx.device.get_image_memory_requirements(handle) };
        let type_index = ctx
            .find_memory_type_index(reqs.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .ok_or_else(|| {
                RenderError::DeviceSelection("no memory type for image allocation".to_string())
            })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(reqs.size)
            .memory_type_index(type_index);
        let memory = unsafe {
            ctx.device
                .allocate_memory(&alloc_info, None)
                .map_err(RenderError::Vulkan)?
        };
        unsafe {
            ctx.device
                .bind_image_memory(handle, memory, 0)
                .map_err(RenderError::Vulkan)?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(handle)
            .view_type(info.view_type)
            .format(info.format)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(info.aspect)
                    .base_mip_level(0)
                    .level_count(info.mip_levels)
                    .base_array_layer(0)
                    .layer_count(info.array_layers)
                    .build(),
            );
        let view = unsafe {
            ctx.device
                .create_image_view(&view_info, None)
                .map_err(RenderError::Vulkan)?
        };

        Ok(Self {
            handle,
            view,
            memory,
            format: info.format,
            extent: info.extent,
            mip_levels: info.mip_levels,
            array_layers: info.array_layers,
            aspect: info.aspect,
            ctx,
        })
    }

    /// Records a barrier from `from` to `to` covering the whole resource.
    pub unsafe fn transition(&self, cbuf: vk::CommandBuffer, from: AccessState, to: AccessState) {
        let barrier = ResourceState::image_barrier(
            self.handle,
            self.aspect,
            from,
            to,
            self.mip_levels,
            self.array_layers,
        );
        ResourceState::submit_image_barrier(&self.ctx.device, cbuf, barrier);
    }

    /// Blits each mip level down from the one above it. The image must
    /// already be in TransferDst layout with data in mip 0.
    pub unsafe fn generate_mipmaps(&self, cbuf: vk::CommandBuffer) {
        if self.mip_levels <= 1 {
            return;
        }

        let mut mip_w = self.extent.width as i32;
        let mut mip_h = self.extent.height as i32;

        for level in 1..self.mip_levels {
            let barrier = vk::ImageMemoryBarrier::builder()
                .image(self.handle)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                .subresource_range(
                    vk::ImageSubresourceRange::builder()
                        .aspect_mask(self.aspect)
                        .base_mip_level(level - 1)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(self.array_layers)
                        .build(),
                )
                .build();
            self.ctx.device.cmd_pipeline_barrier(
                cbuf,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );

            let next_w = (mip_w / 2).max(1);
            let next_h = (mip_h / 2).max(1);
            let blit = vk::ImageBlit::builder()
                .src_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D { x: mip_w, y: mip_h, z: 1 },
                ])
                .src_subresource(
                    vk::ImageSubresourceLayers::builder()
                        .aspect_mask(self.aspect)
                        .mip_level(level - 1)
                        .base_array_layer(0)
                        .layer_count(self.array_layers)
                        .build(),
                )
                .dst_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D { x: next_w, y: next_h, z: 1 },
                ])
                .dst_subresource(
                    vk::ImageSubresourceLayers::builder()
                        .aspect_mask(self.aspect)
                        .mip_level(level)
                        .base_array_layer(0)
                        .layer_count(self.array_layers)
                        .build(),
                )
                .build();
            self.ctx.device.cmd_blit_image(
                cbuf,
                self.handle,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );

            mip_w = next_w;
            mip_h = next_h;
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_image_view(self.view, None);
            self.ctx.device.destroy_image(self.handle, None);
            self.ctx.device.free_memory(self.memory, None);
        }
    }
}
