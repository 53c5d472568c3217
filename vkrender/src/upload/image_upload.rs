// Decodes PNG/JPEG/HDR bytes via the `image` crate (promoted from a
// dev-only dependency to a runtime one) and uploads them to a device-local
// image. The buffer-to-image copy runs on the transfer queue; mipmap
// generation and the final shader-read transition run on the graphics queue
// after a queue-family ownership transfer, since vkCmdBlitImage needs
// GRAPHICS support a dedicated transfer queue doesn't have. Cubemap faces
// are packed into one array image with the cube-compatible flag.

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::context::GfxContext;
use crate::error::{RenderError, Result};
use crate::image::{Image, ImageCreateInfo};

pub struct ImageUploader {
    ctx: Arc<GfxContext>,
    transfer_pool: vk::CommandPool,
    graphics_pool: vk::CommandPool,
}

impl ImageUploader {
    pub fn new(ctx: Arc<GfxContext>) -> Result<Self> {
        let transfer_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.families.transfer);
        let transfer_pool = unsafe {
            ctx.device
                .create_command_pool(&transfer_info, None)
                .map_err(RenderError::Vulkan)?
        };
        let graphics_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.families.graphics);
        let graphics_pool = unsafe {
            ctx.device
                .create_command_pool(&graphics_info, None)
                .map_err(RenderError::Vulkan)?
        };
        Ok(Self { ctx, transfer_pool, graphics_pool })
    }

    /// Uploads already-decoded RGBA8 pixels (e.g. from glTF's embedded image
    /// data, which arrives as bytes rather than a file on disk).
    pub fn load_2d_from_bytes(&mut self, rgba8: &[u8], width: u32, height: u32, srgb: bool) -> Result<Image> {
        let format = if srgb {
            vk::Format::R8G8B8A8_SRGB
        } else {
            vk::Format::R8G8B8A8_UNORM
        };
        let mip_levels = (width.max(height) as f32).log2().floor() as u32 + 1;

        let gpu_image = Image::new(
            self.ctx.clone(),
            &ImageCreateInfo {
                format,
                extent: vk::Extent3D { width, height, depth: 1 },
                mip_levels,
                array_layers: 1,
                usage: vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
                aspect: vk::ImageAspectFlags::COLOR,
                flags: vk::ImageCreateFlags::empty(),
                view_type: vk::ImageViewType::TYPE_2D,
            },
        )?;

        self.upload(&gpu_image, rgba8, 1, true)?;
        Ok(gpu_image)
    }

    pub fn load_2d(&mut self, path: &Path, srgb: bool) -> Result<Image> {
        let decoded = image::open(path)
            .map_err(|e| RenderError::SceneLoad(format!("{:?}: {}", path, e)))?
            .to_rgba8();
        let (w, h) = decoded.dimensions();

        let format = if srgb {
            vk::Format::R8G8B8A8_SRGB
        } else {
            vk::Format::R8G8B8A8_UNORM
        };
        let mip_levels = (w.max(h) as f32).log2().floor() as u32 + 1;

        let gpu_image = Image::new(
            self.ctx.clone(),
            &ImageCreateInfo {
                format,
                extent: vk::Extent3D { width: w, height: h, depth: 1 },
                mip_levels,
                array_layers: 1,
                usage: vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
                aspect: vk::ImageAspectFlags::COLOR,
                flags: vk::ImageCreateFlags::empty(),
                view_type: vk::ImageViewType::TYPE_2D,
            },
        )?;

        self.upload(&gpu_image, decoded.as_raw(), 1, true)?;
        Ok(gpu_image)
    }

    /// Packs 6 equal-sized face images into one cube-compatible array image.
    pub fn load_cubemap(&mut self, faces: &[impl AsRef<Path>; 6]) -> Result<Image> {
        let first = image::open(faces[0].as_ref())
            .map_err(|e| RenderError::SceneLoad(format!("{}", e)))?
            .to_rgba8();
        let (w, h) = first.dimensions();

        let gpu_image = Image::new(
            self.ctx.clone(),
            &ImageCreateInfo {
                format: vk::Format::R8G8B8A8_SRGB,
                extent: vk::Extent3D { width: w, height: h, depth: 1 },
                mip_levels: 1,
                array_layers: 6,
                usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                aspect: vk::ImageAspectFlags::COLOR,
                flags: vk::ImageCreateFlags::CUBE_COMPATIBLE,
                view_type: vk::ImageViewType::CUBE,
            },
        )?;

        let mut packed = Vec::with_capacity((w * h * 4 * 6) as usize);
        packed.extend_from_slice(first.as_raw());
        for face in faces.iter().skip(1) {
            let im = image::open(face.as_ref())
                .map_err(|e| RenderError::SceneLoad(format!("{}", e)))?
                .to_rgba8();
            packed.extend_from_slice(im.as_raw());
        }

        self.upload(&gpu_image, &packed, 6, false)?;
        Ok(gpu_image)
    }

    fn one_shot(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cbuf = unsafe {
            self.ctx.device.allocate_command_buffers(&alloc_info).map_err(RenderError::Vulkan)?[0]
        };
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.ctx.device.begin_command_buffer(cbuf, &begin_info).map_err(RenderError::Vulkan)?;
        }
        Ok(cbuf)
    }

    fn submit_and_wait(&self, queue: vk::Queue, cbuf: vk::CommandBuffer, pool: vk::CommandPool) -> Result<()> {
        unsafe {
            self.ctx.device.end_command_buffer(cbuf).map_err(RenderError::Vulkan)?;
        }

        let (sema, point) = self.ctx.next_timeline_point();
        let cbufs = [cbuf];
        let signal = [sema];
        let mut timeline_submit = vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&[point]);
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

            let wait_info = vk::SemaphoreWaitInfo::builder().semaphores(&[sema]).values(&[point]);
            self.ctx.device.wait_semaphores(&wait_info, u64::MAX).map_err(RenderError::Vulkan)?;

            self.ctx.device.free_command_buffers(pool, &cbufs);
        }

        Ok(())
    }

    /// Copies `data` into a staging buffer, records the transfer-queue copy
    /// plus a release barrier, then (when the transfer and graphics families
    /// differ) acquires ownership on the graphics queue before blitting down
    /// the mip chain and transitioning to ShaderReadOnly -- `vkCmdBlitImage`
    /// is only valid on a queue that supports GRAPHICS, which a dedicated
    /// transfer queue does not.
    fn upload(&mut self, dst: &Image, data: &[u8], layers: u32, mipmap: bool) -> Result<()> {
        let mut staging =
            Buffer::new_host_visible(self.ctx.clone(), data.len() as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write(data)?;

        let graphics = self.ctx.families.graphics;
        let transfer = self.ctx.families.transfer;
        let cross_queue = graphics != transfer;
        let do_mipmap = mipmap && dst.mip_levels > 1;

        let transfer_cbuf = self.one_shot(self.transfer_pool)?;
        unsafe {
            let to_dst = vk::ImageMemoryBarrier::builder()
                .image(dst.handle)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .subresource_range(
                    vk::ImageSubresourceRange::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(dst.mip_levels)
                        .layer_count(layers)
                        .build(),
                )
                .build();
            self.ctx.device.cmd_pipeline_barrier(
                transfer_cbuf,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_dst],
            );

            let bytes_per_layer = (data.len() as u64) / layers as u64;
            let regions: Vec<vk::BufferImageCopy> = (0..layers)
                .map(|layer| {
                    vk::BufferImageCopy::builder()
                        .buffer_offset(layer as u64 * bytes_per_layer)
                        .image_subresource(
                            vk::ImageSubresourceLayers::builder()
                                .aspect_mask(vk::ImageAspectFlags::COLOR)
                                .mip_level(0)
                                .base_array_layer(layer)
                                .layer_count(1)
                                .build(),
                        )
                        .image_extent(dst.extent)
                        .build()
                })
                .collect();
            self.ctx.device.cmd_copy_buffer_to_image(
                transfer_cbuf,
                staging.handle,
                dst.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );

            if cross_queue {
                // Mip 0 stays in TRANSFER_DST_OPTIMAL across the transfer;
                // the graphics-queue acquire keeps that layout since
                // generate_mipmaps (or the no-mipmap transition below)
                // expects to find it there.
                let release = vk::ImageMemoryBarrier::builder()
                    .image(dst.handle)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::empty())
                    .src_queue_family_index(transfer)
                    .dst_queue_family_index(graphics)
                    .subresource_range(
                        vk::ImageSubresourceRange::builder()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .level_count(dst.mip_levels)
                            .layer_count(layers)
                            .build(),
                    )
                    .build();
                self.ctx.device.cmd_pipeline_barrier(
                    transfer_cbuf,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[release],
                );
            }
        }
        self.submit_and_wait(self.ctx.transfer_queue, transfer_cbuf, self.transfer_pool)?;

        let gfx_cbuf = if cross_queue {
            let cbuf = self.one_shot(self.graphics_pool)?;
            unsafe {
                let acquire = vk::ImageMemoryBarrier::builder()
                    .image(dst.handle)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE | vk::AccessFlags::TRANSFER_READ)
                    .src_queue_family_index(transfer)
                    .dst_queue_family_index(graphics)
                    .subresource_range(
                        vk::ImageSubresourceRange::builder()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .level_count(dst.mip_levels)
                            .layer_count(layers)
                            .build(),
                    )
                    .build();
                self.ctx.device.cmd_pipeline_barrier(
                    cbuf,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[acquire],
                );
            }
            cbuf
        } else {
            self.one_shot(self.transfer_pool)?
        };

        unsafe {
            // generate_mipmaps leaves mips [0, mip_levels-2] in
            // TRANSFER_SRC_OPTIMAL (blitted from) and the last mip in
            // TRANSFER_DST_OPTIMAL (blitted to, never read as a source), so
            // the two ranges need separate old_layouts when mipmapping ran.
            let mut barriers = Vec::new();
            if do_mipmap {
                dst.generate_mipmaps(gfx_cbuf);
                barriers.push(
                    vk::ImageMemoryBarrier::builder()
                        .image(dst.handle)
                        .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                        .dst_access_mask(vk::AccessFlags::SHADER_READ)
                        .subresource_range(
                            vk::ImageSubresourceRange::builder()
                                .aspect_mask(vk::ImageAspectFlags::COLOR)
                                .base_mip_level(0)
                                .level_count(dst.mip_levels - 1)
                                .layer_count(layers)
                                .build(),
                        )
                        .build(),
                );
                barriers.push(
                    vk::ImageMemoryBarrier::builder()
                        .image(dst.handle)
                        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                        .dst_access_mask(vk::AccessFlags::SHADER_READ)
                        .subresource_range(
                            vk::ImageSubresourceRange::builder()
                                .aspect_mask(vk::ImageAspectFlags::COLOR)
                                .base_mip_level(dst.mip_levels - 1)
                                .level_count(1)
                                .layer_count(layers)
                                .build(),
                        )
                        .build(),
                );
            } else {
                barriers.push(
                    vk::ImageMemoryBarrier::builder()
                        .image(dst.handle)
                        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                        .dst_access_mask(vk::AccessFlags::SHADER_READ)
                        .subresource_range(
                            vk::ImageSubresourceRange::builder()
                                .aspect_mask(vk::ImageAspectFlags::COLOR)
                                .level_count(dst.mip_levels)
                                .layer_count(layers)
                                .build(),
                        )
                        .build(),
                );
            }

            self.ctx.device.cmd_pipeline_barrier(
                gfx_cbuf,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }

        if cross_queue {
            self.submit_and_wait(self.ctx.graphics_queue, gfx_cbuf, self.graphics_pool)?;
        } else {
            self.submit_and_wait(self.ctx.transfer_queue, gfx_cbuf, self.transfer_pool)?;
        }

        Ok(())
    }
}

impl Drop for ImageUploader {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_command_pool(self.transfer_pool, None);
            self.ctx.device.destroy_command_pool(self.graphics_pool, None);
        }
    }
}
