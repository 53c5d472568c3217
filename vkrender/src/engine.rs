// Top-level renderer: owns the swapchain, offscreen targets, every pass,
// and the scene this frame draws, and sequences one frame end-to-end.
//
// Grounded on thundr's Thundr/Renderer split (lib.rs's Thundr holds the
// Renderer and exposes draw_frame/present; Renderer owns the swapchain and
// per-pass state) but generalized to the multi-pass pipeline this renderer
// runs instead of a single compositing pass.

use ash::vk;
use cgmath::{Matrix4, Vector3};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::config::EngineConfig;
use crate::context::GfxContext;
use crate::culling::FrustumCuller;
use crate::descriptor::DescriptorAllocator;
use crate::error::{RenderError, Result};
use crate::frame_loop::FrameLoop;
use crate::image::{Image, ImageCreateInfo};
use crate::layouts::{self, SceneLayouts};
use crate::renderers::{BlobRenderer, BlobSystem, DepthPrePassRenderer, FinalizeRenderer, PbrSceneRenderer, ShadowCascade, ShadowRenderer, SkyboxRenderer, SsaoRenderer};
use crate::resource_state::{AccessState, ResourceState};
use crate::sampler::Samplers;
use crate::scene::{Scene, SceneGpu};
use crate::swapchain::Swapchain;

const HDR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
const SSAO_FORMAT: vk::Format = vk::Format::R8_UNORM;
const MAX_DRAWS_PER_PASS: u32 = 4096;

/// Per-camera-view culled draw state: a pass-private compacted indirect
/// buffer plus an atomic count the compute pass writes into.
struct CulledDraws {
    draws: Buffer,
    count: Buffer,
}

impl CulledDraws {
    fn new(ctx: Arc<GfxContext>) -> Result<Self> {
        let draws = Buffer::new_device_local(
            ctx.clone(),
            (MAX_DRAWS_PER_PASS as usize * std::mem::size_of::<vk::DrawIndexedIndirectCommand>()) as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::INDIRECT_BUFFER,
        )?;
        let count = Buffer::new_device_local(
            ctx,
            std::mem::size_of::<u32>() as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        )?;
        Ok(Self { draws, count })
    }
}

/// Lighting parameters for the current frame; the app layer owns day/night
/// cycling or UI editing of these and hands the result in each frame.
pub struct SunLight {
    pub direction: Vector3<f32>,
    pub radiance: Vector3<f32>,
    pub ambient: Vector3<f32>,
}

pub struct Camera {
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    pub position: Vector3<f32>,
    pub fovy_radians: f32,
    pub aspect: f32,
}

pub struct Engine {
    ctx: Arc<GfxContext>,
    swapchain: Swapchain,
    frame_loop: FrameLoop,

    layouts: SceneLayouts,
    ssao_set_layout: vk::DescriptorSetLayout,
    blob_compute_set_layout: vk::DescriptorSetLayout,
    cubemap_set_layout: vk::DescriptorSetLayout,
    finalize_set_layout: vk::DescriptorSetLayout,

    depth_prepass: DepthPrePassRenderer,
    pbr: PbrSceneRenderer,
    shadow_renderer: ShadowRenderer,
    ssao: SsaoRenderer,
    blob_renderer: BlobRenderer,
    skybox: SkyboxRenderer,
    finalize: FinalizeRenderer,

    frustum_culler: FrustumCuller,
    shadow_cascades: ShadowCascade,
    blob_system: BlobSystem,

    color_image: Image,
    depth_image: Image,
    ssao_raw_image: Image,
    ssao_filtered_image: Image,

    scene: Scene,
    scene_gpu: SceneGpu,
    main_culled: CulledDraws,
    cascade_culled: Vec<CulledDraws>,

    sampler_repeat: vk::Sampler,
    sampler_clamp: vk::Sampler,
    sampler_shadow: vk::Sampler,

    scene_set: vk::DescriptorSet,
    cubemap_set: vk::DescriptorSet,

    config: EngineConfig,
    extent: vk::Extent2D,
    pause_culling: bool,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<GfxContext>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        config: EngineConfig,
        scene: Scene,
        cubemap_view: vk::ImageView,
    ) -> Result<Self> {
        let swapchain = Swapchain::new(ctx.clone(), surface, width, height)?;
        let extent = swapchain.extent;

        let layouts = SceneLayouts::new(&ctx.device)?;
        let ssao_set_layout = layouts::single_image_pair_layout(&ctx.device)?;
        let blob_compute_set_layout = layouts::blob_compute_layout(&ctx.device)?;
        let cubemap_set_layout = layouts::cubemap_layout(&ctx.device)?;
        let finalize_set_layout = layouts::finalize_layout(&ctx.device)?;

        let depth_prepass = DepthPrePassRenderer::new(ctx.clone(), layouts.scene_set_layout, DEPTH_FORMAT)?;
        let pbr = PbrSceneRenderer::new(ctx.clone(), layouts.scene_set_layout, layouts.frame_set_layout, HDR_FORMAT, DEPTH_FORMAT)?;
        let shadow_renderer = ShadowRenderer::new(ctx.clone(), layouts.scene_set_layout, std::mem::size_of::<[[f32; 4]; 4]>() as u32)?;
        let ssao = SsaoRenderer::new(ctx.clone(), ssao_set_layout, config.ssao_slice_count, config.ssao_sample_count)?;
        let blob_renderer = BlobRenderer::new(ctx.clone(), blob_compute_set_layout, layouts.scene_set_layout, HDR_FORMAT, DEPTH_FORMAT)?;
        let skybox = SkyboxRenderer::new(ctx.clone(), cubemap_set_layout, HDR_FORMAT, DEPTH_FORMAT)?;
        let finalize = FinalizeRenderer::new(ctx.clone(), finalize_set_layout)?;

        let frustum_culler = FrustumCuller::new(ctx.clone(), layouts.scene_set_layout)?;
        let shadow_cascades = ShadowCascade::new(ctx.clone(), config.shadow_resolution, config.cascade_count)?;
        let blob_system = BlobSystem::new(ctx.clone(), 1.0, config.max_frames_in_flight as usize)?;

        let color_image = Self::make_offscreen_image(&ctx, extent, HDR_FORMAT, vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE, vk::ImageAspectFlags::COLOR)?;
        let depth_image = Self::make_offscreen_image(&ctx, extent, DEPTH_FORMAT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED, vk::ImageAspectFlags::DEPTH)?;
        let ssao_raw_image = Self::make_offscreen_image(&ctx, extent, SSAO_FORMAT, vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED, vk::ImageAspectFlags::COLOR)?;
        let ssao_filtered_image = Self::make_offscreen_image(&ctx, extent, SSAO_FORMAT, vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED, vk::ImageAspectFlags::COLOR)?;

        let staging_size = 64 * 1024 * 1024;
        let scene_gpu = SceneGpu::upload(ctx.clone(), &scene, staging_size)?;

        let main_culled = CulledDraws::new(ctx.clone())?;
        let cascade_culled = (0..config.cascade_count).map(|_| CulledDraws::new(ctx.clone())).collect::<Result<Vec<_>>>()?;

        let sampler_repeat = Samplers::linear_repeat(&ctx.device)?;
        let sampler_clamp = Samplers::linear_clamp(&ctx.device)?;
        let sampler_shadow = Samplers::shadow_compare(&ctx.device)?;

        let mut bootstrap_allocator = DescriptorAllocator::new(&ctx.device)?;
        let scene_set = Self::build_scene_set(&ctx, &mut bootstrap_allocator, &layouts, &scene_gpu, sampler_repeat)?;
        let cubemap_set = Self::build_cubemap_set(&ctx, &mut bootstrap_allocator, cubemap_set_layout, cubemap_view, sampler_repeat)?;

        let frame_loop = FrameLoop::new(ctx.clone(), config.max_frames_in_flight as usize, swapchain.images.len(), 4 * 1024 * 1024)?;

        Ok(Self {
            ctx,
            swapchain,
            frame_loop,
            layouts,
            ssao_set_layout,
            blob_compute_set_layout,
            cubemap_set_layout,
            finalize_set_layout,
            depth_prepass,
            pbr,
            shadow_renderer,
            ssao,
            blob_renderer,
            skybox,
            finalize,
            frustum_culler,
            shadow_cascades,
            blob_system,
            color_image,
            depth_image,
            ssao_raw_image,
            ssao_filtered_image,
            scene,
            scene_gpu,
            main_culled,
            cascade_culled,
            sampler_repeat,
            sampler_clamp,
            sampler_shadow,
            scene_set,
            cubemap_set,
            config,
            extent,
            pause_culling: false,
        })
    }

    fn make_offscreen_image(ctx: &Arc<GfxContext>, extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags, aspect: vk::ImageAspectFlags) -> Result<Image> {
        Image::new(
            ctx.clone(),
            &ImageCreateInfo {
                format,
                extent: vk::Extent3D { width: extent.width, height: extent.height, depth: 1 },
                mip_levels: 1,
                array_layers: 1,
                usage,
                aspect,
                flags: vk::ImageCreateFlags::empty(),
                view_type: vk::ImageViewType::TYPE_2D,
            },
        )
    }

    fn build_scene_set(
        ctx: &Arc<GfxContext>,
        allocator: &mut DescriptorAllocator,
        layouts: &SceneLayouts,
        scene_gpu: &SceneGpu,
        fallback_sampler: vk::Sampler,
    ) -> Result<vk::DescriptorSet> {
        let sets = allocator.allocate(&ctx.device, layouts.scene_set_layout, 1)?;
        let set = sets[0];

        let section_info = vk::DescriptorBufferInfo::builder().buffer(scene_gpu.section_buffer.handle).range(vk::WHOLE_SIZE).build();
        let instance_info = vk::DescriptorBufferInfo::builder().buffer(scene_gpu.instance_buffer.handle).range(vk::WHOLE_SIZE).build();
        let material_info = vk::DescriptorBufferInfo::builder().buffer(scene_gpu.material_buffer.handle).range(vk::WHOLE_SIZE).build();

        let image_infos: Vec<vk::DescriptorImageInfo> = scene_gpu
            .textures
            .iter()
            .map(|(view, sampler)| {
                vk::DescriptorImageInfo::builder()
                    .image_view(*view)
                    .sampler(if *sampler == vk::Sampler::null() { fallback_sampler } else { *sampler })
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .build()
            })
            .collect();

        let mut writes = vec![
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(std::slice::from_ref(&section_info))
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(std::slice::from_ref(&instance_info))
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(2)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(std::slice::from_ref(&material_info))
                .build(),
        ];
        if !image_infos.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(3)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_infos)
                    .build(),
            );
        }
        unsafe {
            ctx.device.update_descriptor_sets(&writes, &[]);
        }
        Ok(set)
    }

    fn build_cubemap_set(ctx: &Arc<GfxContext>, allocator: &mut DescriptorAllocator, layout: vk::DescriptorSetLayout, view: vk::ImageView, sampler: vk::Sampler) -> Result<vk::DescriptorSet> {
        let sets = allocator.allocate(&ctx.device, layout, 1)?;
        let set = sets[0];
        let info = vk::DescriptorImageInfo::builder().image_view(view).sampler(sampler).image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).build();
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(&info))
            .build();
        unsafe {
            ctx.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(set)
    }

    pub fn set_pause_culling(&mut self, paused: bool) {
        self.pause_culling = paused;
        self.frame_loop.set_pause_culling(paused);
    }

    /// Recreates the swapchain and every screen-sized offscreen attachment
    /// after a resize or `VK_ERROR_OUT_OF_DATE_KHR`. Pipelines don't need
    /// rebuilding since formats don't change, only extents.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.ctx.wait_idle();
        self.swapchain.recreate(width, height)?;
        self.extent = self.swapchain.extent;

        self.color_image = Self::make_offscreen_image(&self.ctx, self.extent, HDR_FORMAT, vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE, vk::ImageAspectFlags::COLOR)?;
        self.depth_image = Self::make_offscreen_image(&self.ctx, self.extent, DEPTH_FORMAT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED, vk::ImageAspectFlags::DEPTH)?;
        self.ssao_raw_image = Self::make_offscreen_image(&self.ctx, self.extent, SSAO_FORMAT, vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED, vk::ImageAspectFlags::COLOR)?;
        self.ssao_filtered_image = Self::make_offscreen_image(&self.ctx, self.extent, SSAO_FORMAT, vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED, vk::ImageAspectFlags::COLOR)?;
        Ok(())
    }

    /// Runs the full per-frame pass sequence and presents. Returns `Ok(())`
    /// on a clean present, or `Err(RenderError::SwapchainOutOfDate)` /
    /// `SwapchainSuboptimal` when the caller should call `resize`.
    pub fn render(&mut self, camera: &Camera, sun: &SunLight) -> Result<()> {
        let (image_index, cbuf) = match self.frame_loop.begin_frame(&self.swapchain)? {
            Some(v) => v,
            None => return Err(RenderError::SwapchainOutOfDate),
        };

        self.blob_system.update()?;
        let view_proj_for_culling = self.frame_loop.culling_view_proj(camera.projection * camera.view);

        self.shadow_cascades.update(camera.fovy_radians, camera.aspect, camera.view, sun.direction, 1000.0);

        let allocator = self.frame_loop.descriptor_allocator_mut();

        unsafe {
            self.depth_image.transition(cbuf, AccessState::Undefined, AccessState::DepthAttachmentWrite);
        }

        Self::reset_count(&self.ctx, cbuf, self.main_culled.count.handle);
        self.frustum_culler.execute(
            cbuf,
            allocator,
            self.scene_set,
            self.scene_gpu.draw_buffer.handle,
            self.main_culled.draws.handle,
            self.main_culled.count.handle,
            self.scene_gpu.section_count,
            &view_proj_for_culling,
        )?;
        Self::indirect_barrier(&self.ctx, cbuf, self.main_culled.draws.handle, self.main_culled.count.handle);

        self.depth_prepass.record(
            cbuf,
            self.extent,
            self.depth_image.view,
            self.scene_set,
            self.scene_gpu.position_buffer.handle,
            self.scene_gpu.index_buffer.handle,
            self.main_culled.draws.handle,
            self.main_culled.count.handle,
            0,
            MAX_DRAWS_PER_PASS,
            std::mem::size_of::<vk::DrawIndexedIndirectCommand>() as u32,
        );

        for (cascade, culled) in self.shadow_cascades.cascades.iter().zip(self.cascade_culled.iter()) {
            let cascade_vp = cascade.projection_matrix * cascade.view_matrix;
            Self::reset_count(&self.ctx, cbuf, culled.count.handle);
            self.frustum_culler.execute(
                cbuf,
                self.frame_loop.descriptor_allocator_mut(),
                self.scene_set,
                self.scene_gpu.draw_buffer.handle,
                culled.draws.handle,
                culled.count.handle,
                self.scene_gpu.section_count,
                &cascade_vp,
            )?;
            Self::indirect_barrier(&self.ctx, cbuf, culled.draws.handle, culled.count.handle);

            self.shadow_renderer.record_cascade(
                cbuf,
                cascade,
                self.config.shadow_resolution,
                self.scene_set,
                culled.draws.handle,
                culled.count.handle,
                0,
                MAX_DRAWS_PER_PASS,
                std::mem::size_of::<vk::DrawIndexedIndirectCommand>() as u32,
            );
        }

        unsafe {
            self.color_image.transition(cbuf, AccessState::Undefined, AccessState::ColorAttachment);
            self.depth_image.transition(cbuf, AccessState::DepthAttachmentWrite, AccessState::DepthAttachmentReadOnly);
        }

        let frame_set = self.build_frame_set(camera, sun)?;
        self.pbr.record(
            cbuf,
            self.extent,
            self.color_image.view,
            self.depth_image.view,
            self.scene_set,
            frame_set,
            [
                self.scene_gpu.position_buffer.handle,
                self.scene_gpu.normal_buffer.handle,
                self.scene_gpu.tangent_buffer.handle,
                self.scene_gpu.uv_buffer.handle,
            ],
            self.scene_gpu.index_buffer.handle,
            self.main_culled.draws.handle,
            self.main_culled.count.handle,
            0,
            MAX_DRAWS_PER_PASS,
            std::mem::size_of::<vk::DrawIndexedIndirectCommand>() as u32,
        );

        unsafe {
            // SSAO's sample/filter dispatches bind every image, including
            // depth, as a storage image (imageLoad/imageStore), so depth
            // needs the GENERAL layout here, not the sampled-read layout the
            // PBR pass used it with.
            self.depth_image.transition(cbuf, AccessState::DepthAttachmentReadOnly, AccessState::ShaderReadWrite);
            self.color_image.transition(cbuf, AccessState::ColorAttachment, AccessState::ShaderReadWrite);
            self.ssao_raw_image.transition(cbuf, AccessState::Undefined, AccessState::ShaderReadWrite);
            self.ssao_filtered_image.transition(cbuf, AccessState::Undefined, AccessState::ShaderReadWrite);
        }

        let (sample_set, filter_x_set, filter_y_set) = self.build_ssao_sets()?;
        self.ssao.record(
            cbuf,
            self.extent,
            sample_set,
            filter_x_set,
            filter_y_set,
            &camera.projection,
            0.5,
            0.025,
            1.0,
            2.0,
        );

        unsafe {
            self.color_image.transition(cbuf, AccessState::ShaderReadWrite, AccessState::ColorAttachment);
            // The blob draw pipeline tests and writes depth against the
            // opaque scene's depth buffer.
            self.depth_image.transition(cbuf, AccessState::ShaderReadWrite, AccessState::DepthAttachmentWrite);
        }

        self.record_blob_pass(cbuf)?;

        self.skybox.record(cbuf, self.extent, self.color_image.view, self.depth_image.view, self.cubemap_set, camera.view, camera.projection);

        unsafe {
            self.color_image.transition(cbuf, AccessState::ColorAttachment, AccessState::ShaderReadOnly);

            let swapchain_image = self.swapchain.images[image_index as usize].image;
            let to_general = ResourceState::image_barrier(swapchain_image, vk::ImageAspectFlags::COLOR, AccessState::Undefined, AccessState::ShaderReadWrite, 1, 1);
            ResourceState::submit_image_barrier(&self.ctx.device, cbuf, to_general);
        }

        let finalize_set = self.build_finalize_set(image_index)?;
        let params = crate::renderers::finalize::AgxPushConstants::from_config(self.config.agx_exposure, self.config.agx_saturation);
        self.finalize.record(cbuf, self.extent, finalize_set, self.swapchain.images[image_index as usize].image, params);

        self.frame_loop.end_frame(&self.swapchain, image_index)
    }

    /// Zeroes the atomic draw-count buffer before a cull dispatch appends to
    /// it. `fill_buffer` runs on the transfer/compute-capable queue this
    /// command buffer belongs to, so no separate barrier is needed before
    /// the cull shader's atomic adds -- both are ordered by submission order
    /// on the same queue and `execute` does its own descriptor write/bind
    /// after this call.
    fn reset_count(ctx: &GfxContext, cbuf: vk::CommandBuffer, count: vk::Buffer) {
        unsafe {
            ctx.device.cmd_fill_buffer(cbuf, count, 0, vk::WHOLE_SIZE, 0);
            let barrier = ResourceState::buffer_barrier(count, AccessState::TransferDst, AccessState::ShaderReadWrite, vk::WHOLE_SIZE);
            ResourceState::submit_buffer_barrier(&ctx.device, cbuf, barrier);
        }
    }

    fn indirect_barrier(ctx: &GfxContext, cbuf: vk::CommandBuffer, draws: vk::Buffer, count: vk::Buffer) {
        unsafe {
            let draws_barrier = ResourceState::buffer_barrier(draws, AccessState::ShaderReadWrite, AccessState::IndirectCommandRead, vk::WHOLE_SIZE);
            ResourceState::submit_buffer_barrier(&ctx.device, cbuf, draws_barrier);
            let count_barrier = ResourceState::buffer_barrier(count, AccessState::ShaderReadWrite, AccessState::IndirectCommandRead, vk::WHOLE_SIZE);
            ResourceState::submit_buffer_barrier(&ctx.device, cbuf, count_barrier);
        }
    }

    fn build_frame_set(&mut self, camera: &Camera, sun: &SunLight) -> Result<vk::DescriptorSet> {
        let uniforms = crate::renderers::pbr::FrameUniforms::new(
            camera.view,
            camera.projection,
            camera.position,
            sun.radiance,
            sun.direction,
            sun.ambient,
            &self.shadow_cascades.cascades,
        );

        let uniform_bytes = unsafe { std::slice::from_raw_parts(&uniforms as *const _ as *const u8, std::mem::size_of_val(&uniforms)) };
        let (uniform_buffer_handle, uniform_buffer_offset) = {
            let alloc = self.frame_loop.transient_allocator_mut().alloc(uniform_bytes.len() as vk::DeviceSize)?;
            alloc.mapped.copy_from_slice(uniform_bytes);
            (alloc.buffer, alloc.offset)
        };

        let allocator = self.frame_loop.descriptor_allocator_mut();
        let sets = allocator.allocate(&self.ctx.device, self.layouts.frame_set_layout, 1)?;
        let set = sets[0];

        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(uniform_buffer_handle)
            .offset(uniform_buffer_offset)
            .range(uniform_bytes.len() as vk::DeviceSize)
            .build();
        let shadow_infos: Vec<vk::DescriptorImageInfo> = self
            .shadow_cascades
            .cascades
            .iter()
            .map(|c| vk::DescriptorImageInfo::builder().image_view(c.image.view).sampler(self.sampler_shadow).image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL).build())
            .collect();

        let mut writes = vec![vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(std::slice::from_ref(&buffer_info))
            .build()];
        if !shadow_infos.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&shadow_infos)
                    .build(),
            );
        }
        unsafe {
            self.ctx.device.update_descriptor_sets(&writes, &[]);
        }

        Ok(set)
    }

    fn image_pair_set(&mut self, input: vk::ImageView, output: vk::ImageView) -> Result<vk::DescriptorSet> {
        let allocator = self.frame_loop.descriptor_allocator_mut();
        let sets = allocator.allocate(&self.ctx.device, self.ssao_set_layout, 1)?;
        let set = sets[0];
        let in_info = vk::DescriptorImageInfo::builder().image_view(input).image_layout(vk::ImageLayout::GENERAL).build();
        let out_info = vk::DescriptorImageInfo::builder().image_view(output).image_layout(vk::ImageLayout::GENERAL).build();
        let writes = [
            vk::WriteDescriptorSet::builder().dst_set(set).dst_binding(0).descriptor_type(vk::DescriptorType::STORAGE_IMAGE).image_info(std::slice::from_ref(&in_info)).build(),
            vk::WriteDescriptorSet::builder().dst_set(set).dst_binding(1).descriptor_type(vk::DescriptorType::STORAGE_IMAGE).image_info(std::slice::from_ref(&out_info)).build(),
        ];
        unsafe {
            self.ctx.device.update_descriptor_sets(&writes, &[]);
        }
        Ok(set)
    }

    fn build_ssao_sets(&mut self) -> Result<(vk::DescriptorSet, vk::DescriptorSet, vk::DescriptorSet)> {
        let sample_set = self.image_pair_set(self.depth_image.view, self.ssao_raw_image.view)?;
        let filter_x_set = self.image_pair_set(self.ssao_raw_image.view, self.ssao_filtered_image.view)?;
        let filter_y_set = self.image_pair_set(self.ssao_filtered_image.view, self.ssao_raw_image.view)?;
        Ok((sample_set, filter_x_set, filter_y_set))
    }

    fn record_blob_pass(&mut self, cbuf: vk::CommandBuffer) -> Result<()> {
        if self.blob_system.domains.is_empty() {
            return Ok(());
        }

        let allocator = self.frame_loop.descriptor_allocator_mut();
        let sets = allocator.allocate(&self.ctx.device, self.blob_compute_set_layout, 1)?;
        let compute_set = sets[0];

        let metaball_info = vk::DescriptorBufferInfo::builder().buffer(self.blob_system.metaball_buffer()).range(vk::WHOLE_SIZE).build();
        let member_info = vk::DescriptorBufferInfo::builder().buffer(self.blob_system.domain_member_buffer()).range(vk::WHOLE_SIZE).build();
        let vertex_info = vk::DescriptorBufferInfo::builder().buffer(self.blob_system.vertex_buffer()).range(vk::WHOLE_SIZE).build();
        let draw_info = vk::DescriptorBufferInfo::builder().buffer(self.blob_system.draw_indirect_buffer()).range(vk::WHOLE_SIZE).build();
        let writes = [
            vk::WriteDescriptorSet::builder().dst_set(compute_set).dst_binding(0).descriptor_type(vk::DescriptorType::STORAGE_BUFFER).buffer_info(std::slice::from_ref(&metaball_info)).build(),
            vk::WriteDescriptorSet::builder().dst_set(compute_set).dst_binding(1).descriptor_type(vk::DescriptorType::STORAGE_BUFFER).buffer_info(std::slice::from_ref(&member_info)).build(),
            vk::WriteDescriptorSet::builder().dst_set(compute_set).dst_binding(2).descriptor_type(vk::DescriptorType::STORAGE_BUFFER).buffer_info(std::slice::from_ref(&vertex_info)).build(),
            vk::WriteDescriptorSet::builder().dst_set(compute_set).dst_binding(3).descriptor_type(vk::DescriptorType::STORAGE_BUFFER).buffer_info(std::slice::from_ref(&draw_info)).build(),
        ];
        unsafe {
            self.ctx.device.update_descriptor_sets(&writes, &[]);
        }

        let domain_count = self.blob_system.domains.len() as u32;
        self.blob_renderer.record_march(cbuf, compute_set, domain_count);
        Self::indirect_barrier(&self.ctx, cbuf, self.blob_system.draw_indirect_buffer(), self.blob_system.draw_indirect_buffer());

        unsafe {
            crate::framebuffer::RenderingScope::begin(
                &self.ctx.device,
                cbuf,
                vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: self.extent },
                &[crate::framebuffer::ColorAttachment { view: self.color_image.view, load_op: vk::AttachmentLoadOp::LOAD, store_op: vk::AttachmentStoreOp::STORE, clear_color: [0.0; 4] }],
                Some(&crate::framebuffer::DepthAttachment { view: self.depth_image.view, load_op: vk::AttachmentLoadOp::LOAD, store_op: vk::AttachmentStoreOp::STORE, clear_depth: 0.0 }),
            );
            self.ctx.device.cmd_set_viewport(cbuf, 0, &[vk::Viewport { x: 0.0, y: 0.0, width: self.extent.width as f32, height: self.extent.height as f32, min_depth: 0.0, max_depth: 1.0 }]);
            self.ctx.device.cmd_set_scissor(cbuf, 0, &[vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: self.extent }]);
        }

        self.blob_renderer.record_draw(cbuf, self.scene_set, self.blob_system.vertex_buffer(), self.blob_system.draw_indirect_buffer(), domain_count);

        unsafe {
            crate::framebuffer::RenderingScope::end(&self.ctx.device, cbuf);
        }

        Ok(())
    }

    fn build_finalize_set(&mut self, image_index: u32) -> Result<vk::DescriptorSet> {
        let allocator = self.frame_loop.descriptor_allocator_mut();
        let sets = allocator.allocate(&self.ctx.device, self.finalize_set_layout, 1)?;
        let set = sets[0];

        let hdr_info = vk::DescriptorImageInfo::builder().image_view(self.color_image.view).sampler(self.sampler_clamp).image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).build();
        let out_info = vk::DescriptorImageInfo::builder().image_view(self.swapchain.images[image_index as usize].linear_view).image_layout(vk::ImageLayout::GENERAL).build();
        let writes = [
            vk::WriteDescriptorSet::builder().dst_set(set).dst_binding(0).descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER).image_info(std::slice::from_ref(&hdr_info)).build(),
            vk::WriteDescriptorSet::builder().dst_set(set).dst_binding(1).descriptor_type(vk::DescriptorType::STORAGE_IMAGE).image_info(std::slice::from_ref(&out_info)).build(),
        ];
        unsafe {
            self.ctx.device.update_descriptor_sets(&writes, &[]);
        }
        Ok(set)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.ctx.wait_idle();
        unsafe {
            self.ctx.device.destroy_sampler(self.sampler_repeat, None);
            self.ctx.device.destroy_sampler(self.sampler_clamp, None);
            self.ctx.device.destroy_sampler(self.sampler_shadow, None);
            self.layouts.destroy(&self.ctx.device);
            self.ctx.device.destroy_descriptor_set_layout(self.ssao_set_layout, None);
            self.ctx.device.destroy_descriptor_set_layout(self.blob_compute_set_layout, None);
            self.ctx.device.destroy_descriptor_set_layout(self.cubemap_set_layout, None);
            self.ctx.device.destroy_descriptor_set_layout(self.finalize_set_layout, None);
        }
    }
}
