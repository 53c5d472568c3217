// Cascaded shadow maps.
//
// Cascade-fit math (Nvidia PSSM split blend, frustum-corner reprojection,
// texel snapping, safe-up-vector picking) is grounded on
// ShadowCaster.cpp's ShadowCascade::update/calculateSplitDistance/
// createTexelAlignedViewMatrix/pickSafeUpVector, reimplemented with cgmath
// instead of glm. The depth-only draw itself follows the DepthPrePassRenderer
// envelope (scene set at 0, position-only vertex stream, indirect draw).

use ash::vk;
use cgmath::{InnerSpace, Matrix4, Vector3, Vector4};
use std::sync::Arc;

use crate::context::GfxContext;
use crate::error::{RenderError, Result};
use crate::image::{Image, ImageCreateInfo};
use crate::pipeline::{DynamicStateFlags, GraphicsPipelineConfig, Pipeline, PipelineFactory};
use crate::resource_state::{AccessState, ResourceState};
use crate::shader::ShaderLoader;

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Blend factor between the logarithmic and uniform split schemes; 1.0 is
/// fully logarithmic, 0.0 fully uniform. Matches the original's `lambda`.
const SPLIT_LAMBDA: f32 = 0.5;

pub struct DepthBiasConstants {
    pub constant: f32,
    pub clamp: f32,
    pub slope: f32,
}

pub struct Cascade {
    pub image: Image,
    pub view_matrix: Matrix4<f32>,
    pub projection_matrix: Matrix4<f32>,
    /// Far extent of this cascade along the view direction, used to select
    /// which cascade a fragment samples in the PBR pass.
    pub distance: f32,
    pub bias: DepthBiasConstants,
}

fn pick_safe_up_vector(direction: Vector3<f32>, up: Vector3<f32>) -> Vector3<f32> {
    let dot = direction.dot(up);
    if dot < -0.99 || dot > 0.99 {
        let a = Vector3::new(up.x.abs(), up.y.abs(), up.z.abs());
        if a.x < a.y && a.x < a.z {
            Vector3::new(1.0, 0.0, 0.0)
        } else if a.y < a.z {
            Vector3::new(0.0, 1.0, 0.0)
        } else {
            Vector3::new(0.0, 0.0, 1.0)
        }
    } else {
        up
    }
}

fn calculate_split_distance(lambda: f32, near_clip: f32, far_clip: f32, clip_range: f32, f: f32) -> f32 {
    let clip_ratio = far_clip / near_clip;
    let log = near_clip * clip_ratio.powf(f);
    let uniform = near_clip + clip_range * f;
    let d = lambda * (log - uniform) + uniform;
    (d - near_clip) / clip_range
}

fn texel_aligned_view_matrix(light_dir: Vector3<f32>, resolution: u32, radius: f32, frustum_center: Vector3<f32>) -> Matrix4<f32> {
    let up = pick_safe_up_vector(light_dir, Vector3::new(0.0, 1.0, 0.0));
    let zero_view = Matrix4::look_to_rh(cgmath::Point3::new(0.0, 0.0, 0.0), -light_dir, up);

    let center_light_space = zero_view * frustum_center.extend(1.0);
    let world_space_unit = radius * 2.0 / resolution as f32;
    let snapped_x = (center_light_space.x / world_space_unit).round() * world_space_unit;
    let snapped_y = (center_light_space.y / world_space_unit).round() * world_space_unit;
    let snapped_light_space = Vector4::new(snapped_x, snapped_y, center_light_space.z, 1.0);

    let inv_zero_view = cgmath::SquareMatrix::invert(&zero_view).expect("view matrix is always invertible");
    let snapped_world = inv_zero_view * snapped_light_space;
    let snapped_center = Vector3::new(snapped_world.x, snapped_world.y, snapped_world.z);

    Matrix4::look_to_rh(cgmath::Point3::from_vec(snapped_center), -light_dir, up)
}

/// A set of depth-only cascades covering increasing distance bands of the
/// camera frustum, re-fit every frame to the camera and sun direction.
pub struct ShadowCascade {
    ctx: Arc<GfxContext>,
    pub cascades: Vec<Cascade>,
    resolution: u32,
}

impl ShadowCascade {
    pub fn new(ctx: Arc<GfxContext>, resolution: u32, count: u32) -> Result<Self> {
        let mut cascades = Vec::with_capacity(count as usize);
        for i in 0..count {
            let image = Image::new(
                ctx.clone(),
                &ImageCreateInfo {
                    format: DEPTH_FORMAT,
                    extent: vk::Extent3D { width: resolution, height: resolution, depth: 1 },
                    mip_levels: 1,
                    array_layers: 1,
                    usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                    aspect: vk::ImageAspectFlags::DEPTH,
                    flags: vk::ImageCreateFlags::empty(),
                    view_type: vk::ImageViewType::TYPE_2D,
                },
            )?;
            // deeper cascades get progressively less bias pressure since
            // their texel footprint in world space is larger
            let slope = 1.5 + 0.5 * i as f32;
            cascades.push(Cascade {
                image,
                view_matrix: Matrix4::from_scale(1.0),
                projection_matrix: Matrix4::from_scale(1.0),
                distance: 0.0,
                bias: DepthBiasConstants { constant: 1.25, clamp: 0.0, slope },
            });
        }

        Ok(Self { ctx, cascades, resolution })
    }

    /// Re-fits every cascade to the camera's current frustum and the sun
    /// direction. `far_clip` bounds the camera frustum slice this cascade
    /// set covers (the camera's own projection is infinite-far, so it can't
    /// be reused directly for frustum-corner reprojection).
    pub fn update(&mut self, fovy: f32, aspect: f32, view_matrix: Matrix4<f32>, light_dir: Vector3<f32>, far_clip: f32) {
        let near_clip = 0.1_f32;
        let clip_range = far_clip - near_clip;

        let camera_projection = cgmath::perspective(cgmath::Rad(fovy), aspect, near_clip, far_clip);
        let camera_inverse = cgmath::SquareMatrix::invert(&(camera_projection * view_matrix))
            .expect("camera view-projection is always invertible");

        let count = self.cascades.len();
        let mut last_split_dist = 0.0_f32;
        for i in 0..count {
            let f = (i + 1) as f32 / count as f32;
            let split = calculate_split_distance(SPLIT_LAMBDA, near_clip, far_clip, clip_range, f);

            let mut frustum_corners = [
                Vector3::new(-1.0, 1.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(1.0, -1.0, 0.0),
                Vector3::new(-1.0, -1.0, 0.0),
                Vector3::new(-1.0, 1.0, 1.0),
                Vector3::new(1.0, 1.0, 1.0),
                Vector3::new(1.0, -1.0, 1.0),
                Vector3::new(-1.0, -1.0, 1.0),
            ];

            for c in frustum_corners.iter_mut() {
                let p = camera_inverse * c.extend(1.0);
                *c = Vector3::new(p.x / p.w, p.y / p.w, p.z / p.w);
            }

            for j in 0..4 {
                let dist = frustum_corners[j + 4] - frustum_corners[j];
                frustum_corners[j + 4] = frustum_corners[j] + dist * split;
                frustum_corners[j] = frustum_corners[j] + dist * last_split_dist;
            }

            let mut frustum_center = Vector3::new(0.0, 0.0, 0.0);
            for c in &frustum_corners {
                frustum_center += *c;
            }
            frustum_center /= 8.0;

            let mut radius = 0.0_f32;
            for c in &frustum_corners {
                let d = (*c - frustum_center).magnitude();
                radius = radius.max(d);
            }
            radius = (radius * 16.0).ceil() / 16.0;

            let light_view = texel_aligned_view_matrix(light_dir, self.resolution, radius, frustum_center);
            let light_ortho = cgmath::ortho(-radius, radius, -radius, radius, 1000.0, -1000.0);

            self.cascades[i].distance = split * clip_range * 2.0;
            self.cascades[i].view_matrix = light_view;
            self.cascades[i].projection_matrix = light_ortho;
            last_split_dist = split;
        }
    }
}

/// Depth-only pass issuing one indirect draw per cascade against that
/// cascade's view-projection, with per-cascade depth bias.
pub struct ShadowRenderer {
    ctx: Arc<GfxContext>,
    pipeline: Pipeline,
}

impl ShadowRenderer {
    pub fn new(ctx: Arc<GfxContext>, scene_set_layout: vk::DescriptorSetLayout, push_constant_size: u32) -> Result<Self> {
        let pipeline = Self::build_pipeline(&ctx, scene_set_layout, push_constant_size)?;
        Ok(Self { ctx, pipeline })
    }

    fn build_pipeline(ctx: &GfxContext, scene_set_layout: vk::DescriptorSetLayout, push_constant_size: u32) -> Result<Pipeline> {
        let vs = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/shadow.vert.spv"))?;
        let fs = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/shadow.frag.spv"))?;

        let push_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(push_constant_size)
            .build();

        let bindings = [vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<[f32; 3]>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()];
        let attributes = [vk::VertexInputAttributeDescription::builder()
            .location(0)
            .binding(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(0)
            .build()];

        let cfg = GraphicsPipelineConfig {
            vertex_module: vs,
            fragment_module: fs,
            vertex_bindings: &bindings,
            vertex_attributes: &attributes,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::GREATER,
            color_formats: &[],
            depth_format: Some(DEPTH_FORMAT),
            set_layouts: &[scene_set_layout],
            push_constant_ranges: &[push_range],
            dynamic_state: DynamicStateFlags::VIEWPORT | DynamicStateFlags::SCISSOR | DynamicStateFlags::DEPTH_BIAS,
        };
        let pipeline = PipelineFactory::create_graphics(&ctx.device, &cfg)?;

        unsafe {
            ctx.device.destroy_shader_module(vs, None);
            ctx.device.destroy_shader_module(fs, None);
        }
        Ok(pipeline)
    }

    pub fn recreate(&mut self, scene_set_layout: vk::DescriptorSetLayout, push_constant_size: u32) -> Result<()> {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.pipeline.layout, None);
        }
        self.pipeline = Self::build_pipeline(&self.ctx, scene_set_layout, push_constant_size)?;
        Ok(())
    }

    /// Records one cascade's depth-only pass: transitions its depth image
    /// into DepthAttachmentWrite, begins rendering with clear=0.0 (reverse-Z),
    /// sets the per-cascade depth bias, binds the scene set and issues the
    /// indirect draw, then leaves the image in DepthAttachmentReadOnly for
    /// the PBR pass's shadow sampling.
    pub fn record_cascade(
        &self,
        cbuf: vk::CommandBuffer,
        cascade: &Cascade,
        resolution: u32,
        scene_set: vk::DescriptorSet,
        indirect_buffer: vk::Buffer,
        count_buffer: vk::Buffer,
        count_offset: vk::DeviceSize,
        max_draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            let to_write = ResourceState::image_barrier(
                cascade.image.handle,
                vk::ImageAspectFlags::DEPTH,
                AccessState::Undefined,
                AccessState::DepthAttachmentWrite,
                1,
                1,
            );
            ResourceState::submit_image_barrier(&self.ctx.device, cbuf, to_write);

            let depth_attachment = vk::RenderingAttachmentInfo::builder()
                .image_view(cascade.image.view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 0.0, stencil: 0 },
                });
            let rendering_info = vk::RenderingInfo::builder()
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: vk::Extent2D { width: resolution, height: resolution },
                })
                .layer_count(1)
                .depth_attachment(&depth_attachment);
            self.ctx.device.cmd_begin_rendering(cbuf, &rendering_info);

            self.ctx.device.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle);
            self.ctx.device.cmd_set_viewport(
                cbuf,
                0,
                &[vk::Viewport { x: 0.0, y: 0.0, width: resolution as f32, height: resolution as f32, min_depth: 0.0, max_depth: 1.0 }],
            );
            self.ctx.device.cmd_set_scissor(
                cbuf,
                0,
                &[vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: vk::Extent2D { width: resolution, height: resolution } }],
            );
            self.ctx.device.cmd_set_depth_bias(cbuf, cascade.bias.constant, cascade.bias.clamp, cascade.bias.slope);

            let view_proj = cascade.projection_matrix * cascade.view_matrix;
            let vp_ref: &[f32; 16] = view_proj.as_ref();
            self.ctx.device.cmd_push_constants(
                cbuf,
                self.pipeline.layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                std::slice::from_raw_parts(vp_ref.as_ptr() as *const u8, std::mem::size_of::<[f32; 16]>()),
            );

            self.ctx
                .device
                .cmd_bind_descriptor_sets(cbuf, vk::PipelineBindPoint::GRAPHICS, self.pipeline.layout, 0, &[scene_set], &[]);

            self.ctx.device.cmd_draw_indexed_indirect_count(
                cbuf,
                indirect_buffer,
                0,
                count_buffer,
                count_offset,
                max_draw_count,
                stride,
            );

            self.ctx.device.cmd_end_rendering(cbuf);

            let to_read = ResourceState::image_barrier(
                cascade.image.handle,
                vk::ImageAspectFlags::DEPTH,
                AccessState::DepthAttachmentWrite,
                AccessState::DepthAttachmentReadOnly,
                1,
                1,
            );
            ResourceState::submit_image_barrier(&self.ctx.device, cbuf, to_read);
        }
    }
}

impl Drop for ShadowRenderer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.pipeline.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_vector_switches_when_nearly_parallel() {
        let up = pick_safe_up_vector(Vector3::new(0.0, 1.0, 0.0), Vector3::new(0.0, 1.0, 0.0));
        assert_ne!(up, Vector3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn up_vector_unchanged_when_not_parallel() {
        let up = pick_safe_up_vector(Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(up, Vector3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn split_distances_are_monotonic_and_bounded() {
        let near = 0.1;
        let far = 100.0;
        let range = far - near;
        let mut last = 0.0;
        for i in 1..=4 {
            let f = i as f32 / 4.0;
            let split = calculate_split_distance(0.5, near, far, range, f);
            assert!(split > last);
            last = split;
        }
        assert!((last - 1.0).abs() < 1e-4);
    }
}
