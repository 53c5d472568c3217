// Main-light PBR pass: loads the depth pre-pass's depth (no clear, no
// write), binds a second descriptor set carrying an inline uniform block of
// camera/sun/cascade data plus a combined-image-sampler array of cascade
// depth maps sampled with depth comparison, then issues the same indirect
// draw as the depth pre-pass against all four vertex streams.

use ash::vk;
use cgmath::{Matrix4, Vector3};
use std::sync::Arc;

use crate::context::GfxContext;
use crate::error::{RenderError, Result};
use crate::framebuffer::{ColorAttachment, DepthAttachment, RenderingScope};
use crate::pipeline::{DynamicStateFlags, GraphicsPipelineConfig, Pipeline, PipelineFactory};
use crate::shader::ShaderLoader;

/// Matches config.toml's default cascade_count; the inline uniform block is
/// a fixed-size GLSL array, so this is the upper bound EngineConfig's
/// cascade_count may request.
pub const MAX_CASCADES: usize = 5;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct CascadeUniform {
    pub proj_view: [[f32; 4]; 4],
    pub sample_bias: f32,
    pub sample_bias_clamp: f32,
    pub normal_bias: f32,
    pub dimension: f32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct SunUniform {
    pub radiance: [f32; 3],
    pub _pad0: f32,
    pub direction: [f32; 3],
    pub _pad1: f32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct FrameUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub camera_pos: [f32; 3],
    pub cascade_count: u32,
    pub sun: SunUniform,
    pub ambient: [f32; 3],
    pub _pad: f32,
    pub cascades: [CascadeUniform; MAX_CASCADES],
}

impl FrameUniforms {
    pub fn new(
        view: Matrix4<f32>,
        projection: Matrix4<f32>,
        camera_pos: Vector3<f32>,
        sun_radiance: Vector3<f32>,
        sun_direction: Vector3<f32>,
        ambient: Vector3<f32>,
        cascades: &[crate::renderers::shadow::Cascade],
    ) -> Self {
        let mut cascade_uniforms = [CascadeUniform {
            proj_view: Matrix4::from_scale(0.0).into(),
            sample_bias: 0.0,
            sample_bias_clamp: 0.0,
            normal_bias: 0.0,
            dimension: 0.0,
        }; MAX_CASCADES];

        for (i, c) in cascades.iter().take(MAX_CASCADES).enumerate() {
            let pv = c.projection_matrix * c.view_matrix;
            cascade_uniforms[i] = CascadeUniform {
                proj_view: pv.into(),
                sample_bias: 0.0015,
                sample_bias_clamp: 0.01,
                normal_bias: 0.5,
                dimension: c.distance,
            };
        }

        Self {
            view: view.into(),
            projection: projection.into(),
            camera_pos: camera_pos.into(),
            cascade_count: cascades.len().min(MAX_CASCADES) as u32,
            sun: SunUniform {
                radiance: sun_radiance.into(),
                _pad0: 0.0,
                direction: sun_direction.into(),
                _pad1: 0.0,
            },
            ambient: ambient.into(),
            _pad: 0.0,
            cascades: cascade_uniforms,
        }
    }
}

pub struct PbrSceneRenderer {
    ctx: Arc<GfxContext>,
    pipeline: Pipeline,
    color_format: vk::Format,
    depth_format: vk::Format,
}

impl PbrSceneRenderer {
    pub fn new(
        ctx: Arc<GfxContext>,
        scene_set_layout: vk::DescriptorSetLayout,
        frame_set_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let pipeline = Self::build_pipeline(&ctx, scene_set_layout, frame_set_layout, color_format, depth_format)?;
        Ok(Self { ctx, pipeline, color_format, depth_format })
    }

    fn build_pipeline(
        ctx: &GfxContext,
        scene_set_layout: vk::DescriptorSetLayout,
        frame_set_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Pipeline> {
        let vs = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/pbr.vert.spv"))?;
        let fs = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/pbr.frag.spv"))?;

        // position, normal, tangent, uv streams, one binding each
        let bindings = [
            vk::VertexInputBindingDescription::builder().binding(0).stride(12).input_rate(vk::VertexInputRate::VERTEX).build(),
            vk::VertexInputBindingDescription::builder().binding(1).stride(12).input_rate(vk::VertexInputRate::VERTEX).build(),
            vk::VertexInputBindingDescription::builder().binding(2).stride(16).input_rate(vk::VertexInputRate::VERTEX).build(),
            vk::VertexInputBindingDescription::builder().binding(3).stride(8).input_rate(vk::VertexInputRate::VERTEX).build(),
        ];
        let attributes = [
            vk::VertexInputAttributeDescription::builder().location(0).binding(0).format(vk::Format::R32G32B32_SFLOAT).offset(0).build(),
            vk::VertexInputAttributeDescription::builder().location(1).binding(1).format(vk::Format::R32G32B32_SFLOAT).offset(0).build(),
            vk::VertexInputAttributeDescription::builder().location(2).binding(2).format(vk::Format::R32G32B32A32_SFLOAT).offset(0).build(),
            vk::VertexInputAttributeDescription::builder().location(3).binding(3).format(vk::Format::R32G32_SFLOAT).offset(0).build(),
        ];

        let cfg = GraphicsPipelineConfig {
            vertex_module: vs,
            fragment_module: fs,
            vertex_bindings: &bindings,
            vertex_attributes: &attributes,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: false,
            depth_compare: vk::CompareOp::GREATER_OR_EQUAL,
            color_formats: &[color_format],
            depth_format: Some(depth_format),
            set_layouts: &[scene_set_layout, frame_set_layout],
            push_constant_ranges: &[],
            dynamic_state: DynamicStateFlags::VIEWPORT | DynamicStateFlags::SCISSOR,
        };
        let pipeline = PipelineFactory::create_graphics(&ctx.device, &cfg)?;

        unsafe {
            ctx.device.destroy_shader_module(vs, None);
            ctx.device.destroy_shader_module(fs, None);
        }
        Ok(pipeline)
    }

    pub fn recreate(&mut self, scene_set_layout: vk::DescriptorSetLayout, frame_set_layout: vk::DescriptorSetLayout) -> Result<()> {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.pipeline.layout, None);
        }
        self.pipeline = Self::build_pipeline(&self.ctx, scene_set_layout, frame_set_layout, self.color_format, self.depth_format)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        cbuf: vk::CommandBuffer,
        extent: vk::Extent2D,
        color_view: vk::ImageView,
        depth_view: vk::ImageView,
        scene_set: vk::DescriptorSet,
        frame_set: vk::DescriptorSet,
        vertex_buffers: [vk::Buffer; 4],
        index_buffer: vk::Buffer,
        indirect_buffer: vk::Buffer,
        count_buffer: vk::Buffer,
        count_offset: vk::DeviceSize,
        max_draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            RenderingScope::begin(
                &self.ctx.device,
                cbuf,
                vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent },
                &[ColorAttachment {
                    view: color_view,
                    load_op: vk::AttachmentLoadOp::LOAD,
                    store_op: vk::AttachmentStoreOp::STORE,
                    clear_color: [0.0, 0.0, 0.0, 0.0],
                }],
                Some(&DepthAttachment {
                    view: depth_view,
                    load_op: vk::AttachmentLoadOp::LOAD,
                    store_op: vk::AttachmentStoreOp::STORE,
                    clear_depth: 0.0,
                }),
            );

            self.ctx.device.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle);
            self.ctx.device.cmd_set_viewport(
                cbuf,
                0,
                &[vk::Viewport { x: 0.0, y: 0.0, width: extent.width as f32, height: extent.height as f32, min_depth: 0.0, max_depth: 1.0 }],
            );
            self.ctx.device.cmd_set_scissor(cbuf, 0, &[vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent }]);

            self.ctx.device.cmd_bind_descriptor_sets(
                cbuf,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[scene_set, frame_set],
                &[],
            );
            self.ctx.device.cmd_bind_vertex_buffers(cbuf, 0, &vertex_buffers, &[0, 0, 0, 0]);
            self.ctx.device.cmd_bind_index_buffer(cbuf, index_buffer, 0, vk::IndexType::UINT32);

            self.ctx.device.cmd_draw_indexed_indirect_count(
                cbuf,
                indirect_buffer,
                0,
                count_buffer,
                count_offset,
                max_draw_count,
                stride,
            );

            RenderingScope::end(&self.ctx.device, cbuf);
        }
    }
}

impl Drop for PbrSceneRenderer {
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
    fn frame_uniforms_cascade_count_matches_input_len() {
        let u = FrameUniforms::new(
            Matrix4::from_scale(1.0),
            Matrix4::from_scale(1.0),
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(0.0, -1.0, 0.0),
            Vector3::new(0.1, 0.1, 0.1),
            &[],
        );
        assert_eq!(u.cascade_count, 0);
    }
}
