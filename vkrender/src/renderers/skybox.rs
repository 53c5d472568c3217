// Skybox: 36 hard-coded cube vertices, depth test/write disabled, no
// culling, sampling a single cubemap packed by ImageUploader::load_cubemap.
// Push constant carries the camera's view-projection with translation
// stripped so the cube always appears infinitely far away.

use ash::vk;
use cgmath::{Matrix3, Matrix4, SquareMatrix};
use std::sync::Arc;

use crate::context::GfxContext;
use crate::error::{RenderError, Result};
use crate::framebuffer::{ColorAttachment, DepthAttachment, RenderingScope};
use crate::pipeline::{DynamicStateFlags, GraphicsPipelineConfig, Pipeline, PipelineFactory};
use crate::shader::ShaderLoader;

/// 36 unit-cube vertices (12 triangles, one per face pair), positions only
/// -- the cubemap is sampled using the vertex position as the direction.
pub const CUBE_VERTICES: [[f32; 3]; 36] = [
    [-1.0, 1.0, -1.0], [-1.0, -1.0, -1.0], [1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0], [1.0, 1.0, -1.0], [-1.0, 1.0, -1.0],

    [-1.0, -1.0, 1.0], [-1.0, -1.0, -1.0], [-1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0], [-1.0, 1.0, 1.0], [-1.0, -1.0, 1.0],

    [1.0, -1.0, -1.0], [1.0, -1.0, 1.0], [1.0, 1.0, 1.0],
    [1.0, 1.0, 1.0], [1.0, 1.0, -1.0], [1.0, -1.0, -1.0],

    [-1.0, -1.0, 1.0], [-1.0, 1.0, 1.0], [1.0, 1.0, 1.0],
    [1.0, 1.0, 1.0], [1.0, -1.0, 1.0], [-1.0, -1.0, 1.0],

    [-1.0, 1.0, -1.0], [1.0, 1.0, -1.0], [1.0, 1.0, 1.0],
    [1.0, 1.0, 1.0], [-1.0, 1.0, 1.0], [-1.0, 1.0, -1.0],

    [-1.0, -1.0, -1.0], [-1.0, -1.0, 1.0], [1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0], [-1.0, -1.0, 1.0], [1.0, -1.0, 1.0],
];

/// Strips translation from `view` so the skybox cube never moves relative
/// to the camera.
pub fn strip_translation(view: Matrix4<f32>, projection: Matrix4<f32>) -> Matrix4<f32> {
    let rotation: Matrix3<f32> = Matrix3::from_cols(
        view.x.truncate(),
        view.y.truncate(),
        view.z.truncate(),
    );
    projection * Matrix4::from(rotation)
}

pub struct SkyboxRenderer {
    ctx: Arc<GfxContext>,
    pipeline: Pipeline,
    color_format: vk::Format,
    depth_format: vk::Format,
    vertex_buffer: crate::buffer::Buffer,
}

impl SkyboxRenderer {
    pub fn new(
        ctx: Arc<GfxContext>,
        set_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let pipeline = Self::build_pipeline(&ctx, set_layout, color_format, depth_format)?;

        let mut vertex_buffer = crate::buffer::Buffer::new_host_visible(
            ctx.clone(),
            std::mem::size_of_val(&CUBE_VERTICES) as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        vertex_buffer.write(unsafe {
            std::slice::from_raw_parts(CUBE_VERTICES.as_ptr() as *const u8, std::mem::size_of_val(&CUBE_VERTICES))
        })?;

        Ok(Self { ctx, pipeline, color_format, depth_format, vertex_buffer })
    }

    fn build_pipeline(
        ctx: &GfxContext,
        set_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Pipeline> {
        let vs = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/skybox.vert.spv"))?;
        let fs = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/skybox.frag.spv"))?;

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

        let push_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .size(std::mem::size_of::<[[f32; 4]; 4]>() as u32)
            .build();

        let cfg = GraphicsPipelineConfig {
            vertex_module: vs,
            fragment_module: fs,
            vertex_bindings: &bindings,
            vertex_attributes: &attributes,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::ALWAYS,
            color_formats: &[color_format],
            depth_format: Some(depth_format),
            set_layouts: &[set_layout],
            push_constant_ranges: &[push_range],
            dynamic_state: DynamicStateFlags::VIEWPORT | DynamicStateFlags::SCISSOR,
        };
        let pipeline = PipelineFactory::create_graphics(&ctx.device, &cfg)?;

        unsafe {
            ctx.device.destroy_shader_module(vs, None);
            ctx.device.destroy_shader_module(fs, None);
        }
        Ok(pipeline)
    }

    pub fn recreate(&mut self, set_layout: vk::DescriptorSetLayout) -> Result<()> {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.pipeline.layout, None);
        }
        self.pipeline = Self::build_pipeline(&self.ctx, set_layout, self.color_format, self.depth_format)?;
        Ok(())
    }

    pub fn record(
        &self,
        cbuf: vk::CommandBuffer,
        extent: vk::Extent2D,
        color_view: vk::ImageView,
        depth_view: vk::ImageView,
        cubemap_set: vk::DescriptorSet,
        view: Matrix4<f32>,
        projection: Matrix4<f32>,
    ) {
        let view_proj = strip_translation(view, projection);
        let vp_ref: [[f32; 4]; 4] = view_proj.into();

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

            self.ctx
                .device
                .cmd_bind_descriptor_sets(cbuf, vk::PipelineBindPoint::GRAPHICS, self.pipeline.layout, 0, &[cubemap_set], &[]);
            self.ctx.device.cmd_push_constants(
                cbuf,
                self.pipeline.layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                std::slice::from_raw_parts(vp_ref.as_ptr() as *const u8, std::mem::size_of::<[[f32; 4]; 4]>()),
            );
            self.ctx.device.cmd_bind_vertex_buffers(cbuf, 0, &[self.vertex_buffer.handle], &[0]);
            self.ctx.device.cmd_draw(cbuf, CUBE_VERTICES.len() as u32, 1, 0, 0);

            RenderingScope::end(&self.ctx.device, cbuf);
        }
    }
}

impl Drop for SkyboxRenderer {
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
    fn cube_has_36_vertices_forming_12_triangles() {
        assert_eq!(CUBE_VERTICES.len(), 36);
        assert_eq!(CUBE_VERTICES.len() % 3, 0);
    }

    #[test]
    fn strip_translation_drops_camera_position() {
        let view = Matrix4::from_translation(cgmath::Vector3::new(10.0, 20.0, 30.0));
        let proj = Matrix4::from_scale(1.0);
        let stripped = strip_translation(view, proj);
        // translating the view should not change the stripped result
        let view2 = Matrix4::from_translation(cgmath::Vector3::new(-5.0, 0.0, 100.0));
        let stripped2 = strip_translation(view2, proj);
        assert_eq!(Into::<[[f32; 4]; 4]>::into(stripped), Into::<[[f32; 4]; 4]>::into(stripped2));
    }
}
