// Depth pre-pass: position-only indirect draw writing depth, no color
// attachments. Clears to 0.0 for the reverse-Z convention. Grounded on the
// DepthPrePassRenderer/PbrSceneRenderer shared envelope: scene set at 0,
// vertex streams bound per-pass, 32-bit index buffer, indirect draw.

use ash::vk;
use std::sync::Arc;

use crate::context::GfxContext;
use crate::error::Result;
use crate::framebuffer::{DepthAttachment, RenderingScope};
use crate::pipeline::{DynamicStateFlags, GraphicsPipelineConfig, Pipeline, PipelineFactory};
use crate::shader::ShaderLoader;

pub struct DepthPrePassRenderer {
    ctx: Arc<GfxContext>,
    pipeline: Pipeline,
    depth_format: vk::Format,
}

impl DepthPrePassRenderer {
    pub fn new(ctx: Arc<GfxContext>, scene_set_layout: vk::DescriptorSetLayout, depth_format: vk::Format) -> Result<Self> {
        let pipeline = Self::build_pipeline(&ctx, scene_set_layout, depth_format)?;
        Ok(Self { ctx, pipeline, depth_format })
    }

    fn build_pipeline(ctx: &GfxContext, scene_set_layout: vk::DescriptorSetLayout, depth_format: vk::Format) -> Result<Pipeline> {
        let vs = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/depth_prepass.vert.spv"))?;
        let fs = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/depth_prepass.frag.spv"))?;

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
            depth_format: Some(depth_format),
            set_layouts: &[scene_set_layout],
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

    pub fn recreate(&mut self, scene_set_layout: vk::DescriptorSetLayout) -> Result<()> {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.pipeline.layout, None);
        }
        self.pipeline = Self::build_pipeline(&self.ctx, scene_set_layout, self.depth_format)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        cbuf: vk::CommandBuffer,
        extent: vk::Extent2D,
        depth_view: vk::ImageView,
        scene_set: vk::DescriptorSet,
        position_buffer: vk::Buffer,
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
                &[],
                Some(&DepthAttachment {
                    view: depth_view,
                    load_op: vk::AttachmentLoadOp::CLEAR,
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
                .cmd_bind_descriptor_sets(cbuf, vk::PipelineBindPoint::GRAPHICS, self.pipeline.layout, 0, &[scene_set], &[]);
            self.ctx.device.cmd_bind_vertex_buffers(cbuf, 0, &[position_buffer], &[0]);
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

impl Drop for DepthPrePassRenderer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.pipeline.layout, None);
        }
    }
}
