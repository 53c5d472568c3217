// Graphics/compute pipeline assembly.
//
// Grounded on lume-rhi's VulkanGraphicsPipeline::create (descriptor -> state
// structs -> vkCreateGraphicsPipelines), generalized in two ways: dynamic
// rendering replaces the vkRenderPass/vkFramebuffer this crate never builds
// (see framebuffer.rs), and the dynamic-state bitset widens from
// viewport/scissor-only to the full set this renderer's pipelines need
// (depth bias, depth bounds, depth test/write/compare, stencil, cull mode,
// front face) so per-pass state doesn't require distinct PSOs.

use ash::vk;
use bitflags::bitflags;
use std::ffi::CString;

use crate::error::{RenderError, Result};

bitflags! {
    pub struct DynamicStateFlags: u32 {
        const VIEWPORT          = 0b0000_0000_0001;
        const SCISSOR           = 0b0000_0000_0010;
        const DEPTH_BIAS        = 0b0000_0000_0100;
        const DEPTH_BOUNDS      = 0b0000_0000_1000;
        const DEPTH_TEST        = 0b0000_0001_0000;
        const DEPTH_WRITE       = 0b0000_0010_0000;
        const DEPTH_COMPARE_OP  = 0b0000_0100_0000;
        const STENCIL_TEST      = 0b0000_1000_0000;
        const CULL_MODE         = 0b0001_0000_0000;
        const FRONT_FACE        = 0b0010_0000_0000;
    }
}

impl DynamicStateFlags {
    pub fn to_vk(self) -> Vec<vk::DynamicState> {
        let mut out = Vec::new();
        let table: &[(DynamicStateFlags, vk::DynamicState)] = &[
            (DynamicStateFlags::VIEWPORT, vk::DynamicState::VIEWPORT),
            (DynamicStateFlags::SCISSOR, vk::DynamicState::SCISSOR),
            (DynamicStateFlags::DEPTH_BIAS, vk::DynamicState::DEPTH_BIAS),
            (DynamicStateFlags::DEPTH_BOUNDS, vk::DynamicState::DEPTH_BOUNDS),
            (DynamicStateFlags::DEPTH_TEST, vk::DynamicState::DEPTH_TEST_ENABLE),
            (DynamicStateFlags::DEPTH_WRITE, vk::DynamicState::DEPTH_WRITE_ENABLE),
            (DynamicStateFlags::DEPTH_COMPARE_OP, vk::DynamicState::DEPTH_COMPARE_OP),
            (DynamicStateFlags::STENCIL_TEST, vk::DynamicState::STENCIL_TEST_ENABLE),
            (DynamicStateFlags::CULL_MODE, vk::DynamicState::CULL_MODE),
            (DynamicStateFlags::FRONT_FACE, vk::DynamicState::FRONT_FACE),
        ];
        for (flag, state) in table {
            if self.contains(*flag) {
                out.push(*state);
            }
        }
        out
    }
}

pub struct GraphicsPipelineConfig<'a> {
    pub vertex_module: vk::ShaderModule,
    pub fragment_module: vk::ShaderModule,
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub color_formats: &'a [vk::Format],
    pub depth_format: Option<vk::Format>,
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constant_ranges: &'a [vk::PushConstantRange],
    pub dynamic_state: DynamicStateFlags,
}

pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

pub struct PipelineFactory;

impl PipelineFactory {
    pub fn create_graphics(device: &ash::Device, cfg: &GraphicsPipelineConfig) -> Result<Pipeline> {
        let entry = CString::new("main").unwrap();
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(cfg.vertex_module)
                .name(&entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(cfg.fragment_module)
                .name(&entry)
                .build(),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(cfg.vertex_bindings)
            .vertex_attribute_descriptions(cfg.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(cfg.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(cfg.cull_mode)
            .front_face(cfg.front_face)
            .depth_bias_enable(false);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = cfg
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::builder()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
                    .build()
            })
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(cfg.depth_test)
            .depth_write_enable(cfg.depth_write)
            .depth_compare_op(cfg.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let dyn_states = cfg.dynamic_state.to_vk();
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dyn_states);

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(cfg.set_layouts)
            .push_constant_ranges(cfg.push_constant_ranges);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(RenderError::Vulkan)?
        };

        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(cfg.color_formats)
            .depth_attachment_format(cfg.depth_format.unwrap_or(vk::Format::UNDEFINED));

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .push_next(&mut rendering_info)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .build();

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| RenderError::Vulkan(e))?
        };

        Ok(Pipeline {
            handle: pipelines[0],
            layout,
        })
    }

    pub fn create_compute(
        device: &ash::Device,
        module: vk::ShaderModule,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Pipeline> {
        let entry = CString::new("main").unwrap();
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry)
            .build();

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(RenderError::Vulkan)?
        };

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout)
            .build();

        let pipelines = unsafe {
            device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| RenderError::Vulkan(e))?
        };

        Ok(Pipeline {
            handle: pipelines[0],
            layout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_state_bitset_maps_every_flag() {
        let all = DynamicStateFlags::all();
        assert_eq!(all.to_vk().len(), 10);
    }
}
