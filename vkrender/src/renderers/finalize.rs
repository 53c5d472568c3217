// Finalize pass: tonemaps the HDR color target down to the swapchain's SDR
// view via AgX, then barriers the swapchain image to present-src.

use ash::vk;
use std::sync::Arc;

use crate::context::GfxContext;
use crate::culling::div_ceil;
use crate::error::{RenderError, Result};
use crate::pipeline::{Pipeline, PipelineFactory};
use crate::resource_state::{AccessState, ResourceState};
use crate::shader::ShaderLoader;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct AgxPushConstants {
    pub ev_min: f32,
    pub ev_max: f32,
    pub mid_gray: f32,
    pub offset: f32,
    pub slope: f32,
    pub power: f32,
    pub saturation: f32,
}

impl AgxPushConstants {
    /// Reasonable defaults for the AgX filmic curve; `exposure` and
    /// `saturation` are the two knobs EngineConfig exposes.
    pub fn from_config(exposure: f32, saturation: f32) -> Self {
        Self {
            ev_min: -12.47393 + exposure.log2(),
            ev_max: 4.026069 + exposure.log2(),
            mid_gray: 0.18,
            offset: 0.0,
            slope: 1.0,
            power: 1.0,
            saturation,
        }
    }
}

pub struct FinalizeRenderer {
    ctx: Arc<GfxContext>,
    pipeline: Pipeline,
}

impl FinalizeRenderer {
    pub fn new(ctx: Arc<GfxContext>, set_layout: vk::DescriptorSetLayout) -> Result<Self> {
        let pipeline = Self::build_pipeline(&ctx, set_layout)?;
        Ok(Self { ctx, pipeline })
    }

    fn build_pipeline(ctx: &GfxContext, set_layout: vk::DescriptorSetLayout) -> Result<Pipeline> {
        let module = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/finalize.comp.spv"))?;
        let push_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .size(std::mem::size_of::<AgxPushConstants>() as u32)
            .build();
        let pipeline = PipelineFactory::create_compute(&ctx.device, module, &[set_layout], &[push_range])?;
        unsafe {
            ctx.device.destroy_shader_module(module, None);
        }
        Ok(pipeline)
    }

    pub fn recreate(&mut self, set_layout: vk::DescriptorSetLayout) -> Result<()> {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.pipeline.layout, None);
        }
        self.pipeline = Self::build_pipeline(&self.ctx, set_layout)?;
        Ok(())
    }

    /// Dispatches the tonemap pass, then transitions the swapchain image to
    /// present-src. `set` must already bind the HDR color input and the
    /// swapchain image's storage view as output.
    pub fn record(
        &self,
        cbuf: vk::CommandBuffer,
        extent: vk::Extent2D,
        set: vk::DescriptorSet,
        swapchain_image: vk::Image,
        params: AgxPushConstants,
    ) {
        unsafe {
            self.ctx.device.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::COMPUTE, self.pipeline.handle);
            self.ctx
                .device
                .cmd_bind_descriptor_sets(cbuf, vk::PipelineBindPoint::COMPUTE, self.pipeline.layout, 0, &[set], &[]);
            self.ctx.device.cmd_push_constants(
                cbuf,
                self.pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                std::slice::from_raw_parts(&params as *const _ as *const u8, std::mem::size_of::<AgxPushConstants>()),
            );
            self.ctx.device.cmd_dispatch(cbuf, div_ceil(extent.width, 8), div_ceil(extent.height, 8), 1);

            let to_present = ResourceState::image_barrier(
                swapchain_image,
                vk::ImageAspectFlags::COLOR,
                AccessState::ShaderReadWrite,
                AccessState::PresentSrc,
                1,
                1,
            );
            ResourceState::submit_image_barrier(&self.ctx.device, cbuf, to_present);
        }
    }
}

impl Drop for FinalizeRenderer {
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
    fn higher_exposure_raises_both_ev_bounds_equally() {
        let base = AgxPushConstants::from_config(1.0, 1.0);
        let brighter = AgxPushConstants::from_config(2.0, 1.0);
        assert!((brighter.ev_min - base.ev_min - 1.0).abs() < 1e-4);
        assert!((brighter.ev_max - base.ev_max - 1.0).abs() < 1e-4);
    }
}
