// Screen-space ambient occlusion: one sampling compute pass plus a
// separable two-pass cross-bilateral filter. Uses the inverse-projection
// fast path (depth -> view-space position via `P^-1[0][0]`/`P^-1[1][1]`
// scale+offset rather than a full unproject matrix multiply) and the
// compute-pipeline assembly idiom in thundr/src/pipelines/compute.rs.

use ash::vk;
use cgmath::Matrix4;
use std::sync::Arc;

use crate::context::GfxContext;
use crate::error::{RenderError, Result};
use crate::pipeline::{Pipeline, PipelineFactory};
use crate::shader::ShaderLoader;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct SamplePushConstants {
    pub inv_proj_scale: [f32; 2],
    pub inv_proj_offset: [f32; 2],
    pub radius: f32,
    pub bias: f32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct FilterPushConstants {
    pub sharpness: f32,
    pub exponent: f32,
    pub direction: [f32; 2],
}

/// Derives the (scale, offset) pair used by the sample shader's fast
/// unproject path, so `pos_vs = depth_vs * (uv * scale + offset)` replaces
/// a full inverse-projection matrix multiply per pixel.
pub fn inverse_projection_fast_path(projection: &Matrix4<f32>) -> ([f32; 2], [f32; 2]) {
    let inv_00 = 1.0 / projection.x.x;
    let inv_11 = 1.0 / projection.y.y;
    // uv in [0,1] maps to NDC [-1,1]: ndc = uv*2-1, so scale by 2*inv and
    // offset by -inv, matching the shader's `uv*scale + offset` form.
    let scale = [2.0 * inv_00, 2.0 * inv_11];
    let offset = [-inv_00, -inv_11];
    (scale, offset)
}

pub struct SsaoRenderer {
    ctx: Arc<GfxContext>,
    sample_pipeline: Pipeline,
    filter_pipeline: Pipeline,
    slice_count: u32,
    sample_count: u32,
}

impl SsaoRenderer {
    pub fn new(
        ctx: Arc<GfxContext>,
        set_layout: vk::DescriptorSetLayout,
        slice_count: u32,
        sample_count: u32,
    ) -> Result<Self> {
        let (sample_pipeline, filter_pipeline) = Self::build_pipelines(&ctx, set_layout)?;
        Ok(Self { ctx, sample_pipeline, filter_pipeline, slice_count, sample_count })
    }

    fn build_pipelines(ctx: &GfxContext, set_layout: vk::DescriptorSetLayout) -> Result<(Pipeline, Pipeline)> {
        let sample_module = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/ssao_sample.comp.spv"))?;
        let filter_module = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/ssao_filter.comp.spv"))?;

        let sample_push = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .size(std::mem::size_of::<SamplePushConstants>() as u32)
            .build();
        let filter_push = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .size(std::mem::size_of::<FilterPushConstants>() as u32)
            .build();

        let sample_pipeline = PipelineFactory::create_compute(&ctx.device, sample_module, &[set_layout], &[sample_push])?;
        let filter_pipeline = PipelineFactory::create_compute(&ctx.device, filter_module, &[set_layout], &[filter_push])?;

        unsafe {
            ctx.device.destroy_shader_module(sample_module, None);
            ctx.device.destroy_shader_module(filter_module, None);
        }
        Ok((sample_pipeline, filter_pipeline))
    }

    pub fn recreate(&mut self, set_layout: vk::DescriptorSetLayout) -> Result<()> {
        unsafe {
            self.ctx.device.destroy_pipeline(self.sample_pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.sample_pipeline.layout, None);
            self.ctx.device.destroy_pipeline(self.filter_pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.filter_pipeline.layout, None);
        }
        let (sample_pipeline, filter_pipeline) = Self::build_pipelines(&self.ctx, set_layout)?;
        self.sample_pipeline = sample_pipeline;
        self.filter_pipeline = filter_pipeline;
        Ok(())
    }

    /// Records the sample pass into `raw_ao_set` (InDepth -> OutRawAO), then
    /// the X and Y filter passes. Each `_set` is pre-bound by the caller
    /// with the input/output images this dispatch reads/writes, since the
    /// binding layout is specialization-constant driven and opaque here.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        cbuf: vk::CommandBuffer,
        extent: vk::Extent2D,
        sample_set: vk::DescriptorSet,
        filter_x_set: vk::DescriptorSet,
        filter_y_set: vk::DescriptorSet,
        projection: &Matrix4<f32>,
        radius: f32,
        bias: f32,
        sharpness: f32,
        exponent: f32,
    ) {
        let (scale, offset) = inverse_projection_fast_path(projection);
        let sample_push = SamplePushConstants { inv_proj_scale: scale, inv_proj_offset: offset, radius, bias };

        let groups_x = crate::culling::div_ceil(extent.width, 8);
        let groups_y = crate::culling::div_ceil(extent.height, 8);

        unsafe {
            self.ctx.device.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::COMPUTE, self.sample_pipeline.handle);
            self.ctx
                .device
                .cmd_bind_descriptor_sets(cbuf, vk::PipelineBindPoint::COMPUTE, self.sample_pipeline.layout, 0, &[sample_set], &[]);
            self.ctx.device.cmd_push_constants(
                cbuf,
                self.sample_pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                std::slice::from_raw_parts(&sample_push as *const _ as *const u8, std::mem::size_of::<SamplePushConstants>()),
            );
            self.ctx.device.cmd_dispatch(cbuf, groups_x, groups_y, 1);

            let barrier = vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .build();
            self.ctx.device.cmd_pipeline_barrier(
                cbuf,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                std::slice::from_ref(&barrier),
                &[],
                &[],
            );

            self.ctx.device.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::COMPUTE, self.filter_pipeline.handle);

            let x_push = FilterPushConstants { sharpness, exponent: 1.0, direction: [1.0, 0.0] };
            self.ctx
                .device
                .cmd_bind_descriptor_sets(cbuf, vk::PipelineBindPoint::COMPUTE, self.filter_pipeline.layout, 0, &[filter_x_set], &[]);
            self.ctx.device.cmd_push_constants(
                cbuf,
                self.filter_pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                std::slice::from_raw_parts(&x_push as *const _ as *const u8, std::mem::size_of::<FilterPushConstants>()),
            );
            self.ctx.device.cmd_dispatch(cbuf, groups_x, groups_y, 1);

            self.ctx.device.cmd_pipeline_barrier(
                cbuf,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                std::slice::from_ref(&barrier),
                &[],
                &[],
            );

            let y_push = FilterPushConstants { sharpness, exponent, direction: [0.0, 1.0] };
            self.ctx
                .device
                .cmd_bind_descriptor_sets(cbuf, vk::PipelineBindPoint::COMPUTE, self.filter_pipeline.layout, 0, &[filter_y_set], &[]);
            self.ctx.device.cmd_push_constants(
                cbuf,
                self.filter_pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                std::slice::from_raw_parts(&y_push as *const _ as *const u8, std::mem::size_of::<FilterPushConstants>()),
            );
            self.ctx.device.cmd_dispatch(cbuf, groups_x, groups_y, 1);
        }
    }

    pub fn slice_count(&self) -> u32 {
        self.slice_count
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }
}

impl Drop for SsaoRenderer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.sample_pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.sample_pipeline.layout, None);
            self.ctx.device.destroy_pipeline(self.filter_pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.filter_pipeline.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_projection_scale_matches_matrix_diagonal() {
        let proj = cgmath::perspective(cgmath::Deg(60.0), 16.0 / 9.0, 0.1, 100.0);
        let (scale, offset) = inverse_projection_fast_path(&proj);
        assert!((scale[0] - 2.0 / proj.x.x).abs() < 1e-5);
        assert!((offset[1] + 1.0 / proj.y.y).abs() < 1e-5);
    }
}
