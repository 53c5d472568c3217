// GPU-driven frustum culling.
//
// Grounded on FrustumCuller.cpp: a compute pass extracts 6 world-space
// frustum planes from the view-projection matrix (Gribb-Hartmann, from the
// matrix rows rather than walking frustum corners), pushes them as a
// compute push constant, and classifies every section's transformed AABB
// against all 6 planes in one dispatch of 64-wide workgroups. Sections that
// pass are appended to a compacted indirect-draw buffer via an atomic
// counter, so the CPU never reads culling results back -- the next pass
// just calls vkCmdDrawIndexedIndirectCount against the compacted buffer.

use ash::vk;
use cgmath::{Matrix4, SquareMatrix};
use std::sync::Arc;

use crate::context::GfxContext;
use crate::descriptor::DescriptorAllocator;
use crate::error::{RenderError, Result};
use crate::pipeline::{Pipeline, PipelineFactory};
use crate::shader::ShaderLoader;

/// Divides `x` by `y` rounding up, the dispatch-size helper every compute
/// pass in this renderer uses to turn an element count into a workgroup count.
pub fn div_ceil(x: u32, y: u32) -> u32 {
    (x + y - 1) / y
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct FrustumPushConstants {
    pub planes: [[f32; 4]; 6],
}

/// Extracts the 6 frustum planes (left, right, bottom, top, near, far) from
/// a combined view-projection matrix, each as `(nx, ny, nz, d)` with the
/// normal pointing into the frustum. cgmath matrices are column-major, so
/// `m.x`/`m.y`/`m.z`/`m.w` below are matrix *columns*; the plane coefficient
/// for row `i` is thus `(m.x[i], m.y[i], m.z[i], m.w[i])`.
pub fn extract_frustum_planes(view_proj: &Matrix4<f32>) -> [[f32; 4]; 6] {
    let row = |i: usize| [view_proj.x[i], view_proj.y[i], view_proj.z[i], view_proj.w[i]];
    let r0 = row(0);
    let r1 = row(1);
    let r2 = row(2);
    let r3 = row(3);

    let add = |a: [f32; 4], b: [f32; 4]| [a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]];
    let sub = |a: [f32; 4], b: [f32; 4]| [a[0] - b[0], a[1] - b[1], a[2] - b[2], a[3] - b[3]];
    let normalize = |p: [f32; 4]| {
        let len = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        if len > 0.0 {
            [p[0] / len, p[1] / len, p[2] / len, p[3] / len]
        } else {
            p
        }
    };

    [
        normalize(add(r3, r0)),  // left
        normalize(sub(r3, r0)),  // right
        normalize(add(r3, r1)),  // bottom
        normalize(sub(r3, r1)),  // top
        normalize(r2),           // near (reverse-Z: near plane is row 2 directly)
        normalize(sub(r3, r2)),  // far
    ]
}

pub struct FrustumCuller {
    ctx: Arc<GfxContext>,
    pipeline: Pipeline,
    set_layout: vk::DescriptorSetLayout,
}

impl FrustumCuller {
    pub fn new(ctx: Arc<GfxContext>, scene_set_layout: vk::DescriptorSetLayout) -> Result<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(2)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let set_layout = unsafe {
            ctx.device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(RenderError::Vulkan)?
        };

        let module = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/frustum_cull.comp.spv"))?;

        let push_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<FrustumPushConstants>() as u32)
            .build();

        let pipeline = PipelineFactory::create_compute(
            &ctx.device,
            module,
            &[scene_set_layout, set_layout],
            &[push_range],
        )?;

        unsafe {
            ctx.device.destroy_shader_module(module, None);
        }

        Ok(Self {
            ctx,
            pipeline,
            set_layout,
        })
    }

    /// Records the cull dispatch. `scene_set` binds the section/bounds/
    /// transform storage buffers this pass reads; `input_draws` is the
    /// unculled per-section indirect draw buffer assembled at scene load;
    /// `output_draws`/`output_count` are zeroed by the caller before this
    /// call (the atomic counter in the shader starts from whatever is
    /// already there).
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        cbuf: vk::CommandBuffer,
        allocator: &mut DescriptorAllocator,
        scene_set: vk::DescriptorSet,
        input_draws: vk::Buffer,
        output_draws: vk::Buffer,
        output_count: vk::Buffer,
        section_count: u32,
        view_proj: &Matrix4<f32>,
    ) -> Result<()> {
        let sets = allocator.allocate(&self.ctx.device, self.set_layout, 1)?;
        let set = sets[0];

        let input_info = vk::DescriptorBufferInfo::builder().buffer(input_draws).range(vk::WHOLE_SIZE).build();
        let output_info = vk::DescriptorBufferInfo::builder().buffer(output_draws).range(vk::WHOLE_SIZE).build();
        let count_info = vk::DescriptorBufferInfo::builder().buffer(output_count).range(vk::WHOLE_SIZE).build();

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(std::slice::from_ref(&input_info))
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(std::slice::from_ref(&output_info))
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(2)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(std::slice::from_ref(&count_info))
                .build(),
        ];
        unsafe {
            self.ctx.device.update_descriptor_sets(&writes, &[]);
        }

        let planes = extract_frustum_planes(view_proj);
        let push = FrustumPushConstants { planes };

        unsafe {
            self.ctx.device.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::COMPUTE, self.pipeline.handle);
            self.ctx.device.cmd_bind_descriptor_sets(
                cbuf,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline.layout,
                0,
                &[scene_set, set],
                &[],
            );
            self.ctx.device.cmd_push_constants(
                cbuf,
                self.pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                std::slice::from_raw_parts(&push as *const _ as *const u8, std::mem::size_of::<FrustumPushConstants>()),
            );
            self.ctx.device.cmd_dispatch(cbuf, div_ceil(section_count, 64), 1, 1);
        }

        Ok(())
    }
}

impl Drop for FrustumCuller {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.pipeline.layout, None);
            self.ctx.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{perspective, Deg, Matrix4, Point3, Vector3};

    #[test]
    fn div_ceil_rounds_up() {
        assert_eq!(div_ceil(64, 64), 1);
        assert_eq!(div_ceil(65, 64), 2);
        assert_eq!(div_ceil(0, 64), 0);
    }

    #[test]
    fn planes_classify_origin_as_inside_for_centered_frustum() {
        let view = Matrix4::look_to_rh(Point3::new(0.0, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0), Vector3::unit_y());
        let proj = perspective(Deg(60.0), 1.0, 0.1, 100.0);
        let vp = proj * view;
        let planes = extract_frustum_planes(&vp);

        // the view target (0,0,0) should be on the positive side of every plane
        for p in &planes {
            let d = p[0] * 0.0 + p[1] * 0.0 + p[2] * 0.0 + p[3];
            assert!(d > -0.5, "origin unexpectedly outside plane {:?}", p);
        }
    }
}
