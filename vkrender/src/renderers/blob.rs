// Metaball ("blob") system: CPU-side spatial partition into coarse voxel
// domains, GPU-side per-domain marching-cubes compute + indirect draw.
//
// Partition algorithm grounded on blob/System.cpp's System::partition: an
// outer-radius/inner-radius voxel shell test per ball, deduplicated voxel
// keys, then a domain-membership overlap test against each voxel expanded
// by `padding`. Buffer growth (1.5x, deferred destruction through a ring of
// MaxFramesInFlight+1 trash slots) follows System::resizeVertexBuffer /
// resizeDrawIndirectBuffer.

use ash::vk;
use cgmath::{InnerSpace, Vector3};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::context::GfxContext;
use crate::error::{RenderError, Result};
use crate::pipeline::{DynamicStateFlags, GraphicsPipelineConfig, Pipeline, PipelineFactory};
use crate::shader::ShaderLoader;

pub const MAX_METABALLS: usize = 16;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct MetaballBlock {
    pub center: [f32; 4],
    pub scale: [f32; 4],
    pub base_radius: f32,
    pub max_radius: f32,
    pub _pad: [f32; 2],
}

#[derive(Clone, Copy, Debug)]
pub struct Metaball {
    pub center: Vector3<f32>,
    pub scale: Vector3<f32>,
    pub base_radius: f32,
    pub max_radius: f32,
}

#[derive(Clone, Debug)]
pub struct Domain {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
    pub members: Vec<u32>,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct GridKey {
    x: i32,
    y: i32,
    z: i32,
}

const MAX_VERTS_PER_CELL: f64 = 12.0;
const VERTEX_ESTIMATE_FACTOR: f64 = 0.5;

/// Conservative per-domain vertex-count estimate: `8^3 * 12 * 0.5` assuming
/// every one of the domain's 8-cells-per-axis subdivision could emit a
/// near-maximal marching-cubes triangle fan.
pub fn estimate_vertex_count(_domain: &Domain) -> usize {
    let ratio = 8.0_f64;
    let total_cells = ratio * ratio * ratio;
    (total_cells * MAX_VERTS_PER_CELL * VERTEX_ESTIMATE_FACTOR) as usize
}

/// Partitions `balls` into coarse voxel domains. `cell_size` is the fine
/// marching-cubes cell size; the partition operates at `8 * cell_size`.
pub fn partition(balls: &[Metaball], cell_size: f32) -> Vec<Domain> {
    if balls.is_empty() {
        return Vec::new();
    }

    let macro_cell_size = cell_size * 8.0;
    let padding = macro_cell_size * 0.5;
    let voxel_radius = (macro_cell_size * 3.0_f32.sqrt()) * 0.5;
    let origin = Vector3::new(0.0, 0.0, 0.0);

    let mut active_keys: Vec<GridKey> = Vec::with_capacity(balls.len() * 64);

    for ball in balls {
        let max_s = ball.scale.x.max(ball.scale.y).max(ball.scale.z);
        let min_s = ball.scale.x.min(ball.scale.y).min(ball.scale.z);

        let r_outer = ball.max_radius * max_s;
        let r_inner = ball.base_radius * min_s;

        let min_corner = ball.center - Vector3::new(r_outer, r_outer, r_outer);
        let max_corner = ball.center + Vector3::new(r_outer, r_outer, r_outer);

        let min_voxel = (
            ((min_corner.x - origin.x) / macro_cell_size).floor() as i32,
            ((min_corner.y - origin.y) / macro_cell_size).floor() as i32,
            ((min_corner.z - origin.z) / macro_cell_size).floor() as i32,
        );
        let max_voxel = (
            ((max_corner.x - origin.x) / macro_cell_size).floor() as i32,
            ((max_corner.y - origin.y) / macro_cell_size).floor() as i32,
            ((max_corner.z - origin.z) / macro_cell_size).floor() as i32,
        );

        for z in min_voxel.2..=max_voxel.2 {
            for y in min_voxel.1..=max_voxel.1 {
                for x in min_voxel.0..=max_voxel.0 {
                    let voxel_center = origin
                        + Vector3::new(x as f32 + 0.5, y as f32 + 0.5, z as f32 + 0.5) * macro_cell_size;
                    let dist = (ball.center - voxel_center).magnitude();

                    if dist > r_outer + voxel_radius {
                        continue;
                    }
                    if dist < r_inner - voxel_radius {
                        continue;
                    }

                    active_keys.push(GridKey { x, y, z });
                }
            }
        }
    }

    if active_keys.is_empty() {
        return Vec::new();
    }
    active_keys.sort();
    active_keys.dedup();

    let mut domains = Vec::with_capacity(active_keys.len());
    for key in active_keys {
        let voxel_min = origin + Vector3::new(key.x as f32, key.y as f32, key.z as f32) * macro_cell_size;
        let voxel_max = voxel_min + Vector3::new(macro_cell_size, macro_cell_size, macro_cell_size);

        let check_min = voxel_min - Vector3::new(padding, padding, padding);
        let check_max = voxel_max + Vector3::new(padding, padding, padding);

        let mut members = Vec::new();
        for (i, ball) in balls.iter().enumerate() {
            let max_s = ball.scale.x.max(ball.scale.y).max(ball.scale.z);
            let r_outer = ball.max_radius * max_s;
            let ball_min = ball.center - Vector3::new(r_outer, r_outer, r_outer);
            let ball_max = ball.center + Vector3::new(r_outer, r_outer, r_outer);

            let overlap_x = ball_min.x <= check_max.x && ball_max.x >= check_min.x;
            let overlap_y = ball_min.y <= check_max.y && ball_max.y >= check_min.y;
            let overlap_z = ball_min.z <= check_max.z && ball_max.z >= check_min.z;

            if overlap_x && overlap_y && overlap_z {
                members.push(i as u32);
            }
        }

        if !members.is_empty() {
            members.sort();
            domains.push(Domain { min: voxel_min, max: voxel_max, members });
        }
    }

    domains
}

struct TrashRing {
    slots: Vec<Vec<Buffer>>,
    cursor: usize,
}

impl TrashRing {
    fn new(ring_len: usize) -> Self {
        Self { slots: (0..ring_len).map(|_| Vec::new()).collect(), cursor: 0 }
    }

    fn push(&mut self, buf: Buffer) {
        self.slots[self.cursor].push(buf);
    }

    /// Drains the oldest ring slot (safe: `MaxFramesInFlight` fences have
    /// elapsed by the time the ring wraps back to it) and advances.
    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.slots[self.cursor].clear();
    }
}

/// Inline-updated metaball state plus the per-domain buffers the marching
/// cubes compute pass writes into, grown with 1.5x headroom and retired
/// through a deferred-destruction ring.
pub struct BlobSystem {
    ctx: Arc<GfxContext>,
    cell_size: f32,
    pub balls: Vec<Metaball>,
    pub domains: Vec<Domain>,
    metaball_buffer: Buffer,
    domain_member_buffer: Buffer,
    draw_indirect_buffer: Buffer,
    vertex_buffer: Buffer,
    trash: TrashRing,
}

const INITIAL_DOMAIN_MEMBERS: u64 = 1024 * 1024 / 4;
const INITIAL_DRAWS: u64 = 512;
const INITIAL_VERTICES: u64 = 1024;

impl BlobSystem {
    pub fn new(ctx: Arc<GfxContext>, cell_size: f32, max_frames_in_flight: usize) -> Result<Self> {
        let metaball_buffer = Buffer::new_device_local(
            ctx.clone(),
            (MAX_METABALLS * std::mem::size_of::<MetaballBlock>()) as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        )?;
        let domain_member_buffer = Buffer::new_device_local(
            ctx.clone(),
            INITIAL_DOMAIN_MEMBERS * std::mem::size_of::<u32>() as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        )?;
        let draw_indirect_buffer = Buffer::new_device_local(
            ctx.clone(),
            INITIAL_DRAWS * std::mem::size_of::<vk::DrawIndirectCommand>() as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        )?;
        let vertex_buffer = Buffer::new_device_local(
            ctx.clone(),
            INITIAL_VERTICES * 32,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        Ok(Self {
            ctx,
            cell_size,
            balls: Vec::new(),
            domains: Vec::new(),
            metaball_buffer,
            domain_member_buffer,
            draw_indirect_buffer,
            vertex_buffer,
            trash: TrashRing::new(max_frames_in_flight + 1),
        })
    }

    /// Drains the oldest trash slot, re-partitions, and grows buffers as
    /// needed. Does not record any commands; the caller inline-updates the
    /// metaball/domain-member buffers via `cmd_update_buffer` afterward
    /// using `metaball_data()`/`domain_member_data()`.
    pub fn update(&mut self) -> Result<()> {
        self.trash.advance();

        self.domains = partition(&self.balls, self.cell_size);

        self.grow_draw_indirect(self.domains.len() as u64)?;

        let required_vertices: usize = self.domains.iter().map(estimate_vertex_count).sum();
        self.grow_vertex_buffer(required_vertices as u64)?;

        let total_members: usize = self.domains.iter().map(|d| d.members.len()).sum();
        self.grow_domain_members(total_members as u64)?;

        Ok(())
    }

    fn grow_draw_indirect(&mut self, required_count: u64) -> Result<()> {
        let current_count = self.draw_indirect_buffer.size / std::mem::size_of::<vk::DrawIndirectCommand>() as vk::DeviceSize;
        if required_count <= current_count {
            return Ok(());
        }
        let grown = (required_count as f64 * 1.5) as u64;
        let old = std::mem::replace(
            &mut self.draw_indirect_buffer,
            Buffer::new_device_local(
                self.ctx.clone(),
                grown * std::mem::size_of::<vk::DrawIndirectCommand>() as vk::DeviceSize,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            )?,
        );
        self.trash.push(old);
        Ok(())
    }

    fn grow_vertex_buffer(&mut self, required_count: u64) -> Result<()> {
        let current_count = self.vertex_buffer.size / 32;
        if required_count <= current_count {
            return Ok(());
        }
        let grown = (required_count as f64 * 1.5) as u64;
        let old = std::mem::replace(
            &mut self.vertex_buffer,
            Buffer::new_device_local(
                self.ctx.clone(),
                grown * 32,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
            )?,
        );
        self.trash.push(old);
        Ok(())
    }

    fn grow_domain_members(&mut self, required_count: u64) -> Result<()> {
        let current_count = self.domain_member_buffer.size / std::mem::size_of::<u32>() as vk::DeviceSize;
        if required_count <= current_count {
            return Ok(());
        }
        let grown = (required_count as f64 * 1.5) as u64;
        let old = std::mem::replace(
            &mut self.domain_member_buffer,
            Buffer::new_device_local(
                self.ctx.clone(),
                grown * std::mem::size_of::<u32>() as vk::DeviceSize,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            )?,
        );
        self.trash.push(old);
        Ok(())
    }

    pub fn metaball_data(&self) -> Vec<MetaballBlock> {
        self.balls
            .iter()
            .map(|b| MetaballBlock {
                center: [b.center.x, b.center.y, b.center.z, 0.0],
                scale: [b.scale.x, b.scale.y, b.scale.z, 1.0],
                base_radius: b.base_radius,
                max_radius: b.max_radius,
                _pad: [0.0, 0.0],
            })
            .collect()
    }

    pub fn domain_member_data(&self) -> Vec<u32> {
        self.domains.iter().flat_map(|d| d.members.iter().copied()).collect()
    }

    pub fn metaball_buffer(&self) -> vk::Buffer {
        self.metaball_buffer.handle
    }

    pub fn domain_member_buffer(&self) -> vk::Buffer {
        self.domain_member_buffer.handle
    }

    pub fn draw_indirect_buffer(&self) -> vk::Buffer {
        self.draw_indirect_buffer.handle
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle
    }
}

/// Per-domain marching-cubes compute plus the non-indexed indirect draw
/// that consumes its output.
pub struct BlobRenderer {
    ctx: Arc<GfxContext>,
    compute_pipeline: Pipeline,
    draw_pipeline: Pipeline,
}

impl BlobRenderer {
    pub fn new(
        ctx: Arc<GfxContext>,
        compute_set_layout: vk::DescriptorSetLayout,
        draw_set_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let compute_module = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/blob_march.comp.spv"))?;
        let compute_pipeline = PipelineFactory::create_compute(&ctx.device, compute_module, &[compute_set_layout], &[])?;

        let vs = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/blob_draw.vert.spv"))?;
        let fs = ShaderLoader::load(&ctx.device, std::path::Path::new("resources/shaders/blob_draw.frag.spv"))?;
        let bindings = [vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()];
        let attributes = [
            vk::VertexInputAttributeDescription::builder().location(0).binding(0).format(vk::Format::R32G32B32_SFLOAT).offset(0).build(),
            vk::VertexInputAttributeDescription::builder().location(1).binding(0).format(vk::Format::R32G32B32_SFLOAT).offset(16).build(),
        ];
        let draw_cfg = GraphicsPipelineConfig {
            vertex_module: vs,
            fragment_module: fs,
            vertex_bindings: &bindings,
            vertex_attributes: &attributes,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::GREATER_OR_EQUAL,
            color_formats: &[color_format],
            depth_format: Some(depth_format),
            set_layouts: &[draw_set_layout],
            push_constant_ranges: &[],
            dynamic_state: DynamicStateFlags::VIEWPORT | DynamicStateFlags::SCISSOR,
        };
        let draw_pipeline = PipelineFactory::create_graphics(&ctx.device, &draw_cfg)?;

        unsafe {
            ctx.device.destroy_shader_module(compute_module, None);
            ctx.device.destroy_shader_module(vs, None);
            ctx.device.destroy_shader_module(fs, None);
        }

        Ok(Self { ctx, compute_pipeline, draw_pipeline })
    }

    pub fn record_march(&self, cbuf: vk::CommandBuffer, compute_set: vk::DescriptorSet, domain_count: u32) {
        unsafe {
            self.ctx.device.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::COMPUTE, self.compute_pipeline.handle);
            self.ctx.device.cmd_bind_descriptor_sets(
                cbuf,
                vk::PipelineBindPoint::COMPUTE,
                self.compute_pipeline.layout,
                0,
                &[compute_set],
                &[],
            );
            self.ctx.device.cmd_dispatch(cbuf, domain_count, 1, 1);
        }
    }

    pub fn record_draw(
        &self,
        cbuf: vk::CommandBuffer,
        draw_set: vk::DescriptorSet,
        vertex_buffer: vk::Buffer,
        draw_indirect_buffer: vk::Buffer,
        domain_count: u32,
    ) {
        unsafe {
            self.ctx.device.cmd_bind_pipeline(cbuf, vk::PipelineBindPoint::GRAPHICS, self.draw_pipeline.handle);
            self.ctx.device.cmd_bind_descriptor_sets(
                cbuf,
                vk::PipelineBindPoint::GRAPHICS,
                self.draw_pipeline.layout,
                0,
                &[draw_set],
                &[],
            );
            self.ctx.device.cmd_bind_vertex_buffers(cbuf, 0, &[vertex_buffer], &[0]);
            self.ctx.device.cmd_draw_indirect(
                cbuf,
                draw_indirect_buffer,
                0,
                domain_count,
                std::mem::size_of::<vk::DrawIndirectCommand>() as u32,
            );
        }
    }
}

impl Drop for BlobRenderer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.compute_pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.compute_pipeline.layout, None);
            self.ctx.device.destroy_pipeline(self.draw_pipeline.handle, None);
            self.ctx.device.destroy_pipeline_layout(self.draw_pipeline.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ball_produces_nonempty_domain_set() {
        let balls = vec![Metaball {
            center: Vector3::new(0.0, 0.0, 0.0),
            scale: Vector3::new(1.0, 1.0, 1.0),
            base_radius: 0.5,
            max_radius: 2.0,
        }];
        let domains = partition(&balls, 0.1);
        assert!(!domains.is_empty());
        for d in &domains {
            assert!(!d.members.is_empty());
            assert!(d.members.contains(&0));
        }
    }

    #[test]
    fn empty_balls_produce_no_domains() {
        assert!(partition(&[], 0.1).is_empty());
    }

    #[test]
    fn domain_keys_are_deduplicated() {
        let balls = vec![
            Metaball { center: Vector3::new(0.0, 0.0, 0.0), scale: Vector3::new(1.0, 1.0, 1.0), base_radius: 0.5, max_radius: 2.0 },
            Metaball { center: Vector3::new(0.05, 0.0, 0.0), scale: Vector3::new(1.0, 1.0, 1.0), base_radius: 0.5, max_radius: 2.0 },
        ];
        let domains = partition(&balls, 0.1);
        let mut seen = std::collections::HashSet::new();
        for d in &domains {
            let key = (d.min.x.to_bits(), d.min.y.to_bits(), d.min.z.to_bits());
            assert!(seen.insert(key), "duplicate domain voxel emitted");
        }
    }

    #[test]
    fn estimate_vertex_count_is_conservative_and_fixed() {
        let d = Domain { min: Vector3::new(0.0, 0.0, 0.0), max: Vector3::new(1.0, 1.0, 1.0), members: vec![0] };
        assert_eq!(estimate_vertex_count(&d), (512.0 * 12.0 * 0.5) as usize);
    }
}
