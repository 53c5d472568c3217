// Uploads a CPU Scene into the device-local buffers the renderer reads
// directly: one buffer per vertex stream, the indirect draw command buffer,
// and the section/instance/material storage buffers the FrustumCuller and
// PBR pass bind as the scene descriptor set. Scene textures are uploaded
// here too, not in gltf_loader, since only this module has a GfxContext.

use ash::vk;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::context::GfxContext;
use crate::error::Result;
use crate::image::Image;
use crate::resource_state::AccessState;
use crate::scene::types::Scene;
use crate::upload::image_upload::ImageUploader;
use crate::upload::staging::StagingUploader;

/// Sentinel for "this material has no texture in this slot".
const NO_IMAGE_SLOT: u16 = 0xFFFF;

#[repr(C)]
#[derive(Clone, Copy)]
struct GpuDrawCommand {
    index_count: u32,
    instance_count: u32,
    first_index: u32,
    vertex_offset: i32,
    first_instance: u32,
}

/// Merges the section's bounding box and its instance/material lookup into
/// one struct so the four-binding scene layout's "sections" binding still
/// carries everything the FrustumCuller needs per draw.
#[repr(C)]
#[derive(Clone, Copy)]
struct GpuSection {
    bounds_min: [f32; 3],
    bounds_max: [f32; 3],
    instance_index: u32,
    material_index: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct GpuInstance {
    transform: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct GpuMaterial {
    albedo_factors: [f32; 4],
    /// roughness, metalness, normal scale, emissive strength
    rmne_factors: [f32; 4],
    packed_image_indices: [u32; 2],
}

fn pack_image_indices(slots: [u16; 4]) -> [u32; 2] {
    [
        slots[0] as u32 | ((slots[1] as u32) << 16),
        slots[2] as u32 | ((slots[3] as u32) << 16),
    ]
}

fn image_slot(index: Option<u32>) -> u16 {
    index.map(|i| i as u16).unwrap_or(NO_IMAGE_SLOT)
}

pub struct SceneGpu {
    pub position_buffer: Buffer,
    pub normal_buffer: Buffer,
    pub tangent_buffer: Buffer,
    pub uv_buffer: Buffer,
    pub index_buffer: Buffer,
    pub draw_buffer: Buffer,
    pub section_buffer: Buffer,
    pub instance_buffer: Buffer,
    pub material_buffer: Buffer,
    pub section_count: u32,
    /// View + sampler pairs for binding 3 of the scene set. Sampler is
    /// always null; the engine binds its own fallback sampler the same way
    /// `build_scene_set` already does for every other image descriptor.
    pub textures: Vec<(vk::ImageView, vk::Sampler)>,
    /// Keeps the uploaded texture images (and their views) alive for as
    /// long as `textures` is in use.
    texture_images: Vec<Image>,
}

impl SceneGpu {
    pub fn upload(ctx: Arc<GfxContext>, scene: &Scene, staging_size: vk::DeviceSize) -> Result<Self> {
        let mut uploader = StagingUploader::new(ctx.clone(), staging_size)?;

        let position_buffer = Self::upload_stream(
            &mut uploader,
            ctx.clone(),
            &scene.positions,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            AccessState::VertexInput,
        )?;
        let normal_buffer = Self::upload_stream(
            &mut uploader,
            ctx.clone(),
            &scene.normals,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            AccessState::VertexInput,
        )?;
        let tangent_buffer = Self::upload_stream(
            &mut uploader,
            ctx.clone(),
            &scene.tangents,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            AccessState::VertexInput,
        )?;
        let uv_buffer = Self::upload_stream(
            &mut uploader,
            ctx.clone(),
            &scene.uvs,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            AccessState::VertexInput,
        )?;
        let index_buffer = Self::upload_stream(
            &mut uploader,
            ctx.clone(),
            &scene.indices,
            vk::BufferUsageFlags::INDEX_BUFFER,
            AccessState::VertexInput,
        )?;

        let draws: Vec<GpuDrawCommand> = scene
            .sections
            .iter()
            .enumerate()
            .map(|(i, s)| GpuDrawCommand {
                index_count: s.index_count,
                instance_count: 1,
                first_index: s.first_index,
                vertex_offset: 0,
                first_instance: i as u32,
            })
            .collect();
        let draw_buffer = Self::upload_stream(
            &mut uploader,
            ctx.clone(),
            &draws,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::INDIRECT_BUFFER,
            AccessState::ShaderReadOnly,
        )?;

        let sections: Vec<GpuSection> = scene
            .sections
            .iter()
            .enumerate()
            .map(|(i, s)| GpuSection {
                bounds_min: s.bounds.min.into(),
                bounds_max: s.bounds.max.into(),
                instance_index: i as u32,
                material_index: s.material,
            })
            .collect();
        let section_buffer = Self::upload_stream(
            &mut uploader,
            ctx.clone(),
            &sections,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            AccessState::ShaderReadOnly,
        )?;

        let instances: Vec<GpuInstance> = scene
            .sections
            .iter()
            .map(|s| GpuInstance { transform: s.transform.into() })
            .collect();
        let instance_buffer = Self::upload_stream(
            &mut uploader,
            ctx.clone(),
            &instances,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            AccessState::ShaderReadOnly,
        )?;

        let (texture_images, textures) = Self::upload_textures(&ctx, scene)?;

        let materials: Vec<GpuMaterial> = scene
            .materials
            .iter()
            .map(|m| GpuMaterial {
                albedo_factors: m.base_color_factor,
                rmne_factors: [m.roughness_factor, m.metallic_factor, m.normal_scale, m.emissive_strength],
                packed_image_indices: pack_image_indices([
                    image_slot(m.base_color_image),
                    image_slot(m.metallic_roughness_image),
                    image_slot(m.normal_image),
                    NO_IMAGE_SLOT,
                ]),
            })
            .collect();
        let material_buffer = Self::upload_stream(
            &mut uploader,
            ctx,
            &materials,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            AccessState::ShaderReadOnly,
        )?;

        Ok(Self {
            position_buffer,
            normal_buffer,
            tangent_buffer,
            uv_buffer,
            index_buffer,
            draw_buffer,
            section_buffer,
            instance_buffer,
            material_buffer,
            section_count: scene.sections.len() as u32,
            textures,
            texture_images,
        })
    }

    fn upload_textures(ctx: &Arc<GfxContext>, scene: &Scene) -> Result<(Vec<Image>, Vec<(vk::ImageView, vk::Sampler)>)> {
        let mut uploader = ImageUploader::new(ctx.clone())?;
        let mut images = Vec::with_capacity(scene.images.len());
        let mut textures = Vec::with_capacity(scene.images.len());
        for (i, decoded) in scene.images.iter().enumerate() {
            let srgb = scene.image_is_srgb.get(i).copied().unwrap_or(false);
            let image = uploader.load_2d_from_bytes(&decoded.rgba8, decoded.width, decoded.height, srgb)?;
            textures.push((image.view, vk::Sampler::null()));
            images.push(image);
        }
        Ok((images, textures))
    }

    fn upload_stream<T: Copy>(
        uploader: &mut StagingUploader,
        ctx: Arc<GfxContext>,
        data: &[T],
        usage: vk::BufferUsageFlags,
        final_state: AccessState,
    ) -> Result<Buffer> {
        let byte_len = std::mem::size_of_val(data) as vk::DeviceSize;
        let size = byte_len.max(1);
        let dst = Buffer::new_device_local(ctx, size, usage | vk::BufferUsageFlags::TRANSFER_DST)?;
        if byte_len > 0 {
            let bytes = unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, byte_len as usize) };
            uploader.upload_to_buffer(bytes, dst.handle, 0, final_state)?;
        }
        Ok(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_draw_command_layout_matches_vulkan_indirect_struct() {
        assert_eq!(std::mem::size_of::<GpuDrawCommand>(), std::mem::size_of::<vk::DrawIndexedIndirectCommand>());
    }

    #[test]
    fn image_slot_packing_round_trips_through_both_words() {
        let packed = pack_image_indices([image_slot(Some(3)), image_slot(None), image_slot(Some(7)), image_slot(None)]);
        assert_eq!(packed[0] & 0xFFFF, 3);
        assert_eq!((packed[0] >> 16) & 0xFFFF, NO_IMAGE_SLOT as u32);
        assert_eq!(packed[1] & 0xFFFF, 7);
    }
}
