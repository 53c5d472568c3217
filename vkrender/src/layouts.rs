// Descriptor set layouts shared across renderer passes.
//
// Built centrally because several passes' pipelines are laid out against
// the same set (FrustumCuller and the geometry passes both bind the scene
// set at index 0), and a pass that owned its own copy of the layout would
// risk the two drifting out of sync.

use ash::vk;

use crate::error::{RenderError, Result};

/// Max glTF textures resident at once. Picked well above what the sample
/// scenes in original_source need; growing it only costs descriptor pool
/// capacity, not correctness.
pub const MAX_SCENE_TEXTURES: u32 = 256;

pub struct SceneLayouts {
    /// Binding 0: section storage buffer (bounds + instance/material
    /// lookup), read by FrustumCuller and the vertex shader. Binding 1:
    /// instance transform storage buffer. Binding 2: material storage
    /// buffer, read by the PBR fragment shader. Binding 3: bindless-ish
    /// combined-image-sampler array of scene textures.
    pub scene_set_layout: vk::DescriptorSetLayout,
    /// Binding 0: FrameUniforms uniform buffer. Binding 1: shadow cascade
    /// depth array sampled with depth comparison.
    pub frame_set_layout: vk::DescriptorSetLayout,
}

impl SceneLayouts {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let scene_bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::VERTEX)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(2)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(3)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(MAX_SCENE_TEXTURES)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];
        let scene_binding_flags = [
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT,
        ];
        let mut scene_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder().binding_flags(&scene_binding_flags);
        let scene_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&scene_bindings)
            .push_next(&mut scene_flags_info);
        let scene_set_layout = unsafe {
            device.create_descriptor_set_layout(&scene_info, None).map_err(RenderError::Vulkan)?
        };

        let frame_bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(crate::renderers::pbr::MAX_CASCADES as u32)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];
        let frame_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&frame_bindings);
        let frame_set_layout = unsafe {
            device.create_descriptor_set_layout(&frame_info, None).map_err(RenderError::Vulkan)?
        };

        Ok(Self { scene_set_layout, frame_set_layout })
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_set_layout(self.scene_set_layout, None);
        device.destroy_descriptor_set_layout(self.frame_set_layout, None);
    }
}

/// Single-binding layout shared by the three SSAO dispatches (sample, filter
/// X, filter Y): each just binds whatever input/output image pair that
/// invocation needs at binding 0/1 as storage images.
pub fn single_image_pair_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(1)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .build(),
    ];
    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&info, None).map_err(RenderError::Vulkan) }
}

/// Blob compute pass: metaball buffer, domain member buffer, vertex output
/// buffer, draw-indirect output buffer.
pub fn blob_compute_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..4)
        .map(|i| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(i)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build()
        })
        .collect();
    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&info, None).map_err(RenderError::Vulkan) }
}

/// Skybox fragment shader: single cubemap sampler.
pub fn cubemap_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let bindings = [vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        .build()];
    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&info, None).map_err(RenderError::Vulkan) }
}

/// Finalize compute pass: HDR color input sampler, swapchain storage image
/// output.
pub fn finalize_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(1)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .build(),
    ];
    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&info, None).map_err(RenderError::Vulkan) }
}
