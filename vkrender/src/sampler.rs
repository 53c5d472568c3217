// Named sampler presets. Grounded on device.rs's create_sampler, split into
// the handful of distinct configurations this renderer actually needs
// instead of one general-purpose constructor.

use ash::vk;

use crate::error::{RenderError, Result};

pub struct Samplers;

impl Samplers {
    /// Scene textures and the skybox cubemap: repeat addressing, trilinear
    /// filtering across mip chains.
    pub fn linear_repeat(device: &ash::Device) -> Result<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(16.0)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .max_lod(vk::LOD_CLAMP_NONE)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS);
        unsafe { device.create_sampler(&info, None).map_err(RenderError::Vulkan) }
    }

    /// Offscreen HDR color / SSAO intermediate targets: clamped, no mipmaps.
    pub fn linear_clamp(device: &ash::Device) -> Result<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS);
        unsafe { device.create_sampler(&info, None).map_err(RenderError::Vulkan) }
    }

    /// Shadow cascade depth maps: hardware depth-compare sampling for PCF,
    /// using the reverse-Z convention (closer = larger depth value, so the
    /// compare op is GREATER_OR_EQUAL, not the usual LESS).
    pub fn shadow_compare(device: &ash::Device) -> Result<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_BORDER)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .anisotropy_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .unnormalized_coordinates(false)
            .compare_enable(true)
            .compare_op(vk::CompareOp::GREATER_OR_EQUAL);
        unsafe { device.create_sampler(&info, None).map_err(RenderError::Vulkan) }
    }
}
