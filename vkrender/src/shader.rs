// SPIR-V shader module loading.
//
// Grounded on the shader-module creation step of lume-rhi's graphics/compute
// pipeline builders: read a .spv file, hand the raw words to
// vkCreateShaderModule. Shader compilation itself (GLSL/HLSL -> SPIR-V) is
// out of scope; resources/shaders/*.spv are expected to already exist.

use ash::util::read_spv;
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use crate::error::{RenderError, Result};

pub struct ShaderLoader;

impl ShaderLoader {
    pub fn load(device: &ash::Device, path: &Path) -> Result<vk::ShaderModule> {
        let bytes = std::fs::read(path)
            .map_err(|e| RenderError::ShaderCompile(format!("reading {:?}: {}", path, e)))?;
        let words = read_spv(&mut Cursor::new(&bytes))
            .map_err(|e| RenderError::ShaderCompile(format!("{:?}: not valid SPIR-V: {}", path, e)))?;

        let info = vk::ShaderModuleCreateInfo::builder().code(&words);
        unsafe {
            device
                .create_shader_module(&info, None)
                .map_err(|e| RenderError::ShaderCompile(format!("{:?}: {:?}", path, e)))
        }
    }
}
