// Error taxonomy for the renderer.
//
// Fatal variants (device/feature/shader setup) are meant to be wrapped in
// `anyhow::Context` at the call site and bubbled up to `main`, which logs and
// exits. Recoverable variants are matched on by the frame loop.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("no suitable Vulkan device found: {0}")]
    DeviceSelection(String),

    #[error("required device feature/extension not supported: {0}")]
    MissingFeature(String),

    #[error("failed to compile or load shader module: {0}")]
    ShaderCompile(String),

    #[error("failed to load scene: {0}")]
    SceneLoad(String),

    #[error("swapchain is out of date and must be recreated")]
    SwapchainOutOfDate,

    #[error("swapchain is suboptimal for the current surface")]
    SwapchainSuboptimal,

    #[error("descriptor pool exhausted and could not grow")]
    DescriptorPoolExhausted,

    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] ash::vk::Result),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
