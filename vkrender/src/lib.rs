mod buffer;
mod config;
mod context;
mod culling;
mod descriptor;
mod engine;
mod error;
mod frame_loop;
mod framebuffer;
mod image;
mod layouts;
mod pipeline;
mod renderers;
mod resource_state;
mod sampler;
mod scene;
mod shader;
mod swapchain;
mod transient;
mod upload;

pub use config::EngineConfig;
pub use context::GfxContext;
pub use engine::{Camera, Engine, SunLight};
pub use error::{RenderError, Result};
pub use scene::{gltf_loader, Material, Node, Scene, SceneGpu, Section};
pub use upload::ImageUploader;
