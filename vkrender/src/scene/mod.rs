pub mod gltf_loader;
pub mod gpu;
pub mod types;

pub use gpu::SceneGpu;
pub use types::{BoundingBox, Material, Node, Scene, Section};
