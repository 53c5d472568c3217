pub mod blob;
pub mod depth_prepass;
pub mod finalize;
pub mod pbr;
pub mod shadow;
pub mod skybox;
pub mod ssao;

pub use blob::{BlobRenderer, BlobSystem};
pub use depth_prepass::DepthPrePassRenderer;
pub use finalize::FinalizeRenderer;
pub use pbr::PbrSceneRenderer;
pub use shadow::{ShadowCascade, ShadowRenderer};
pub use skybox::SkyboxRenderer;
pub use ssao::SsaoRenderer;
