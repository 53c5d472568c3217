// Engine configuration, loaded from config.toml next to the binary.
//
// There are no CLI flags; config.toml is the only override surface besides
// the VKRENDER_LOG environment variable handled by utils::logging.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window_width: u32,
    pub window_height: u32,
    pub max_frames_in_flight: u32,
    pub shadow_resolution: u32,
    pub cascade_count: u32,
    pub ssao_slice_count: u32,
    pub ssao_sample_count: u32,
    pub agx_exposure: f32,
    pub agx_saturation: f32,
    pub resources_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_width: 1280,
            window_height: 720,
            max_frames_in_flight: 2,
            shadow_resolution: 2048,
            cascade_count: 5,
            ssao_slice_count: 4,
            ssao_sample_count: 8,
            agx_exposure: 1.0,
            agx_saturation: 1.0,
            resources_path: "./resources".to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads config.toml from `path` if it exists, falling back to defaults
    /// (and logging that it did so) if the file is absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            utils::log::debug!("no config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {:?}: {}", path, e))?;
        let cfg: Self = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing {:?}: {}", path, e))?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = EngineConfig::default();
        assert!(cfg.max_frames_in_flight >= 1);
        assert!(cfg.cascade_count >= 1);
        assert!(cfg.shadow_resolution.is_power_of_two());
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = EngineConfig::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(cfg.window_width, EngineConfig::default().window_width);
    }
}
