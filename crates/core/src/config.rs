//! Runtime configuration for the renderer and the demo application.

use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};

pub const ENV_FRAMES_IN_FLIGHT: &str = "FRAMEGRAPH_FRAMES_IN_FLIGHT";
pub const ENV_MSAA: &str = "FRAMEGRAPH_MSAA";
pub const ENV_VALIDATION: &str = "FRAMEGRAPH_VALIDATION";
pub const ENV_SHADER_DIR: &str = "FRAMEGRAPH_SHADER_DIR";

/// Settings fixed when the renderer is constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Number of frames the host may record ahead of the GPU (at least 1)
    pub frames_in_flight: usize,
    /// Render the forward pass multisampled and resolve into the swapchain
    pub multisampling: bool,
    /// Enable the Khronos validation layer and debug messenger
    pub validation: bool,
    /// Directory holding shader sources and their compiled `.spv` blobs
    pub shader_dir: PathBuf,
    pub window_width: u32,
    pub window_height: u32,
    /// Clear color of the presentation attachment
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            multisampling: true,
            validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders"),
            window_width: 1280,
            window_height: 720,
            clear_color: [0.1, 0.1, 0.12, 1.0],
        }
    }
}

impl RendererConfig {
    /// Defaults overridden by `FRAMEGRAPH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_FRAMES_IN_FLIGHT) {
            config.frames_in_flight = value.trim().parse().map_err(|_| {
                Error::Config(format!("{ENV_FRAMES_IN_FLIGHT} must be an integer, got '{value}'"))
            })?;
        }
        if let Some(value) = lookup(ENV_MSAA) {
            config.multisampling = parse_flag(ENV_MSAA, &value)?;
        }
        if let Some(value) = lookup(ENV_VALIDATION) {
            config.validation = parse_flag(ENV_VALIDATION, &value)?;
        }
        if let Some(value) = lookup(ENV_SHADER_DIR) {
            config.shader_dir = PathBuf::from(value);
        }

        config.validate()?;
        debug!("Renderer configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::Config("frames_in_flight must be at least 1".to_string()));
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window_width, self.window_height
            )));
        }
        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be a boolean, got '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = RendererConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.frames_in_flight, 2);
    }

    #[test]
    fn test_overrides_applied() {
        let config = RendererConfig::from_lookup(lookup_from(&[
            (ENV_FRAMES_IN_FLIGHT, "3"),
            (ENV_MSAA, "off"),
            (ENV_VALIDATION, "1"),
            (ENV_SHADER_DIR, "assets/shaders"),
        ]))
        .unwrap();

        assert_eq!(config.frames_in_flight, 3);
        assert!(!config.multisampling);
        assert!(config.validation);
        assert_eq!(config.shader_dir, PathBuf::from("assets/shaders"));
    }

    #[test]
    fn test_zero_frames_rejected() {
        let result = RendererConfig::from_lookup(lookup_from(&[(ENV_FRAMES_IN_FLIGHT, "0")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_values_rejected() {
        let frames = RendererConfig::from_lookup(lookup_from(&[(ENV_FRAMES_IN_FLIGHT, "two")]));
        assert!(matches!(frames, Err(Error::Config(_))));

        let msaa = RendererConfig::from_lookup(lookup_from(&[(ENV_MSAA, "maybe")]));
        assert!(matches!(msaa, Err(Error::Config(_))));
    }
}
