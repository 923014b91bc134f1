//! Renderer configuration, loaded from JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pyramid::DEFAULT_SHARPNESS;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Source language of the shader stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderLanguage {
    Wgsl,
    Glsl,
}

impl ShaderLanguage {
    /// Guess from a file extension. Unknown extensions yield `None`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "wgsl" => Some(ShaderLanguage::Wgsl),
            "glsl" | "vert" | "frag" | "vs" | "fs" => Some(ShaderLanguage::Glsl),
            _ => None,
        }
    }
}

/// Everything needed to bring up the preview renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Offscreen target size in pixels
    pub size: [u32; 2],
    pub camera_position: [f32; 3],
    pub model_path: PathBuf,
    pub vertex_shader_path: PathBuf,
    pub fragment_shader_path: PathBuf,

    // Material inputs
    pub albedo_path: Option<PathBuf>,
    pub normal_path: Option<PathBuf>,
    pub roughness_path: Option<PathBuf>,
    pub environment_path: Option<PathBuf>,

    /// Statistics pyramid sharpness `s` (bias = 1/s)
    pub sharpness: f32,
    /// Inferred from the fragment shader extension when unset
    pub shader_language: Option<ShaderLanguage>,
    pub clear_color: [f32; 4],
    /// Build statistics pyramids on the background worker
    pub async_pyramid: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            size: [800, 600],
            camera_position: [2.5, 2.0, 1.5],
            model_path: PathBuf::from("assets/models/cube.obj"),
            vertex_shader_path: PathBuf::from("assets/shaders/vertex.wgsl"),
            fragment_shader_path: PathBuf::from("assets/shaders/fragment.wgsl"),
            albedo_path: None,
            normal_path: None,
            roughness_path: None,
            environment_path: None,
            sharpness: DEFAULT_SHARPNESS,
            shader_language: None,
            clear_color: [0.5, 0.5, 1.0, 1.0],
            async_pyramid: true,
        }
    }
}

impl RendererConfig {
    /// Load and validate a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded renderer config from {}", path.display());
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json_string()?).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.size[0] == 0 || self.size[1] == 0 {
            return Err(ConfigError::Invalid(format!(
                "size must be non-zero, got {}x{}",
                self.size[0], self.size[1]
            )));
        }
        if !(self.sharpness.is_finite() && self.sharpness > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "sharpness must be positive, got {}",
                self.sharpness
            )));
        }
        if !self.camera_position.iter().all(|c| c.is_finite()) {
            return Err(ConfigError::Invalid("camera_position must be finite".into()));
        }
        Ok(())
    }

    /// Explicit language, else inferred from the fragment path, else WGSL.
    pub fn language(&self) -> ShaderLanguage {
        self.shader_language
            .or_else(|| ShaderLanguage::from_path(&self.fragment_shader_path))
            .unwrap_or(ShaderLanguage::Wgsl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.size, [800, 600]);
        assert_eq!(config.camera_position, [2.5, 2.0, 1.5]);
        assert_eq!(config.language(), ShaderLanguage::Wgsl);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = RendererConfig::from_json_str(
            r#"{ "size": [320, 240], "normal_path": "tex/normal.png", "shader_language": "glsl" }"#,
        )
        .unwrap();

        assert_eq!(config.size, [320, 240]);
        assert_eq!(config.normal_path, Some(PathBuf::from("tex/normal.png")));
        assert_eq!(config.language(), ShaderLanguage::Glsl);
        assert_eq!(config.sharpness, DEFAULT_SHARPNESS);
        assert_eq!(config.model_path, PathBuf::from("assets/models/cube.obj"));
    }

    #[test]
    fn test_language_inferred_from_extension() {
        let config = RendererConfig {
            fragment_shader_path: PathBuf::from("shaders/fshader.glsl"),
            ..Default::default()
        };
        assert_eq!(config.language(), ShaderLanguage::Glsl);
        assert_eq!(ShaderLanguage::from_path("a.WGSL"), Some(ShaderLanguage::Wgsl));
        assert_eq!(ShaderLanguage::from_path("a.txt"), None);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            RendererConfig::from_json_str(r#"{ "size": [0, 600] }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RendererConfig::from_json_str(r#"{ "sharpness": -1.0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RendererConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("glint_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("renderer.json");

        let config = RendererConfig {
            size: [1024, 768],
            async_pyramid: false,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(RendererConfig::load(&path).unwrap(), config);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            RendererConfig::load("/no/such/config.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
