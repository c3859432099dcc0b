use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::pipeline::{ConfidencePolicy, Normalization};

pub const CONFIG_ENV: &str = "FLUTTERBY_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config syntax: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub version: f32,
    pub server: ServerConfig,
    pub models: ModelPaths,
    pub gate: GateConfig,
    pub image: ImageConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPaths {
    pub gate: PathBuf,
    pub feature_extractor: PathBuf,
    pub classifier: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_accepted_class")]
    pub accepted_class: usize,
    #[serde(default = "default_rejection_message")]
    pub rejection_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_image_size")]
    pub size: u32,
    pub normalization: NormalizationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationConfig {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub labels: Vec<String>,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    pub enabled: bool,
    pub threshold: f32,
    pub uncertain_label: String,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
            uncertain_label: "Uncertain".to_string(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_inference_timeout_ms() -> u64 {
    30_000
}

fn default_accepted_class() -> usize {
    1
}

fn default_rejection_message() -> String {
    "The uploaded image is not a raw chicken breast. Please upload a valid image.".to_string()
}

fn default_image_size() -> u32 {
    224
}

impl ServiceConfig {
    /// Loads the config from `FLUTTERBY_CONFIG`, or the repository's `config/service.yaml`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::resolve_path();
        log::info!("Loading service config from {}", path.display());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn resolve_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let candidate = PathBuf::from(format!("{}/../config/service.yaml", manifest_dir));
            if candidate.exists() {
                return candidate;
            }
        }
        PathBuf::from("config/service.yaml")
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_yaml::from_str(config_str)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => log::warn!("Ignoring non-numeric PORT value: {}", port),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.normalization()?;
        if self.image.size == 0 {
            return Err(ConfigError::Invalid("image.size must be positive".into()));
        }
        if self.classifier.labels.is_empty() {
            return Err(ConfigError::Invalid(
                "classifier.labels must not be empty".into(),
            ));
        }
        let threshold = self.classifier.confidence.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "classifier.confidence.threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.server.inference_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.inference_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn normalization(&self) -> Result<Normalization, ConfigError> {
        let NormalizationConfig { mean, std } = &self.image.normalization;
        let mean: [f32; 3] = mean.as_slice().try_into().map_err(|_| {
            ConfigError::Invalid(format!(
                "image.normalization.mean needs 3 values, got {}",
                mean.len()
            ))
        })?;
        let std: [f32; 3] = std.as_slice().try_into().map_err(|_| {
            ConfigError::Invalid(format!(
                "image.normalization.std needs 3 values, got {}",
                std.len()
            ))
        })?;
        if std.iter().any(|s| *s == 0.0) {
            return Err(ConfigError::Invalid(
                "image.normalization.std must not contain zero".into(),
            ));
        }
        Ok(Normalization { mean, std })
    }

    pub fn confidence_policy(&self) -> ConfidencePolicy {
        let confidence = &self.classifier.confidence;
        ConfidencePolicy {
            enabled: confidence.enabled,
            threshold: confidence.threshold,
            uncertain_label: confidence.uncertain_label.clone(),
        }
    }
}
