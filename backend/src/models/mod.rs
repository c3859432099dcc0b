pub mod linear;
#[cfg(feature = "torch")]
pub mod torch;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ConfigError, ServiceConfig};
use crate::pipeline::{GatedClassifier, Preprocessor};
use linear::LinearClassifier;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Failed to read model {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid classifier file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid classifier: {0}")]
    InvalidClassifier(String),
    #[cfg(feature = "torch")]
    #[error("Model backend error: {0}")]
    Backend(String),
    #[cfg(not(feature = "torch"))]
    #[error("This build has no TorchScript backend; rebuild with `--features torch`")]
    BackendUnavailable,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Loads all three models once and wires them into the gated pipeline.
pub fn load_pipeline(config: &ServiceConfig) -> Result<GatedClassifier, ModelLoadError> {
    let classifier = LinearClassifier::load(&config.models.classifier)?;
    if classifier.num_classes() != config.classifier.labels.len() {
        return Err(ModelLoadError::InvalidClassifier(format!(
            "{} has {} classes but {} labels are configured",
            config.models.classifier.display(),
            classifier.num_classes(),
            config.classifier.labels.len()
        )));
    }

    let (gate, extractor) = load_torch_models(config)?;
    let preprocessor = Preprocessor::new(config.image.size, config.normalization()?);

    Ok(GatedClassifier::builder(gate, extractor, Arc::new(classifier))
        .preprocessor(preprocessor)
        .accepted_class(config.gate.accepted_class)
        .rejection_message(config.gate.rejection_message.clone())
        .labels(config.classifier.labels.clone())
        .policy(config.confidence_policy())
        .build())
}

type TorchPair = (
    Arc<dyn crate::pipeline::GateModel>,
    Arc<dyn crate::pipeline::FeatureExtractor>,
);

#[cfg(feature = "torch")]
fn load_torch_models(config: &ServiceConfig) -> Result<TorchPair, ModelLoadError> {
    let gate = torch::TorchModel::load("gate model", &config.models.gate)?;
    let extractor = torch::TorchModel::load("feature extractor", &config.models.feature_extractor)?;
    Ok((Arc::new(gate), Arc::new(extractor)))
}

#[cfg(not(feature = "torch"))]
fn load_torch_models(_config: &ServiceConfig) -> Result<TorchPair, ModelLoadError> {
    Err(ModelLoadError::BackendUnavailable)
}
