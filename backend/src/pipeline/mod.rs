//! Gated two-stage image classification.
//!
//! A gate model first decides whether an image shows the expected subject.
//! Only accepted images reach the feature extractor and the downstream
//! classifier. Model backends plug in through the capability traits below.

pub mod error;
pub mod gated;
pub mod preprocess;

use ndarray::Array2;

pub use error::{InferenceError, ModelError};
pub use gated::{ClassificationResult, ConfidencePolicy, GatedClassifier};
pub use preprocess::{NormalizedTensor, Normalization, Preprocessor};

pub type ModelResult<T> = Result<T, ModelError>;

/// Validates that an image belongs to the expected subject domain.
pub trait GateModel: Send + Sync {
    /// Raw per-class scores (logits or probabilities) for a batch of one.
    fn scores(&self, input: &NormalizedTensor) -> ModelResult<Vec<f32>>;
}

/// Maps an image to a per-token feature matrix of shape `(tokens, dim)`.
///
/// Extractors that already pool their output return a single row.
pub trait FeatureExtractor: Send + Sync {
    fn features(&self, input: &NormalizedTensor) -> ModelResult<Array2<f32>>;
}

pub trait Classifier: Send + Sync {
    fn predict(&self, features: &[f32]) -> ModelResult<Prediction>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    /// Per-class probabilities when the classifier is calibrated.
    pub probabilities: Option<Vec<f32>>,
}

impl Prediction {
    pub fn confidence(&self) -> Option<f32> {
        self.probabilities
            .as_ref()
            .and_then(|probs| probs.iter().copied().reduce(f32::max))
    }
}

/// Index of the largest score; the first one wins on ties and NaN is skipped.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((i, value)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_picks_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[-3.0, -1.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn confidence_is_max_probability() {
        let prediction = Prediction {
            class_index: 2,
            probabilities: Some(vec![0.1, 0.3, 0.6]),
        };
        assert_eq!(prediction.confidence(), Some(0.6));

        let uncalibrated = Prediction {
            class_index: 0,
            probabilities: None,
        };
        assert_eq!(uncalibrated.confidence(), None);
    }
}
