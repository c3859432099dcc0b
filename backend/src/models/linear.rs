use serde::{Deserialize, Serialize};
use std::path::Path;

use super::ModelLoadError;
use crate::pipeline::{Classifier, ModelError, ModelResult, Prediction, argmax};

/// How decision values are turned into class probabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbabilityModel {
    #[default]
    None,
    Softmax,
    /// One sigmoid `1 / (1 + exp(a * d + b))` per weight row. Multi-class
    /// scores are renormalized to sum to 1; a binary model gives `[1 - p, p]`.
    Platt { a: Vec<f32>, b: Vec<f32> },
}

/// Linear one-vs-rest classifier exported as JSON weights.
///
/// A single weight row `r` is a binary model with decision values `[0, r]`:
/// a positive `r` selects class 1 and softmax yields the logistic `sigmoid(r)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearClassifier {
    pub weights: Vec<Vec<f32>>,
    pub intercepts: Vec<f32>,
    #[serde(default)]
    pub probability: ProbabilityModel,
}

impl LinearClassifier {
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let classifier = Self::from_json(&raw)?;
        log::info!(
            "Loaded linear classifier from {} ({} classes, {} features)",
            path.display(),
            classifier.num_classes(),
            classifier.input_dim()
        );
        Ok(classifier)
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelLoadError> {
        let classifier: LinearClassifier = serde_json::from_str(raw)?;
        classifier.validate()?;
        Ok(classifier)
    }

    fn validate(&self) -> Result<(), ModelLoadError> {
        let invalid = |msg: String| Err(ModelLoadError::InvalidClassifier(msg));

        let Some(first) = self.weights.first() else {
            return invalid("no weight rows".into());
        };
        if first.is_empty() {
            return invalid("weight rows are empty".into());
        }
        if self.weights.iter().any(|row| row.len() != first.len()) {
            return invalid("weight rows differ in length".into());
        }
        if self.intercepts.len() != self.weights.len() {
            return invalid(format!(
                "{} intercepts for {} weight rows",
                self.intercepts.len(),
                self.weights.len()
            ));
        }
        if let ProbabilityModel::Platt { a, b } = &self.probability {
            let expected = self.weights.len();
            if a.len() != expected || b.len() != expected {
                return invalid(format!(
                    "platt calibration needs {} coefficient pairs",
                    expected
                ));
            }
        }
        Ok(())
    }

    pub fn input_dim(&self) -> usize {
        self.weights.first().map(Vec::len).unwrap_or(0)
    }

    pub fn num_classes(&self) -> usize {
        if self.weights.len() == 1 {
            2
        } else {
            self.weights.len()
        }
    }

    /// One decision value per class.
    pub fn decision_function(&self, features: &[f32]) -> ModelResult<Vec<f32>> {
        if features.len() != self.input_dim() {
            return Err(ModelError::new(format!(
                "Feature dimension mismatch: classifier expects {}, got {}",
                self.input_dim(),
                features.len()
            )));
        }

        let raw: Vec<f32> = self
            .weights
            .iter()
            .zip(&self.intercepts)
            .map(|(row, bias)| row.iter().zip(features).map(|(w, x)| w * x).sum::<f32>() + bias)
            .collect();

        if raw.len() == 1 {
            Ok(vec![0.0, raw[0]])
        } else {
            Ok(raw)
        }
    }

    fn probabilities(&self, decisions: &[f32]) -> Option<Vec<f32>> {
        match &self.probability {
            ProbabilityModel::None => None,
            ProbabilityModel::Softmax => Some(softmax(decisions)),
            ProbabilityModel::Platt { a, b } if self.weights.len() == 1 => {
                let p = 1.0 / (1.0 + (a[0] * decisions[1] + b[0]).exp());
                Some(vec![1.0 - p, p])
            }
            ProbabilityModel::Platt { a, b } => {
                let scores: Vec<f32> = decisions
                    .iter()
                    .zip(a.iter().zip(b))
                    .map(|(d, (a, b))| 1.0 / (1.0 + (a * d + b).exp()))
                    .collect();
                let total: f32 = scores.iter().sum();
                if total > 0.0 {
                    Some(scores.iter().map(|s| s / total).collect())
                } else {
                    None
                }
            }
        }
    }
}

fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

impl Classifier for LinearClassifier {
    fn predict(&self, features: &[f32]) -> ModelResult<Prediction> {
        let decisions = self.decision_function(features)?;
        let class_index = argmax(&decisions)
            .ok_or_else(|| ModelError::new("Classifier produced no finite decision values"))?;
        Ok(Prediction {
            class_index,
            probabilities: self.probabilities(&decisions),
        })
    }
}
