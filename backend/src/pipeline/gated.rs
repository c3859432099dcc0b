use ndarray::Axis;
use std::sync::Arc;

use super::error::InferenceError;
use super::preprocess::{NormalizedTensor, Preprocessor};
use super::{Classifier, FeatureExtractor, GateModel, argmax};

/// Replaces low-confidence predictions with a sentinel label.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidencePolicy {
    pub enabled: bool,
    pub threshold: f32,
    pub uncertain_label: String,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
            uncertain_label: "Uncertain".to_string(),
        }
    }
}

impl ConfidencePolicy {
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    fn apply(&self, label: String, confidence: Option<f32>) -> ClassificationResult {
        match confidence {
            Some(score) if self.enabled && score < self.threshold => ClassificationResult {
                label: self.uncertain_label.clone(),
                confidence: None,
            },
            _ => ClassificationResult { label, confidence },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub accepted: bool,
    pub class_index: usize,
    pub scores: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: Option<f32>,
}

#[derive(Clone)]
pub struct GatedClassifier {
    preprocessor: Preprocessor,
    gate: Arc<dyn GateModel>,
    accepted_class: usize,
    rejection_message: String,
    extractor: Arc<dyn FeatureExtractor>,
    classifier: Arc<dyn Classifier>,
    labels: Vec<String>,
    policy: ConfidencePolicy,
}

pub struct GatedClassifierBuilder {
    preprocessor: Preprocessor,
    gate: Arc<dyn GateModel>,
    extractor: Arc<dyn FeatureExtractor>,
    classifier: Arc<dyn Classifier>,
    accepted_class: usize,
    rejection_message: String,
    labels: Vec<String>,
    policy: ConfidencePolicy,
}

impl GatedClassifierBuilder {
    pub fn preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn accepted_class(mut self, class_index: usize) -> Self {
        self.accepted_class = class_index;
        self
    }

    pub fn rejection_message(mut self, message: impl Into<String>) -> Self {
        self.rejection_message = message.into();
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn policy(mut self, policy: ConfidencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> GatedClassifier {
        GatedClassifier {
            preprocessor: self.preprocessor,
            gate: self.gate,
            accepted_class: self.accepted_class,
            rejection_message: self.rejection_message,
            extractor: self.extractor,
            classifier: self.classifier,
            labels: self.labels,
            policy: self.policy,
        }
    }
}

impl GatedClassifier {
    pub fn builder(
        gate: Arc<dyn GateModel>,
        extractor: Arc<dyn FeatureExtractor>,
        classifier: Arc<dyn Classifier>,
    ) -> GatedClassifierBuilder {
        GatedClassifierBuilder {
            preprocessor: Preprocessor::default(),
            gate,
            extractor,
            classifier,
            accepted_class: 1,
            rejection_message:
                "The uploaded image is not a raw chicken breast. Please upload a valid image."
                    .to_string(),
            labels: vec![
                "Consumable".to_string(),
                "Half-consumable".to_string(),
                "Not consumable".to_string(),
            ],
            policy: ConfidencePolicy::default(),
        }
    }

    /// Decodes and classifies an encoded image.
    ///
    /// Decoding failures are reported before any model is touched.
    pub fn classify(&self, image_bytes: &[u8]) -> Result<ClassificationResult, InferenceError> {
        let tensor = self.preprocessor.preprocess_bytes(image_bytes)?;
        self.classify_tensor(&tensor)
    }

    pub fn classify_tensor(
        &self,
        tensor: &NormalizedTensor,
    ) -> Result<ClassificationResult, InferenceError> {
        let decision = self.gate(tensor)?;
        if !decision.accepted {
            log::info!(
                "Gate rejected input (class {}, scores {:?})",
                decision.class_index,
                decision.scores
            );
            return Err(InferenceError::Rejected(self.rejection_message.clone()));
        }
        log::debug!("Gate accepted input (scores {:?})", decision.scores);

        let features = self.extract(tensor)?;
        let prediction = self.classifier.predict(&features)?;
        let label = self
            .labels
            .get(prediction.class_index)
            .cloned()
            .ok_or_else(|| {
                InferenceError::ModelInvocation(format!(
                    "Classifier returned class {} but only {} labels are configured",
                    prediction.class_index,
                    self.labels.len()
                ))
            })?;

        let result = self.policy.apply(label, prediction.confidence());
        log::info!(
            "Prediction: {}, Confidence: {:?}",
            result.label,
            result.confidence
        );
        Ok(result)
    }

    pub fn gate(&self, tensor: &NormalizedTensor) -> Result<GateDecision, InferenceError> {
        let scores = self.gate.scores(tensor)?;
        let class_index = argmax(&scores).ok_or_else(|| {
            InferenceError::ModelInvocation("Gate model returned no scores".into())
        })?;
        Ok(GateDecision {
            accepted: class_index == self.accepted_class,
            class_index,
            scores,
        })
    }

    /// Mean-pools the extractor's token matrix into one feature vector.
    fn extract(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>, InferenceError> {
        let tokens = self.extractor.features(tensor)?;
        let pooled = tokens.mean_axis(Axis(0)).ok_or_else(|| {
            InferenceError::ModelInvocation("Feature extractor returned no tokens".into())
        })?;
        Ok(pooled.to_vec())
    }
}
