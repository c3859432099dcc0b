use serde::{Deserialize, Serialize};

/// JSON body accepted by `POST /predict/base64`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PredictRequest {
    /// Base64 image payload; a `data:<mime>;base64,` prefix is tolerated.
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResponse {
    pub prediction: String,
    /// Always present on the wire; `null` when the classifier gave no usable score.
    pub confidence_score: Option<f32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
