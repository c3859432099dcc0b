use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use shared::ErrorResponse;

pub const NO_IMAGE_MESSAGE: &str = "No image uploaded";

/// Failure raised by a model backend during a forward pass or prediction.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ModelError(pub String);

impl ModelError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// Missing, oversized or undecodable image payload. No model has run.
    #[error("{0}")]
    Input(String),
    /// The gate model did not accept the subject.
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    ModelInvocation(String),
}

impl InferenceError {
    pub fn no_image() -> Self {
        InferenceError::Input(NO_IMAGE_MESSAGE.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::Input(_) => "input",
            InferenceError::Rejected(_) => "rejected",
            InferenceError::ModelInvocation(_) => "model",
        }
    }
}

impl From<ModelError> for InferenceError {
    fn from(err: ModelError) -> Self {
        InferenceError::ModelInvocation(err.0)
    }
}

impl ResponseError for InferenceError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse::new(self.to_string()))
    }
}
