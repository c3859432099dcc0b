use actix_multipart::{Multipart, MultipartError};
use actix_web::{HttpResponse, web};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::{StreamExt, TryStreamExt};
use serde_json::json;
use sha2::{Digest, Sha256};
use shared::{PredictRequest, PredictionResponse};
use std::time::Duration;
use uuid::Uuid;

use crate::pipeline::{ClassificationResult, GatedClassifier, InferenceError};

/// Request limits applied at the HTTP boundary.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_upload_bytes: usize,
    pub inference_timeout: Duration,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
            inference_timeout: Duration::from_secs(30),
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, limits: UploadLimits) {
    // base64 inflates payloads by a third
    let json_limit = limits.max_upload_bytes.saturating_mul(4) / 3 + 1024;
    cfg.app_data(web::Data::new(limits))
        .app_data(
            web::JsonConfig::default()
                .limit(json_limit)
                .error_handler(|err, _req| {
                    InferenceError::Input(format!("Invalid JSON body: {}", err)).into()
                }),
        )
        .service(web::resource("/predict").route(web::post().to(predict_upload)))
        .service(web::resource("/predict/base64").route(web::post().to(predict_base64)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Multipart upload with the image in the `image` field.
async fn predict_upload(
    pipeline: web::Data<GatedClassifier>,
    limits: web::Data<UploadLimits>,
    mut payload: Multipart,
) -> Result<HttpResponse, InferenceError> {
    let mut image_data: Option<Vec<u8>> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(multipart_error)?
    {
        let is_image = field.name() == Some("image");
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| InferenceError::Input(format!("Upload interrupted: {}", e)))?;
            if is_image {
                if data.len() + chunk.len() > limits.max_upload_bytes {
                    return Err(too_large(limits.max_upload_bytes));
                }
                data.extend_from_slice(&chunk);
            }
        }
        if is_image && image_data.is_none() {
            image_data = Some(data);
        }
    }

    let image = image_data.ok_or_else(InferenceError::no_image)?;
    run_inference(pipeline, &limits, image).await
}

/// A request that is not multipart at all carries no `image` file.
fn multipart_error(err: MultipartError) -> InferenceError {
    match err {
        MultipartError::ContentTypeMissing
        | MultipartError::ContentTypeParse
        | MultipartError::ContentTypeIncompatible => InferenceError::no_image(),
        other => InferenceError::Input(format!("Invalid multipart body: {}", other)),
    }
}

/// JSON body `{"image": "<base64>"}`.
async fn predict_base64(
    pipeline: web::Data<GatedClassifier>,
    limits: web::Data<UploadLimits>,
    body: web::Json<PredictRequest>,
) -> Result<HttpResponse, InferenceError> {
    let encoded = body.into_inner().image.ok_or_else(InferenceError::no_image)?;
    let image = decode_base64_image(&encoded)?;
    if image.len() > limits.max_upload_bytes {
        return Err(too_large(limits.max_upload_bytes));
    }
    run_inference(pipeline, &limits, image).await
}

fn too_large(max: usize) -> InferenceError {
    InferenceError::Input(format!("Image exceeds the {} byte upload limit", max))
}

/// Accepts plain base64 or a `data:<mime>;base64,<payload>` URL.
pub fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, InferenceError> {
    let encoded = encoded.trim();
    let payload = match encoded.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).ok_or_else(|| {
            InferenceError::Input("Malformed data URL: missing ',' separator".into())
        })?,
        None => encoded,
    };
    STANDARD
        .decode(payload)
        .map_err(|e| InferenceError::Input(format!("Invalid base64 image payload: {}", e)))
}

pub fn image_digest(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

async fn run_inference(
    pipeline: web::Data<GatedClassifier>,
    limits: &UploadLimits,
    image: Vec<u8>,
) -> Result<HttpResponse, InferenceError> {
    let request_id = Uuid::new_v4();
    log::info!(
        "[{}] Inference on {} bytes (sha256 {})",
        request_id,
        image.len(),
        image_digest(&image)
    );

    let job = web::block(move || pipeline.classify(&image));
    let outcome = match actix_web::rt::time::timeout(limits.inference_timeout, job).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => Err(InferenceError::ModelInvocation(format!(
            "Inference worker failed: {}",
            e
        ))),
        Err(_) => Err(InferenceError::ModelInvocation(format!(
            "Inference timed out after {} ms",
            limits.inference_timeout.as_millis()
        ))),
    };

    match outcome {
        Ok(ClassificationResult { label, confidence }) => {
            log::info!("[{}] Prediction: {}, Confidence: {:?}", request_id, label, confidence);
            Ok(HttpResponse::Ok().json(PredictionResponse {
                prediction: label,
                confidence_score: confidence,
            }))
        }
        Err(e) => {
            log::warn!("[{}] Inference failed ({}): {}", request_id, e.kind(), e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::gated::tests::{StubClassifier, StubExtractor, StubGate, zero_png};
    use actix_web::http::StatusCode;
    use actix_web::App;
    use actix_web::test as http_test;
    use ndarray::Array2;
    use shared::ErrorResponse;
    use std::sync::atomic::Ordering;

    const BOUNDARY: &str = "----flutterby-test-boundary";

    fn multipart_body(field: &str, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"upload.png\"\r\n",
                field
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn multipart_request(field: &str, data: &[u8]) -> http_test::TestRequest {
        http_test::TestRequest::post()
            .uri("/predict")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(field, data))
    }

    struct Fixture {
        gate: std::sync::Arc<StubGate>,
        extractor: std::sync::Arc<StubExtractor>,
        classifier: std::sync::Arc<StubClassifier>,
        pipeline: GatedClassifier,
    }

    fn fixture(gate_class: usize, probabilities: Option<Vec<f32>>) -> Fixture {
        let gate = StubGate::voting(gate_class);
        let extractor = StubExtractor::new(Array2::zeros((4, 3)));
        let classifier = StubClassifier::new(0, probabilities);
        let pipeline =
            GatedClassifier::builder(gate.clone(), extractor.clone(), classifier.clone())
                .rejection_message("not a chicken breast")
                .build();
        Fixture {
            gate,
            extractor,
            classifier,
            pipeline,
        }
    }

    macro_rules! app {
        ($pipeline:expr, $limits:expr) => {
            http_test::init_service(
                App::new()
                    .app_data(web::Data::new($pipeline))
                    .configure(|cfg| configure_routes(cfg, $limits)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn upload_of_zero_image_is_classified() {
        let fx = fixture(1, Some(vec![0.9, 0.05, 0.05]));
        let app = app!(fx.pipeline.clone(), UploadLimits::default());

        let req = multipart_request("image", &zero_png(100, 100)).to_request();
        let resp = http_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: PredictionResponse = http_test::read_body_json(resp).await;
        assert_eq!(body.prediction, "Consumable");
        assert_eq!(body.confidence_score, Some(0.9));
        assert_eq!(fx.gate.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.classifier.calls(), 1);
    }

    #[actix_web::test]
    async fn upload_without_image_field_touches_no_model() {
        let fx = fixture(1, None);
        let app = app!(fx.pipeline.clone(), UploadLimits::default());

        let req = multipart_request("photo", &zero_png(10, 10)).to_request();
        let resp = http_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: ErrorResponse = http_test::read_body_json(resp).await;
        assert_eq!(body, ErrorResponse::new("No image uploaded"));
        assert_eq!(fx.gate.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn non_multipart_request_reports_no_image() {
        let fx = fixture(1, None);
        let app = app!(fx.pipeline.clone(), UploadLimits::default());

        let empty = http_test::TestRequest::post().uri("/predict").to_request();
        let form = http_test::TestRequest::post()
            .uri("/predict")
            .insert_header(("content-type", "application/x-www-form-urlencoded"))
            .set_payload("foo=bar")
            .to_request();

        for req in [empty, form] {
            let resp = http_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: ErrorResponse = http_test::read_body_json(resp).await;
            assert_eq!(body, ErrorResponse::new("No image uploaded"));
        }
        assert_eq!(fx.gate.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn gate_rejection_returns_fixed_message() {
        let fx = fixture(0, None);
        let app = app!(fx.pipeline.clone(), UploadLimits::default());

        let req = multipart_request("image", &zero_png(100, 100)).to_request();
        let resp = http_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: ErrorResponse = http_test::read_body_json(resp).await;
        assert_eq!(body.error, "not a chicken breast");
        assert_eq!(fx.extractor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.classifier.calls(), 0);
    }

    #[actix_web::test]
    async fn oversized_upload_is_rejected_before_inference() {
        let fx = fixture(1, None);
        let limits = UploadLimits {
            max_upload_bytes: 16,
            ..UploadLimits::default()
        };
        let app = app!(fx.pipeline.clone(), limits);

        let req = multipart_request("image", &zero_png(64, 64)).to_request();
        let resp = http_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(fx.gate.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn base64_body_is_classified_with_null_confidence_when_uncertain() {
        let fx = fixture(1, Some(vec![0.4, 0.3, 0.3]));
        let app = app!(fx.pipeline.clone(), UploadLimits::default());

        let encoded = STANDARD.encode(zero_png(100, 100));
        let req = http_test::TestRequest::post()
            .uri("/predict/base64")
            .set_json(json!({ "image": encoded }))
            .to_request();
        let resp = http_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = http_test::read_body_json(resp).await;
        assert_eq!(
            body,
            json!({ "prediction": "Uncertain", "confidence_score": null })
        );
    }

    #[actix_web::test]
    async fn base64_body_errors_are_json() {
        let fx = fixture(1, None);
        let app = app!(fx.pipeline.clone(), UploadLimits::default());

        let cases = [
            (json!({}), "No image uploaded"),
            (json!({ "image": "%%%not-base64%%%" }), "Invalid base64"),
            (json!({ "image": "" }), "Empty image payload"),
        ];
        for (payload, expected) in cases {
            let req = http_test::TestRequest::post()
                .uri("/predict/base64")
                .set_json(payload)
                .to_request();
            let resp = http_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: ErrorResponse = http_test::read_body_json(resp).await;
            assert!(body.error.contains(expected), "{}", body.error);
        }
        assert_eq!(fx.gate.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn malformed_json_is_an_input_error() {
        let fx = fixture(1, None);
        let app = app!(fx.pipeline.clone(), UploadLimits::default());

        let req = http_test::TestRequest::post()
            .uri("/predict/base64")
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"image\": ")
            .to_request();
        let resp = http_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = http_test::read_body_json(resp).await;
        assert!(body.error.starts_with("Invalid JSON body"));
    }

    #[actix_web::test]
    async fn health_reports_ok() {
        let fx = fixture(1, None);
        let app = app!(fx.pipeline, UploadLimits::default());

        let req = http_test::TestRequest::get().uri("/health").to_request();
        let resp = http_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn data_urls_are_unwrapped() {
        let png = zero_png(2, 2);
        let url = format!("data:image/png;base64,{}", STANDARD.encode(&png));
        assert_eq!(decode_base64_image(&url).unwrap(), png);
        assert!(matches!(
            decode_base64_image("data:image/png;base64"),
            Err(InferenceError::Input(_))
        ));
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            image_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
