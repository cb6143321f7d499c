use crate::{
    error::PredictionError,
    model_service::{ComponentScores, ModelService},
    server::SharedState,
    upload::TempUpload,
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{Multipart, MultipartRejection},
        State,
    },
    response::IntoResponse,
    Json,
};
use tracing::instrument;

const STATUS_MESSAGE: &str = "Car component prediction API is running.";

pub async fn predict_status() -> impl IntoResponse {
    Json(serde_json::json!({ "message": STATUS_MESSAGE }))
}

/// Accepts a multipart image upload, stores it for the duration of the
/// request and returns the model's two component scores.
#[instrument(skip(state, multipart))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ComponentScores>, PredictionError> {
    let mut multipart = multipart.map_err(|_| PredictionError::MissingFilePart)?;

    let (filename, bytes) = extract_file_field(&mut multipart).await?;

    // The upload guard removes the file again when this function returns,
    // on the error paths as well as the success path.
    let upload = TempUpload::write(&state.uploads_dir, &filename, &bytes).await?;
    let scores = state.model_service.predict(upload.path()).await?;

    tracing::debug!(
        hood = scores.hood_probability,
        backdoor = scores.backdoor_probability,
        "returning prediction"
    );

    Ok(Json(scores))
}

async fn extract_file_field(
    multipart: &mut Multipart,
) -> Result<(String, Bytes), PredictionError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(PredictionError::EmptyFilename),
        };

        let bytes = field.bytes().await?;
        return Ok((filename, bytes));
    }

    Err(PredictionError::MissingFilePart)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::api_routes;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use std::{
        path::{Path, PathBuf},
        sync::Arc,
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct FixedScores;

    #[async_trait]
    impl ModelService for FixedScores {
        async fn predict(&self, image_path: &Path) -> Result<ComponentScores, PredictionError> {
            assert!(image_path.exists(), "upload should be on disk during inference");
            Ok(ComponentScores {
                hood_probability: 0.92,
                backdoor_probability: 0.07,
            })
        }

        fn ready(&self) -> bool {
            true
        }
    }

    #[derive(Clone)]
    struct MissingModel;

    #[async_trait]
    impl ModelService for MissingModel {
        async fn predict(&self, image_path: &Path) -> Result<ComponentScores, PredictionError> {
            assert!(image_path.exists(), "upload should be on disk during inference");
            Err(PredictionError::ModelNotFound(PathBuf::from(
                "models/car_hood_backdoor_detector.onnx",
            )))
        }

        fn ready(&self) -> bool {
            false
        }
    }

    fn test_app<M: ModelService>(model_service: M, uploads_dir: &Path) -> Router {
        api_routes::<M>().with_state(SharedState {
            model_service: Arc::new(model_service),
            uploads_dir: uploads_dir.to_path_buf(),
        })
    }

    fn multipart_request(field: &str, filename: Option<&str>, content: &[u8]) -> Request<Body> {
        let boundary = "test-boundary";
        let disposition = match filename {
            Some(name) => format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\n"
            ),
            None => format!("Content-Disposition: form-data; name=\"{field}\"\r\n"),
        };

        let mut body = format!("--{boundary}\r\n{disposition}\r\n").into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn response_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn uploads_left(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn get_predict_reports_running() {
        let uploads = TempDir::new().unwrap();
        let app = test_app(FixedScores, uploads.path());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/predict")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["message"], "Car component prediction API is running.");
    }

    #[tokio::test]
    async fn post_without_multipart_body_is_rejected() {
        let uploads = TempDir::new().unwrap();
        let app = test_app(FixedScores, uploads.path());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/predict")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"], "No file part in the request");
        assert_eq!(uploads_left(uploads.path()), 0);
    }

    #[tokio::test]
    async fn post_without_file_field_is_rejected() {
        let uploads = TempDir::new().unwrap();
        let app = test_app(FixedScores, uploads.path());

        let request = multipart_request("other", Some("test.png"), b"bytes");
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"], "No file part in the request");
        assert_eq!(uploads_left(uploads.path()), 0);
    }

    #[tokio::test]
    async fn post_with_empty_filename_is_rejected() {
        let uploads = TempDir::new().unwrap();
        let app = test_app(FixedScores, uploads.path());

        let request = multipart_request("file", Some(""), b"bytes");
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"], "No file selected for uploading");
        assert_eq!(uploads_left(uploads.path()), 0);
    }

    #[tokio::test]
    async fn valid_upload_returns_two_scores_and_cleans_up() {
        let uploads = TempDir::new().unwrap();
        let app = test_app(FixedScores, uploads.path());

        let request = multipart_request("file", Some("test.png"), b"pretend png bytes");
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert!((object["hood_probability"].as_f64().unwrap() - 0.92).abs() < 1e-6);
        assert!((object["backdoor_probability"].as_f64().unwrap() - 0.07).abs() < 1e-6);
        assert_eq!(uploads_left(uploads.path()), 0);
    }

    #[tokio::test]
    async fn model_error_is_mapped_and_upload_cleaned_up() {
        let uploads = TempDir::new().unwrap();
        let app = test_app(MissingModel, uploads.path());

        let request = multipart_request("file", Some("test.png"), b"pretend png bytes");
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = response_json(response).await;
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("car_hood_backdoor_detector.onnx"));
        assert_eq!(uploads_left(uploads.path()), 0);
    }

    #[tokio::test]
    async fn health_reports_model_readiness() {
        let uploads = TempDir::new().unwrap();
        let app = test_app(FixedScores, uploads.path());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "Available");
        assert_eq!(json["model_ready"], true);
    }
}
