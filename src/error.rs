use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong between receiving an upload and returning
/// scores. Each variant carries a fixed HTTP status; the `Display` string is
/// what the client sees unless the variant is marked server-internal below.
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("No file part in the request")]
    MissingFilePart,
    #[error("No file selected for uploading")]
    EmptyFilename,
    #[error("Invalid multipart payload: {0}")]
    InvalidMultipart(#[from] axum::extract::multipart::MultipartError),
    #[error("Value error: error decoding image {}: {}", .path.display(), .source)]
    ImageDecode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Value error: error preprocessing image: {0}")]
    Preprocess(String),
    #[error("File not found: model file {} not found", .0.display())]
    ModelNotFound(PathBuf),
    #[error("File not found: error loading image {}: {}", .path.display(), .source)]
    ImageNotFound {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Runtime error: error loading model: {0}")]
    ModelLoad(#[source] ort::Error),
    #[error("Runtime error: error during prediction: {0}")]
    Inference(#[source] ort::Error),
    #[error("Predictions are not in the expected format: {0}")]
    UnexpectedOutput(String),
    #[error("Failed to store uploaded file: {0}")]
    SaveUpload(#[source] std::io::Error),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PredictionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingFilePart
            | Self::EmptyFilename
            | Self::InvalidMultipart(_)
            | Self::ImageDecode { .. }
            | Self::Preprocess(_) => StatusCode::BAD_REQUEST,
            Self::ModelNotFound(_) | Self::ImageNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ModelLoad(_)
            | Self::Inference(_)
            | Self::UnexpectedOutput(_)
            | Self::SaveUpload(_)
            | Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message exposed to the client. Internal failures get a generic
    /// string; their detail only goes to the logs.
    fn client_message(&self) -> String {
        match self {
            Self::UnexpectedOutput(_) => "Predictions are not in the expected format".to_string(),
            Self::SaveUpload(_) | Self::Unexpected(_) => {
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for PredictionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "prediction request failed");
        } else {
            tracing::warn!(error = %self, "rejected prediction request");
        }

        let body = ErrorBody {
            error: self.client_message(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_400() {
        assert_eq!(
            PredictionError::MissingFilePart.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PredictionError::EmptyFilename.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PredictionError::Preprocess("bad shape".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn missing_paths_map_to_404() {
        let err = PredictionError::ModelNotFound(PathBuf::from("models/detector.onnx"));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.to_string().contains("models/detector.onnx"));

        let err = PredictionError::ImageNotFound {
            path: PathBuf::from("uploads/gone.png"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.to_string().starts_with("File not found:"));
    }

    #[test]
    fn internal_errors_hide_detail_from_clients() {
        let err = PredictionError::Unexpected("session mutex poisoned".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.client_message(), "An unexpected error occurred");

        let err = PredictionError::UnexpectedOutput("output shape [1, 1]".into());
        assert_eq!(
            err.client_message(),
            "Predictions are not in the expected format"
        );
    }
}
