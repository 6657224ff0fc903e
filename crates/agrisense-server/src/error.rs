//! API errors with structured JSON responses.

use agrisense_ndvi::PipelineError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// Request-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be read (bad JSON, bad multipart, bad field).
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// The NDVI pipeline rejected the input or failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone()),
            Self::Pipeline(err) => {
                let code = match err {
                    PipelineError::InvalidInput(_) => "INVALID_INPUT",
                    PipelineError::ImageDecode(_) => "IMAGE_DECODE",
                    PipelineError::EmptyGrid => "EMPTY_GRID",
                    PipelineError::ShapeReconcile { .. } => "SHAPE_RECONCILE",
                    PipelineError::ShapeMismatch { .. } | PipelineError::PreviewEncode(_) => {
                        "INTERNAL"
                    }
                };
                if err.is_client_error() {
                    (StatusCode::BAD_REQUEST, code, err.to_string())
                } else {
                    tracing::error!(error = %err, "NDVI processing error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        code,
                        format!("NDVI processing failed: {err}"),
                    )
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = ErrorBody {
            success: false,
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}
