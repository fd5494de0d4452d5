//! HTTP service
//!
//! REST API over the StyleTTS2 pipeline:
//!
//! | Route | Auth | Purpose |
//! |---|---|---|
//! | `POST /generate` | API key | Synthesize, upload, return a presigned URL |
//! | `GET /voices` | API key | List voice ids |
//! | `GET /health` | API key | Model status |
//! | `GET /audio/*key` | signed URL | Download an uploaded WAV |

pub mod auth;
pub mod config;
pub mod http;
pub mod state;
pub mod storage;

pub use config::ServerConfig;
pub use http::create_router;
pub use state::{AppState, ServiceSettings};
pub use storage::{LocalObjectStore, ObjectStore, StorageError, UrlSigner};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::engines::styletts2::{ErrorKind, StyleTtsError};

/// Errors returned to HTTP clients. Messages never carry internal detail.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("Invalid or expired signature")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Unavailable(&'static str),

    #[error("{0}")]
    Internal(&'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelNotLoaded | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<StyleTtsError> for ApiError {
    fn from(err: StyleTtsError) -> Self {
        if let StyleTtsError::VoiceNotFound(voice) = &err {
            return ApiError::BadRequest(format!("Target voice '{voice}' not supported"));
        }
        let kind = err.kind();
        if kind.is_client_error() {
            return ApiError::BadRequest(kind.user_message().to_string());
        }
        match kind {
            ErrorKind::Timeout => ApiError::Unavailable(kind.user_message()),
            ErrorKind::ModelLoad => ApiError::ModelNotLoaded,
            _ => ApiError::Internal(kind.user_message()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::NotFound,
            StorageError::InvalidKey(_) => ApiError::BadRequest("Invalid object key".to_string()),
            StorageError::Io(e) => {
                log::error!("Object storage failure: {e}");
                ApiError::Internal("Failed to store audio")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pipeline_errors_map_to_statuses() {
        let cases = [
            (StyleTtsError::AudioLoad("x".into()), StatusCode::BAD_REQUEST),
            (
                StyleTtsError::UnsupportedSymbol {
                    symbol: '#',
                    position: 0,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                StyleTtsError::Timeout {
                    stage: "inference",
                    budget: Duration::from_secs(1),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                StyleTtsError::Synthesis("nan".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                StyleTtsError::VoiceNotFound("angry".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                StyleTtsError::Config("diffusion_steps must be at least 2".into()),
                StatusCode::BAD_REQUEST,
            ),
            (StyleTtsError::ModelNotLoaded, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn invalid_parameters_are_not_reported_as_missing_model() {
        let err = ApiError::from(StyleTtsError::Config("alpha out of range".into()));
        assert_eq!(err.to_string(), "Invalid synthesis parameters");
        assert!(matches!(
            ApiError::from(StyleTtsError::ModelNotLoaded),
            ApiError::ModelNotLoaded
        ));
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let err = ApiError::from(StyleTtsError::Synthesis("tensor shape [1, 3]".into()));
        assert!(!err.to_string().contains("tensor"));
    }
}
