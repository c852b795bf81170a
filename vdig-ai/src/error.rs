//! Error types for vdig-ai
//!
//! `ApiError` is the HTTP-facing error. `TaskError` is the stage failure
//! taxonomy recorded on tasks: transient failures are retried up to the stage
//! cap, definitive ones end the stage at once.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::engine::status_store::StoreError;
use crate::models::ArtifactKind;
use crate::services::asr::TranscriptionError;
use crate::services::fetcher::FetchError;
use crate::services::generator::GenerationError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// vdig-common error
    #[error("Common error: {0}")]
    Common(#[from] vdig_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Common(ref err) => match err {
                vdig_common::Error::NotFound(msg) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
                }
                vdig_common::Error::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    err.to_string(),
                ),
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Failure of one task stage
#[derive(Debug, Error)]
pub enum TaskError {
    /// Outbound platform request failed
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// Reference is not a recognizable video
    #[error("Invalid video reference: {0}")]
    InvalidReference(String),

    /// Every transcript source reported a definitive miss
    #[error("No transcript available: {0}")]
    NoTranscript(String),

    #[error("{0}")]
    Transcription(#[from] TranscriptionError),

    #[error("{kind} generation failed: {source}")]
    Generation {
        kind: ArtifactKind,
        #[source]
        source: GenerationError,
    },

    /// Task refers to configuration that is missing
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Workspace or artifact file I/O
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Status store refused an update
    #[error("{0}")]
    Store(#[from] StoreError),
}

impl TaskError {
    /// Whether re-attempting the same stage operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            TaskError::Fetch(err) => err.is_transient(),
            TaskError::Transcription(err) => err.is_transient(),
            TaskError::Generation { source, .. } => source.is_transient(),
            TaskError::InvalidReference(_)
            | TaskError::NoTranscript(_)
            | TaskError::Configuration(_)
            | TaskError::Storage(_)
            | TaskError::Store(_) => false,
        }
    }
}
