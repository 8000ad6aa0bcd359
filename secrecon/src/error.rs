//! Error types for secrecon
//!
//! - [`PublishError`]: upload failures, split into "not configured" (skip)
//!   and everything else (logged, recorded, never fatal to a run)
//! - [`ApiError`]: HTTP boundary mapping

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::RunFailure;

/// Publish adapter error
#[derive(Debug, Error)]
pub enum PublishError {
    /// Bucket or endpoint missing; the publish stage is skipped
    #[error("Publishing not configured: {0}")]
    NotConfigured(String),

    /// Request could not be sent or was rejected
    #[error("Upload transport error: {0}")]
    Transport(String),

    /// Upload accepted but the object could not be confirmed
    #[error("Upload verification failed: {0}")]
    Verification(String),

    /// Local artifact vanished before upload
    #[error("Artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),
}

impl PublishError {
    /// Whether the failure just means "publishing is off"
    pub fn is_not_configured(&self) -> bool {
        matches!(self, PublishError::NotConfigured(_))
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// A triggered run reached FAILED (500)
    #[error(transparent)]
    RunFailed(#[from] RunFailure),

    /// secrecon-common error
    #[error("Common error: {0}")]
    Common(#[from] secrecon_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::RunFailed(ref failure) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "RUN_FAILED",
                failure.to_string(),
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
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
