//! Top-level error types for the review pipeline service.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// Review-run store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(String),

    #[error("run {0} has no chunks recorded")]
    MissingChunks(String),
}

/// LLM provider and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM stage timeout: {0}")]
    Timeout(String),

    #[error("LLM provider request failed: {0}")]
    Transport(String),

    #[error("LLM response failed strict validation: {0}")]
    Validation(String),

    #[error("missing API key for provider: {0}")]
    MissingProviderKey(String),
}

/// Intake/admission errors.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("idempotency key expired, existing run {existing_run_id}")]
    IdempotencyExpired { existing_run_id: String },

    #[error("too many concurrent runs (limit {limit})")]
    TooManyConcurrent { limit: i64 },

    #[error("rate limited ({limit_per_minute} runs/min)")]
    RateLimited { limit_per_minute: i64 },

    #[error("failed to enqueue run {run_id}: {reason}")]
    EnqueueFailed {
        run_id: String,
        reason: String,
        run: serde_json::Value,
    },
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::DocumentNotFound(_) | Error::RunNotFound(_) => (
                StatusCode::NOT_FOUND,
                json!({ "detail": self.to_string() }),
            ),
            Error::BadRequest(_) | Error::UnsupportedFileType(_) => (
                StatusCode::BAD_REQUEST,
                json!({ "detail": self.to_string() }),
            ),
            Error::Intake(IntakeError::IdempotencyExpired { existing_run_id }) => (
                StatusCode::CONFLICT,
                json!({ "detail": self.to_string(), "run_id": existing_run_id }),
            ),
            Error::Intake(IntakeError::TooManyConcurrent { limit }) => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "detail": self.to_string(), "limit": limit }),
            ),
            Error::Intake(IntakeError::RateLimited { limit_per_minute }) => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "detail": self.to_string(), "limit_per_minute": limit_per_minute }),
            ),
            Error::Intake(IntakeError::EnqueueFailed { run, .. }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "detail": self.to_string(), "run": run }),
            ),
            _ => {
                tracing::error!(error = %self, "unhandled error surfaced to HTTP layer");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": "internal error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
