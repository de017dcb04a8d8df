use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("GVMS error: {0}")]
    Gvms(#[from] GvmsError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Operation cancelled")]
    Cancelled,
}

impl AppError {
    /// True when the error is a cancellation surfacing from any layer.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AppError::Cancelled | AppError::Publish(PublishError::Cancelled)
        )
    }
}

/// Upstream GVMS API errors
#[derive(Error, Debug)]
pub enum GvmsError {
    /// 401 from the API. The cached credential has already been evicted.
    #[error("GVMS rejected the bearer token")]
    Unauthorized,

    #[error("GVMS returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("GVMS transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode GVMS response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Token exchange failed: {0}")]
    Token(String),
}

/// Downstream publish errors
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Publish retries exhausted for entries: {}", entry_ids.join(","))]
    RetriesExhausted { entry_ids: Vec<String> },

    #[error("Sink error ({code}): {message}")]
    Sink {
        code: String,
        message: String,
        caller_fault: bool,
    },

    #[error("Failed to encode publish entry: {0}")]
    Encode(serde_json::Error),

    #[error("Publish cancelled")]
    Cancelled,
}

/// Scheduler construction errors. These are fatal for the affected job.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("No schedule configured for job '{0}'")]
    MissingSchedule(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                msg.clone(),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized".to_string(),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
            ),
            AppError::Gvms(_) => (
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_ERROR",
                "The GVMS API call failed".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: message,
                error_code: error_code.to_string(),
            }),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Basic realm=\"dev\""),
            );
        }

        response
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
