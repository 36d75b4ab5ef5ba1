//! Error taxonomy for the media asset service.
//!
//! Every public operation fails with one of these kinds. The HTTP layer maps
//! them to status codes; only `Unavailable` and `Canceled` are safe for a
//! caller to retry.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed input (e.g. more than one requested owner).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Well-formed but rule-violating input (e.g. webhook signature mismatch).
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Transition precondition not met, or owner already bound elsewhere.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Provider, network or store failure.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// The inbound request was canceled or ran past its deadline.
    #[error("Canceled: {0}")]
    Canceled(String),
}

/// Result alias used across the crate.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Stable machine-readable kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::ValidationFailed(_) => "validation_failed",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::Unavailable(_) => "unavailable",
            AppError::Canceled(_) => "canceled",
        }
    }

    /// Whether a caller may safely retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Unavailable(_) | AppError::Canceled(_))
    }

    /// HTTP status for this kind.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Canceled(_) => StatusCode::REQUEST_TIMEOUT,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                let constraint = db_err.constraint().unwrap_or("unique constraint");
                AppError::Conflict(format!("Violates {}", constraint))
            }
            _ => {
                tracing::error!("Database error: {}", err);
                AppError::Unavailable("Database unavailable".to_string())
            }
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Unavailable(format!("Upstream request failed: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::warn!(error = %self, "Request failed with retryable error");
        }
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
