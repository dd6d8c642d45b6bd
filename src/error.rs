//! Engine error taxonomy
//!
//! Every failure surfaced by this subsystem maps to exactly one variant, and
//! every variant maps to exactly one HTTP status and stable error code. Gate
//! failures (role, allow-flag, confirmation) all collapse into `Forbidden` so
//! callers cannot probe, via error code alone, which specific internal flag
//! is unset.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Stable machine-readable code, independent of the human message.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Forbidden(_) => "FORBIDDEN",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::Database(_) | EngineError::Serialization(_) | EngineError::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Database(_) | EngineError::Serialization(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        // Internal detail stays in the logs, not in the response body.
        let message = match &self {
            EngineError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "Database error".to_string()
            }
            EngineError::Serialization(e) => {
                tracing::error!(error = %e, "serialization error");
                "Internal error".to_string()
            }
            EngineError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_stable_codes() {
        assert_eq!(EngineError::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(EngineError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(EngineError::Forbidden("x".into()).code(), "FORBIDDEN");
        assert_eq!(EngineError::Conflict("x".into()).code(), "CONFLICT");
        assert_eq!(
            EngineError::Internal(anyhow::anyhow!("boom")).code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn taxonomy_maps_to_http_statuses() {
        assert_eq!(EngineError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(EngineError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(EngineError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(EngineError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            EngineError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
