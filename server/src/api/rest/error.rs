//! Error handling for REST API
//!
//! Provides the `AppError` type used across all REST endpoints.

use crate::error::StoreError;
use axum::{http::StatusCode, response::IntoResponse, Json};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    /// The resource exists but cannot be served right now
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => {
                // Log full details server-side, return generic message to client
                tracing::error!(details = %msg, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "An internal error occurred".to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::NotFound(err.to_string()),
            StoreError::InvalidArgument(_)
            | StoreError::InvalidOffset(_)
            | StoreError::UnsupportedType(_) => AppError::BadRequest(err.to_string()),
            StoreError::WrongStatus(_) | StoreError::InconsistentChunkLayout(_) => {
                AppError::Unavailable(err.to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: StoreError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(StoreError::NotFound("item x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(StoreError::UnsupportedType("ftp".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StoreError::WrongStatus("pending".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(StoreError::InconsistentChunkLayout("gap".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(StoreError::TransportFailure("ssh: refused".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
