//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use cadence_core::workflow::error::EngineError;
use cadence_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Engine errors.
    Engine(EngineError),
    /// Authentication failure.
    Unauthorized(String),
    /// Malformed request.
    Validation(String),
    NotFound(String),
    /// Generic internal error.
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Engine(EngineError::Repository(e))
    }
}

impl AppError {
    /// Status, machine-readable code and message.
    fn parts(&self) -> (StatusCode, String, String) {
        match self {
            AppError::Engine(e) => {
                let status = match e {
                    EngineError::WorkflowNotFound(_) | EngineError::RunNotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    EngineError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
                    EngineError::InvalidWorkflow(_) => StatusCode::BAD_REQUEST,
                    EngineError::WorkflowInactive(_)
                    | EngineError::ConcurrentResumeConflict(_)
                    | EngineError::RunAlreadyTerminal(_)
                    | EngineError::Repository(RepositoryError::Conflict(_)) => {
                        StatusCode::CONFLICT
                    }
                    EngineError::Repository(RepositoryError::Connection) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.code().to_ascii_uppercase(), e.to_string())
            }
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED".into(), msg.clone())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR".into(), msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND".into(), msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR".into(), msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(%code, %message, "request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
