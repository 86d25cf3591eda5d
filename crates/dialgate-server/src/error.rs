//! Error types for the Dialgate server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dialgate_core::CoreError;
use serde_json::json;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Definition file error
    #[error("Definition error: {0}")]
    DefinitionError(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    IoError(String),

    /// Error from the core engine
    #[error("Core error: {0}")]
    CoreError(#[from] CoreError),

    /// Internal server error
    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Convenient result alias
pub type ServerResult<T> = Result<T, ServerError>;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ServerError::ConfigError(_) | ServerError::DefinitionError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ServerError::NotFound("Service *100#".to_string()).to_string(),
            "Service *100# not found"
        );
        assert_eq!(
            ServerError::ConfigError("missing path".to_string()).to_string(),
            "Configuration error: missing path"
        );
    }

    #[test]
    fn test_from_core_error() {
        let error: ServerError = CoreError::FlowNotFound("menu".to_string()).into();
        assert!(error.to_string().contains("Flow not found: menu"));
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let response = ServerError::NotFound("Session s1".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
