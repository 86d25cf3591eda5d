use thiserror::Error;

/// Core error type for the Dialgate session engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session has expired
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Session is in a terminal state and accepts no further input
    #[error("Session is terminal: {0}")]
    SessionTerminal(String),

    /// Flow not found
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// Service not found
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// External API configuration not found
    #[error("API configuration not found: {0}")]
    ApiConfigNotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Session store error
    #[error("Session store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// External API call failure
    #[error("External API error: {0}")]
    ExternalApiError(String),

    /// Configuration error (missing or invalid flow/option/API reference)
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Concurrent request for the same session
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
