//!
//! Dialgate Core - session engine for the Dialgate USSD platform
//!
//! This crate defines the session state machine, the domain model for
//! flows, sessions, and external API configurations, and the interfaces
//! the surrounding crates implement. It performs no I/O of its own: HTTP
//! invocation and persistence arrive through traits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Domain layer - core business models, entities, and rules
pub mod domain;

/// Application services - the state machine and rendering helpers
pub mod application;

/// Core types
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use error::CoreError;
pub use types::SessionState;

// Re-export main API types for easy use
pub use application::engine::{
    EngineConfig, GatewayRequest, SessionExecutionService, SessionKeying,
};
pub use application::render::TemplateRenderer;
pub use application::response::{GatewayReply, MarkerVocabulary};
pub use domain::api_config::{ApiConfigId, ApiUsageStats, ExternalApiConfig};
pub use domain::flow::{Flow, FlowOption, OptionAction, ServiceDefinition};
pub use domain::repository::{
    ApiConfigRepository, FlowRepository, SessionLogSink, SessionRepository,
};
pub use domain::session::{FlowId, ServiceId, Session, SessionId, SessionStatus};

/// Result of a successful external API invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ApiOutcome {
    /// Session-state entries extracted per the response mapping
    pub mapped: Map<String, Value>,

    /// The full parsed response body
    pub raw: Value,

    /// Wall-clock latency of the invocation in milliseconds
    pub latency_ms: u64,
}

/// Executes one configured external HTTP call and normalizes its outcome
///
/// Implementations own auth injection, request/response mapping, bounded
/// retry, success-criteria evaluation, and usage-counter upkeep. Ordinary
/// HTTP and criteria failures surface as `CoreError::ExternalApiError`;
/// nothing panics past this boundary.
#[async_trait]
pub trait ExternalApiInvoker: Send + Sync {
    /// Invoke the configured call against the session's state
    async fn invoke(
        &self,
        config: &ExternalApiConfig,
        session: &Session,
    ) -> Result<ApiOutcome, CoreError>;
}
