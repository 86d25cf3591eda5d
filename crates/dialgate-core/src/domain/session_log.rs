use crate::domain::session::{FlowId, SessionId, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One audit row per state-machine step
///
/// Append-only side channel for the analytics subsystem; never read back by
/// the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogEntry {
    /// Internal session ID
    pub session_id: SessionId,

    /// Gateway-assigned session ID
    pub provider_session_id: String,

    /// Flow the step executed on, when known
    pub flow_id: Option<FlowId>,

    /// Action tag (`navigate`, `api_call`, `replay`, ...)
    pub action: String,

    /// New user input for the step
    pub input: Option<String>,

    /// Rendered response text
    pub output: Option<String>,

    /// Session status after the step
    pub status: SessionStatus,

    /// Step latency in milliseconds
    pub latency_ms: u64,

    /// Error message, when the step failed
    pub error: Option<String>,

    /// Step timestamp
    pub timestamp: DateTime<Utc>,
}

impl SessionLogEntry {
    /// Create an entry stamped with the current time
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        provider_session_id: &str,
        flow_id: Option<FlowId>,
        action: &str,
        input: Option<String>,
        output: Option<String>,
        status: SessionStatus,
        latency_ms: u64,
        error: Option<String>,
    ) -> Self {
        Self {
            session_id,
            provider_session_id: provider_session_id.to_string(),
            flow_id,
            action: action.to_string(),
            input,
            output,
            status,
            latency_ms,
            error,
            timestamp: Utc::now(),
        }
    }
}
