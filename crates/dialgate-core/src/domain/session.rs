use crate::{domain::flow::InputRule, types::SessionState, CoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session status
///
/// Transitions are monotonic toward a terminal state. Once terminal, the
/// session accepts no further input and a new one must be created for the
/// same phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is live and accepting input
    Active,

    /// Flow reached an end-session action
    Completed,

    /// Session timed out
    Expired,

    /// Flow or error policy terminated the dialog early
    Terminated,

    /// An internal error aborted the dialog
    Error,
}

impl SessionStatus {
    /// Whether the status accepts no further transitions
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// Value object: internal session ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Value object: service ID (the dialed short code)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub String);

/// Value object: flow ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

/// A pending input-collection step
///
/// Set when a collect-input option is selected; the next inbound request is
/// validated against `rule` instead of being matched against menu options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingInput {
    /// Session-state key the captured value is stored under
    pub store_key: String,

    /// Validation rule for the raw input
    pub rule: InputRule,

    /// Prompt text re-rendered on validation failure
    pub prompt: String,

    /// Message shown before the prompt when validation fails
    #[serde(default)]
    pub error_message: Option<String>,

    /// Flow to advance to once a valid value is captured
    #[serde(default)]
    pub next_flow: Option<FlowId>,
}

/// Aggregate: one USSD dialog instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique internal identifier
    pub id: SessionId,

    /// Gateway-assigned session ID, stable across retries
    pub provider_session_id: String,

    /// Service this session belongs to
    pub service_id: ServiceId,

    /// Subscriber phone number as reported by the gateway
    pub phone_number: String,

    /// Current position in the flow graph
    pub current_flow: FlowId,

    /// Accumulated `*`-delimited input chain since session start
    pub raw_input: String,

    /// Working memory for template substitution and cross-step data
    pub state: SessionState,

    /// Outstanding input-collection step, if any
    pub pending_input: Option<PendingInput>,

    /// Current status
    pub status: SessionStatus,

    /// Number of completed state-machine steps
    pub step_count: u32,

    /// Most recently processed accumulated input (idempotent-replay key)
    pub last_input: Option<String>,

    /// Response rendered for `last_input` (idempotent-replay value)
    pub last_response: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last-activity timestamp
    pub last_activity_at: DateTime<Utc>,

    /// Expiry timestamp, refreshed from last activity
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session rooted at the service's root flow
    pub fn new(
        service_id: ServiceId,
        provider_session_id: &str,
        phone_number: &str,
        root_flow: FlowId,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId(Uuid::new_v4().to_string()),
            provider_session_id: provider_session_id.to_string(),
            service_id,
            phone_number: phone_number.to_string(),
            current_flow: root_flow,
            raw_input: String::new(),
            state: SessionState::new(),
            pending_input: None,
            status: SessionStatus::Active,
            step_count: 0,
            last_input: None,
            last_response: None,
            created_at: now,
            last_activity_at: now,
            expires_at: now + ttl,
        }
    }

    /// Refresh the activity and expiry timestamps
    pub fn touch(&mut self, ttl: Duration) {
        let now = Utc::now();
        self.last_activity_at = now;
        self.expires_at = now + ttl;
    }

    /// Whether the expiry timestamp has passed
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Return the cached response if `raw` duplicates the last processed input
    pub fn replay_of(&self, raw: &str) -> Option<&str> {
        match (&self.last_input, &self.last_response) {
            (Some(last), Some(response)) if last == raw => Some(response),
            _ => None,
        }
    }

    /// Record one completed state-machine step
    ///
    /// Advances the step counter and caches the rendered response for
    /// duplicate-delivery replay.
    pub fn record_step(&mut self, raw: &str, response: &str, ttl: Duration) -> Result<(), CoreError> {
        self.ensure_active()?;
        self.step_count += 1;
        self.raw_input = raw.to_string();
        self.last_input = Some(raw.to_string());
        self.last_response = Some(response.to_string());
        self.touch(ttl);
        Ok(())
    }

    /// Record a re-prompt (rejected or unmatched input)
    ///
    /// Caches the response for replay but does not advance the step counter.
    pub fn record_reprompt(
        &mut self,
        raw: &str,
        response: &str,
        ttl: Duration,
    ) -> Result<(), CoreError> {
        self.ensure_active()?;
        self.raw_input = raw.to_string();
        self.last_input = Some(raw.to_string());
        self.last_response = Some(response.to_string());
        self.touch(ttl);
        Ok(())
    }

    /// Mark the session completed
    pub fn complete(&mut self) -> Result<(), CoreError> {
        self.ensure_active()?;
        self.status = SessionStatus::Completed;
        self.last_activity_at = Utc::now();
        Ok(())
    }

    /// Terminate the session early (flow or error policy decision)
    pub fn terminate(&mut self) -> Result<(), CoreError> {
        self.ensure_active()?;
        self.status = SessionStatus::Terminated;
        self.last_activity_at = Utc::now();
        Ok(())
    }

    /// Mark the session expired
    pub fn expire(&mut self) -> Result<(), CoreError> {
        self.ensure_active()?;
        self.status = SessionStatus::Expired;
        self.last_activity_at = Utc::now();
        Ok(())
    }

    /// Mark the session errored
    ///
    /// Unlike the other transitions this is callable from any non-terminal
    /// state and is a no-op on already-terminal sessions, so the failure
    /// path never fails itself.
    pub fn mark_error(&mut self) {
        if !self.status.is_terminal() {
            self.status = SessionStatus::Error;
            self.last_activity_at = Utc::now();
        }
    }

    fn ensure_active(&self) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::SessionTerminal(format!(
                "{} is {:?}",
                self.provider_session_id, self.status
            )));
        }
        Ok(())
    }
}
