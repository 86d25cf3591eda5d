//! Repository implementations backed by in-process maps

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use dialgate_core::domain::api_config::{ApiConfigId, ApiUsageStats, ExternalApiConfig};
use dialgate_core::domain::flow::{Flow, ServiceDefinition};
use dialgate_core::domain::repository::{
    ApiConfigRepository, FlowRepository, SessionLogSink, SessionRepository,
};
use dialgate_core::domain::session::{FlowId, ServiceId, Session, SessionId, SessionStatus};
use dialgate_core::domain::session_log::SessionLogEntry;
use dialgate_core::CoreError;

fn phone_key(service_id: &ServiceId, phone_number: &str) -> String {
    format!("{}:{}", service_id.0, phone_number)
}

/// Session store keyed by internal ID with provider and phone indexes
///
/// The phone index only tracks active sessions, so the phone lookup is
/// `O(1)` and never resurrects a terminal session.
pub struct InMemorySessionRepository {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    by_provider: Arc<RwLock<HashMap<String, String>>>,
    by_phone: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemorySessionRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            by_provider: Arc::new(RwLock::new(HashMap::new())),
            by_phone: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for InMemorySessionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_provider_id(
        &self,
        provider_session_id: &str,
    ) -> Result<Option<Session>, CoreError> {
        let by_provider = self.by_provider.read().await;
        let Some(id) = by_provider.get(provider_session_id) else {
            return Ok(None);
        };
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn find_active_by_phone(
        &self,
        service_id: &ServiceId,
        phone_number: &str,
    ) -> Result<Option<Session>, CoreError> {
        let key = phone_key(service_id, phone_number);
        let by_phone = self.by_phone.read().await;
        let Some(id) = by_phone.get(&key) else {
            return Ok(None);
        };
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(id)
            .filter(|s| s.status == SessionStatus::Active)
            .cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), CoreError> {
        let mut sessions = self.sessions.write().await;
        let mut by_provider = self.by_provider.write().await;
        let mut by_phone = self.by_phone.write().await;

        sessions.insert(session.id.0.clone(), session.clone());
        by_provider.insert(session.provider_session_id.clone(), session.id.0.clone());

        let key = phone_key(&session.service_id, &session.phone_number);
        if session.status == SessionStatus::Active {
            by_phone.insert(key, session.id.0.clone());
        } else if by_phone.get(&key) == Some(&session.id.0) {
            by_phone.remove(&key);
        }

        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), CoreError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.remove(&id.0) else {
            return Ok(());
        };

        let mut by_provider = self.by_provider.write().await;
        if by_provider.get(&session.provider_session_id) == Some(&id.0) {
            by_provider.remove(&session.provider_session_id);
        }

        let mut by_phone = self.by_phone.write().await;
        let key = phone_key(&session.service_id, &session.phone_number);
        if by_phone.get(&key) == Some(&id.0) {
            by_phone.remove(&key);
        }

        Ok(())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, CoreError> {
        let mut sessions = self.sessions.write().await;
        let mut by_phone = self.by_phone.write().await;
        let mut expired = 0;

        for session in sessions.values_mut() {
            // Status-conditioned: a live turn holds the session lock and
            // saves an Active record after us, never alongside us.
            if session.status == SessionStatus::Active && session.is_expired(now) {
                let _ = session.expire();
                let key = phone_key(&session.service_id, &session.phone_number);
                if by_phone.get(&key) == Some(&session.id.0) {
                    by_phone.remove(&key);
                }
                expired += 1;
            }
        }

        if expired > 0 {
            debug!(count = expired, "expired stale sessions");
        }
        Ok(expired)
    }
}

/// Flow store with a flat flow index over the published services
pub struct InMemoryFlowRepository {
    services: Arc<RwLock<HashMap<String, ServiceDefinition>>>,
    flows: Arc<RwLock<HashMap<String, Flow>>>,
}

impl InMemoryFlowRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
            flows: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryFlowRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlowRepository for InMemoryFlowRepository {
    async fn find_flow(&self, id: &FlowId) -> Result<Option<Flow>, CoreError> {
        Ok(self.flows.read().await.get(&id.0).cloned())
    }

    async fn root_flow(&self, service_id: &ServiceId) -> Result<Option<Flow>, CoreError> {
        let services = self.services.read().await;
        Ok(services
            .get(&service_id.0)
            .and_then(|s| s.root_flow().cloned()))
    }

    async fn find_service(
        &self,
        service_id: &ServiceId,
    ) -> Result<Option<ServiceDefinition>, CoreError> {
        Ok(self.services.read().await.get(&service_id.0).cloned())
    }

    async fn save_service(&self, definition: &ServiceDefinition) -> Result<(), CoreError> {
        let mut services = self.services.write().await;
        let mut flows = self.flows.write().await;

        // Republish replaces the service's flows wholesale
        if let Some(previous) = services.get(&definition.id.0) {
            for flow in &previous.flows {
                flows.remove(&flow.id.0);
            }
        }
        for flow in &definition.flows {
            flows.insert(flow.id.0.clone(), flow.clone());
        }
        services.insert(definition.id.0.clone(), definition.clone());

        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<ServiceId>, CoreError> {
        let services = self.services.read().await;
        let mut ids: Vec<ServiceId> = services.values().map(|s| s.id.clone()).collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ids)
    }
}

/// API configuration store with per-configuration usage counters
pub struct InMemoryApiConfigRepository {
    configs: Arc<RwLock<HashMap<String, ExternalApiConfig>>>,
    stats: Arc<RwLock<HashMap<String, ApiUsageStats>>>,
}

impl InMemoryApiConfigRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            configs: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Usage counters for every configuration that has been invoked
    pub async fn all_usage(&self) -> Vec<(ApiConfigId, ApiUsageStats)> {
        let stats = self.stats.read().await;
        stats
            .iter()
            .map(|(id, usage)| (ApiConfigId(id.clone()), *usage))
            .collect()
    }
}

impl Default for InMemoryApiConfigRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApiConfigRepository for InMemoryApiConfigRepository {
    async fn find_by_id(&self, id: &ApiConfigId) -> Result<Option<ExternalApiConfig>, CoreError> {
        Ok(self.configs.read().await.get(&id.0).cloned())
    }

    async fn save(&self, config: &ExternalApiConfig) -> Result<(), CoreError> {
        self.configs
            .write()
            .await
            .insert(config.id.0.clone(), config.clone());
        Ok(())
    }

    async fn record_usage(
        &self,
        id: &ApiConfigId,
        success: bool,
        latency_ms: u64,
    ) -> Result<(), CoreError> {
        let mut stats = self.stats.write().await;
        stats
            .entry(id.0.clone())
            .or_default()
            .record(success, latency_ms);
        Ok(())
    }

    async fn usage(&self, id: &ApiConfigId) -> Result<Option<ApiUsageStats>, CoreError> {
        Ok(self.stats.read().await.get(&id.0).copied())
    }
}

/// Bounded append-only log buffer
///
/// Keeps the most recent entries; the analytics consumer is expected to
/// drain faster than the buffer wraps.
pub struct InMemorySessionLogSink {
    entries: Arc<RwLock<VecDeque<SessionLogEntry>>>,
    capacity: usize,
}

impl InMemorySessionLogSink {
    /// Create a sink holding at most 10,000 entries
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Create a sink with an explicit capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    /// The most recent `n` entries, oldest first
    pub async fn recent(&self, n: usize) -> Vec<SessionLogEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .skip(entries.len().saturating_sub(n))
            .cloned()
            .collect()
    }

    /// Number of buffered entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the buffer is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemorySessionLogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionLogSink for InMemorySessionLogSink {
    async fn append(&self, entry: SessionLogEntry) -> Result<(), CoreError> {
        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
        Ok(())
    }
}
