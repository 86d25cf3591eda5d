//! Repository traits for the Dialgate core
//!
//! The engine owns session records through these traits; flow and API
//! configuration records are authored elsewhere and read-only here.
//! External crates implement them to provide different persistence
//! mechanisms.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::api_config::{ApiConfigId, ApiUsageStats, ExternalApiConfig};
use super::flow::{Flow, ServiceDefinition};
use super::session::{ServiceId, Session, SessionId};
use super::session_log::SessionLogEntry;
use crate::CoreError;

/// Repository for session records
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Find a session by the gateway-assigned session ID
    async fn find_by_provider_id(
        &self,
        provider_session_id: &str,
    ) -> Result<Option<Session>, CoreError>;

    /// Find the active session for a service/phone pair
    async fn find_active_by_phone(
        &self,
        service_id: &ServiceId,
        phone_number: &str,
    ) -> Result<Option<Session>, CoreError>;

    /// Save a session (insert or full overwrite)
    async fn save(&self, session: &Session) -> Result<(), CoreError>;

    /// Delete a session
    async fn delete(&self, id: &SessionId) -> Result<(), CoreError>;

    /// Expire active sessions whose expiry has passed
    ///
    /// The update must be status-conditioned (`active` and past expiry
    /// only) so the sweep never races a live request. Returns the number
    /// of sessions expired.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, CoreError>;
}

/// Read access to authored flow graphs
#[async_trait]
pub trait FlowRepository: Send + Sync {
    /// Find a flow by ID
    async fn find_flow(&self, id: &super::session::FlowId) -> Result<Option<Flow>, CoreError>;

    /// The root flow of a service
    async fn root_flow(&self, service_id: &ServiceId) -> Result<Option<Flow>, CoreError>;

    /// A service's full definition
    async fn find_service(
        &self,
        service_id: &ServiceId,
    ) -> Result<Option<ServiceDefinition>, CoreError>;

    /// Publish a validated service definition
    async fn save_service(&self, definition: &ServiceDefinition) -> Result<(), CoreError>;

    /// All published service IDs
    async fn list_services(&self) -> Result<Vec<ServiceId>, CoreError>;
}

/// Read access to external API configurations plus usage counters
#[async_trait]
pub trait ApiConfigRepository: Send + Sync {
    /// Find a configuration by ID
    async fn find_by_id(&self, id: &ApiConfigId) -> Result<Option<ExternalApiConfig>, CoreError>;

    /// Publish a configuration
    async fn save(&self, config: &ExternalApiConfig) -> Result<(), CoreError>;

    /// Fold one call outcome into the configuration's usage counters
    async fn record_usage(
        &self,
        id: &ApiConfigId,
        success: bool,
        latency_ms: u64,
    ) -> Result<(), CoreError>;

    /// Current usage counters
    async fn usage(&self, id: &ApiConfigId) -> Result<Option<ApiUsageStats>, CoreError>;
}

/// Append-only sink for per-step audit entries
#[async_trait]
pub trait SessionLogSink: Send + Sync {
    /// Append one entry
    async fn append(&self, entry: SessionLogEntry) -> Result<(), CoreError>;
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::sync::Mutex;

    /// In-memory session repository keyed by provider session ID
    #[derive(Default)]
    pub struct MemorySessionRepository {
        sessions: DashMap<String, Session>,
    }

    impl MemorySessionRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl SessionRepository for MemorySessionRepository {
        async fn find_by_provider_id(
            &self,
            provider_session_id: &str,
        ) -> Result<Option<Session>, CoreError> {
            Ok(self
                .sessions
                .get(provider_session_id)
                .map(|s| s.clone()))
        }

        async fn find_active_by_phone(
            &self,
            service_id: &ServiceId,
            phone_number: &str,
        ) -> Result<Option<Session>, CoreError> {
            Ok(self
                .sessions
                .iter()
                .find(|entry| {
                    let s = entry.value();
                    &s.service_id == service_id
                        && s.phone_number == phone_number
                        && s.status == super::super::session::SessionStatus::Active
                })
                .map(|entry| entry.value().clone()))
        }

        async fn save(&self, session: &Session) -> Result<(), CoreError> {
            self.sessions
                .insert(session.provider_session_id.clone(), session.clone());
            Ok(())
        }

        async fn delete(&self, id: &SessionId) -> Result<(), CoreError> {
            self.sessions.retain(|_, s| &s.id != id);
            Ok(())
        }

        async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, CoreError> {
            let mut expired = 0;
            for mut entry in self.sessions.iter_mut() {
                let session = entry.value_mut();
                if session.status == super::super::session::SessionStatus::Active
                    && session.is_expired(now)
                {
                    let _ = session.expire();
                    expired += 1;
                }
            }
            Ok(expired)
        }
    }

    /// In-memory flow repository
    #[derive(Default)]
    pub struct MemoryFlowRepository {
        services: DashMap<String, ServiceDefinition>,
    }

    impl MemoryFlowRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl FlowRepository for MemoryFlowRepository {
        async fn find_flow(
            &self,
            id: &super::super::session::FlowId,
        ) -> Result<Option<Flow>, CoreError> {
            Ok(self
                .services
                .iter()
                .find_map(|entry| entry.value().flow(id).cloned()))
        }

        async fn root_flow(&self, service_id: &ServiceId) -> Result<Option<Flow>, CoreError> {
            Ok(self
                .services
                .get(&service_id.0)
                .and_then(|s| s.root_flow().cloned()))
        }

        async fn find_service(
            &self,
            service_id: &ServiceId,
        ) -> Result<Option<ServiceDefinition>, CoreError> {
            Ok(self.services.get(&service_id.0).map(|s| s.clone()))
        }

        async fn save_service(&self, definition: &ServiceDefinition) -> Result<(), CoreError> {
            self.services
                .insert(definition.id.0.clone(), definition.clone());
            Ok(())
        }

        async fn list_services(&self) -> Result<Vec<ServiceId>, CoreError> {
            Ok(self
                .services
                .iter()
                .map(|entry| entry.value().id.clone())
                .collect())
        }
    }

    /// In-memory API configuration repository
    #[derive(Default)]
    pub struct MemoryApiConfigRepository {
        configs: DashMap<String, ExternalApiConfig>,
        stats: DashMap<String, ApiUsageStats>,
    }

    impl MemoryApiConfigRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ApiConfigRepository for MemoryApiConfigRepository {
        async fn find_by_id(
            &self,
            id: &ApiConfigId,
        ) -> Result<Option<ExternalApiConfig>, CoreError> {
            Ok(self.configs.get(&id.0).map(|c| c.clone()))
        }

        async fn save(&self, config: &ExternalApiConfig) -> Result<(), CoreError> {
            self.configs.insert(config.id.0.clone(), config.clone());
            Ok(())
        }

        async fn record_usage(
            &self,
            id: &ApiConfigId,
            success: bool,
            latency_ms: u64,
        ) -> Result<(), CoreError> {
            self.stats
                .entry(id.0.clone())
                .or_default()
                .record(success, latency_ms);
            Ok(())
        }

        async fn usage(&self, id: &ApiConfigId) -> Result<Option<ApiUsageStats>, CoreError> {
            Ok(self.stats.get(&id.0).map(|s| *s))
        }
    }

    /// In-memory session log sink
    #[derive(Default)]
    pub struct MemorySessionLogSink {
        entries: Mutex<Vec<SessionLogEntry>>,
    }

    impl MemorySessionLogSink {
        /// Create an empty sink
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of the appended entries
        pub fn entries(&self) -> Vec<SessionLogEntry> {
            self.entries.lock().expect("log sink poisoned").clone()
        }
    }

    #[async_trait]
    impl SessionLogSink for MemorySessionLogSink {
        async fn append(&self, entry: SessionLogEntry) -> Result<(), CoreError> {
            self.entries
                .lock()
                .map_err(|_| CoreError::StateStoreError("log sink poisoned".to_string()))?
                .push(entry);
            Ok(())
        }
    }
}
