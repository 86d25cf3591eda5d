//! Publishing of authored service definitions and API configurations
//!
//! Definitions are authored outside the engine; this service is the
//! validated write path into the read-only stores the engine consumes.

use crate::domain::api_config::ExternalApiConfig;
use crate::domain::flow::ServiceDefinition;
use crate::domain::repository::{ApiConfigRepository, FlowRepository};
use crate::domain::session::ServiceId;
use crate::CoreError;
use std::sync::Arc;
use tracing::info;

/// Validates and publishes service definitions
pub struct ServiceDefinitionService {
    flow_repo: Arc<dyn FlowRepository>,
    api_repo: Arc<dyn ApiConfigRepository>,
}

impl ServiceDefinitionService {
    /// Create a new definition service
    pub fn new(flow_repo: Arc<dyn FlowRepository>, api_repo: Arc<dyn ApiConfigRepository>) -> Self {
        Self {
            flow_repo,
            api_repo,
        }
    }

    /// Publish an API configuration
    pub async fn publish_api(&self, config: ExternalApiConfig) -> Result<(), CoreError> {
        if config.url.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "API configuration {} has an empty URL",
                config.id.0
            )));
        }
        self.api_repo.save(&config).await?;
        info!(api = %config.id.0, "published API configuration");
        Ok(())
    }

    /// Validate and publish a service definition
    ///
    /// Beyond the graph's own invariants, every referenced API
    /// configuration must already be published.
    pub async fn publish(&self, definition: ServiceDefinition) -> Result<(), CoreError> {
        definition.validate()?;

        for api_id in definition.referenced_api_ids() {
            if self.api_repo.find_by_id(&api_id).await?.is_none() {
                return Err(CoreError::ConfigurationError(format!(
                    "service {} references unknown API configuration: {}",
                    definition.id.0, api_id.0
                )));
            }
        }

        self.flow_repo.save_service(&definition).await?;
        info!(
            service = %definition.id.0,
            flows = definition.flows.len(),
            "published service definition"
        );
        Ok(())
    }

    /// A published service definition
    pub async fn get(&self, id: &ServiceId) -> Result<Option<ServiceDefinition>, CoreError> {
        self.flow_repo.find_service(id).await
    }

    /// All published service IDs
    pub async fn list(&self) -> Result<Vec<ServiceId>, CoreError> {
        self.flow_repo.list_services().await
    }
}
