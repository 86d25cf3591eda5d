//! Server assembly and lifecycle

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Utc;
use dialgate_core::application::definition_service::ServiceDefinitionService;
use dialgate_core::domain::repository::SessionRepository;
use dialgate_core::{
    EngineConfig, ExternalApiInvoker, MarkerVocabulary, SessionExecutionService, TemplateRenderer,
};
use dialgate_invoker::HttpInvoker;
use dialgate_state_inmemory::{
    InMemoryApiConfigRepository, InMemoryFlowRepository, InMemorySessionLogSink,
    InMemorySessionRepository,
};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::definitions::{self, DefinitionFile};
use crate::error::ServerResult;

/// The assembled Dialgate server
pub struct DialgateServer {
    config: ServerConfig,
    engine: SessionExecutionService,
    sessions: Arc<InMemorySessionRepository>,
    flows: Arc<InMemoryFlowRepository>,
    apis: Arc<InMemoryApiConfigRepository>,
    log_sink: Arc<InMemorySessionLogSink>,
}

impl DialgateServer {
    /// Build a server from configuration, loading definitions from disk
    /// and invoking external APIs over HTTP
    pub async fn from_config(config: ServerConfig) -> ServerResult<Arc<Self>> {
        let file = definitions::load_file(&config.definitions_path)?;
        let apis = Arc::new(InMemoryApiConfigRepository::new());
        let invoker = Arc::new(HttpInvoker::new(apis.clone()));
        Self::assemble(config, apis, invoker, file).await
    }

    /// Build a server around an explicit invoker and definition set
    ///
    /// This is the seam tests and alternative deployments use.
    pub async fn assemble(
        config: ServerConfig,
        apis: Arc<InMemoryApiConfigRepository>,
        invoker: Arc<dyn ExternalApiInvoker>,
        file: DefinitionFile,
    ) -> ServerResult<Arc<Self>> {
        let sessions = Arc::new(InMemorySessionRepository::new());
        let flows = Arc::new(InMemoryFlowRepository::new());
        let log_sink = Arc::new(InMemorySessionLogSink::new());

        let definition_service = ServiceDefinitionService::new(flows.clone(), apis.clone());
        definitions::publish_all(&definition_service, file).await?;

        let engine_config = EngineConfig {
            session_ttl_secs: config.session_ttl_secs,
            keying: config.keying()?,
            markers: MarkerVocabulary::new(&config.continue_marker, &config.end_marker),
            ..EngineConfig::default()
        };
        let engine = SessionExecutionService::new(
            sessions.clone(),
            flows.clone(),
            apis.clone(),
            invoker,
            log_sink.clone(),
            TemplateRenderer::new(),
            engine_config,
        );

        Ok(Arc::new(Self {
            config,
            engine,
            sessions,
            flows,
            apis,
            log_sink,
        }))
    }

    /// The session engine
    pub fn engine(&self) -> &SessionExecutionService {
        &self.engine
    }

    /// The session store
    pub fn sessions(&self) -> &Arc<InMemorySessionRepository> {
        &self.sessions
    }

    /// The flow store
    pub fn flows(&self) -> &Arc<InMemoryFlowRepository> {
        &self.flows
    }

    /// The API configuration store
    pub fn apis(&self) -> &Arc<InMemoryApiConfigRepository> {
        &self.apis
    }

    /// The session log buffer
    pub fn log_sink(&self) -> &Arc<InMemorySessionLogSink> {
        &self.log_sink
    }

    /// Build the HTTP router
    pub fn router(self: &Arc<Self>) -> Router {
        crate::api::build_router(self.clone())
    }

    /// Bind, serve, and sweep until shutdown
    pub async fn run(self: Arc<Self>) -> ServerResult<()> {
        self.clone().spawn_expiry_sweep();

        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::ServerError::IoError(format!("bind {}: {}", addr, e)))?;
        info!(%addr, "dialgate server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| crate::error::ServerError::InternalError(e.to_string()))
    }

    /// Background task closing timed-out sessions
    fn spawn_expiry_sweep(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.sessions.expire_stale(Utc::now()).await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "expiry sweep closed sessions"),
                    Err(err) => warn!(error = %err, "expiry sweep failed"),
                }
            }
        });
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
