//! Configuration for the Dialgate server
//!
//! Configuration is environment-variable driven with serde-style defaults.

use dialgate_core::SessionKeying;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

use crate::error::{ServerError, ServerResult};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// Path to the YAML file holding service definitions and API configs
    pub definitions_path: String,

    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Session TTL in seconds, refreshed from last activity
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Interval of the session expiry sweep in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Gateway continuation marker
    #[serde(default = "default_continue_marker")]
    pub continue_marker: String,

    /// Gateway termination marker
    #[serde(default = "default_end_marker")]
    pub end_marker: String,

    /// Session keying mode: `provider_session_id` or `service_and_phone`
    #[serde(default = "default_session_keying")]
    pub session_keying: String,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_session_ttl() -> u64 {
    30 * 60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_continue_marker() -> String {
    "CON".to_string()
}

fn default_end_marker() -> String {
    "END".to_string()
}

fn default_session_keying() -> String {
    "provider_session_id".to_string()
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn load() -> ServerResult<Self> {
        let mut config = Self::default();

        if let Ok(port) = env::var("DIALGATE_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => warn!("Invalid DIALGATE_PORT value: {}", port),
            }
        }

        if let Ok(host) = env::var("DIALGATE_BIND_ADDRESS") {
            config.bind_address = host;
        }

        if let Ok(path) = env::var("DIALGATE_DEFINITIONS") {
            config.definitions_path = path;
        }

        if let Ok(level) = env::var("DIALGATE_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(ttl) = env::var("DIALGATE_SESSION_TTL_SECS") {
            match ttl.parse::<u64>() {
                Ok(ttl) => config.session_ttl_secs = ttl,
                Err(_) => warn!("Invalid DIALGATE_SESSION_TTL_SECS value: {}", ttl),
            }
        }

        if let Ok(interval) = env::var("DIALGATE_SWEEP_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(interval) => config.sweep_interval_secs = interval.max(1),
                Err(_) => warn!("Invalid DIALGATE_SWEEP_INTERVAL_SECS value: {}", interval),
            }
        }

        if let Ok(marker) = env::var("DIALGATE_CONTINUE_MARKER") {
            config.continue_marker = marker;
        }

        if let Ok(marker) = env::var("DIALGATE_END_MARKER") {
            config.end_marker = marker;
        }

        if let Ok(keying) = env::var("DIALGATE_SESSION_KEYING") {
            config.session_keying = keying;
        }

        if config.definitions_path.is_empty() {
            return Err(ServerError::ConfigError(
                "DIALGATE_DEFINITIONS is required".to_string(),
            ));
        }
        config.keying()?;

        Ok(config)
    }

    /// Parse the configured session keying mode
    pub fn keying(&self) -> ServerResult<SessionKeying> {
        match self.session_keying.as_str() {
            "provider_session_id" => Ok(SessionKeying::ProviderSessionId),
            "service_and_phone" => Ok(SessionKeying::ServiceAndPhone),
            other => Err(ServerError::ConfigError(format!(
                "Invalid session keying mode: {}",
                other
            ))),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_host(),
            definitions_path: String::new(),
            log_level: default_log_level(),
            session_ttl_secs: default_session_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            continue_marker: default_continue_marker(),
            end_marker: default_end_marker(),
            session_keying: default_session_keying(),
        }
    }
}
