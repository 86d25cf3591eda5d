//!
//! Dialgate Server - gateway-facing HTTP surface of the Dialgate platform
//!
//! Wires the session engine to an axum application: the USSD gateway
//! callback, health and read-only admin endpoints, definition loading at
//! startup, and the background session-expiry sweep.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// API routes and handlers
pub mod api;

/// Environment-driven configuration
pub mod config;

/// Definition-file loading
pub mod definitions;

/// Error types
pub mod error;

/// Server assembly and lifecycle
pub mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::DialgateServer;

/// Build a server from configuration and serve until shutdown
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    let server = DialgateServer::from_config(config).await?;
    server.run().await
}
