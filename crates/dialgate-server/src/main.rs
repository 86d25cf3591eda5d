use anyhow::{Context, Result};
use dialgate_server::config::ServerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load().context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},dialgate=debug", config.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    dialgate_server::run(config).await.context("Server error")?;

    Ok(())
}
