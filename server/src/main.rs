//! Gatepost notification server binary.
//!
//! Entry point for the WebSocket notification server.

use anyhow::Context;
use gatepost_server::{Server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gatepost_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().context("invalid configuration")?;

    tracing::info!(
        "Starting Gatepost server on {}:{} (heartbeat {}s, ingest {})",
        config.host,
        config.port,
        config.heartbeat_interval_secs,
        if config.ingest_token.is_some() { "enabled" } else { "disabled" }
    );

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
