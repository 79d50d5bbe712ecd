use std::sync::Arc;

use anyhow::Context;
use glpi_gateway::{app, GatewayConfig, GlpiClientFactory};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    tracing::info!(
        api_url = %config.api_url,
        timeout_secs = config.timeout.as_secs(),
        "loaded config"
    );

    let factory = Arc::new(GlpiClientFactory::new(&config));
    let listener = TcpListener::bind((config.bind_addr.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.bind_addr, config.port))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app(factory))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
