use anyhow::Result;
use registry_core::Registry;
use registry_http::{serve, ApiState, RegistryMetrics};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting registry-server...");

    let config = ServerConfig::from_env()?;
    info!("  - Expire time: {:?}", config.registry.expire_time);
    info!("  - Clean interval: {:?}", config.registry.clean_interval);

    let registry = Arc::new(Registry::new(config.registry.clone()));
    let cleanup = registry.start_cleanup();
    info!("Service registry initialized");

    let metrics = RegistryMetrics::new()?;
    let state = Arc::new(ApiState::new(registry.clone(), metrics));

    let listener = TcpListener::bind(config.listen_addr).await?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(listener, state, shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    server.await??;
    cleanup.shutdown().await;

    info!("registry-server stopped with {} live services", registry.count().await);
    Ok(())
}
