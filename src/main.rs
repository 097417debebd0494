mod backend;
mod client_manager;
mod cli;
mod config;
mod config_watcher;
mod discovery;
mod embeddings;
#[cfg(test)]
mod end_to_end_tests;
mod error;
mod gateway;
mod gating;
mod http_api;
mod mcp_server;
mod proxy;
mod registry;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use clap::Parser;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use embeddings::{EmbeddingEncoder, HashEncoder};
use gateway::GatewayContext;

/// Resolve the effective `(host, port)` from config plus CLI overrides
/// (§6 "Recognized options": CLI flags win over the config file).
fn effective_listen(config: &Config, cli: &cli::Cli) -> (String, u16) {
    let host = cli.host.clone().unwrap_or_else(|| config.gateway.host.clone());
    let port = cli.port.unwrap_or(config.gateway.port);
    (host, port)
}

#[cfg(feature = "semantic")]
fn build_encoder(config: &Config) -> Arc<dyn EmbeddingEncoder> {
    match embeddings::Model2VecEncoder::load("minishlab/potion-base-8M") {
        Ok(encoder) => {
            let _ = config;
            Arc::new(encoder)
        }
        Err(e) => {
            warn!(error = %e, "failed to load embedding model, falling back to hash encoder");
            Arc::new(HashEncoder::default())
        }
    }
}

#[cfg(not(feature = "semantic"))]
fn build_encoder(_config: &Config) -> Arc<dyn EmbeddingEncoder> {
    Arc::new(HashEncoder::default())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let mut config = Config::load(&cli.config)?;
    let env_port_explicit = config.apply_env_overrides();

    let filter = EnvFilter::try_new(&config.gateway.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let (host, port) = effective_listen(&config, &cli);
    let port_explicit = env_port_explicit || cli.port.is_some();
    config.gateway.host = host.clone();
    config.gateway.port = port;

    info!(
        config_path = %cli.config.display(),
        backends = config.backends.len(),
        "mcp-discovery-gateway starting"
    );

    let encoder = build_encoder(&config);
    let gateway = Arc::new(GatewayContext::new(&config, encoder));
    gateway.connect_all(&config).await;

    let shared_config = Arc::new(ArcSwap::from_pointee(config.clone()));

    if config.gateway.config_watch_enabled {
        let config_path = cli.config.clone();
        let shared = Arc::clone(&shared_config);
        let manager = Arc::clone(&gateway.client_manager);
        let registry = Arc::clone(&gateway.registry);
        let shutdown = Arc::clone(&gateway.shutdown);
        tokio::spawn(async move {
            config_watcher::watch_file(config_path, shared, manager, registry, shutdown).await;
        });
    }

    {
        let manager = Arc::clone(&gateway.client_manager);
        let registry = Arc::clone(&gateway.registry);
        let shutdown = Arc::clone(&gateway.shutdown);
        let interval = std::time::Duration::from_secs(config.gateway.health_check_interval_s);
        tokio::spawn(async move {
            backend::health::run(manager, registry, interval, shutdown).await;
        });
    }

    #[cfg(feature = "http-api")]
    if let Err(e) = http_api::api::start(Arc::clone(&gateway), &host, port, port_explicit).await {
        warn!(error = %e, "HTTP API failed to start");
    }

    let server = mcp_server::DiscoveryGatewayServer::new(Arc::clone(&gateway));
    info!("starting MCP stdio server");
    let service = server.serve(stdio()).await?;

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            result = service.waiting() => {
                if let Err(e) = result {
                    warn!(error = %e, "MCP service exited with error");
                }
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        service.waiting().await?;
    }

    info!("shutting down");
    gateway.shutdown().await;

    Ok(())
}
