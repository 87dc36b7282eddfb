//! StaffPulse realtime server
//!
//! Accepts authenticated WebSocket connections from the web client, keeps
//! the room index, and relays events raised by the HTTP backend.

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use staffpulse_server::cli::Cli;
use staffpulse_server::{run_server, AppState, ServerConfig, StaticTokenResolver};
use staffpulse_telemetry::RealtimeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    info!("Starting StaffPulse realtime server");

    let mut config = ServerConfig::load(cli.config.as_deref())?;
    config.apply_cli(&cli);
    info!("Configuration loaded successfully");
    info!("Accepted tokens: {}", config.tokens.len());
    if config.internal_token.is_none() {
        warn!("No internal_token configured; /internal endpoints will refuse every call");
    }

    let metrics_handle = init_metrics()?;

    let resolver = Arc::new(StaticTokenResolver::new(config.tokens.clone()));
    let addr = config.bind_address();
    let state = AppState::new(config, resolver).with_metrics_handle(metrics_handle);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let shutdown = async {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
    };

    run_server(state, listener, shutdown).await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("staffpulse=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("staffpulse=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    RealtimeMetrics::describe();

    info!("Metrics exporter initialized");
    Ok(handle)
}
