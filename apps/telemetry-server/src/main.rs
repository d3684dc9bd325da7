//! Telemetry Server - standalone binary for the real-time contact-center
//! telemetry plane.
//!
//! Wires the AudioHook ingress (C6), vendor connector (C7), ingest/scoring
//! engine (C5), live-audio buffer (C4), and HTTP/SSE gateway (C8) together
//! via [`telemetry_core::bootstrap`] and runs them until a shutdown signal
//! arrives.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use crate::config::ServerConfig;

/// Telemetry Server - real-time contact-center telemetry ingest and SSE gateway.
#[derive(Parser, Debug)]
#[command(name = "telemetry-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TELEMETRY_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Gateway bind port (overrides config file).
    #[arg(short = 'p', long, env = "TELEMETRY_GATEWAY_PORT")]
    port: Option<u16>,

    /// Gateway bind host (overrides config file).
    #[arg(long, env = "TELEMETRY_GATEWAY_HOST")]
    host: Option<String>,

    /// Run every outbound component (connector, forwarder) in dry-run mode:
    /// log what would be sent without making the call.
    #[arg(long, env = "TELEMETRY_DRY_RUN")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Telemetry Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.gateway_port = port;
    }
    if let Some(host) = args.host {
        config.gateway_host = host;
    }
    if args.dry_run {
        config.dry_run = true;
        config.connector.dry_run = true;
    }

    log::info!(
        "Configuration: gateway={}:{}, audiohook_port={}, dry_run={}",
        config.gateway_host,
        config.gateway_port,
        config.audiohook.port,
        config.dry_run,
    );

    let gateway_host = config.gateway_host.clone();
    let gateway_port = config.gateway_port;
    let bootstrap_config = config.into_bootstrap_config().context("Failed to build bootstrap configuration")?;

    let services = telemetry_core::bootstrap(bootstrap_config).context("Failed to bootstrap services")?;
    log::info!("Services bootstrapped successfully");

    let (audiohook_handle, connector_handle) = services.spawn_background_tasks();
    log::info!("Background tasks started");

    let app_state = services.app_state.clone();
    let gateway_stop = services.stop.clone();
    let serve_host = gateway_host.clone();
    let gateway_handle = tokio::spawn(async move {
        if let Err(err) = telemetry_core::serve(app_state, &serve_host, gateway_port, gateway_stop).await {
            log::error!("HTTP/SSE gateway exited with error: {err}");
        }
    });
    log::info!("HTTP/SSE gateway started on {gateway_host}:{gateway_port}");

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown();

    let _ = tokio::join!(audiohook_handle, connector_handle, gateway_handle);

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
