//! homed-web: dashboard gateway for the HOMEd ecosystem.
//!
//! Serves the dashboard frontend over plain HTTP and bridges its
//! WebSocket clients onto the MQTT bus the rest of HOMEd lives on.

mod auth;
mod bridge;
mod config;
mod connection;
mod http;
mod mqtt;
mod service;
mod store;

use clap::Parser;
use config::GatewayConfig;
use service::GatewayService;
use std::path::PathBuf;
use tracing::{error, info};

/// homed-web — HOMEd dashboard gateway
#[derive(Parser, Debug)]
#[command(name = "homed-web", version, about = "HOMEd dashboard gateway")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Frontend asset directory
    #[arg(long)]
    frontend: Option<String>,

    /// Database file path
    #[arg(long)]
    database: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.homed/homed-web.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting homed-web");

    // Load gateway config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let config = match GatewayConfig::load(
        Some(&config_path),
        cli.port,
        cli.frontend.as_deref(),
        cli.database.as_deref(),
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    // Run until shutdown signal; the service drains clients, writes the
    // database and closes the bus link before returning.
    if let Err(e) = GatewayService::new(config).run(shutdown_signal()).await {
        error!(error = %e, "gateway error");
        std::process::exit(1);
    }

    info!("homed-web stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
