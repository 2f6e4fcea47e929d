//! # interbus-broker
//!
//! Standalone broker binary: loads settings, installs logging and metrics,
//! and serves an empty channel registry that in-process providers (or
//! embedding applications) populate.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use interbus_channel::ChannelRegistry;
use interbus_core::logging::init_subscriber;
use interbus_server::{ChannelServer, ServerConfig};
use interbus_settings::loader::{load_settings_from_path, settings_path};

/// Interbus channel broker.
#[derive(Parser, Debug)]
#[command(name = "interbus-broker", about = "Interbus channel broker")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.interbus/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Seconds to wait for sessions to finish on shutdown.
    #[arg(long, default_value = "10")]
    shutdown_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    init_subscriber(&settings.logging.level);

    let metrics = interbus_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let mut config = ServerConfig::from_settings(&settings);
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let server = ChannelServer::new(config, Arc::new(ChannelRegistry::new()), metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind broker")?;
    tracing::info!(%addr, "broker ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let drained = server
        .shutdown()
        .graceful_shutdown(Some(Duration::from_secs(cli.shutdown_timeout_secs)))
        .await;
    let _ = handle.await;

    tracing::info!(drained, "Shutdown complete");
    Ok(())
}
