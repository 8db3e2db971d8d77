//! tunnelwarden CLI
//!
//! Forwards a public TCP port through an ssh SOCKS tunnel and keeps the
//! tunnel alive.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tunnelwarden::{app, logging, Config};

/// tunnelwarden - Self-healing TCP forwarding over an ssh SOCKS tunnel
#[derive(Parser, Debug)]
#[command(name = "tunnelwarden")]
#[command(about = "Forward a TCP port through a supervised ssh SOCKS tunnel")]
#[command(version)]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Path to the YAML configuration file
    config: PathBuf,

    /// Log filter (e.g. "info", "debug", "tunnelwarden_proxy=trace").
    /// Defaults to RUST_LOG, then to "debug" if the config enables debug.
    #[arg(long, env = "TUNNELWARDEN_LOG_LEVEL")]
    log_level: Option<String>,
}

/// Cancel `cancel` on SIGINT or SIGTERM
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
        _ = cancel.cancelled() => return,
    }

    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config is loaded before logging so its debug flag can pick the level
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    logging::setup_logging(cli.log_level.as_deref(), config.debug)?;

    info!(
        "tunnelwarden {} ({}) starting...",
        env!("GIT_TAG"),
        env!("GIT_HASH")
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    app::run(config, cancel).await?;

    info!("tunnelwarden stopped");
    Ok(())
}
