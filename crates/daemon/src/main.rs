//! cmdbridge Daemon
//!
//! Serves a command over websockets: every connection gets its own child
//! process, with messages fed to its stdin and its output lines sent back.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use daemon::config::Config;
use daemon::network::BridgeServer;
use daemon::session::CommandSpec;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// cmdbridge Daemon - bridge a command's stdio to websocket clients.
#[derive(Parser, Debug)]
#[command(name = "cmdbridge-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Listen address of the upgrade endpoint (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    pub address: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to run for each connection, followed by its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    if let Some(address) = &cli.address {
        config.server.address = address.clone();
    }
    config.validate()?;

    // RUST_LOG wins over both the flag and the config file.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose {
            "debug"
        } else {
            config.daemon.log_level.as_str()
        };
        EnvFilter::new(level)
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("cmdbridge daemon starting...");
    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    let command = CommandSpec::from_argv(&cli.command)?;
    tracing::info!(
        "Serving {} ({})",
        command.name(),
        command.program().display()
    );

    let server = BridgeServer::bind(&config, command)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.address))?;

    let shutdown = CancellationToken::new();
    let watcher = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!("Failed to listen for shutdown signals: {}", e),
        }
        watcher.cancel();
    });

    server.run(shutdown).await?;

    tracing::info!("cmdbridge daemon stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }

    Ok(())
}
