//! mailsink - SMTP capture server.
//!
//! Accepts every message sent to it and stores it instead of delivering it.

mod logging;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use logging::LogFormat;
use mailsink_core::{Configuration, DEFAULT_CONFIG_FILE, open_storage, spawn_storage_consumer};
use mailsink_smtp::{SmtpServer, mail_channel};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "MAILSINK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config_path: PathBuf,

    /// Level applied to mailsink's own log targets when `RUST_LOG` is unset.
    #[arg(long, env = "MAILSINK_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log line format.
    #[arg(long, env = "MAILSINK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Simple)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level, args.log_format).context("failed to set up logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting mailsink");

    let config = Configuration::load(&args.config_path)
        .await
        .with_context(|| format!("failed to load {}", args.config_path.display()))?;
    config.validate().context("invalid configuration")?;

    let storage = open_storage(&config)
        .await
        .context("failed to open storage")?;
    let (sender, receiver) = mail_channel(config.channel_capacity);
    let consumer = spawn_storage_consumer(receiver, storage);

    let server_config = config.server_config().context("invalid server settings")?;
    let server = SmtpServer::bind(server_config, sender)
        .await
        .context("failed to start SMTP listener")?;
    let handle = server.handle();
    let serve = tokio::spawn(server.serve());

    wait_for_signal().await?;
    info!("shutdown requested");

    let grace = config.shutdown_grace();
    let report = handle.stop(grace).await;
    if !report.drained {
        warn!(forced = report.forced, "connections closed at the shutdown deadline");
    }

    // The listener task owns the last sender. Once it returns the consumer
    // sees the channel close after the remaining items.
    match serve.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "listener stopped with an error"),
        Err(e) => warn!(error = %e, "listener task failed"),
    }

    match tokio::time::timeout(grace.max(Duration::from_secs(1)), consumer).await {
        Ok(Ok(stats)) => info!(
            saved = stats.saved,
            failed = stats.failed,
            drained = report.drained,
            "mailsink stopped"
        ),
        Ok(Err(e)) => warn!(error = %e, "storage consumer failed"),
        Err(_) => warn!("storage consumer did not finish in time, pending mail dropped"),
    }

    Ok(())
}

/// Resolves on the first SIGINT, SIGTERM or SIGQUIT.
#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).context("failed to watch SIGTERM")?;
    let mut quit = signal(SignalKind::quit()).context("failed to watch SIGQUIT")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to watch SIGINT")?,
        _ = terminate.recv() => info!(signal = "SIGTERM", "signal received"),
        _ = quit.recv() => info!(signal = "SIGQUIT", "signal received"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to watch Ctrl-C")
}
