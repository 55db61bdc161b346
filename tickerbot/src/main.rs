//! tickerbot - Stock and FX alerts over Telegram, with a JSON dashboard.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tickerbot::TickerBot;
use tickerbot_common::config::Config;
use tickerbot_common::logging::init_logging;

#[derive(Parser)]
#[command(name = "tickerbot")]
#[command(author, version, about = "Stock and FX alerts over Telegram", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.tickerbot/config.json)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Run every alert job once, print the results and exit
    #[arg(long)]
    once: bool,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let Some(path) = &cli.config else {
        return Config::load_with_env();
    };
    let mut config = Config::load_from(path)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();
    let cli = Cli::parse();

    let mut config = load_config(&cli)?;
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("tickerbot v{}", env!("CARGO_PKG_VERSION"));

    let bot = TickerBot::new(config)?;

    if cli.once {
        for status in bot.run_once().await {
            match &status.last_error {
                Some(error) => tracing::error!(job = %status.name, error = %error, "Job failed"),
                None => tracing::info!(job = %status.name, report = ?status.last_report, "Job finished"),
            }
        }
        return Ok(());
    }

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    bot.start(shutdown_signal()).await
}

/// Resolves on SIGTERM or SIGINT (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Signal handlers unavailable, falling back to Ctrl+C");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
