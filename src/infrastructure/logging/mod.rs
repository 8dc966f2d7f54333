//! Logging initialization using tracing.

use anyhow::{Result, anyhow};
use std::io;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::domain::models::config::LoggingConfig;

/// Initialize the global tracing subscriber from the logging configuration.
///
/// The configured level is the default directive; `RUST_LOG` still overrides
/// it per target. Safe to call once per process; a second call returns an
/// error from the subscriber registry.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let default_level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    match config.format.as_str() {
        "json" => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_current_span(true)
                .with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
        }
        "pretty" => {
            let layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(io::stdout)
                .with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
        }
        other => return Err(anyhow!("Invalid log format: {other}")),
    }

    Ok(())
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!("Invalid log level: {other}")),
    }
}
