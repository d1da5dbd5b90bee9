use crate::config::{Config, TelemetryConfig};
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use tracing_subscriber::EnvFilter;

/// Where log lines go when file logging is disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    /// Interactive use
    Stdout,
    /// stdout carries protocol messages
    Stderr,
}

/// Initialize logging
///
/// `RUST_LOG` overrides the configured level.
///
/// # Errors
/// Returns error if the log file or its directory cannot be created
pub fn init(config: &TelemetryConfig, console: Console) -> Result<()> {
    let filter = build_filter(&config.level);

    if !config.enabled {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false);
        match console {
            Console::Stdout => builder.init(),
            Console::Stderr => builder.with_writer(std::io::stderr).init(),
        }
        return Ok(());
    }

    let expanded_path = Config::expand_path(&config.log_path)?;

    if let Some(parent) = expanded_path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&expanded_path)
        .context("failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .init();

    tracing::info!("telemetry initialized: {}", expanded_path.display());

    Ok(())
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
