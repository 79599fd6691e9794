//! Logging Setup
//!
//! Installs the global `tracing` subscriber. Logs always go to stderr so that
//! stdout carries nothing but transformed text.

use crate::config::LoggingConfig;
use anyhow::Result;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` when set, otherwise `level`
///
/// `verbose` raises the default to DEBUG.
pub fn env_filter(level: Level, verbose: bool) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { level };
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install the global subscriber in the configured format
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = env_filter(config.log_level()?, verbose);

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);

    let result = match config.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
