//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level.

use crate::config::LoggingConfig;
use crate::error::{FoundryError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber described by `config`
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(config.ansi);

    let installed = match config.format.as_str() {
        "json" => builder.json().with_current_span(false).try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };

    installed.map_err(|e| FoundryError::Config(format!("Failed to install logger: {}", e)))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| FoundryError::Config(format!("Invalid log level '{}': {}", config.level, e)))
}
