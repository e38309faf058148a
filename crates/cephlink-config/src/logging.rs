//! Log subscriber setup shared by cephlink binaries.

use tracing_subscriber::EnvFilter;

use crate::{ConfigError, LogConfig, Result};

/// Install a global `fmt` subscriber. `RUST_LOG` overrides `config.level`.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(false)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))
}
