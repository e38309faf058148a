//! # cephlink-config
//!
//! Configuration for the cephlink native bridge.
//!
//! Configuration is read from a TOML file and then overridden by environment
//! variables. The file is located, in order, by:
//!
//! 1. an explicit path (`Config::load_from`, the CLI's `--config`)
//! 2. `CEPHLINK_CONFIG`
//! 3. `<config dir>/cephlink/config.toml` (e.g. `~/.config/cephlink/config.toml`)
//!
//! A missing file is not an error; defaults are used.
//!
//! ## Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `CEPHLINK_GUARD_STACK_SIZE` | `guard.stack_size` |
//! | `CEPHLINK_GUARD_THREAD_NAME` | `guard.thread_name` |
//! | `CEPHLINK_XATTR_START_SIZE` | `retry.xattr_start_size` |
//! | `CEPHLINK_XATTR_MAX_SIZE` | `retry.xattr_max_size` |
//! | `CEPHLINK_LOG_LEVEL` | `log.level` |
//!
//! ```toml
//! [guard]
//! stack_size = 65536
//! thread_name = "cephlink-ptrguard"
//!
//! [retry]
//! xattr_start_size = 1024
//! xattr_max_size = 65536
//!
//! [log]
//! level = "info"
//! ansi = true
//! ```

pub mod logging;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::filter::LevelFilter;

/// Environment variable naming an explicit config file.
pub const ENV_CONFIG_PATH: &str = "CEPHLINK_CONFIG";

/// Smallest worker stack accepted for guard threads.
pub const MIN_GUARD_STACK_SIZE: usize = 16 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Worker options for pointer guards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Stack size of each guard's worker thread in bytes.
    pub stack_size: usize,
    /// Name given to guard worker threads.
    pub thread_name: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            stack_size: 64 * 1024,
            thread_name: "cephlink-ptrguard".to_string(),
        }
    }
}

/// Size bounds for resize loops at the built-in call sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub xattr_start_size: usize,
    pub xattr_max_size: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            xattr_start_size: 1024,
            xattr_max_size: 1 << 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter level; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Colorize terminal output.
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

/// Complete cephlink configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub guard: GuardConfig,
    pub retry: RetryConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load from the discovered config file (if any), apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .or_else(Self::default_path);
        match path {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                debug!("No config file found, using defaults");
                let mut config = Self::default();
                config.apply_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load from an explicit file, apply environment overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "Loaded config file");
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text. Missing sections and fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// `<config dir>/cephlink/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cephlink").join("config.toml"))
    }

    /// Apply `CEPHLINK_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "CEPHLINK_GUARD_STACK_SIZE") {
            self.guard.stack_size = v;
        }
        if let Some(v) = lookup("CEPHLINK_GUARD_THREAD_NAME") {
            self.guard.thread_name = v;
        }
        if let Some(v) = parse_var(&lookup, "CEPHLINK_XATTR_START_SIZE") {
            self.retry.xattr_start_size = v;
        }
        if let Some(v) = parse_var(&lookup, "CEPHLINK_XATTR_MAX_SIZE") {
            self.retry.xattr_max_size = v;
        }
        if let Some(v) = lookup("CEPHLINK_LOG_LEVEL") {
            self.log.level = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.guard.stack_size < MIN_GUARD_STACK_SIZE {
            return Err(invalid(
                "guard.stack_size",
                format!("must be at least {} bytes", MIN_GUARD_STACK_SIZE),
            ));
        }
        if self.guard.thread_name.is_empty() || self.guard.thread_name.contains('\0') {
            return Err(invalid(
                "guard.thread_name",
                "must be non-empty and contain no NUL bytes",
            ));
        }
        if self.retry.xattr_start_size == 0 {
            return Err(invalid("retry.xattr_start_size", "must be at least 1"));
        }
        if self.retry.xattr_max_size < self.retry.xattr_start_size {
            return Err(invalid(
                "retry.xattr_max_size",
                "must be at least retry.xattr_start_size",
            ));
        }
        if LevelFilter::from_str(&self.log.level).is_err() {
            return Err(invalid(
                "log.level",
                format!("unknown level '{}'", self.log.level),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

static GLOBAL: OnceCell<Config> = OnceCell::new();

/// Install the process-wide configuration. The first call wins; the
/// installed value is returned either way.
pub fn install(config: Config) -> &'static Config {
    GLOBAL.get_or_init(|| config)
}

/// The configuration passed to [`install`], if any. Never loads anything.
pub fn installed() -> Option<&'static Config> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.guard.stack_size, 64 * 1024);
        assert_eq!(config.retry.xattr_start_size, 1024);
        assert_eq!(config.retry.xattr_max_size, 65536);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str("[guard]\nstack_size = 131072\n").unwrap();
        assert_eq!(config.guard.stack_size, 131072);
        assert_eq!(config.guard.thread_name, "cephlink-ptrguard");
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn test_bad_toml() {
        let result = Config::from_toml_str("[guard\nstack_size = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[retry]\nxattr_start_size = 512\nxattr_max_size = 4096\n[log]\nlevel = \"debug\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.retry.xattr_start_size, 512);
        assert_eq!(config.retry.xattr_max_size, 4096);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = Config::load_from(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_from(vars(&[
            ("CEPHLINK_GUARD_STACK_SIZE", "32768"),
            ("CEPHLINK_GUARD_THREAD_NAME", "pg"),
            ("CEPHLINK_XATTR_MAX_SIZE", "8192"),
            ("CEPHLINK_LOG_LEVEL", "trace"),
        ]));
        assert_eq!(config.guard.stack_size, 32768);
        assert_eq!(config.guard.thread_name, "pg");
        assert_eq!(config.retry.xattr_max_size, 8192);
        assert_eq!(config.log.level, "trace");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unparsable_env_is_ignored() {
        let mut config = Config::default();
        config.apply_env_from(vars(&[("CEPHLINK_GUARD_STACK_SIZE", "lots")]));
        assert_eq!(config.guard.stack_size, GuardConfig::default().stack_size);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.guard.stack_size = 1024;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.xattr_max_size = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.xattr_start_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.guard.thread_name = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log.level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log.level"));
    }
}
