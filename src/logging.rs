//! Console logging for hosts embedding the pool.
//!
//! The library only emits `tracing` events; installing a subscriber is
//! left to the binary, or to embedders that want this default one.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Logging configuration.
///
/// # Example
///
/// ```rust
/// use acton_plugins::logging::{LogLevel, LoggingConfig};
///
/// let config = LoggingConfig::new()
///     .with_level(LogLevel::Debug)
///     .with_ansi(false);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when `RUST_LOG` is not set.
    pub level: LogLevel,
    /// Colorize output.
    pub ansi: bool,
    /// Include the event target (module path).
    pub target: bool,
}

impl LoggingConfig {
    /// Creates a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the level filter.
    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Enables or disables colors.
    #[must_use]
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Enables or disables the target field.
    #[must_use]
    pub fn with_target(mut self, target: bool) -> Self {
        self.target = target;
        self
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            ansi: true,
            target: false,
        }
    }
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level - most verbose.
    Trace,
    /// Debug level.
    Debug,
    /// Info level - default.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level - least verbose.
    Error,
}

impl LogLevel {
    /// Converts to a tracing_subscriber LevelFilter.
    #[must_use]
    pub fn to_filter(self) -> tracing_subscriber::filter::LevelFilter {
        match self {
            Self::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
            Self::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
            Self::Info => tracing_subscriber::filter::LevelFilter::INFO,
            Self::Warn => tracing_subscriber::filter::LevelFilter::WARN,
            Self::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        }
    }
}

fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.to_filter().into())
        .from_env_lossy()
}

/// Installs a global fmt subscriber. `RUST_LOG` overrides `config.level`.
///
/// Returns true if this call installed the subscriber. Later calls, and
/// calls made after another subscriber was set elsewhere, do nothing and
/// return false.
pub fn init(config: &LoggingConfig) -> bool {
    let mut installed_now = false;
    INSTALLED.get_or_init(|| {
        installed_now = tracing_subscriber::fmt()
            .with_env_filter(env_filter(config.level))
            .with_ansi(config.ansi)
            .with_target(config.target)
            .try_init()
            .is_ok();
        installed_now
    });
    installed_now
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn logging_config_default_values() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert!(config.ansi);
        assert!(!config.target);
    }

    #[test]
    fn logging_config_builder_pattern() {
        let config = LoggingConfig::new()
            .with_level(LogLevel::Trace)
            .with_ansi(false)
            .with_target(true);
        assert_eq!(config.level, LogLevel::Trace);
        assert!(!config.ansi);
        assert!(config.target);
    }

    #[test]
    fn log_level_to_filter_mapping() {
        assert_eq!(LogLevel::Trace.to_filter(), LevelFilter::TRACE);
        assert_eq!(LogLevel::Debug.to_filter(), LevelFilter::DEBUG);
        assert_eq!(LogLevel::Info.to_filter(), LevelFilter::INFO);
        assert_eq!(LogLevel::Warn.to_filter(), LevelFilter::WARN);
        assert_eq!(LogLevel::Error.to_filter(), LevelFilter::ERROR);
    }

    #[test]
    fn log_level_parses_lowercase() {
        let config: LoggingConfig = toml::from_str("level = \"warn\"").unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert!(config.ansi);
    }

    #[test]
    fn repeated_init_is_a_no_op() {
        let config = LoggingConfig::new().with_ansi(false);
        init(&config);
        assert!(!init(&config));
    }
}
