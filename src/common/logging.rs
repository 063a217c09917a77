//! Structured Logging for the Bridge Daemon
//!
//! Plain human-readable output for development, JSON output for log
//! aggregation services in production. Components log under the targets
//! `bridge::sync`, `bridge::state`, `bridge::vault`, `bridge::manager`,
//! and `bridge::signer`.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use super::config::BridgeConfig;

/// Logging errors
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    Init(String),
}

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_logging(level: LogLevel, json: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}", Level::from(level))));

    let result = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };

    result.map_err(|e| LoggingError::Init(e.to_string()))
}

/// Initialize logging from a loaded configuration
pub fn init_from_config(config: &BridgeConfig) -> Result<(), LoggingError> {
    init_logging(LogLevel::from(config.log_level.as_str()), config.log_json)
}
