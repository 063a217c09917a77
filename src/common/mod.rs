//! Common Infrastructure Module
//!
//! Shared utilities and configuration for the bridge daemon.
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - Common error types

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{BridgeConfig, ConfigError, Network, SigningMode};
pub use error::{BridgeError, Result};
pub use logging::{init_from_config, init_logging, LogLevel, LoggingError};
