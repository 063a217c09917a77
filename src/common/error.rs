//! Common Error Types for the Bridge Daemon
//!
//! Provides unified error handling across all modules.

use thiserror::Error;

/// Root error type for the bridge daemon
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// State store errors
    #[error("state error: {0}")]
    State(#[from] crate::state::store::StoreError),

    /// Vault errors
    #[error("vault error: {0}")]
    Vault(#[from] crate::vault::VaultError),

    /// Monitored-tx store errors
    #[error("monitor error: {0}")]
    Monitor(#[from] crate::manager::MonitorStoreError),

    /// Ledger adapter errors
    #[error("ledger error: {0}")]
    Ledger(#[from] crate::ledger::LedgerError),

    /// Signer client errors
    #[error("signer error: {0}")]
    Signer(#[from] crate::signer::SignerError),

    /// Malformed event or invariant violation, never retried
    #[error("validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Check if this is a retryable error
    ///
    /// Retryable errors bubble up to the owning ticker loop which retries on
    /// the next tick. Validation errors terminate the component.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Ledger(_) | BridgeError::Signer(_) | BridgeError::Io(_) => true,
            BridgeError::Vault(e) => e.is_retryable(),
            BridgeError::State(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if this error must terminate the component that produced it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Validation(_) | BridgeError::Config(_) | BridgeError::Logging(_)
        ) || matches!(self, BridgeError::State(e) if e.is_fatal())
    }
}

impl From<crate::state::StateError> for BridgeError {
    fn from(e: crate::state::StateError) -> Self {
        match e {
            crate::state::StateError::Validation(msg) => BridgeError::Validation(msg),
            crate::state::StateError::Store(e) => BridgeError::State(e),
        }
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerError;

    #[test]
    fn test_validation_is_fatal() {
        let err = BridgeError::validation("zero request hash");
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_is_retryable() {
        let err = BridgeError::from(LedgerError::Transport("connection reset".into()));
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }
}
