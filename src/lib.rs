//! TWBTC Bridge - Two-Way BTC Bridge Daemon
//!
//! Orchestration core of a custodial bridge between a Bitcoin-like UTXO
//! chain and an account-based Mirror Chain carrying the wrapped TWBTC
//! token. Deposits into the vault mint TWBTC; burning TWBTC releases BTC.
//!
//! ## Components
//!
//! 1. **Synchronizers** - poll each chain and deliver a forward-only event
//!    stream over bounded channels
//! 2. **State Store** - durable single-writer state machine for every mint
//!    and redeem, plus process metadata
//! 3. **Vault** - custodies unspent outputs with time-bounded locks
//! 4. **Chain-Tx Manager** - signs and submits transactions on both chains
//!    and tracks them until terminal
//! 5. **Signature Client** - asynchronous Schnorr signing, local key or
//!    remote threshold signer

pub mod adapters;
pub mod common;
pub mod ledger;
pub mod manager;
pub mod reporter;
pub mod runtime;
pub mod signer;
pub mod state;
pub mod sync;
pub mod types;
pub mod vault;
pub mod wire;

// Re-exports: configuration and errors
pub use common::{BridgeConfig, BridgeError, ConfigError, Network, SigningMode};

// Re-exports: core records and events
pub use types::{
    Chain, Mint, MintStatus, MonitoredTx, MonitoredTxStatus, Outpoint, Redeem, RedeemStatus,
    VaultUtxo,
};

// Re-exports: component surfaces
pub use ledger::{BtcLedgerAdapter, LedgerAdapter, LedgerError, MintParams, PrepareParams};
pub use manager::{ChainTxManager, ManagerConfig, MonitoredTxStore};
pub use signer::{LocalSigner, RemoteSigner, SignatureRequest, SignerClient, SignerError};
pub use state::{BridgeState, StateStore};
pub use sync::{BtcSynchronizer, ChainSynchronizer};
pub use vault::{Vault, VaultError, LOCK_TIMEOUT_SECS};
pub use wire::{mint_signing_hash, DepositPayload};

/// Satoshi conversion helpers
pub mod units {
    pub const SATS_PER_BTC: u64 = 100_000_000;

    /// Convert BTC to satoshis with proper rounding
    pub fn btc_to_sats(btc: f64) -> u64 {
        (btc * SATS_PER_BTC as f64).round() as u64
    }

    pub fn sats_to_btc(sats: u64) -> f64 {
        sats as f64 / SATS_PER_BTC as f64
    }

    pub fn format_sats(sats: u64) -> String {
        let btc = sats_to_btc(sats);
        format!("{} sats ({:.8} BTC)", sats, btc)
    }
}
