//! Shared Types Module
//!
//! Data types shared across the bridge daemon.

pub mod event;
pub mod mint;
pub mod monitored;
pub mod redeem;
pub mod utxo;

// Re-exports for convenience
pub use event::{
    BtcDepositEvent, DepositObserved, EventBatch, MintedEvent, RedeemPreparedEvent,
    RedeemRequestedEvent,
};
pub use mint::{Mint, MintStatus};
pub use monitored::{ledger_num_from_db, ledger_num_to_db, MonitoredTx, MonitoredTxStatus};
pub use redeem::{decode_outpoints, encode_outpoints, Outpoint, Redeem, RedeemStatus};
pub use utxo::VaultUtxo;

/// The two ledgers a bridge process observes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    /// The account-based smart-contract chain carrying TWBTC
    Mirror,
    /// The Bitcoin-like UTXO chain
    Btc,
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Chain::Mirror => write!(f, "mirror"),
            Chain::Btc => write!(f, "btc"),
        }
    }
}
