//! Ledger Adapter Interfaces
//!
//! Abstract capability set the core consumes from each chain's RPC client.
//! Concrete adapters live outside the core; the core treats every adapter
//! failure as retryable transport trouble.

use alloy_primitives::B256;
use async_trait::async_trait;
use thiserror::Error;

use crate::types::{BtcDepositEvent, EventBatch, MonitoredTxStatus, Outpoint};

/// Ledger adapter errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl LedgerError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

/// Result type for adapter calls
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Parameters for submitting a mint to the Mirror Chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintParams {
    /// BTC deposit txid
    pub btc_txid: B256,
    /// Receiving account
    pub receiver: alloy_primitives::Address,
    /// Amount in satoshi
    pub amount: u64,
    /// Schnorr commitment X-coordinate over the mint signing hash
    pub rx: B256,
    /// Schnorr scalar over the mint signing hash
    pub s: B256,
}

/// Parameters for submitting a redeem prepare to the Mirror Chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareParams {
    /// Mirror-Chain request transaction hash
    pub request_tx_hash: B256,
    /// Outpoints committed to the payout
    pub outpoints: Vec<Outpoint>,
    /// Schnorr (Rx, S) signature per BTC input, input order
    pub signatures: Vec<(B256, B256)>,
}

/// Capability set of a Mirror-Chain RPC client
///
/// `scan_events` must return events oldest-first within the range; a
/// violation is a correctness bug for the core.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Latest ledger number the chain considers irreversible
    async fn latest_finalized(&self) -> LedgerResult<u64>;

    /// Scan bridge events in `[from, to]`, oldest-first
    async fn scan_events(&self, from: u64, to: u64) -> LedgerResult<EventBatch>;

    /// Submit a mint; returns (tx id, approximate ledger number)
    async fn submit_mint(&self, params: MintParams) -> LedgerResult<(B256, u64)>;

    /// Submit a redeem prepare; returns (tx id, approximate ledger number)
    async fn submit_prepare(&self, params: PrepareParams) -> LedgerResult<(B256, u64)>;

    /// Whether the contract has already minted for this deposit
    async fn is_minted(&self, btc_txid: B256) -> LedgerResult<bool>;

    /// Whether the contract has already prepared this redeem
    async fn is_prepared(&self, request_tx_hash: B256) -> LedgerResult<bool>;

    /// Current status of a submitted transaction
    async fn tx_status(&self, tx_id: B256) -> LedgerResult<MonitoredTxStatus>;
}

/// Capability set of a BTC RPC client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BtcLedgerAdapter: Send + Sync {
    /// Latest finalized block height
    async fn latest_finalized(&self) -> LedgerResult<u64>;

    /// Scan vault-bound deposits in blocks `[from, to]`, oldest-first
    async fn scan_deposits(&self, from: u64, to: u64) -> LedgerResult<Vec<BtcDepositEvent>>;

    /// Broadcast a raw transaction; returns its txid
    async fn broadcast_tx(&self, raw: Vec<u8>) -> LedgerResult<B256>;
}
