//! Chain Events
//!
//! Events produced by the synchronizers and consumed by the state store.
//! The synchronizers deliver them in ledger order; the state store applies
//! them idempotently.

use alloy_primitives::{Address, B256};

use crate::types::Outpoint;

/// TWBTC minted on the Mirror Chain for a BTC deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedEvent {
    /// BTC deposit txid the mint settles
    pub btc_txid: B256,
    /// Mirror-Chain transaction hash of the mint
    pub mint_tx_hash: B256,
    /// Receiving account
    pub receiver: Address,
    /// Amount in satoshi
    pub amount: u64,
}

/// A TWBTC burn requesting BTC payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemRequestedEvent {
    /// Mirror-Chain request transaction hash
    pub request_tx_hash: B256,
    /// Account that burned the tokens
    pub requester: Address,
    /// Destination BTC address
    pub receiver: String,
    /// Amount in satoshi
    pub amount: u64,
    /// Receiver validity as judged by the Mirror-Chain contract
    pub is_valid_receiver: bool,
}

/// Outpoints committed on-chain for a pending redeem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemPreparedEvent {
    /// Mirror-Chain request transaction hash
    pub request_tx_hash: B256,
    /// Mirror-Chain prepare transaction hash
    pub prepare_tx_hash: B256,
    /// Account that burned the tokens
    pub requester: Address,
    /// Destination BTC address
    pub receiver: String,
    /// Amount in satoshi
    pub amount: u64,
    /// Committed outpoints
    pub outpoints: Vec<Outpoint>,
}

/// Events scanned from one Mirror-Chain ledger range, oldest-first
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    pub minted: Vec<MintedEvent>,
    pub redeem_requested: Vec<RedeemRequestedEvent>,
    pub redeem_prepared: Vec<RedeemPreparedEvent>,
}

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.minted.is_empty() && self.redeem_requested.is_empty() && self.redeem_prepared.is_empty()
    }
}

/// A deposit into the vault observed on the BTC chain
///
/// Raw adapter output. The BTC synchronizer decodes `op_return_script` to
/// find the mint target; deposits without a parseable payload are custodied
/// but mint nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcDepositEvent {
    /// BTC transaction id
    pub txid: B256,
    /// Vault-bound output index
    pub vout: u32,
    /// Amount of the vault-bound output, satoshi
    pub amount: u64,
    /// Block the tx confirmed in
    pub block_number: u64,
    /// Hash of that block
    pub block_hash: B256,
    /// Locking script of the vault-bound output
    pub pk_script: Vec<u8>,
    /// Locking script of the tx's OP_RETURN output, if it has one
    pub op_return_script: Option<Vec<u8>>,
}

/// A decoded deposit targeting this bridge's Mirror Chain
///
/// Produced by the BTC synchronizer after OP_RETURN parsing and chain-id
/// filtering; creates a Requested Mint in the state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositObserved {
    /// BTC transaction id of the deposit
    pub btc_txid: B256,
    /// Mirror-Chain account named in the OP_RETURN payload
    pub receiver: Address,
    /// Deposit amount in satoshi
    pub amount: u64,
}
