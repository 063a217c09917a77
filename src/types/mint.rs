//! Mint Records
//!
//! A Mint tracks one BTC deposit from observation on the BTC chain to the
//! corresponding TWBTC mint on the Mirror Chain. Keyed by the BTC txid;
//! rows are never deleted.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Status of a mint
///
/// Transitions are strictly forward-only: `Requested → Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MintStatus {
    /// Deposit observed on BTC, mint not yet confirmed on the Mirror Chain
    Requested,
    /// Minted event observed on the Mirror Chain
    Completed,
}

impl std::fmt::Display for MintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for MintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown mint status: {}", other)),
        }
    }
}

/// One BTC deposit and its wrapped-token mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mint {
    /// BTC transaction id of the deposit (32 bytes, unique)
    pub btc_txid: B256,
    /// Mirror-Chain account receiving the wrapped tokens
    pub receiver: Address,
    /// Deposit amount in satoshi
    pub amount: u64,
    /// Mirror-Chain mint transaction hash, set when Completed
    pub mint_tx_hash: Option<B256>,
    /// Current status
    pub status: MintStatus,
}

impl Mint {
    /// Create a freshly-observed mint awaiting the Mirror-Chain mint
    pub fn requested(btc_txid: B256, receiver: Address, amount: u64) -> Self {
        Self {
            btc_txid,
            receiver,
            amount,
            mint_tx_hash: None,
            status: MintStatus::Requested,
        }
    }

    /// Create a mint directly in the Completed state
    ///
    /// Used when the Minted event is the first observation of the deposit,
    /// e.g. after starting from a later BTC cursor.
    pub fn completed(btc_txid: B256, receiver: Address, amount: u64, mint_tx_hash: B256) -> Self {
        Self {
            btc_txid,
            receiver,
            amount,
            mint_tx_hash: Some(mint_tx_hash),
            status: MintStatus::Completed,
        }
    }

    /// Transition to Completed with the Mirror-Chain mint tx hash
    pub fn complete(&mut self, mint_tx_hash: B256) {
        self.mint_tx_hash = Some(mint_tx_hash);
        self.status = MintStatus::Completed;
    }

    pub fn is_completed(&self) -> bool {
        self.status == MintStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [MintStatus::Requested, MintStatus::Completed] {
            let parsed: MintStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<MintStatus>().is_err());
    }

    #[test]
    fn test_complete_sets_hash() {
        let mut mint = Mint::requested(B256::repeat_byte(0xaa), Address::ZERO, 100_000_000);
        assert!(mint.mint_tx_hash.is_none());

        mint.complete(B256::repeat_byte(0x11));
        assert!(mint.is_completed());
        assert_eq!(mint.mint_tx_hash, Some(B256::repeat_byte(0x11)));
    }
}
