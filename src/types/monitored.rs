//! Monitored Transaction Records
//!
//! One row per transaction the bridge has submitted to either chain,
//! tracked until it reaches a terminal status.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Sentinel stored in place of a missing ledger number
const NO_LEDGER_NUM: i64 = -1;

/// Status of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitoredTxStatus {
    /// Rejected before entering the mempool
    MalForm,
    /// Submitted but not yet seen by the chain
    Limbo,
    /// Seen by the chain, not yet final
    Pending,
    /// Confirmed successfully
    Success,
    /// Confirmed but execution reverted
    Reverted,
    /// On-chain state contradicts local state; operator intervention required
    Reorg,
    /// In flight for too long; superseded by a re-submission
    Timeout,
}

impl MonitoredTxStatus {
    /// Terminal statuses receive no further polling
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MalForm | Self::Success | Self::Reverted | Self::Reorg | Self::Timeout
        )
    }
}

impl std::fmt::Display for MonitoredTxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalForm => write!(f, "malform"),
            Self::Limbo => write!(f, "limbo"),
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Reverted => write!(f, "reverted"),
            Self::Reorg => write!(f, "reorg"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl FromStr for MonitoredTxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "malform" => Ok(Self::MalForm),
            "limbo" => Ok(Self::Limbo),
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "reverted" => Ok(Self::Reverted),
            "reorg" => Ok(Self::Reorg),
            "timeout" => Ok(Self::Timeout),
            other => Err(format!("unknown monitored tx status: {}", other)),
        }
    }
}

/// One submitted transaction under observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredTx {
    /// Submitted transaction identifier
    pub tx_id: B256,
    /// The Mint's btc-txid or the Redeem's request hash this tx serves
    pub ref_id: B256,
    /// Ledger number around submission time, if known
    pub sent_at: Option<u64>,
    /// Ledger number the tx was first seen at, if known
    pub found_at: Option<u64>,
    /// Current status
    pub status: MonitoredTxStatus,
}

impl MonitoredTx {
    /// Create a freshly-submitted tx in Limbo
    pub fn submitted(tx_id: B256, ref_id: B256, sent_at: Option<u64>) -> Self {
        Self {
            tx_id,
            ref_id,
            sent_at,
            found_at: None,
            status: MonitoredTxStatus::Limbo,
        }
    }
}

/// Map an optional ledger number to its database representation
///
/// The store encodes "no number" as `-1`; the sentinel never escapes the
/// store layer.
pub fn ledger_num_to_db(num: Option<u64>) -> i64 {
    match num {
        Some(n) => n as i64,
        None => NO_LEDGER_NUM,
    }
}

/// Map a stored ledger number back to its in-memory representation
pub fn ledger_num_from_db(raw: i64) -> Option<u64> {
    if raw < 0 {
        None
    } else {
        Some(raw as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!MonitoredTxStatus::Limbo.is_terminal());
        assert!(!MonitoredTxStatus::Pending.is_terminal());
        assert!(MonitoredTxStatus::Success.is_terminal());
        assert!(MonitoredTxStatus::Reverted.is_terminal());
        assert!(MonitoredTxStatus::Reorg.is_terminal());
        assert!(MonitoredTxStatus::Timeout.is_terminal());
        assert!(MonitoredTxStatus::MalForm.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            MonitoredTxStatus::MalForm,
            MonitoredTxStatus::Limbo,
            MonitoredTxStatus::Pending,
            MonitoredTxStatus::Success,
            MonitoredTxStatus::Reverted,
            MonitoredTxStatus::Reorg,
            MonitoredTxStatus::Timeout,
        ] {
            let parsed: MonitoredTxStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_ledger_num_sentinel_round_trip() {
        assert_eq!(ledger_num_from_db(ledger_num_to_db(None)), None);
        assert_eq!(ledger_num_from_db(ledger_num_to_db(Some(0))), Some(0));
        assert_eq!(ledger_num_from_db(ledger_num_to_db(Some(42))), Some(42));
    }
}
