//! Redeem Records
//!
//! A Redeem tracks one TWBTC burn from the RedeemRequested event on the
//! Mirror Chain to the BTC payout. Keyed by the Mirror-Chain request tx
//! hash; rows are never deleted.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Reference to an output of a prior BTC transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outpoint {
    /// BTC transaction id
    pub txid: B256,
    /// Output index
    pub vout: u32,
}

impl Outpoint {
    pub fn new(txid: B256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl std::fmt::Display for Outpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.vout)
    }
}

/// Encode outpoints for the BLOB column
pub fn encode_outpoints(outpoints: &[Outpoint]) -> Vec<u8> {
    serde_json::to_vec(outpoints).expect("outpoints serialize")
}

/// Decode outpoints from the BLOB column
pub fn decode_outpoints(blob: &[u8]) -> Result<Vec<Outpoint>, serde_json::Error> {
    serde_json::from_slice(blob)
}

/// Status of a redeem
///
/// Monotone in the order `Requested → Prepared → Completed`; `Invalid` is a
/// sink entered only at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedeemStatus {
    /// RedeemRequested event observed, outpoints not yet committed
    Requested,
    /// Prepare transaction confirmed, outpoints committed on-chain
    Prepared,
    /// BTC payout broadcast
    Completed,
    /// Receiver failed validation at request time; never progresses
    Invalid,
}

impl std::fmt::Display for RedeemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Prepared => write!(f, "prepared"),
            Self::Completed => write!(f, "completed"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

impl FromStr for RedeemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "prepared" => Ok(Self::Prepared),
            "completed" => Ok(Self::Completed),
            "invalid" => Ok(Self::Invalid),
            other => Err(format!("unknown redeem status: {}", other)),
        }
    }
}

/// One TWBTC redeem and its BTC payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redeem {
    /// Mirror-Chain request transaction hash (32 bytes, unique)
    pub request_tx_hash: B256,
    /// Mirror-Chain account that burned the tokens
    pub requester: Address,
    /// Destination BTC address
    pub receiver: String,
    /// Amount in satoshi
    pub amount: u64,
    /// Mirror-Chain prepare transaction hash, set when Prepared
    pub prepare_tx_hash: Option<B256>,
    /// BTC payout transaction id, set when Completed
    pub btc_txid: Option<B256>,
    /// Committed outpoints, non-empty once Prepared
    pub outpoints: Vec<Outpoint>,
    /// Current status
    pub status: RedeemStatus,
}

impl Redeem {
    /// Create a redeem in the Requested state
    pub fn requested(request_tx_hash: B256, requester: Address, receiver: String, amount: u64) -> Self {
        Self {
            request_tx_hash,
            requester,
            receiver,
            amount,
            prepare_tx_hash: None,
            btc_txid: None,
            outpoints: Vec::new(),
            status: RedeemStatus::Requested,
        }
    }

    /// Create a redeem in the Invalid sink state
    pub fn invalid(request_tx_hash: B256, requester: Address, receiver: String, amount: u64) -> Self {
        Self {
            status: RedeemStatus::Invalid,
            ..Self::requested(request_tx_hash, requester, receiver, amount)
        }
    }

    /// Transition to Prepared with the committed outpoints
    pub fn prepare(&mut self, prepare_tx_hash: B256, outpoints: Vec<Outpoint>) {
        self.prepare_tx_hash = Some(prepare_tx_hash);
        self.outpoints = outpoints;
        self.status = RedeemStatus::Prepared;
    }

    /// Transition to Completed with the BTC payout txid
    pub fn complete(&mut self, btc_txid: B256) {
        self.btc_txid = Some(btc_txid);
        self.status = RedeemStatus::Completed;
    }

    pub fn is_invalid(&self) -> bool {
        self.status == RedeemStatus::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Redeem {
        Redeem::requested(
            B256::repeat_byte(0x01),
            Address::repeat_byte(0x02),
            "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".to_string(),
            240,
        )
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RedeemStatus::Requested,
            RedeemStatus::Prepared,
            RedeemStatus::Completed,
            RedeemStatus::Invalid,
        ] {
            let parsed: RedeemStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_prepare_then_complete() {
        let mut redeem = sample();
        let outpoints = vec![Outpoint::new(B256::repeat_byte(0x0a), 1)];

        redeem.prepare(B256::repeat_byte(0x0b), outpoints.clone());
        assert_eq!(redeem.status, RedeemStatus::Prepared);
        assert_eq!(redeem.outpoints, outpoints);

        redeem.complete(B256::repeat_byte(0x0c));
        assert_eq!(redeem.status, RedeemStatus::Completed);
        assert_eq!(redeem.btc_txid, Some(B256::repeat_byte(0x0c)));
    }

    #[test]
    fn test_outpoints_blob_round_trip() {
        let outpoints = vec![
            Outpoint::new(B256::repeat_byte(0x0a), 0),
            Outpoint::new(B256::repeat_byte(0x0b), 3),
        ];
        let blob = encode_outpoints(&outpoints);
        assert_eq!(decode_outpoints(&blob).unwrap(), outpoints);

        assert_eq!(decode_outpoints(b"[]").unwrap(), Vec::<Outpoint>::new());
        assert!(decode_outpoints(b"not json").is_err());
    }
}
