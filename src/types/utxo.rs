//! Vault UTXO Records
//!
//! An unspent output custodied by the bridge vault. Keyed by (txid, vout).

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// One custodied unspent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultUtxo {
    /// BTC transaction id of the funding tx
    pub txid: B256,
    /// Output index
    pub vout: u32,
    /// Block number the funding tx confirmed in
    pub block_number: u64,
    /// Block hash the funding tx confirmed in
    pub block_hash: B256,
    /// Amount in satoshi
    pub amount: u64,
    /// Locking script of the output
    pub pk_script: Vec<u8>,
    /// Reserved for an in-flight redeem
    pub lockup: bool,
    /// Spent by a broadcast payout; never reused
    pub spent: bool,
    /// Lock expiry, unix seconds; 0 when unlocked
    pub timeout: u64,
}

impl VaultUtxo {
    /// A UTXO eligible for selection
    pub fn is_spendable(&self) -> bool {
        !self.lockup && !self.spent
    }

    /// The (txid, vout) reference of this output
    pub fn outpoint(&self) -> crate::types::Outpoint {
        crate::types::Outpoint::new(self.txid, self.vout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spendable() {
        let mut utxo = VaultUtxo {
            txid: B256::repeat_byte(0x0a),
            vout: 0,
            block_number: 1,
            block_hash: B256::repeat_byte(0xbb),
            amount: 100,
            pk_script: vec![0x51],
            lockup: false,
            spent: false,
            timeout: 0,
        };
        assert!(utxo.is_spendable());

        utxo.lockup = true;
        assert!(!utxo.is_spendable());

        utxo.lockup = false;
        utxo.spent = true;
        assert!(!utxo.is_spendable());
    }
}
