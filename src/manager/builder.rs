//! BTC Redeem Transaction Builder
//!
//! Builds the payout transaction for a redeem: locked vault outputs in,
//! receiver plus vault change out. Computes the taproot key-spend sighash
//! for every input so the signer client can produce (Rx, S) pairs, and
//! assembles the final witness data once signatures arrive.

use alloy_primitives::B256;
use bitcoin::{
    absolute::LockTime,
    hashes::Hash,
    sighash::{Prevouts, SighashCache, TapSighashType},
    transaction::Version,
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use std::str::FromStr;
use thiserror::Error;

use crate::types::{Outpoint, VaultUtxo};

/// Outputs below this are folded into the fee instead of creating change
const DUST_LIMIT_SATS: u64 = 546;

/// Builder errors
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("insufficient funds: need {required} sats, have {available} sats")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("no UTXOs provided")]
    NoUtxos,

    #[error("sighash computation failed: {0}")]
    Sighash(String),

    #[error("expected {expected} signatures, got {got}")]
    SignatureCount { expected: usize, got: usize },
}

/// Builds unsigned redeem transactions
pub struct RedeemTxBuilder {
    /// Network the receiver address must belong to
    network: Network,
}

impl RedeemTxBuilder {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    /// Validate a receiver address for this network
    pub fn validate_address(&self, address: &str) -> Result<Address, BuilderError> {
        Address::from_str(address)
            .map_err(|e| BuilderError::InvalidAddress(e.to_string()))?
            .require_network(self.network)
            .map_err(|e| BuilderError::InvalidAddress(e.to_string()))
    }

    /// Build the unsigned payout transaction
    ///
    /// Spends the given vault outputs, pays `amount` to the receiver, and
    /// returns the remainder minus `fee` to the vault script. Change below
    /// the dust limit is folded into the fee.
    pub fn build(
        &self,
        receiver: &str,
        amount: u64,
        fee: u64,
        utxos: &[VaultUtxo],
    ) -> Result<UnsignedRedeemTx, BuilderError> {
        if utxos.is_empty() {
            return Err(BuilderError::NoUtxos);
        }

        let dest = self.validate_address(receiver)?;

        let total_input: u64 = utxos.iter().map(|u| u.amount).sum();
        if total_input < amount + fee {
            return Err(BuilderError::InsufficientFunds {
                required: amount + fee,
                available: total_input,
            });
        }

        let inputs: Vec<TxIn> = utxos
            .iter()
            .map(|utxo| TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array(utxo.txid.0),
                    vout: utxo.vout,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect();

        let mut outputs = vec![TxOut {
            value: Amount::from_sat(amount),
            script_pubkey: dest.script_pubkey(),
        }];

        let change = total_input - amount - fee;
        if change > DUST_LIMIT_SATS {
            // change returns to the vault's own locking script
            outputs.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: ScriptBuf::from_bytes(utxos[0].pk_script.clone()),
            });
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs,
            output: outputs,
        };

        Ok(UnsignedRedeemTx {
            tx,
            utxos: utxos.to_vec(),
            fee,
            send_amount: amount,
        })
    }
}

/// Unsigned payout transaction awaiting signatures
#[derive(Debug, Clone)]
pub struct UnsignedRedeemTx {
    /// The unsigned transaction
    pub tx: Transaction,
    /// Vault outputs being spent, input order
    pub utxos: Vec<VaultUtxo>,
    /// Fee in satoshi
    pub fee: u64,
    /// Amount paid to the receiver
    pub send_amount: u64,
}

impl UnsignedRedeemTx {
    /// The (txid, vout) references being spent, input order
    pub fn outpoints(&self) -> Vec<Outpoint> {
        self.utxos.iter().map(|u| u.outpoint()).collect()
    }

    /// Taproot key-spend sighash per input, input order
    pub fn signing_hashes(&self) -> Result<Vec<B256>, BuilderError> {
        let prevouts: Vec<TxOut> = self
            .utxos
            .iter()
            .map(|utxo| TxOut {
                value: Amount::from_sat(utxo.amount),
                script_pubkey: ScriptBuf::from_bytes(utxo.pk_script.clone()),
            })
            .collect();
        let prevouts = Prevouts::All(&prevouts);

        let mut cache = SighashCache::new(&self.tx);
        let mut hashes = Vec::with_capacity(self.tx.input.len());

        for i in 0..self.tx.input.len() {
            let sighash = cache
                .taproot_key_spend_signature_hash(i, &prevouts, TapSighashType::Default)
                .map_err(|e| BuilderError::Sighash(e.to_string()))?;
            hashes.push(B256::from(sighash.to_byte_array()));
        }

        Ok(hashes)
    }

    /// Attach one (Rx, S) signature per input and return the final tx
    pub fn attach_signatures(&self, signatures: &[(B256, B256)]) -> Result<Transaction, BuilderError> {
        if signatures.len() != self.tx.input.len() {
            return Err(BuilderError::SignatureCount {
                expected: self.tx.input.len(),
                got: signatures.len(),
            });
        }

        let mut tx = self.tx.clone();
        for (input, (rx, s)) in tx.input.iter_mut().zip(signatures) {
            let mut sig = [0u8; 64];
            sig[..32].copy_from_slice(rx.as_slice());
            sig[32..].copy_from_slice(s.as_slice());
            input.witness = Witness::from_slice(&[sig.to_vec()]);
        }

        Ok(tx)
    }

    /// Transaction id of the unsigned skeleton
    ///
    /// Key-spend witnesses do not change the txid, so this is also the id
    /// of the final transaction.
    pub fn txid(&self) -> B256 {
        B256::from(self.tx.compute_txid().to_byte_array())
    }
}

/// Serialize a signed transaction for broadcast
pub fn serialize_tx(tx: &Transaction) -> Vec<u8> {
    bitcoin::consensus::encode::serialize(tx)
}
