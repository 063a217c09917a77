//! Esplora BTC Adapter
//!
//! Implements the BTC ledger interface over the Esplora HTTP API. Watches
//! the vault address for incoming deposits, treats blocks buried under a
//! configurable confirmation depth as finalized, and broadcasts payouts.
//!
//! Esplora reports txids and block hashes in display order (reversed);
//! this adapter converts to internal byte order at the boundary so the
//! rest of the process never sees display order.

use alloy_primitives::B256;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::ledger::{BtcLedgerAdapter, LedgerError, LedgerResult};
use crate::types::BtcDepositEvent;

/// Esplora API endpoints
pub const MAINNET_URL: &str = "https://blockstream.info/api";
pub const TESTNET_URL: &str = "https://blockstream.info/testnet/api";

/// Esplora-backed BTC adapter
#[derive(Debug, Clone)]
pub struct EsploraBtcAdapter {
    client: Client,
    base_url: String,
    /// The vault address being watched for deposits
    vault_address: String,
    /// Blocks buried this deep are considered finalized
    confirmation_depth: u64,
}

impl EsploraBtcAdapter {
    /// Create an adapter with a custom Esplora URL
    pub fn new(base_url: &str, vault_address: String, confirmation_depth: u64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            vault_address,
            confirmation_depth,
        }
    }

    /// Create an adapter for Bitcoin testnet
    pub fn new_testnet(vault_address: String, confirmation_depth: u64) -> Self {
        Self::new(TESTNET_URL, vault_address, confirmation_depth)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_tip_height(&self) -> LedgerResult<u64> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(transport)?;

        resp.text()
            .await
            .map_err(transport)?
            .trim()
            .parse()
            .map_err(|e| LedgerError::Malformed(format!("invalid tip height: {}", e)))
    }

    async fn get_address_utxos(&self) -> LedgerResult<Vec<EsploraUtxo>> {
        let url = format!("{}/address/{}/utxo", self.base_url, self.vault_address);
        let resp = self.client.get(&url).send().await.map_err(transport)?;

        if !resp.status().is_success() {
            return Err(LedgerError::Transport(format!(
                "address lookup failed: {}",
                resp.status()
            )));
        }

        resp.json().await.map_err(transport)
    }

    async fn get_tx(&self, display_txid: &str) -> LedgerResult<EsploraTxFull> {
        let url = format!("{}/tx/{}", self.base_url, display_txid);
        let resp = self.client.get(&url).send().await.map_err(transport)?;

        if !resp.status().is_success() {
            return Err(LedgerError::Transport(format!(
                "tx lookup failed: {}",
                resp.status()
            )));
        }

        resp.json().await.map_err(transport)
    }
}

#[async_trait]
impl BtcLedgerAdapter for EsploraBtcAdapter {
    async fn latest_finalized(&self) -> LedgerResult<u64> {
        let tip = self.get_tip_height().await?;
        Ok(tip.saturating_sub(self.confirmation_depth))
    }

    async fn scan_deposits(&self, from: u64, to: u64) -> LedgerResult<Vec<BtcDepositEvent>> {
        let utxos = self.get_address_utxos().await?;

        let mut in_range: Vec<EsploraUtxo> = utxos
            .into_iter()
            .filter(|u| {
                u.status
                    .block_height
                    .map(|h| h >= from && h <= to)
                    .unwrap_or(false)
            })
            .collect();
        in_range.sort_by_key(|u| (u.status.block_height, u.txid.clone(), u.vout));

        let mut deposits = Vec::with_capacity(in_range.len());
        for utxo in in_range {
            let tx = self.get_tx(&utxo.txid).await?;

            let pk_script = tx
                .vout
                .get(utxo.vout as usize)
                .map(|out| decode_script(&out.scriptpubkey))
                .transpose()?
                .ok_or_else(|| {
                    LedgerError::Malformed(format!("tx {} missing vout {}", utxo.txid, utxo.vout))
                })?;

            let op_return_script = tx
                .vout
                .iter()
                .find(|out| out.scriptpubkey_type == "op_return")
                .map(|out| decode_script(&out.scriptpubkey))
                .transpose()?;

            let block_hash = utxo
                .status
                .block_hash
                .as_deref()
                .map(hash_from_display_hex)
                .transpose()?
                .unwrap_or(B256::ZERO);

            deposits.push(BtcDepositEvent {
                txid: hash_from_display_hex(&utxo.txid)?,
                vout: utxo.vout,
                amount: utxo.value,
                block_number: utxo.status.block_height.unwrap_or(0),
                block_hash,
                pk_script,
                op_return_script,
            });
        }

        Ok(deposits)
    }

    async fn broadcast_tx(&self, raw: Vec<u8>) -> LedgerResult<B256> {
        let url = format!("{}/tx", self.base_url);
        let resp = self
            .client
            .post(&url)
            .body(hex::encode(raw))
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(LedgerError::Transport(format!(
                "broadcast failed: {}",
                error_text
            )));
        }

        let display_txid = resp.text().await.map_err(transport)?;
        hash_from_display_hex(display_txid.trim())
    }
}

fn transport(e: reqwest::Error) -> LedgerError {
    LedgerError::Transport(e.to_string())
}

fn decode_script(hex_script: &str) -> LedgerResult<Vec<u8>> {
    hex::decode(hex_script).map_err(|e| LedgerError::Malformed(format!("bad script hex: {}", e)))
}

/// Parse a display-order (reversed) hash into internal byte order
fn hash_from_display_hex(s: &str) -> LedgerResult<B256> {
    let mut bytes =
        hex::decode(s).map_err(|e| LedgerError::Malformed(format!("bad hash hex: {}", e)))?;
    if bytes.len() != 32 {
        return Err(LedgerError::Malformed(format!(
            "hash must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    bytes.reverse();
    Ok(B256::from_slice(&bytes))
}

/// Render an internal-order hash in display order
pub fn hash_to_display_hex(hash: &B256) -> String {
    let mut bytes = hash.0;
    bytes.reverse();
    hex::encode(bytes)
}

// =============================================================================
// Esplora API response types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: EsploraTxStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct EsploraTxStatus {
    #[allow(dead_code)]
    confirmed: bool,
    block_height: Option<u64>,
    block_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EsploraTxFull {
    vout: Vec<EsploraTxOutput>,
}

#[derive(Debug, Clone, Deserialize)]
struct EsploraTxOutput {
    scriptpubkey: String,
    scriptpubkey_type: String,
    #[allow(dead_code)]
    value: u64,
}
