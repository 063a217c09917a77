//! In-Process Ledgers
//!
//! In-memory stand-ins for the two chains, used by the demo run mode and
//! the integration tests. The Mirror-side ledger confirms submissions
//! instantly and emits the matching event one block later, which is enough
//! to drive every bridge flow end to end without external infrastructure.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use alloy_primitives::{keccak256, B256};
use async_trait::async_trait;
use bitcoin::hashes::Hash;

use crate::ledger::{
    BtcLedgerAdapter, LedgerAdapter, LedgerError, LedgerResult, MintParams, PrepareParams,
};
use crate::types::{
    BtcDepositEvent, EventBatch, MintedEvent, MonitoredTxStatus, RedeemPreparedEvent,
    RedeemRequestedEvent,
};

/// In-memory Mirror-Chain ledger
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<MirrorInner>,
}

#[derive(Default)]
struct MirrorInner {
    finalized: u64,
    minted_events: Vec<(u64, MintedEvent)>,
    requested_events: Vec<(u64, RedeemRequestedEvent)>,
    prepared_events: Vec<(u64, RedeemPreparedEvent)>,
    minted: HashSet<B256>,
    prepared: HashSet<B256>,
    /// Request context needed to emit RedeemPrepared events
    redeems: HashMap<B256, RedeemRequestedEvent>,
    tx_status: HashMap<B256, MonitoredTxStatus>,
    submissions: u64,
    /// When set, the next prepare submission reverts instead of confirming
    fail_next_prepare: bool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move finality forward to `number`
    pub fn advance_to(&self, number: u64) {
        let mut inner = self.inner.lock().expect("ledger lock");
        if number > inner.finalized {
            inner.finalized = number;
        }
    }

    pub fn finalized(&self) -> u64 {
        self.inner.lock().expect("ledger lock").finalized
    }

    /// Stage a Minted event at the given block
    pub fn push_minted(&self, block: u64, ev: MintedEvent) {
        let mut inner = self.inner.lock().expect("ledger lock");
        inner.minted.insert(ev.btc_txid);
        inner.minted_events.push((block, ev));
    }

    /// Stage a RedeemRequested event at the given block
    pub fn push_redeem_requested(&self, block: u64, ev: RedeemRequestedEvent) {
        let mut inner = self.inner.lock().expect("ledger lock");
        inner.redeems.insert(ev.request_tx_hash, ev.clone());
        inner.requested_events.push((block, ev));
    }

    /// Stage a RedeemPrepared event at the given block
    pub fn push_redeem_prepared(&self, block: u64, ev: RedeemPreparedEvent) {
        let mut inner = self.inner.lock().expect("ledger lock");
        inner.prepared.insert(ev.request_tx_hash);
        inner.prepared_events.push((block, ev));
    }

    /// Override the reported status of a submitted tx
    pub fn set_tx_status(&self, tx_id: B256, status: MonitoredTxStatus) {
        self.inner
            .lock()
            .expect("ledger lock")
            .tx_status
            .insert(tx_id, status);
    }

    /// Make the next prepare submission revert
    pub fn fail_next_prepare(&self) {
        self.inner.lock().expect("ledger lock").fail_next_prepare = true;
    }
}

fn demo_tx_id(tag: &[u8], key: &B256, nonce: u64) -> B256 {
    let mut buf = Vec::with_capacity(tag.len() + 32 + 8);
    buf.extend_from_slice(tag);
    buf.extend_from_slice(key.as_slice());
    buf.extend_from_slice(&nonce.to_be_bytes());
    keccak256(&buf)
}

#[async_trait]
impl LedgerAdapter for MemoryLedger {
    async fn latest_finalized(&self) -> LedgerResult<u64> {
        Ok(self.inner.lock().expect("ledger lock").finalized)
    }

    async fn scan_events(&self, from: u64, to: u64) -> LedgerResult<EventBatch> {
        let inner = self.inner.lock().expect("ledger lock");

        Ok(EventBatch {
            minted: collect_range(&inner.minted_events, from, to),
            redeem_requested: collect_range(&inner.requested_events, from, to),
            redeem_prepared: collect_range(&inner.prepared_events, from, to),
        })
    }

    async fn submit_mint(&self, params: MintParams) -> LedgerResult<(B256, u64)> {
        let mut inner = self.inner.lock().expect("ledger lock");

        inner.submissions += 1;
        let tx_id = demo_tx_id(b"mint", &params.btc_txid, inner.submissions);

        // the demo chain confirms instantly and emits the event next block
        let block = inner.finalized + 1;
        inner.finalized = block;
        inner.minted.insert(params.btc_txid);
        inner.minted_events.push((
            block,
            MintedEvent {
                btc_txid: params.btc_txid,
                mint_tx_hash: tx_id,
                receiver: params.receiver,
                amount: params.amount,
            },
        ));
        inner.tx_status.insert(tx_id, MonitoredTxStatus::Success);

        Ok((tx_id, block))
    }

    async fn submit_prepare(&self, params: PrepareParams) -> LedgerResult<(B256, u64)> {
        let mut inner = self.inner.lock().expect("ledger lock");

        let request = inner
            .redeems
            .get(&params.request_tx_hash)
            .cloned()
            .ok_or_else(|| {
                LedgerError::Malformed(format!(
                    "prepare for unknown redeem {}",
                    hex::encode(params.request_tx_hash)
                ))
            })?;

        inner.submissions += 1;
        let tx_id = demo_tx_id(b"prepare", &params.request_tx_hash, inner.submissions);
        let block = inner.finalized + 1;
        inner.finalized = block;

        if inner.fail_next_prepare {
            inner.fail_next_prepare = false;
            inner.tx_status.insert(tx_id, MonitoredTxStatus::Reverted);
            return Ok((tx_id, block));
        }

        inner.prepared.insert(params.request_tx_hash);
        inner.prepared_events.push((
            block,
            RedeemPreparedEvent {
                request_tx_hash: params.request_tx_hash,
                prepare_tx_hash: tx_id,
                requester: request.requester,
                receiver: request.receiver,
                amount: request.amount,
                outpoints: params.outpoints,
            },
        ));
        inner.tx_status.insert(tx_id, MonitoredTxStatus::Success);

        Ok((tx_id, block))
    }

    async fn is_minted(&self, btc_txid: B256) -> LedgerResult<bool> {
        Ok(self.inner.lock().expect("ledger lock").minted.contains(&btc_txid))
    }

    async fn is_prepared(&self, request_tx_hash: B256) -> LedgerResult<bool> {
        Ok(self
            .inner
            .lock()
            .expect("ledger lock")
            .prepared
            .contains(&request_tx_hash))
    }

    async fn tx_status(&self, tx_id: B256) -> LedgerResult<MonitoredTxStatus> {
        Ok(self
            .inner
            .lock()
            .expect("ledger lock")
            .tx_status
            .get(&tx_id)
            .copied()
            .unwrap_or(MonitoredTxStatus::Limbo))
    }
}

fn collect_range<T: Clone>(events: &[(u64, T)], from: u64, to: u64) -> Vec<T> {
    let mut in_range: Vec<&(u64, T)> = events
        .iter()
        .filter(|(block, _)| *block >= from && *block <= to)
        .collect();
    in_range.sort_by_key(|(block, _)| *block);
    in_range.into_iter().map(|(_, ev)| ev.clone()).collect()
}

/// In-memory BTC ledger
#[derive(Default)]
pub struct MemoryBtcLedger {
    inner: Mutex<BtcInner>,
}

#[derive(Default)]
struct BtcInner {
    finalized: u64,
    deposits: Vec<(u64, BtcDepositEvent)>,
    broadcasts: Vec<Vec<u8>>,
}

impl MemoryBtcLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move finality forward to `number`
    pub fn advance_to(&self, number: u64) {
        let mut inner = self.inner.lock().expect("ledger lock");
        if number > inner.finalized {
            inner.finalized = number;
        }
    }

    /// Stage a vault deposit in the given block
    pub fn push_deposit(&self, ev: BtcDepositEvent) {
        let mut inner = self.inner.lock().expect("ledger lock");
        inner.deposits.push((ev.block_number, ev));
    }

    /// Raw transactions broadcast so far
    pub fn broadcasts(&self) -> Vec<Vec<u8>> {
        self.inner.lock().expect("ledger lock").broadcasts.clone()
    }
}

#[async_trait]
impl BtcLedgerAdapter for MemoryBtcLedger {
    async fn latest_finalized(&self) -> LedgerResult<u64> {
        Ok(self.inner.lock().expect("ledger lock").finalized)
    }

    async fn scan_deposits(&self, from: u64, to: u64) -> LedgerResult<Vec<BtcDepositEvent>> {
        let inner = self.inner.lock().expect("ledger lock");
        Ok(collect_range(&inner.deposits, from, to))
    }

    async fn broadcast_tx(&self, raw: Vec<u8>) -> LedgerResult<B256> {
        let tx: bitcoin::Transaction = bitcoin::consensus::encode::deserialize(&raw)
            .map_err(|e| LedgerError::Malformed(format!("undecodable tx: {}", e)))?;
        let txid = B256::from(tx.compute_txid().to_byte_array());

        self.inner
            .lock()
            .expect("ledger lock")
            .broadcasts
            .push(raw);
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn minted(byte: u8, block: u64) -> (u64, MintedEvent) {
        (
            block,
            MintedEvent {
                btc_txid: B256::repeat_byte(byte),
                mint_tx_hash: B256::repeat_byte(0x11),
                receiver: Address::repeat_byte(0x01),
                amount: 100,
            },
        )
    }

    #[tokio::test]
    async fn test_scan_respects_range() {
        let ledger = MemoryLedger::new();
        let (b, ev) = minted(0xaa, 2);
        ledger.push_minted(b, ev);
        let (b, ev) = minted(0xab, 5);
        ledger.push_minted(b, ev);
        ledger.advance_to(5);

        let batch = ledger.scan_events(1, 3).await.unwrap();
        assert_eq!(batch.minted.len(), 1);
        assert_eq!(batch.minted[0].btc_txid, B256::repeat_byte(0xaa));

        let batch = ledger.scan_events(1, 5).await.unwrap();
        assert_eq!(batch.minted.len(), 2);
    }

    #[tokio::test]
    async fn test_submit_mint_confirms_and_emits() {
        let ledger = MemoryLedger::new();
        ledger.advance_to(3);

        let params = MintParams {
            btc_txid: B256::repeat_byte(0xaa),
            receiver: Address::repeat_byte(0x01),
            amount: 100,
            rx: B256::repeat_byte(0x11),
            s: B256::repeat_byte(0x12),
        };
        let (tx_id, block) = ledger.submit_mint(params).await.unwrap();

        assert_eq!(block, 4);
        assert!(ledger.is_minted(B256::repeat_byte(0xaa)).await.unwrap());
        assert_eq!(
            ledger.tx_status(tx_id).await.unwrap(),
            MonitoredTxStatus::Success
        );

        let batch = ledger.scan_events(4, 4).await.unwrap();
        assert_eq!(batch.minted.len(), 1);
        assert_eq!(batch.minted[0].mint_tx_hash, tx_id);
    }

    #[tokio::test]
    async fn test_failed_prepare_reverts_without_event() {
        let ledger = MemoryLedger::new();
        ledger.push_redeem_requested(
            1,
            RedeemRequestedEvent {
                request_tx_hash: B256::repeat_byte(0xee),
                requester: Address::repeat_byte(0x02),
                receiver: "tb1q".to_string(),
                amount: 240,
                is_valid_receiver: true,
            },
        );
        ledger.advance_to(1);
        ledger.fail_next_prepare();

        let params = PrepareParams {
            request_tx_hash: B256::repeat_byte(0xee),
            outpoints: vec![crate::types::Outpoint::new(B256::repeat_byte(0x05), 0)],
            signatures: vec![(B256::repeat_byte(0x11), B256::repeat_byte(0x12))],
        };
        let (tx_id, _) = ledger.submit_prepare(params).await.unwrap();

        assert_eq!(
            ledger.tx_status(tx_id).await.unwrap(),
            MonitoredTxStatus::Reverted
        );
        assert!(!ledger.is_prepared(B256::repeat_byte(0xee)).await.unwrap());
        let batch = ledger.scan_events(1, 10).await.unwrap();
        assert!(batch.redeem_prepared.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tx_is_limbo() {
        let ledger = MemoryLedger::new();
        assert_eq!(
            ledger.tx_status(B256::repeat_byte(0x01)).await.unwrap(),
            MonitoredTxStatus::Limbo
        );
    }

    #[tokio::test]
    async fn test_btc_broadcast_returns_txid() {
        let btc = MemoryBtcLedger::new();
        let tx = bitcoin::Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![],
            output: vec![],
        };
        let raw = bitcoin::consensus::encode::serialize(&tx);

        let txid = btc.broadcast_tx(raw.clone()).await.unwrap();

        assert_eq!(txid, B256::from(tx.compute_txid().to_byte_array()));
        assert_eq!(btc.broadcasts(), vec![raw]);
        assert!(btc.broadcast_tx(vec![0x00]).await.is_err());
    }
}
