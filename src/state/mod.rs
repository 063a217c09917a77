//! Bridge State Service
//!
//! Single-writer event loop over the state store. The synchronizers feed
//! bounded intake channels; the loop applies every event idempotently and
//! commits before taking the next one. Validation failures are fatal and
//! terminate the loop; duplicates are ignored with a warning.
//!
//! External readers (manager queries, reporter) read the store concurrently;
//! the manager additionally calls the three close-out update methods. All
//! event-driven writes go through this loop only.

pub mod store;

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{info, warn};

use crate::types::{
    Chain, DepositObserved, Mint, MintedEvent, Redeem, RedeemPreparedEvent, RedeemRequestedEvent,
    RedeemStatus,
};
pub use store::{StateStore, StoreError, StoreResult};

/// Bound for event intake channels
pub const MAX_PENDING_EVENTS: usize = 256;

/// State service errors
#[derive(Debug, Error)]
pub enum StateError {
    /// Malformed event; cannot be retried safely
    #[error("invalid event: {0}")]
    Validation(String),

    /// Store failure while applying an event
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Intake senders handed to the synchronizers
#[derive(Clone)]
pub struct StateSender {
    pub mirror_finalized: mpsc::Sender<u64>,
    pub btc_finalized: mpsc::Sender<u64>,
    pub minted: mpsc::Sender<MintedEvent>,
    pub redeem_requested: mpsc::Sender<RedeemRequestedEvent>,
    pub redeem_prepared: mpsc::Sender<RedeemPreparedEvent>,
    pub btc_deposit: mpsc::Sender<DepositObserved>,
}

/// Intake receivers owned by the state loop
pub struct StateIntake {
    pub(crate) mirror_finalized: mpsc::Receiver<u64>,
    pub(crate) btc_finalized: mpsc::Receiver<u64>,
    pub(crate) minted: mpsc::Receiver<MintedEvent>,
    pub(crate) redeem_requested: mpsc::Receiver<RedeemRequestedEvent>,
    pub(crate) redeem_prepared: mpsc::Receiver<RedeemPreparedEvent>,
    pub(crate) btc_deposit: mpsc::Receiver<DepositObserved>,
}

/// Create the intake channel pair
///
/// Cursor signals are depth-1 and published with `try_send`; event channels
/// are bounded at [`MAX_PENDING_EVENTS`] for backpressure.
pub fn intake_channels() -> (StateSender, StateIntake) {
    let (mirror_finalized_tx, mirror_finalized_rx) = mpsc::channel(1);
    let (btc_finalized_tx, btc_finalized_rx) = mpsc::channel(1);
    let (minted_tx, minted_rx) = mpsc::channel(MAX_PENDING_EVENTS);
    let (redeem_requested_tx, redeem_requested_rx) = mpsc::channel(MAX_PENDING_EVENTS);
    let (redeem_prepared_tx, redeem_prepared_rx) = mpsc::channel(MAX_PENDING_EVENTS);
    let (btc_deposit_tx, btc_deposit_rx) = mpsc::channel(MAX_PENDING_EVENTS);

    (
        StateSender {
            mirror_finalized: mirror_finalized_tx,
            btc_finalized: btc_finalized_tx,
            minted: minted_tx,
            redeem_requested: redeem_requested_tx,
            redeem_prepared: redeem_prepared_tx,
            btc_deposit: btc_deposit_tx,
        },
        StateIntake {
            mirror_finalized: mirror_finalized_rx,
            btc_finalized: btc_finalized_rx,
            minted: minted_rx,
            redeem_requested: redeem_requested_rx,
            redeem_prepared: redeem_prepared_rx,
            btc_deposit: btc_deposit_rx,
        },
    )
}

/// The state event-processing service
pub struct BridgeState {
    store: Arc<StateStore>,
    intake: StateIntake,
    /// Woken when a new Requested mint lands
    mint_work: Arc<Notify>,
    /// Woken when a new Requested redeem lands
    redeem_work: Arc<Notify>,
}

impl BridgeState {
    pub fn new(
        store: Arc<StateStore>,
        intake: StateIntake,
        mint_work: Arc<Notify>,
        redeem_work: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            intake,
            mint_work,
            redeem_work,
        }
    }

    /// Run the event loop until shutdown or a fatal error
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), StateError> {
        info!(target: "bridge::state", "state loop started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(target: "bridge::state", "state loop stopping");
                    return Ok(());
                }
                Some(n) = self.intake.mirror_finalized.recv() => {
                    self.apply_finalized(Chain::Mirror, n)?;
                }
                Some(n) = self.intake.btc_finalized.recv() => {
                    self.apply_finalized(Chain::Btc, n)?;
                }
                Some(ev) = self.intake.minted.recv() => {
                    self.apply_minted(ev)?;
                }
                Some(ev) = self.intake.redeem_requested.recv() => {
                    self.apply_redeem_requested(ev)?;
                }
                Some(ev) = self.intake.redeem_prepared.recv() => {
                    self.apply_redeem_prepared(ev)?;
                }
                Some(ev) = self.intake.btc_deposit.recv() => {
                    self.apply_btc_deposit(ev)?;
                }
                else => {
                    info!(target: "bridge::state", "all intake channels closed, state loop exiting");
                    return Ok(());
                }
            }
        }
    }

    /// NewFinalized(n): persist only forward movement
    fn apply_finalized(&self, chain: Chain, number: u64) -> Result<(), StateError> {
        if let Some(stored) = self.store.finalized_block_number(chain)? {
            if number <= stored {
                warn!(
                    target: "bridge::state",
                    %chain, number, stored, "stale finalized number, ignoring"
                );
                return Ok(());
            }
        }
        self.store.set_finalized_block_number(chain, number)?;
        Ok(())
    }

    /// Minted(btc_txid, mint_tx, receiver, amount)
    fn apply_minted(&self, ev: MintedEvent) -> Result<(), StateError> {
        match self.store.get_mint(&ev.btc_txid)? {
            None => {
                // first observation of this deposit is its mint
                let mint = Mint::completed(ev.btc_txid, ev.receiver, ev.amount, ev.mint_tx_hash);
                match self.store.insert_mint(&mint) {
                    Ok(()) => {
                        info!(
                            target: "bridge::state",
                            btc_txid = %hex::encode(ev.btc_txid),
                            "mint observed completed"
                        );
                    }
                    Err(StoreError::Duplicate(key)) => {
                        warn!(target: "bridge::state", key = %key, "duplicate mint insert, ignoring");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Some(existing) if existing.is_completed() => {
                warn!(
                    target: "bridge::state",
                    btc_txid = %hex::encode(ev.btc_txid),
                    "duplicate minted event, ignoring"
                );
            }
            Some(existing) => {
                if existing.amount != ev.amount || existing.receiver != ev.receiver {
                    warn!(
                        target: "bridge::state",
                        btc_txid = %hex::encode(ev.btc_txid),
                        expected_amount = existing.amount,
                        event_amount = ev.amount,
                        "minted event mismatches requested mint, not mutating"
                    );
                    return Ok(());
                }
                match self.store.complete_mint(&ev.btc_txid, &ev.mint_tx_hash) {
                    Ok(()) => {
                        info!(
                            target: "bridge::state",
                            btc_txid = %hex::encode(ev.btc_txid),
                            mint_tx = %hex::encode(ev.mint_tx_hash),
                            "mint completed"
                        );
                    }
                    Err(StoreError::Conflict(msg)) => {
                        warn!(target: "bridge::state", msg = %msg, "mint already completed, ignoring");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// RedeemRequested(req_hash, requester, receiver, amount, valid)
    fn apply_redeem_requested(&self, ev: RedeemRequestedEvent) -> Result<(), StateError> {
        if ev.request_tx_hash == B256::ZERO {
            return Err(StateError::Validation("redeem request hash is zero".into()));
        }
        if ev.requester == Address::ZERO {
            return Err(StateError::Validation("redeem requester is zero".into()));
        }
        if ev.amount == 0 {
            return Err(StateError::Validation("redeem amount is zero".into()));
        }

        if self.store.get_redeem(&ev.request_tx_hash)?.is_some() {
            warn!(
                target: "bridge::state",
                request = %hex::encode(ev.request_tx_hash),
                "duplicate redeem request, ignoring"
            );
            return Ok(());
        }

        let redeem = if ev.is_valid_receiver {
            Redeem::requested(ev.request_tx_hash, ev.requester, ev.receiver, ev.amount)
        } else {
            Redeem::invalid(ev.request_tx_hash, ev.requester, ev.receiver, ev.amount)
        };
        let valid = !redeem.is_invalid();

        match self.store.insert_redeem(&redeem) {
            Ok(()) => {
                info!(
                    target: "bridge::state",
                    request = %hex::encode(ev.request_tx_hash),
                    amount = ev.amount,
                    status = %redeem.status,
                    "redeem request recorded"
                );
                if valid {
                    self.redeem_work.notify_one();
                }
            }
            Err(StoreError::Duplicate(key)) => {
                warn!(target: "bridge::state", key = %key, "duplicate redeem insert, ignoring");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// RedeemPrepared(req_hash, prep_hash, requester, receiver, amount, outpoints)
    fn apply_redeem_prepared(&self, ev: RedeemPreparedEvent) -> Result<(), StateError> {
        let existing = self
            .store
            .get_redeem(&ev.request_tx_hash)?
            .ok_or_else(|| {
                StateError::Validation(format!(
                    "prepared event for unknown redeem {}",
                    hex::encode(ev.request_tx_hash)
                ))
            })?;

        if existing.is_invalid() {
            return Err(StateError::Validation(format!(
                "update invalid redeem {}",
                hex::encode(ev.request_tx_hash)
            )));
        }

        if ev.prepare_tx_hash == B256::ZERO {
            return Err(StateError::Validation("prepare tx hash is zero".into()));
        }
        if existing.amount != ev.amount
            || existing.receiver != ev.receiver
            || existing.requester != ev.requester
        {
            return Err(StateError::Validation(format!(
                "prepared event mismatches redeem {}",
                hex::encode(ev.request_tx_hash)
            )));
        }
        if ev.outpoints.is_empty() {
            return Err(StateError::Validation("prepared event has no outpoints".into()));
        }
        if ev.outpoints.iter().any(|o| o.txid == B256::ZERO) {
            return Err(StateError::Validation("prepared outpoint txid is zero".into()));
        }

        if existing.status != RedeemStatus::Requested {
            warn!(
                target: "bridge::state",
                request = %hex::encode(ev.request_tx_hash),
                status = %existing.status,
                "duplicate prepared event, ignoring"
            );
            return Ok(());
        }

        match self
            .store
            .set_redeem_prepared(&ev.request_tx_hash, &ev.prepare_tx_hash, &ev.outpoints)
        {
            Ok(()) => {
                info!(
                    target: "bridge::state",
                    request = %hex::encode(ev.request_tx_hash),
                    prepare_tx = %hex::encode(ev.prepare_tx_hash),
                    outpoints = ev.outpoints.len(),
                    "redeem prepared"
                );
                // the payout stage has work now
                self.redeem_work.notify_one();
            }
            Err(StoreError::Conflict(msg)) => {
                warn!(target: "bridge::state", msg = %msg, "redeem already prepared, ignoring");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// A vault-bound BTC deposit targeting this chain
    fn apply_btc_deposit(&self, ev: DepositObserved) -> Result<(), StateError> {
        let mint = Mint::requested(ev.btc_txid, ev.receiver, ev.amount);
        match self.store.insert_mint(&mint) {
            Ok(()) => {
                info!(
                    target: "bridge::state",
                    btc_txid = %hex::encode(ev.btc_txid),
                    amount = ev.amount,
                    "mint requested from BTC deposit"
                );
                self.mint_work.notify_one();
            }
            Err(StoreError::Duplicate(key)) => {
                warn!(target: "bridge::state", key = %key, "deposit already recorded, ignoring");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MintStatus, Outpoint};

    fn txid(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    struct Harness {
        sender: StateSender,
        store: Arc<StateStore>,
        handle: tokio::task::JoinHandle<Result<(), StateError>>,
        _shutdown: watch::Sender<bool>,
    }

    fn spawn_state() -> Harness {
        let store = Arc::new(StateStore::in_memory().unwrap());
        let (sender, intake) = intake_channels();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = BridgeState::new(
            store.clone(),
            intake,
            Arc::new(Notify::new()),
            Arc::new(Notify::new()),
        );
        let handle = tokio::spawn(state.run(shutdown_rx));
        Harness {
            sender,
            store,
            handle,
            _shutdown: shutdown_tx,
        }
    }

    /// Drop the senders and wait for the loop to drain and exit
    async fn finish(h: Harness) -> (Arc<StateStore>, Result<(), StateError>) {
        let Harness { sender, store, handle, _shutdown } = h;
        drop(sender);
        let result = handle.await.unwrap();
        (store, result)
    }

    fn deposit_event(byte: u8, amount: u64, receiver: Address) -> DepositObserved {
        DepositObserved {
            btc_txid: txid(byte),
            receiver,
            amount,
        }
    }

    #[tokio::test]
    async fn test_deposit_creates_requested_mint() {
        let h = spawn_state();
        let receiver = Address::repeat_byte(0x01);

        h.sender
            .btc_deposit
            .send(deposit_event(0xaa, 100_000_000, receiver))
            .await
            .unwrap();

        let (store, result) = finish(h).await;
        result.unwrap();

        let mint = store.get_mint(&txid(0xaa)).unwrap().unwrap();
        assert_eq!(mint.status, MintStatus::Requested);
        assert_eq!(mint.receiver, receiver);
        assert!(mint.mint_tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_minted_event_completes_requested_mint() {
        let h = spawn_state();
        let receiver = Address::repeat_byte(0x01);

        h.sender
            .btc_deposit
            .send(deposit_event(0xaa, 100_000_000, receiver))
            .await
            .unwrap();
        h.sender
            .minted
            .send(MintedEvent {
                btc_txid: txid(0xaa),
                mint_tx_hash: txid(0x11),
                receiver,
                amount: 100_000_000,
            })
            .await
            .unwrap();

        let (store, result) = finish(h).await;
        result.unwrap();

        let mint = store.get_mint(&txid(0xaa)).unwrap().unwrap();
        assert_eq!(mint.status, MintStatus::Completed);
        assert_eq!(mint.mint_tx_hash, Some(txid(0x11)));
    }

    #[tokio::test]
    async fn test_duplicate_minted_event_is_ignored() {
        let h = spawn_state();
        let ev = MintedEvent {
            btc_txid: txid(0xaa),
            mint_tx_hash: txid(0x11),
            receiver: Address::repeat_byte(0x01),
            amount: 100_000_000,
        };

        h.sender.minted.send(ev.clone()).await.unwrap();
        h.sender.minted.send(ev).await.unwrap();

        let (store, result) = finish(h).await;
        result.unwrap();

        let mint = store.get_mint(&txid(0xaa)).unwrap().unwrap();
        assert_eq!(mint.status, MintStatus::Completed);
        assert_eq!(mint.mint_tx_hash, Some(txid(0x11)));
    }

    #[tokio::test]
    async fn test_mismatched_minted_event_does_not_mutate() {
        let h = spawn_state();
        let receiver = Address::repeat_byte(0x01);

        h.sender
            .btc_deposit
            .send(deposit_event(0xaa, 100_000_000, receiver))
            .await
            .unwrap();
        h.sender
            .minted
            .send(MintedEvent {
                btc_txid: txid(0xaa),
                mint_tx_hash: txid(0x11),
                receiver,
                amount: 99, // wrong
            })
            .await
            .unwrap();

        let (store, result) = finish(h).await;
        result.unwrap();

        let mint = store.get_mint(&txid(0xaa)).unwrap().unwrap();
        assert_eq!(mint.status, MintStatus::Requested);
    }

    #[tokio::test]
    async fn test_invalid_receiver_redeem_is_a_sink() {
        let h = spawn_state();

        h.sender
            .redeem_requested
            .send(RedeemRequestedEvent {
                request_tx_hash: txid(0x01),
                requester: Address::repeat_byte(0x02),
                receiver: "abcd".to_string(),
                amount: 50,
                is_valid_receiver: false,
            })
            .await
            .unwrap();
        h.sender
            .redeem_prepared
            .send(RedeemPreparedEvent {
                request_tx_hash: txid(0x01),
                prepare_tx_hash: txid(0x02),
                requester: Address::repeat_byte(0x02),
                receiver: "abcd".to_string(),
                amount: 50,
                outpoints: vec![Outpoint::new(txid(0x0a), 0)],
            })
            .await
            .unwrap();

        let (store, result) = finish(h).await;

        let err = result.unwrap_err();
        assert!(matches!(err, StateError::Validation(ref msg) if msg.contains("update invalid redeem")));

        let redeem = store.get_redeem(&txid(0x01)).unwrap().unwrap();
        assert_eq!(redeem.status, RedeemStatus::Invalid);
    }

    #[tokio::test]
    async fn test_zero_request_hash_is_fatal() {
        let h = spawn_state();

        h.sender
            .redeem_requested
            .send(RedeemRequestedEvent {
                request_tx_hash: B256::ZERO,
                requester: Address::repeat_byte(0x02),
                receiver: "tb1q".to_string(),
                amount: 50,
                is_valid_receiver: true,
            })
            .await
            .unwrap();

        let (_, result) = finish(h).await;
        assert!(matches!(result, Err(StateError::Validation(_))));
    }

    #[tokio::test]
    async fn test_redeem_prepared_transition() {
        let h = spawn_state();
        let requester = Address::repeat_byte(0x02);
        let receiver = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".to_string();

        h.sender
            .redeem_requested
            .send(RedeemRequestedEvent {
                request_tx_hash: txid(0x01),
                requester,
                receiver: receiver.clone(),
                amount: 240,
                is_valid_receiver: true,
            })
            .await
            .unwrap();

        let outpoints = vec![Outpoint::new(txid(0x0a), 0), Outpoint::new(txid(0x0b), 1)];
        let prepared = RedeemPreparedEvent {
            request_tx_hash: txid(0x01),
            prepare_tx_hash: txid(0x02),
            requester,
            receiver,
            amount: 240,
            outpoints: outpoints.clone(),
        };
        // applying the same event twice is a no-op
        h.sender.redeem_prepared.send(prepared.clone()).await.unwrap();
        h.sender.redeem_prepared.send(prepared).await.unwrap();

        let (store, result) = finish(h).await;
        result.unwrap();

        let redeem = store.get_redeem(&txid(0x01)).unwrap().unwrap();
        assert_eq!(redeem.status, RedeemStatus::Prepared);
        assert_eq!(redeem.outpoints, outpoints);
        assert_eq!(redeem.prepare_tx_hash, Some(txid(0x02)));
    }

    #[tokio::test]
    async fn test_finalized_number_is_monotone() {
        let h = spawn_state();

        h.sender.mirror_finalized.send(10).await.unwrap();
        h.sender.mirror_finalized.send(5).await.unwrap();

        let (store, result) = finish(h).await;
        result.unwrap();

        assert_eq!(store.finalized_block_number(Chain::Mirror).unwrap(), Some(10));
    }
}
