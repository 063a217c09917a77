//! Chain Synchronizers
//!
//! Convert each ledger's monotonic progress into a forward-only event
//! stream delivered to the state store. One cooperative task per chain,
//! driven by a ticker; a failed tick mutates nothing and is retried on the
//! next tick.

pub mod btc;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::ledger::{LedgerAdapter, LedgerError};
use crate::state::{StateSender, StateStore, StoreError};
use crate::types::Chain;

pub use btc::BtcSynchronizer;

/// Synchronizer errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Vault(#[from] crate::vault::VaultError),

    /// The state loop is gone; the synchronizer stops
    #[error("state intake channel closed")]
    ChannelClosed,
}

/// Mirror-Chain synchronizer
///
/// Scans `[last_checked+1, new_finalized]` in one ranged call per tick and
/// forwards every event in the order the adapter returned it. Downstream
/// applies idempotent semantics, so a retried tick may redeliver events.
pub struct ChainSynchronizer<L> {
    ledger: Arc<L>,
    store: Arc<StateStore>,
    sender: StateSender,
    poll_interval: Duration,
    start_block: u64,
    /// In-memory cursor; the durable copy advances via the state loop
    last_checked: Option<u64>,
}

impl<L: LedgerAdapter> ChainSynchronizer<L> {
    pub fn new(
        ledger: Arc<L>,
        store: Arc<StateStore>,
        sender: StateSender,
        poll_interval: Duration,
        start_block: u64,
    ) -> Self {
        Self {
            ledger,
            store,
            sender,
            poll_interval,
            start_block,
            last_checked: None,
        }
    }

    /// Run until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(target: "bridge::sync", "mirror synchronizer started");
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(target: "bridge::sync", "mirror synchronizer stopping");
                    return;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(()) => {}
                        Err(SyncError::ChannelClosed) => {
                            info!(target: "bridge::sync", "state loop gone, mirror synchronizer exiting");
                            return;
                        }
                        Err(e) => {
                            warn!(target: "bridge::sync", error = %e, "mirror tick failed, retrying next tick");
                        }
                    }
                }
            }
        }
    }

    /// One scan pass; advances the cursor only after every event is delivered
    pub async fn tick(&mut self) -> Result<(), SyncError> {
        let last_checked = match self.last_checked {
            Some(n) => n,
            None => {
                let n = self
                    .store
                    .finalized_block_number(Chain::Mirror)?
                    .unwrap_or(self.start_block);
                self.last_checked = Some(n);
                n
            }
        };

        let new_finalized = self.ledger.latest_finalized().await?;
        if new_finalized <= last_checked {
            return Ok(());
        }

        // cursor signal is best-effort; the depth-1 channel drops extras
        let _ = self.sender.mirror_finalized.try_send(new_finalized);

        let batch = self
            .ledger
            .scan_events(last_checked + 1, new_finalized)
            .await?;

        if !batch.is_empty() {
            debug!(
                target: "bridge::sync",
                from = last_checked + 1,
                to = new_finalized,
                minted = batch.minted.len(),
                requested = batch.redeem_requested.len(),
                prepared = batch.redeem_prepared.len(),
                "forwarding mirror events"
            );
        }

        for ev in batch.minted {
            self.sender
                .minted
                .send(ev)
                .await
                .map_err(|_| SyncError::ChannelClosed)?;
        }
        for ev in batch.redeem_requested {
            self.sender
                .redeem_requested
                .send(ev)
                .await
                .map_err(|_| SyncError::ChannelClosed)?;
        }
        for ev in batch.redeem_prepared {
            self.sender
                .redeem_prepared
                .send(ev)
                .await
                .map_err(|_| SyncError::ChannelClosed)?;
        }

        self.last_checked = Some(new_finalized);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedgerAdapter;
    use crate::state::intake_channels;
    use crate::types::{EventBatch, MintedEvent};
    use alloy_primitives::{Address, B256};
    use mockall::predicate::eq;

    fn minted(byte: u8) -> MintedEvent {
        MintedEvent {
            btc_txid: B256::repeat_byte(byte),
            mint_tx_hash: B256::repeat_byte(0x11),
            receiver: Address::repeat_byte(0x01),
            amount: 100,
        }
    }

    fn synchronizer(ledger: MockLedgerAdapter) -> (ChainSynchronizer<MockLedgerAdapter>, crate::state::StateIntake) {
        let store = Arc::new(StateStore::in_memory().unwrap());
        let (sender, intake) = intake_channels();
        let sync = ChainSynchronizer::new(
            Arc::new(ledger),
            store,
            sender,
            Duration::from_millis(100),
            0,
        );
        (sync, intake)
    }

    #[tokio::test]
    async fn test_tick_forwards_events_and_advances() {
        let mut ledger = MockLedgerAdapter::new();
        ledger.expect_latest_finalized().times(1).returning(|| Ok(5));
        ledger
            .expect_scan_events()
            .with(eq(1), eq(5))
            .times(1)
            .returning(|_, _| {
                Ok(EventBatch {
                    minted: vec![minted(0xaa), minted(0xab)],
                    ..Default::default()
                })
            });

        let (mut sync, mut intake) = synchronizer(ledger);
        sync.tick().await.unwrap();

        assert_eq!(sync.last_checked, Some(5));
        assert_eq!(intake.minted.recv().await.unwrap().btc_txid, B256::repeat_byte(0xaa));
        assert_eq!(intake.minted.recv().await.unwrap().btc_txid, B256::repeat_byte(0xab));
        assert_eq!(intake.mirror_finalized.recv().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_tick_noop_when_not_advanced() {
        let mut ledger = MockLedgerAdapter::new();
        ledger.expect_latest_finalized().returning(|| Ok(5));
        ledger
            .expect_scan_events()
            .with(eq(1), eq(5))
            .times(1)
            .returning(|_, _| Ok(EventBatch::default()));

        let (mut sync, _intake) = synchronizer(ledger);
        sync.tick().await.unwrap();
        // finality did not move; no second scan happens
        sync.tick().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_tick_rescans_same_range() {
        let mut ledger = MockLedgerAdapter::new();
        ledger.expect_latest_finalized().returning(|| Ok(5));

        let mut seq = mockall::Sequence::new();
        ledger
            .expect_scan_events()
            .with(eq(1), eq(5))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(LedgerError::transport("rpc down")));
        ledger
            .expect_scan_events()
            .with(eq(1), eq(5))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(EventBatch::default()));

        let (mut sync, _intake) = synchronizer(ledger);

        assert!(sync.tick().await.is_err());
        assert_eq!(sync.last_checked, Some(0));

        sync.tick().await.unwrap();
        assert_eq!(sync.last_checked, Some(5));
    }

    #[tokio::test]
    async fn test_ranges_never_skip_a_ledger_number() {
        let mut ledger = MockLedgerAdapter::new();
        let mut seq = mockall::Sequence::new();
        ledger
            .expect_latest_finalized()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(3));
        ledger
            .expect_latest_finalized()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(7));
        ledger
            .expect_scan_events()
            .with(eq(1), eq(3))
            .times(1)
            .returning(|_, _| Ok(EventBatch::default()));
        ledger
            .expect_scan_events()
            .with(eq(4), eq(7))
            .times(1)
            .returning(|_, _| Ok(EventBatch::default()));

        let (mut sync, _intake) = synchronizer(ledger);
        sync.tick().await.unwrap();
        sync.tick().await.unwrap();
        assert_eq!(sync.last_checked, Some(7));
    }
}
