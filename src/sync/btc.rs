//! BTC Deposit Synchronizer
//!
//! Mirrors the Mirror-Chain synchronizer for the BTC side: scans finalized
//! blocks for vault-bound deposits, registers each output with the vault,
//! decodes the OP_RETURN payload, and forwards deposits that target this
//! process's chain id to the state store as Requested Mints.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::SyncError;
use crate::ledger::BtcLedgerAdapter;
use crate::state::{StateSender, StateStore};
use crate::types::{BtcDepositEvent, Chain, DepositObserved, VaultUtxo};
use crate::vault::{Vault, VaultError};
use crate::wire::DepositPayload;

/// BTC-side synchronizer
pub struct BtcSynchronizer<B> {
    btc: Arc<B>,
    store: Arc<StateStore>,
    vault: Arc<Vault>,
    sender: StateSender,
    poll_interval: Duration,
    start_block: u64,
    /// Chain id deposits must name to mint here
    chain_id: u32,
    /// In-memory cursor; the durable copy advances via the state loop
    last_checked: Option<u64>,
}

impl<B: BtcLedgerAdapter> BtcSynchronizer<B> {
    pub fn new(
        btc: Arc<B>,
        store: Arc<StateStore>,
        vault: Arc<Vault>,
        sender: StateSender,
        poll_interval: Duration,
        start_block: u64,
        chain_id: u32,
    ) -> Self {
        Self {
            btc,
            store,
            vault,
            sender,
            poll_interval,
            start_block,
            chain_id,
            last_checked: None,
        }
    }

    /// Run until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(target: "bridge::sync", "btc synchronizer started");
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(target: "bridge::sync", "btc synchronizer stopping");
                    return;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(()) => {}
                        Err(SyncError::ChannelClosed) => {
                            info!(target: "bridge::sync", "state loop gone, btc synchronizer exiting");
                            return;
                        }
                        Err(e) => {
                            warn!(target: "bridge::sync", error = %e, "btc tick failed, retrying next tick");
                        }
                    }
                }
            }
        }
    }

    /// One scan pass over newly-finalized BTC blocks
    pub async fn tick(&mut self) -> Result<(), SyncError> {
        let last_checked = match self.last_checked {
            Some(n) => n,
            None => {
                let n = self
                    .store
                    .finalized_block_number(Chain::Btc)?
                    .unwrap_or(self.start_block);
                self.last_checked = Some(n);
                n
            }
        };

        let new_finalized = self.btc.latest_finalized().await?;
        if new_finalized <= last_checked {
            return Ok(());
        }

        let _ = self.sender.btc_finalized.try_send(new_finalized);

        let deposits = self
            .btc
            .scan_deposits(last_checked + 1, new_finalized)
            .await?;

        for deposit in deposits {
            self.handle_deposit(deposit).await?;
        }

        self.last_checked = Some(new_finalized);
        Ok(())
    }

    /// Custody the output and forward its mint target, if it names us
    async fn handle_deposit(&self, deposit: BtcDepositEvent) -> Result<(), SyncError> {
        let utxo = VaultUtxo {
            txid: deposit.txid,
            vout: deposit.vout,
            block_number: deposit.block_number,
            block_hash: deposit.block_hash,
            amount: deposit.amount,
            pk_script: deposit.pk_script.clone(),
            lockup: false,
            spent: false,
            timeout: 0,
        };

        match self.vault.add_utxo(&utxo) {
            Ok(()) => {}
            // re-scans redeliver deposits; custody is idempotent
            Err(VaultError::Duplicate(_)) => {
                debug!(
                    target: "bridge::sync",
                    txid = %hex::encode(deposit.txid),
                    vout = deposit.vout,
                    "utxo already custodied"
                );
            }
            Err(e) => return Err(e.into()),
        }

        let Some(script) = deposit.op_return_script else {
            debug!(
                target: "bridge::sync",
                txid = %hex::encode(deposit.txid),
                "deposit without payload, custody only"
            );
            return Ok(());
        };

        match DepositPayload::from_script(&script) {
            Ok(payload) if payload.chain_id == self.chain_id => {
                self.sender
                    .btc_deposit
                    .send(DepositObserved {
                        btc_txid: deposit.txid,
                        receiver: payload.receiver,
                        amount: deposit.amount,
                    })
                    .await
                    .map_err(|_| SyncError::ChannelClosed)?;
            }
            Ok(payload) => {
                debug!(
                    target: "bridge::sync",
                    txid = %hex::encode(deposit.txid),
                    target_chain = payload.chain_id,
                    "deposit targets another chain"
                );
            }
            Err(e) => {
                debug!(
                    target: "bridge::sync",
                    txid = %hex::encode(deposit.txid),
                    error = %e,
                    "undecodable deposit payload, custody only"
                );
            }
        }

        Ok(())
    }
}
