//! Chain-Tx Manager
//!
//! Drives pending mints and redeems to completion: requests signatures,
//! submits transactions to both chains, and tracks every submission until
//! it reaches a terminal status. Two independent work loops run per
//! process, woken by periodic tickers plus state-store notifications when
//! new pending rows land.
//!
//! Retryable trouble (transport, signer, not-enough-funds) defers to the
//! next tick. A submission that contradicts local state parks its
//! reference in Reorg until an operator intervenes.

pub mod builder;
pub mod monitored;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::B256;
use bitcoin::Transaction;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::ledger::{BtcLedgerAdapter, LedgerAdapter, LedgerError, MintParams, PrepareParams};
use crate::signer::{SignatureRequest, SignerClient, SignerError};
use crate::state::{StateStore, StoreError};
use crate::types::{
    Mint, MintStatus, MonitoredTx, MonitoredTxStatus, Outpoint, Redeem, RedeemStatus,
};
use crate::vault::{Vault, VaultError};
use crate::wire::mint_signing_hash;

pub use builder::{BuilderError, RedeemTxBuilder, UnsignedRedeemTx};
pub use monitored::{MonitorStoreError, MonitoredTxStore};

/// Manager errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    State(#[from] StoreError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Monitor(#[from] MonitorStoreError),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error("signature collection timed out")]
    SignTimeout,

    #[error("signature reply id mismatch")]
    SignMismatch,
}

impl ManagerError {
    /// Whether the owning tick should simply try again later
    pub fn is_retryable(&self) -> bool {
        match self {
            ManagerError::Ledger(_) | ManagerError::Signer(_) => true,
            ManagerError::Vault(e) => e.is_retryable(),
            ManagerError::State(e) => e.is_retryable(),
            ManagerError::SignTimeout => true,
            _ => false,
        }
    }
}

/// Manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Work-loop tick interval
    pub tick_interval: Duration,
    /// Ledger distance after which an in-flight tx is timed out
    pub monitor_timeout_blocks: u64,
    /// Flat fee reserved per redeem payout (satoshi)
    pub redeem_fee_sats: u64,
    /// How long to wait for the signer before deferring
    pub sign_timeout: Duration,
    /// Network receiver addresses must belong to
    pub network: bitcoin::Network,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            monitor_timeout_blocks: 20,
            redeem_fee_sats: 1_000,
            sign_timeout: Duration::from_secs(30),
            network: bitcoin::Network::Testnet,
        }
    }
}

/// A signed payout kept around between prepare and broadcast
struct SignedPayout {
    tx: Transaction,
    outpoints: Vec<Outpoint>,
}

/// The chain-tx manager
pub struct ChainTxManager<L, B> {
    state: Arc<StateStore>,
    vault: Arc<Vault>,
    mirror: Arc<L>,
    btc: Arc<B>,
    signer: Arc<dyn SignerClient>,
    monitored: Arc<MonitoredTxStore>,
    builder: RedeemTxBuilder,
    config: ManagerConfig,
    /// Woken by the state loop when a Requested mint lands
    mint_work: Arc<Notify>,
    /// Woken by the state loop when a Requested redeem lands
    redeem_work: Arc<Notify>,
    /// Per-row retry attempt counters
    attempts: Mutex<HashMap<B256, u32>>,
    /// Outpoints locked per in-flight prepare tx, for Reverted cleanup
    pending_prepares: Mutex<HashMap<B256, Vec<Outpoint>>>,
    /// Signed payouts cached between prepare and broadcast
    signed_payouts: Mutex<HashMap<B256, SignedPayout>>,
}

impl<L: LedgerAdapter, B: BtcLedgerAdapter> ChainTxManager<L, B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<StateStore>,
        vault: Arc<Vault>,
        mirror: Arc<L>,
        btc: Arc<B>,
        signer: Arc<dyn SignerClient>,
        monitored: Arc<MonitoredTxStore>,
        config: ManagerConfig,
        mint_work: Arc<Notify>,
        redeem_work: Arc<Notify>,
    ) -> Self {
        let builder = RedeemTxBuilder::new(config.network);
        Self {
            state,
            vault,
            mirror,
            btc,
            signer,
            monitored,
            builder,
            config,
            mint_work,
            redeem_work,
            attempts: Mutex::new(HashMap::new()),
            pending_prepares: Mutex::new(HashMap::new()),
            signed_payouts: Mutex::new(HashMap::new()),
        }
    }

    /// Run the mint work loop until shutdown
    pub async fn run_mint_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(target: "bridge::manager", "mint loop started");
        let mut ticker = tokio::time::interval(self.config.tick_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(target: "bridge::manager", "mint loop stopping");
                    return;
                }
                _ = ticker.tick() => {}
                _ = self.mint_work.notified() => {}
            }

            if let Err(e) = self.mint_tick().await {
                warn!(target: "bridge::manager", error = %e, "mint tick failed, retrying next tick");
            }
        }
    }

    /// Run the redeem work loop until shutdown
    pub async fn run_redeem_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(target: "bridge::manager", "redeem loop started");
        let mut ticker = tokio::time::interval(self.config.tick_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(target: "bridge::manager", "redeem loop stopping");
                    return;
                }
                _ = ticker.tick() => {}
                _ = self.redeem_work.notified() => {}
            }

            if let Err(e) = self.redeem_tick().await {
                warn!(target: "bridge::manager", error = %e, "redeem tick failed, retrying next tick");
            }
        }
    }

    // =========================================================================
    // Mint loop
    // =========================================================================

    /// One pass over in-flight and pending mints
    pub async fn mint_tick(&self) -> Result<(), ManagerError> {
        self.poll_mint_monitors().await?;

        for mint in self.state.mints_by_status(MintStatus::Requested)? {
            if self.monitored.has_reorg_for(&mint.btc_txid)? {
                debug!(
                    target: "bridge::manager",
                    btc_txid = %hex::encode(mint.btc_txid),
                    "mint parked in reorg, skipping"
                );
                continue;
            }
            if self.monitored.has_active_for(&mint.btc_txid)? {
                continue;
            }

            if let Err(e) = self.submit_mint(&mint).await {
                let attempt = self.note_attempt(&mint.btc_txid);
                warn!(
                    target: "bridge::manager",
                    btc_txid = %hex::encode(mint.btc_txid),
                    attempt,
                    error = %e,
                    "mint submission failed"
                );
                if !e.is_retryable() {
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Sign and submit one pending mint
    async fn submit_mint(&self, mint: &Mint) -> Result<(), ManagerError> {
        // dedup against the chain; the Minted event will close the row out
        if self.mirror.is_minted(mint.btc_txid).await? {
            debug!(
                target: "bridge::manager",
                btc_txid = %hex::encode(mint.btc_txid),
                "already minted on chain, awaiting event"
            );
            return Ok(());
        }

        let signing_hash = mint_signing_hash(&mint.btc_txid, &mint.receiver, mint.amount);
        let request = SignatureRequest::new(mint.btc_txid, signing_hash);
        let reply = self.request_signature(request).await?;
        if reply.id != mint.btc_txid {
            return Err(ManagerError::SignMismatch);
        }
        let (rx, s) = reply.signature().ok_or(ManagerError::SignTimeout)?;

        let params = MintParams {
            btc_txid: mint.btc_txid,
            receiver: mint.receiver,
            amount: mint.amount,
            rx,
            s,
        };
        let (tx_id, sent_at) = self.mirror.submit_mint(params).await?;

        self.monitored
            .insert(&MonitoredTx::submitted(tx_id, mint.btc_txid, Some(sent_at)))?;

        info!(
            target: "bridge::manager",
            btc_txid = %hex::encode(mint.btc_txid),
            tx_id = %hex::encode(tx_id),
            sent_at,
            "mint submitted"
        );
        Ok(())
    }

    /// Poll in-flight mint submissions
    async fn poll_mint_monitors(&self) -> Result<(), ManagerError> {
        let active: Vec<MonitoredTx> = self
            .monitored
            .active()?
            .into_iter()
            .filter(|m| matches!(self.state.get_mint(&m.ref_id), Ok(Some(_))))
            .collect();
        if active.is_empty() {
            return Ok(());
        }

        let latest = self.mirror.latest_finalized().await?;

        for m in active {
            let status = match self.mirror.tx_status(m.tx_id).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(target: "bridge::manager", error = %e, "tx status poll failed");
                    continue;
                }
            };

            match status {
                MonitoredTxStatus::Success => {
                    self.monitored
                        .set_found(&m.tx_id, m.found_at.or(Some(latest)), MonitoredTxStatus::Success)?;
                    match self.state.complete_mint(&m.ref_id, &m.tx_id) {
                        Ok(()) => {
                            info!(
                                target: "bridge::manager",
                                btc_txid = %hex::encode(m.ref_id),
                                "mint confirmed"
                            );
                        }
                        Err(StoreError::Conflict(_)) => {} // event beat us to it
                        Err(StoreError::NotFound(_)) => {
                            // local state lost a row the chain confirmed
                            self.monitored.set_status(&m.tx_id, MonitoredTxStatus::Reorg)?;
                            warn!(
                                target: "bridge::manager",
                                tx_id = %hex::encode(m.tx_id),
                                "confirmed mint has no local row, operator intervention required"
                            );
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                MonitoredTxStatus::Reverted | MonitoredTxStatus::MalForm => {
                    self.monitored.set_status(&m.tx_id, status)?;
                    warn!(
                        target: "bridge::manager",
                        tx_id = %hex::encode(m.tx_id),
                        status = %status,
                        "mint submission terminal, row stays requested"
                    );
                }
                MonitoredTxStatus::Reorg => {
                    self.monitored.set_status(&m.tx_id, MonitoredTxStatus::Reorg)?;
                    warn!(
                        target: "bridge::manager",
                        tx_id = %hex::encode(m.tx_id),
                        "reorg detected, operator intervention required"
                    );
                }
                MonitoredTxStatus::Pending => {
                    if m.found_at.is_none() {
                        self.monitored
                            .set_found(&m.tx_id, Some(latest), MonitoredTxStatus::Pending)?;
                    }
                    self.check_monitor_timeout(&m, latest)?;
                }
                MonitoredTxStatus::Limbo => {
                    self.check_monitor_timeout(&m, latest)?;
                }
                MonitoredTxStatus::Timeout => {}
            }
        }

        Ok(())
    }

    // =========================================================================
    // Redeem loop
    // =========================================================================

    /// One pass over in-flight prepares, pending redeems, and pending payouts
    pub async fn redeem_tick(&self) -> Result<(), ManagerError> {
        self.poll_redeem_monitors().await?;

        for redeem in self.state.redeems_by_status(RedeemStatus::Requested)? {
            if self.monitored.has_reorg_for(&redeem.request_tx_hash)? {
                debug!(
                    target: "bridge::manager",
                    request = %hex::encode(redeem.request_tx_hash),
                    "redeem parked in reorg, skipping"
                );
                continue;
            }
            if self.monitored.has_active_for(&redeem.request_tx_hash)? {
                continue;
            }

            match self.submit_prepare(&redeem).await {
                Ok(()) => {}
                Err(ManagerError::Vault(VaultError::NotEnough { required, available })) => {
                    debug!(
                        target: "bridge::manager",
                        request = %hex::encode(redeem.request_tx_hash),
                        required,
                        available,
                        "vault cannot cover redeem yet, deferring"
                    );
                }
                Err(e) => {
                    let attempt = self.note_attempt(&redeem.request_tx_hash);
                    warn!(
                        target: "bridge::manager",
                        request = %hex::encode(redeem.request_tx_hash),
                        attempt,
                        error = %e,
                        "prepare submission failed"
                    );
                    if !e.is_retryable() {
                        return Err(e);
                    }
                }
            }
        }

        for redeem in self.state.redeems_by_status(RedeemStatus::Prepared)? {
            if redeem.btc_txid.is_some() {
                continue;
            }
            if let Err(e) = self.broadcast_payout(&redeem).await {
                let attempt = self.note_attempt(&redeem.request_tx_hash);
                warn!(
                    target: "bridge::manager",
                    request = %hex::encode(redeem.request_tx_hash),
                    attempt,
                    error = %e,
                    "payout broadcast failed"
                );
                if !e.is_retryable() {
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Lock inputs, sign the payout, and submit the prepare to the Mirror Chain
    async fn submit_prepare(&self, redeem: &Redeem) -> Result<(), ManagerError> {
        // dedup against the chain; the Prepared event will close the row out
        if self.mirror.is_prepared(redeem.request_tx_hash).await? {
            debug!(
                target: "bridge::manager",
                request = %hex::encode(redeem.request_tx_hash),
                "already prepared on chain, awaiting event"
            );
            return Ok(());
        }

        let target = redeem.amount + self.config.redeem_fee_sats;
        let utxos = self.vault.choose_and_lock(target).await?;
        let outpoints: Vec<Outpoint> = utxos.iter().map(|u| u.outpoint()).collect();

        let result = self.sign_payout(redeem, &utxos).await;
        let (signed, signatures) = match result {
            Ok(v) => v,
            Err(e) => {
                // the payout is definitively off; free the inputs now
                self.release_outpoints(&outpoints).await;
                return Err(e);
            }
        };

        let params = PrepareParams {
            request_tx_hash: redeem.request_tx_hash,
            outpoints: outpoints.clone(),
            signatures,
        };
        let (tx_id, sent_at) = self.mirror.submit_prepare(params).await?;

        self.monitored
            .insert(&MonitoredTx::submitted(tx_id, redeem.request_tx_hash, Some(sent_at)))?;
        self.pending_prepares
            .lock()
            .expect("pending_prepares lock")
            .insert(tx_id, outpoints.clone());
        self.signed_payouts
            .lock()
            .expect("signed_payouts lock")
            .insert(
                redeem.request_tx_hash,
                SignedPayout {
                    tx: signed,
                    outpoints,
                },
            );

        info!(
            target: "bridge::manager",
            request = %hex::encode(redeem.request_tx_hash),
            tx_id = %hex::encode(tx_id),
            inputs = utxos.len(),
            "prepare submitted"
        );
        Ok(())
    }

    /// Build the payout tx and collect one signature per input
    async fn sign_payout(
        &self,
        redeem: &Redeem,
        utxos: &[crate::types::VaultUtxo],
    ) -> Result<(Transaction, Vec<(B256, B256)>), ManagerError> {
        let unsigned = self.builder.build(
            &redeem.receiver,
            redeem.amount,
            self.config.redeem_fee_sats,
            utxos,
        )?;
        let hashes = unsigned.signing_hashes()?;
        let outpoints = unsigned.outpoints();

        let (reply_tx, mut reply_rx) = mpsc::channel(hashes.len());
        for hash in &hashes {
            let request =
                SignatureRequest::new(*hash, *hash).with_outpoints(outpoints.clone());
            let signer = self.signer.clone();
            let reply = reply_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = signer.sign_async(request, reply).await {
                    warn!(target: "bridge::manager", error = %e, "input signing failed");
                }
            });
        }
        drop(reply_tx);

        let mut by_id: HashMap<B256, (B256, B256)> = HashMap::new();
        while by_id.len() < hashes.len() {
            match timeout(self.config.sign_timeout, reply_rx.recv()).await {
                Ok(Some(reply)) => {
                    if let Some(sig) = reply.signature() {
                        by_id.insert(reply.id, sig);
                    }
                }
                // every signer task finished without enough replies
                Ok(None) => return Err(ManagerError::SignTimeout),
                Err(_) => return Err(ManagerError::SignTimeout),
            }
        }

        let signatures: Vec<(B256, B256)> = hashes
            .iter()
            .map(|h| by_id.get(h).copied().ok_or(ManagerError::SignMismatch))
            .collect::<Result<_, _>>()?;

        let signed = unsigned.attach_signatures(&signatures)?;
        Ok((signed, signatures))
    }

    /// Broadcast the BTC payout for a prepared redeem
    async fn broadcast_payout(&self, redeem: &Redeem) -> Result<(), ManagerError> {
        let cached = self
            .signed_payouts
            .lock()
            .expect("signed_payouts lock")
            .remove(&redeem.request_tx_hash);

        let signed = match cached {
            Some(payout) if payout.outpoints == redeem.outpoints => payout.tx,
            _ => self.resign_payout(redeem).await?,
        };

        let raw = builder::serialize_tx(&signed);
        let btc_txid = self.btc.broadcast_tx(raw).await?;

        for op in &redeem.outpoints {
            if let Err(e) = self.vault.mark_spent(&op.txid, op.vout).await {
                warn!(
                    target: "bridge::manager",
                    outpoint = %op,
                    error = %e,
                    "failed to mark payout input spent"
                );
            }
        }

        match self.state.set_redeem_completed(&redeem.request_tx_hash, &btc_txid) {
            Ok(()) => {}
            Err(StoreError::Conflict(msg)) => {
                warn!(target: "bridge::manager", msg = %msg, "redeem already completed");
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            target: "bridge::manager",
            request = %hex::encode(redeem.request_tx_hash),
            btc_txid = %hex::encode(btc_txid),
            "payout broadcast"
        );
        Ok(())
    }

    /// Rebuild and re-sign a payout from its committed outpoints
    ///
    /// Used after a restart, when the signed tx from the prepare stage is no
    /// longer in memory. The on-chain commitment fixes the outpoints, so the
    /// rebuild spends exactly those.
    async fn resign_payout(&self, redeem: &Redeem) -> Result<Transaction, ManagerError> {
        let mut utxos = Vec::with_capacity(redeem.outpoints.len());
        for op in &redeem.outpoints {
            let utxo = self
                .vault
                .get_utxo(&op.txid, op.vout)?
                .ok_or_else(|| VaultError::NotFound(op.to_string()))?;
            utxos.push(utxo);
        }

        let (signed, _) = self.sign_payout(redeem, &utxos).await?;
        Ok(signed)
    }

    /// Poll in-flight prepare submissions
    async fn poll_redeem_monitors(&self) -> Result<(), ManagerError> {
        let active: Vec<MonitoredTx> = self
            .monitored
            .active()?
            .into_iter()
            .filter(|m| matches!(self.state.get_redeem(&m.ref_id), Ok(Some(_))))
            .collect();
        if active.is_empty() {
            return Ok(());
        }

        let latest = self.mirror.latest_finalized().await?;

        for m in active {
            let status = match self.mirror.tx_status(m.tx_id).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(target: "bridge::manager", error = %e, "tx status poll failed");
                    continue;
                }
            };

            match status {
                MonitoredTxStatus::Success => {
                    self.monitored
                        .set_found(&m.tx_id, m.found_at.or(Some(latest)), MonitoredTxStatus::Success)?;
                    // the Prepared transition arrives through the synchronizer
                    self.pending_prepares
                        .lock()
                        .expect("pending_prepares lock")
                        .remove(&m.tx_id);
                    info!(
                        target: "bridge::manager",
                        request = %hex::encode(m.ref_id),
                        "prepare confirmed"
                    );
                }
                MonitoredTxStatus::Reverted | MonitoredTxStatus::MalForm => {
                    self.monitored.set_status(&m.tx_id, status)?;
                    let outpoints = self
                        .pending_prepares
                        .lock()
                        .expect("pending_prepares lock")
                        .remove(&m.tx_id);
                    if let Some(outpoints) = outpoints {
                        self.release_outpoints(&outpoints).await;
                    }
                    self.signed_payouts
                        .lock()
                        .expect("signed_payouts lock")
                        .remove(&m.ref_id);
                    warn!(
                        target: "bridge::manager",
                        tx_id = %hex::encode(m.tx_id),
                        status = %status,
                        "prepare terminal, locks released, row stays requested"
                    );
                }
                MonitoredTxStatus::Reorg => {
                    self.monitored.set_status(&m.tx_id, MonitoredTxStatus::Reorg)?;
                    warn!(
                        target: "bridge::manager",
                        tx_id = %hex::encode(m.tx_id),
                        "reorg detected, operator intervention required"
                    );
                }
                MonitoredTxStatus::Pending => {
                    if m.found_at.is_none() {
                        self.monitored
                            .set_found(&m.tx_id, Some(latest), MonitoredTxStatus::Pending)?;
                    }
                    self.check_monitor_timeout(&m, latest)?;
                }
                MonitoredTxStatus::Limbo => {
                    self.check_monitor_timeout(&m, latest)?;
                }
                MonitoredTxStatus::Timeout => {}
            }
        }

        Ok(())
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    /// Time out a submission the chain has not settled in time
    ///
    /// The reference loses its active row, so the next tick re-submits.
    fn check_monitor_timeout(&self, m: &MonitoredTx, latest: u64) -> Result<(), ManagerError> {
        let Some(sent_at) = m.sent_at else {
            return Ok(());
        };
        if latest.saturating_sub(sent_at) > self.config.monitor_timeout_blocks {
            self.monitored.set_status(&m.tx_id, MonitoredTxStatus::Timeout)?;
            warn!(
                target: "bridge::manager",
                tx_id = %hex::encode(m.tx_id),
                sent_at,
                latest,
                "submission timed out, will re-submit"
            );
        }
        Ok(())
    }

    async fn release_outpoints(&self, outpoints: &[Outpoint]) {
        for op in outpoints {
            if let Err(e) = self.vault.release_by_command(&op.txid, op.vout).await {
                warn!(
                    target: "bridge::manager",
                    outpoint = %op,
                    error = %e,
                    "failed to release lock"
                );
            }
        }
    }

    /// Fan a single request out to the signer and wait for its reply
    async fn request_signature(
        &self,
        request: SignatureRequest,
    ) -> Result<SignatureRequest, ManagerError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        let signer = self.signer.clone();
        let handle_request = request.clone();
        tokio::spawn(async move {
            if let Err(e) = signer.sign_async(handle_request, reply_tx).await {
                warn!(target: "bridge::manager", error = %e, "signing failed");
            }
        });

        match timeout(self.config.sign_timeout, reply_rx.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(ManagerError::Signer(SignerError::ReplyChannelClosed)),
            Err(_) => Err(ManagerError::SignTimeout),
        }
    }

    fn note_attempt(&self, ref_id: &B256) -> u32 {
        let mut attempts = self.attempts.lock().expect("attempts lock");
        let counter = attempts.entry(*ref_id).or_insert(0);
        *counter += 1;
        *counter
    }
}
