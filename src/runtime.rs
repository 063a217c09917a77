//! Bridge Runtime
//!
//! Wires the five core components together and owns their lifecycles:
//! state loop, both synchronizers, both manager loops, the vault
//! housekeeper, and the status reporter. Shutdown is broadcast over one
//! watch channel and drained leaves-first: synchronizers stop feeding,
//! manager loops finish their tick, then the state loop and reporter exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::common::{BridgeConfig, BridgeError};
use crate::ledger::{BtcLedgerAdapter, LedgerAdapter};
use crate::manager::{ChainTxManager, ManagerConfig, MonitoredTxStore};
use crate::reporter;
use crate::signer::SignerClient;
use crate::state::{intake_channels, BridgeState, StateError, StateStore};
use crate::sync::{BtcSynchronizer, ChainSynchronizer};
use crate::vault::{run_housekeeper, Vault};

/// Handles to a running bridge
pub struct BridgeHandle {
    shutdown: watch::Sender<bool>,
    state_store: Arc<StateStore>,
    vault: Arc<Vault>,
    monitored: Arc<MonitoredTxStore>,
    mirror_sync: JoinHandle<()>,
    btc_sync: JoinHandle<()>,
    mint_loop: JoinHandle<()>,
    redeem_loop: JoinHandle<()>,
    housekeeper: JoinHandle<()>,
    reporter: JoinHandle<Result<(), std::io::Error>>,
    state_loop: JoinHandle<Result<(), StateError>>,
}

impl BridgeHandle {
    pub fn state_store(&self) -> Arc<StateStore> {
        self.state_store.clone()
    }

    pub fn vault(&self) -> Arc<Vault> {
        self.vault.clone()
    }

    pub fn monitored(&self) -> Arc<MonitoredTxStore> {
        self.monitored.clone()
    }

    /// Whether the state loop has died (fatal event or store trouble)
    pub fn state_loop_finished(&self) -> bool {
        self.state_loop.is_finished()
    }

    /// Stop every task, leaves first, and surface the state loop's verdict
    pub async fn shutdown(self) -> Result<(), BridgeError> {
        info!(target: "bridge::runtime", "shutting down");
        let _ = self.shutdown.send(true);

        // feeders first so the state loop drains cleanly
        let _ = self.mirror_sync.await;
        let _ = self.btc_sync.await;
        let _ = self.mint_loop.await;
        let _ = self.redeem_loop.await;
        let _ = self.housekeeper.await;

        let state_result = match self.state_loop.await {
            Ok(result) => result.map_err(BridgeError::from),
            Err(e) => {
                warn!(target: "bridge::runtime", error = %e, "state loop panicked");
                Ok(())
            }
        };

        if let Ok(Err(e)) = self.reporter.await {
            warn!(target: "bridge::runtime", error = %e, "reporter exited with error");
        }

        info!(target: "bridge::runtime", "shutdown complete");
        state_result
    }
}

/// Open the stores, pin the chain id, and start every bridge task
pub async fn start<L, B>(
    config: &BridgeConfig,
    mirror: Arc<L>,
    btc: Arc<B>,
    signer: Arc<dyn SignerClient>,
) -> Result<BridgeHandle, BridgeError>
where
    L: LedgerAdapter + 'static,
    B: BtcLedgerAdapter + 'static,
{
    let state_store = Arc::new(StateStore::new(&config.db_path)?);
    state_store.ensure_chain_id(config.chain_id)?;

    let vault = Arc::new(Vault::new(&config.db_path)?);
    let monitored = Arc::new(MonitoredTxStore::new(&config.db_path)?);

    let (sender, intake) = intake_channels();
    let mint_work = Arc::new(Notify::new());
    let redeem_work = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = BridgeState::new(
        state_store.clone(),
        intake,
        mint_work.clone(),
        redeem_work.clone(),
    );
    let state_loop = tokio::spawn(state.run(shutdown_rx.clone()));

    let mirror_sync = ChainSynchronizer::new(
        mirror.clone(),
        state_store.clone(),
        sender.clone(),
        Duration::from_millis(config.mirror_poll_ms),
        config.mirror_start_block,
    );
    let mirror_sync = tokio::spawn(mirror_sync.run(shutdown_rx.clone()));

    let btc_sync = BtcSynchronizer::new(
        btc.clone(),
        state_store.clone(),
        vault.clone(),
        sender,
        Duration::from_millis(config.btc_poll_ms),
        config.btc_start_block,
        config.chain_id,
    );
    let btc_sync = tokio::spawn(btc_sync.run(shutdown_rx.clone()));

    let manager = Arc::new(ChainTxManager::new(
        state_store.clone(),
        vault.clone(),
        mirror,
        btc,
        signer,
        monitored.clone(),
        ManagerConfig {
            tick_interval: Duration::from_secs(config.manager_tick_secs),
            monitor_timeout_blocks: config.monitor_timeout_blocks,
            redeem_fee_sats: config.redeem_fee_sats,
            sign_timeout: Duration::from_secs(30),
            network: config.network.bitcoin_network(),
        },
        mint_work,
        redeem_work,
    ));
    let mint_loop = tokio::spawn(manager.clone().run_mint_loop(shutdown_rx.clone()));
    let redeem_loop = tokio::spawn(manager.run_redeem_loop(shutdown_rx.clone()));

    let housekeeper = tokio::spawn(run_housekeeper(
        vault.clone(),
        Duration::from_secs(config.vault_sweep_secs),
        shutdown_rx.clone(),
    ));

    let reporter = tokio::spawn(reporter::start_server(
        state_store.clone(),
        config.reporter_port,
        shutdown_rx,
    ));

    info!(
        target: "bridge::runtime",
        chain_id = config.chain_id,
        db = %config.db_path,
        "bridge started"
    );

    Ok(BridgeHandle {
        shutdown: shutdown_tx,
        state_store,
        vault,
        monitored,
        mirror_sync,
        btc_sync,
        mint_loop,
        redeem_loop,
        housekeeper,
        reporter,
        state_loop,
    })
}
