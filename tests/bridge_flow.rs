//! End-to-end bridge flows against in-process ledgers
//!
//! Starts the full runtime (synchronizers, state loop, manager loops,
//! housekeeper, reporter) and drives deposits and redeems through the
//! in-memory chain stand-ins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use twbtc_bridge::adapters::{MemoryBtcLedger, MemoryLedger};
use twbtc_bridge::common::config::{Network, SigningMode};
use twbtc_bridge::runtime::{self, BridgeHandle};
use twbtc_bridge::signer::LocalSigner;
use twbtc_bridge::types::{BtcDepositEvent, MintedEvent, RedeemPreparedEvent, RedeemRequestedEvent};
use twbtc_bridge::wire::DepositPayload;
use twbtc_bridge::{BridgeConfig, MintStatus, MonitoredTxStatus, Outpoint, RedeemStatus};

const CHAIN_ID: u32 = 1337;
const RECEIVER_BTC: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_db() -> String {
    let n = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir()
        .join(format!("bridge-flow-{}-{}.db", std::process::id(), n))
        .to_string_lossy()
        .into_owned()
}

fn test_config() -> BridgeConfig {
    BridgeConfig {
        network: Network::Devnet,
        db_path: temp_db(),
        chain_id: CHAIN_ID,
        mirror_start_block: 0,
        btc_start_block: 0,
        mirror_poll_ms: 100,
        btc_poll_ms: 100,
        btc_api: String::new(),
        vault_address: None,
        btc_confirmations: 1,
        redeem_fee_sats: 10,
        monitor_timeout_blocks: 20,
        manager_tick_secs: 1,
        vault_sweep_secs: 3600,
        signing: SigningMode::Local { key: String::new() },
        reporter_port: 0,
        log_level: "info".to_string(),
        log_json: false,
    }
}

struct Chains {
    mirror: Arc<MemoryLedger>,
    btc: Arc<MemoryBtcLedger>,
}

async fn start_bridge(config: &BridgeConfig) -> (BridgeHandle, Chains) {
    let mirror = Arc::new(MemoryLedger::new());
    let btc = Arc::new(MemoryBtcLedger::new());

    let handle = runtime::start(
        config,
        mirror.clone(),
        btc.clone(),
        Arc::new(LocalSigner::generate()),
    )
    .await
    .expect("bridge start");

    (handle, Chains { mirror, btc })
}

/// Poll until `check` passes or a generous deadline expires
async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn mirror_receiver() -> Address {
    "0xdab1330000000000000000000000000000003940".parse().unwrap()
}

fn p2tr_script() -> Vec<u8> {
    let mut script = vec![0x51, 0x20];
    script.extend_from_slice(&[0xcc; 32]);
    script
}

fn vault_deposit(byte: u8, amount: u64, block: u64, payload: Option<DepositPayload>) -> BtcDepositEvent {
    BtcDepositEvent {
        txid: B256::repeat_byte(byte),
        vout: 0,
        amount,
        block_number: block,
        block_hash: B256::repeat_byte(0xb0),
        pk_script: p2tr_script(),
        op_return_script: payload.map(|p| p.to_script().unwrap()),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_mint() {
    let config = test_config();
    let (handle, chains) = start_bridge(&config).await;
    let store = handle.state_store();

    // deposit carrying an OP_RETURN payload targeting this chain
    let deposit_txid = B256::repeat_byte(0xaa);
    chains.btc.push_deposit(vault_deposit(
        0xaa,
        100_000_000,
        1,
        Some(DepositPayload::new(CHAIN_ID, mirror_receiver())),
    ));
    chains.btc.advance_to(2);

    wait_for("mint row", || {
        matches!(store.get_mint(&deposit_txid), Ok(Some(_)))
    })
    .await;

    // the manager submits, the demo chain confirms and emits Minted
    wait_for("mint completed", || {
        matches!(
            store.get_mint(&deposit_txid),
            Ok(Some(mint)) if mint.status == MintStatus::Completed
        )
    })
    .await;

    let mint = store.get_mint(&deposit_txid).unwrap().unwrap();
    assert_eq!(mint.receiver, mirror_receiver());
    assert_eq!(mint.amount, 100_000_000);
    assert!(mint.mint_tx_hash.is_some());

    // the deposit is custodied
    assert_eq!(handle.vault().sum_money().unwrap(), 100_000_000);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_minted_event_is_ignored() {
    let config = test_config();
    let (handle, chains) = start_bridge(&config).await;
    let store = handle.state_store();

    let ev = MintedEvent {
        btc_txid: B256::repeat_byte(0xaa),
        mint_tx_hash: B256::repeat_byte(0x11),
        receiver: mirror_receiver(),
        amount: 100_000_000,
    };
    chains.mirror.push_minted(1, ev.clone());
    chains.mirror.push_minted(2, ev);
    chains.mirror.advance_to(3);

    wait_for("completed mint", || {
        matches!(
            store.get_mint(&B256::repeat_byte(0xaa)),
            Ok(Some(mint)) if mint.status == MintStatus::Completed
        )
    })
    .await;

    let mint = store.get_mint(&B256::repeat_byte(0xaa)).unwrap().unwrap();
    assert_eq!(mint.mint_tx_hash, Some(B256::repeat_byte(0x11)));

    // the loop survived the duplicate
    assert!(!handle.state_loop_finished());
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_receiver_redeem_then_prepare_is_fatal() {
    let config = test_config();
    let (handle, chains) = start_bridge(&config).await;
    let store = handle.state_store();

    let request = B256::repeat_byte(0xee);
    chains.mirror.push_redeem_requested(
        1,
        RedeemRequestedEvent {
            request_tx_hash: request,
            requester: Address::repeat_byte(0x02),
            receiver: "abcd".to_string(),
            amount: 50,
            is_valid_receiver: false,
        },
    );
    chains.mirror.advance_to(1);

    wait_for("invalid redeem row", || {
        matches!(
            store.get_redeem(&request),
            Ok(Some(redeem)) if redeem.status == RedeemStatus::Invalid
        )
    })
    .await;

    // a prepare for the invalid redeem is a malformed stream: fatal
    chains.mirror.push_redeem_prepared(
        2,
        RedeemPreparedEvent {
            request_tx_hash: request,
            prepare_tx_hash: B256::repeat_byte(0x12),
            requester: Address::repeat_byte(0x02),
            receiver: "abcd".to_string(),
            amount: 50,
            outpoints: vec![Outpoint::new(B256::repeat_byte(0x0a), 0)],
        },
    );
    chains.mirror.advance_to(2);

    wait_for("state loop termination", || handle.state_loop_finished()).await;

    let err = handle.shutdown().await.unwrap_err();
    assert!(err.to_string().contains("update invalid redeem"));
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_redeem() {
    let config = test_config();
    let (handle, chains) = start_bridge(&config).await;
    let store = handle.state_store();
    let vault = handle.vault();

    // custody-only deposits seed the vault: [100, 150, 50, 200, 300]
    for (byte, amount, block) in [
        (0x01u8, 100u64, 1u64),
        (0x02, 150, 1),
        (0x03, 50, 2),
        (0x04, 200, 2),
        (0x05, 300, 2),
    ] {
        chains.btc.push_deposit(vault_deposit(byte, amount, block, None));
    }
    chains.btc.advance_to(3);

    wait_for("vault funded", || vault.sum_money().unwrap_or(0) == 800).await;

    let request = B256::repeat_byte(0xee);
    chains.mirror.push_redeem_requested(
        1,
        RedeemRequestedEvent {
            request_tx_hash: request,
            requester: Address::repeat_byte(0x02),
            receiver: RECEIVER_BTC.to_string(),
            amount: 240,
            is_valid_receiver: true,
        },
    );
    chains.mirror.advance_to(1);

    wait_for("redeem completed", || {
        matches!(
            store.get_redeem(&request),
            Ok(Some(redeem)) if redeem.status == RedeemStatus::Completed
        )
    })
    .await;

    let redeem = store.get_redeem(&request).unwrap().unwrap();
    assert!(redeem.prepare_tx_hash.is_some());
    assert!(redeem.btc_txid.is_some());
    assert!(!redeem.outpoints.is_empty());

    // every committed input is spent, never reusable
    for op in &redeem.outpoints {
        let utxo = vault.get_utxo(&op.txid, op.vout).unwrap().unwrap();
        assert!(utxo.spent);
        assert!(!utxo.lockup);
    }

    // the payout really went out on the BTC side
    assert_eq!(chains.btc.broadcasts().len(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn reverted_prepare_releases_locks_and_retries() {
    let config = test_config();
    let (handle, chains) = start_bridge(&config).await;
    let store = handle.state_store();
    let vault = handle.vault();

    chains.btc.push_deposit(vault_deposit(0x05, 300, 1, None));
    chains.btc.advance_to(2);
    wait_for("vault funded", || vault.sum_money().unwrap_or(0) == 300).await;

    // first prepare submission reverts on the mirror chain
    chains.mirror.fail_next_prepare();

    let request = B256::repeat_byte(0xee);
    chains.mirror.push_redeem_requested(
        1,
        RedeemRequestedEvent {
            request_tx_hash: request,
            requester: Address::repeat_byte(0x02),
            receiver: RECEIVER_BTC.to_string(),
            amount: 240,
            is_valid_receiver: true,
        },
    );
    chains.mirror.advance_to(1);

    // the retry succeeds end to end
    wait_for("redeem completed after retry", || {
        matches!(
            store.get_redeem(&request),
            Ok(Some(redeem)) if redeem.status == RedeemStatus::Completed
        )
    })
    .await;

    // the first submission is on record as reverted, and its reference
    // points back at the redeem
    let reverted = handle
        .monitored()
        .by_status(MonitoredTxStatus::Reverted)
        .unwrap();
    assert_eq!(reverted.len(), 1);
    assert_eq!(reverted[0].ref_id, request);

    // the committed input ended up spent by the successful retry
    assert!(vault
        .get_utxo(&B256::repeat_byte(0x05), 0)
        .unwrap()
        .unwrap()
        .spent);

    handle.shutdown().await.unwrap();
}
