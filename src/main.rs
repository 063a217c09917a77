//! TWBTC Bridge Daemon
//!
//! Run modes:
//!   bridge run       - start the bridge (synchronizers, state, manager, reporter)
//!   bridge genkey    - generate a local signer key
//!   bridge balance   - print the vault's spendable balance

use std::env;
use std::process::exit;
use std::sync::Arc;

use twbtc_bridge::adapters::{EsploraBtcAdapter, MemoryBtcLedger, MemoryLedger};
use twbtc_bridge::common::{init_from_config, BridgeConfig, Network, SigningMode};
use twbtc_bridge::signer::{LocalSigner, RemoteSigner, SignerClient};
use twbtc_bridge::vault::Vault;
use twbtc_bridge::{runtime, units};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "run" => run_bridge().await,
        "genkey" => run_genkey().await,
        "balance" => run_balance(),
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("unknown command: {}", other);
            print_usage();
            exit(1);
        }
    }
}

fn print_usage() {
    println!("TWBTC Bridge Daemon");
    println!();
    println!("Usage:");
    println!("  bridge run       Start the bridge daemon");
    println!("  bridge genkey    Generate a local signer key");
    println!("  bridge balance   Print the vault's spendable balance");
    println!();
    println!("Configuration is environment-driven (BRIDGE_* variables);");
    println!("see the crate documentation for the full list.");
}

fn load_config() -> BridgeConfig {
    match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    }
}

fn build_signer(config: &BridgeConfig) -> Arc<dyn SignerClient> {
    match &config.signing {
        SigningMode::Local { key } => {
            let signer = if key.is_empty() {
                eprintln!("WARNING: no BRIDGE_SIGNER_KEY set, using a fresh throwaway key");
                LocalSigner::generate()
            } else {
                match LocalSigner::from_hex(key) {
                    Ok(signer) => signer,
                    Err(e) => {
                        eprintln!("Error: invalid BRIDGE_SIGNER_KEY: {}", e);
                        exit(1);
                    }
                }
            };
            Arc::new(signer)
        }
        SigningMode::Remote { url } => match RemoteSigner::new(url) {
            Ok(signer) => Arc::new(signer),
            Err(e) => {
                eprintln!("Error: signer client: {}", e);
                exit(1);
            }
        },
    }
}

async fn run_bridge() {
    let config = load_config();

    if let Err(e) = init_from_config(&config) {
        eprintln!("Error: {}", e);
        exit(1);
    }
    config.print_summary();

    let signer = build_signer(&config);

    // The Mirror-Chain RPC adapter is deployment glue outside this crate;
    // the shipped binary runs against the in-process demo ledger.
    if config.network != Network::Devnet {
        eprintln!("Error: only devnet runs are supported without a deployed mirror adapter");
        exit(1);
    }
    println!("Mirror Chain: in-process demo ledger");
    let mirror = Arc::new(MemoryLedger::new());

    let result = match &config.vault_address {
        Some(addr) => {
            println!("BTC: Esplora at {} watching {}", config.btc_api, addr);
            let btc = Arc::new(EsploraBtcAdapter::new(
                &config.btc_api,
                addr.clone(),
                config.btc_confirmations,
            ));
            start_and_wait(&config, mirror, btc, signer).await
        }
        None => {
            println!("BTC: in-process demo ledger (set BRIDGE_VAULT_ADDRESS for Esplora)");
            let btc = Arc::new(MemoryBtcLedger::new());
            start_and_wait(&config, mirror, btc, signer).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        exit(1);
    }
}

async fn start_and_wait<B>(
    config: &BridgeConfig,
    mirror: Arc<MemoryLedger>,
    btc: Arc<B>,
    signer: Arc<dyn SignerClient>,
) -> Result<(), twbtc_bridge::BridgeError>
where
    B: twbtc_bridge::BtcLedgerAdapter + 'static,
{
    let handle = runtime::start(config, mirror, btc, signer).await?;

    println!();
    println!("Bridge running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await.ok();

    handle.shutdown().await
}

async fn run_genkey() {
    let signer = LocalSigner::generate();
    let pubkey = match signer.group_public_key().await {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };

    println!("Secret key:  {}", signer.secret_hex());
    println!("Public key:  {}", hex::encode(pubkey));
    println!();
    println!("Export the secret as BRIDGE_SIGNER_KEY to use it.");
}

fn run_balance() {
    let config = load_config();

    let vault = match Vault::new(&config.db_path) {
        Ok(vault) => vault,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };

    match vault.sum_money() {
        Ok(sats) => println!("Spendable vault balance: {}", units::format_sats(sats)),
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    }
}
