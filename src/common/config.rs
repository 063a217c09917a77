//! Environment-based Configuration for the Bridge Daemon
//!
//! All sensitive values (signing keys) MUST come from environment variables,
//! never from hardcoded values.
//!
//! # Environment Variables
//!
//! ## Network Configuration
//! - `BRIDGE_NETWORK` - "mainnet", "testnet", or "devnet" (default: "devnet")
//! - `BRIDGE_DB_PATH` - SQLite database path (default: "bridge.db")
//! - `BRIDGE_CHAIN_ID` - Mirror-chain id this process serves (devnet default: 1337)
//!
//! ## Synchronizer Configuration
//! - `BRIDGE_MIRROR_START_BLOCK` - first Mirror-chain block to scan on first run
//! - `BRIDGE_BTC_START_BLOCK` - first BTC block to scan on first run
//! - `BRIDGE_MIRROR_POLL_MS` - Mirror poll interval in milliseconds (floor 100)
//! - `BRIDGE_BTC_POLL_MS` - BTC poll interval in milliseconds (floor 100)
//!
//! ## Manager Configuration
//! - `BRIDGE_REDEEM_FEE_SATS` - flat BTC fee reserved per redeem (default: 1000)
//! - `BRIDGE_MONITOR_TIMEOUT_BLOCKS` - ledger distance before an in-flight tx
//!   is considered timed out and re-submitted (default: 20)
//!
//! ## Signing Configuration
//! - `BRIDGE_SIGNING_MODE` - "local" (POC) or "remote" (threshold signer)
//! - `BRIDGE_SIGNER_KEY` - hex-encoded private key (local mode only)
//! - `BRIDGE_SIGNER_URL` - base URL of the threshold signer (remote mode)
//!
//! ## Optional Settings
//! - `BRIDGE_REPORTER_PORT` - HTTP status reporter port (default: 3030)
//! - `BRIDGE_LOG_LEVEL` - logging level (debug, info, warn, error)
//! - `BRIDGE_LOG_JSON` - set to "1" for JSON log output

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Floor for synchronizer poll intervals
pub const POLL_FLOOR_MS: u64 = 100;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("signing configuration incomplete: {0}")]
    SigningIncomplete(String),
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "devnet" | "dev" => Ok(Network::Devnet),
            _ => Err(ConfigError::InvalidValue(
                "BRIDGE_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Get bitcoin network enum
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet | Network::Devnet => bitcoin::Network::Testnet,
        }
    }

    /// Get default Esplora API for this network
    pub fn default_btc_api(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://blockstream.info/api",
            Network::Testnet | Network::Devnet => "https://blockstream.info/testnet/api",
        }
    }
}

/// Signing mode configuration
#[derive(Debug, Clone)]
pub enum SigningMode {
    /// Single key signing (POC only, not for production)
    Local {
        /// Hex-encoded private key
        key: String,
    },
    /// Remote threshold signer
    Remote {
        /// Base URL of the signer service
        url: String,
    },
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Network environment
    pub network: Network,

    /// SQLite database path
    pub db_path: String,

    /// Mirror-chain id this bridge process serves
    pub chain_id: u32,

    /// First Mirror-chain ledger number scanned on first run
    pub mirror_start_block: u64,

    /// First BTC block scanned on first run
    pub btc_start_block: u64,

    /// Mirror synchronizer poll interval (ms)
    pub mirror_poll_ms: u64,

    /// BTC synchronizer poll interval (ms)
    pub btc_poll_ms: u64,

    /// Esplora API endpoint for the BTC adapter
    pub btc_api: String,

    /// Vault address watched for deposits; demo BTC ledger when unset
    pub vault_address: Option<String>,

    /// Confirmation depth before a BTC block counts as finalized
    pub btc_confirmations: u64,

    /// Flat fee reserved per redeem transaction (satoshi)
    pub redeem_fee_sats: u64,

    /// Ledger distance before an in-flight tx is timed out
    pub monitor_timeout_blocks: u64,

    /// Manager work-loop tick interval (seconds)
    pub manager_tick_secs: u64,

    /// Vault lock-expiry sweep interval (seconds)
    pub vault_sweep_secs: u64,

    /// Signing configuration
    pub signing: SigningMode,

    /// HTTP status reporter port
    pub reporter_port: u16,

    /// Log level
    pub log_level: String,

    /// JSON log output
    pub log_json: bool,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let network: Network = env::var("BRIDGE_NETWORK")
            .unwrap_or_else(|_| "devnet".to_string())
            .parse()?;

        let db_path = env::var("BRIDGE_DB_PATH").unwrap_or_else(|_| "bridge.db".to_string());

        let chain_id = match env::var("BRIDGE_CHAIN_ID") {
            Ok(v) => v.parse().map_err(|_| {
                ConfigError::InvalidValue("BRIDGE_CHAIN_ID".to_string(), v.clone())
            })?,
            Err(_) if network == Network::Devnet => 1337,
            Err(_) => return Err(ConfigError::MissingEnvVar("BRIDGE_CHAIN_ID".to_string())),
        };

        let mirror_start_block = parse_env_u64("BRIDGE_MIRROR_START_BLOCK", 0)?;
        let btc_start_block = parse_env_u64("BRIDGE_BTC_START_BLOCK", 0)?;

        let mirror_poll_ms = parse_env_u64("BRIDGE_MIRROR_POLL_MS", 2_000)?.max(POLL_FLOOR_MS);
        let btc_poll_ms = parse_env_u64("BRIDGE_BTC_POLL_MS", 10_000)?.max(POLL_FLOOR_MS);

        let btc_api =
            env::var("BRIDGE_BTC_API").unwrap_or_else(|_| network.default_btc_api().to_string());
        let vault_address = env::var("BRIDGE_VAULT_ADDRESS").ok();
        let btc_confirmations = parse_env_u64("BRIDGE_BTC_CONFIRMATIONS", 6)?;

        let redeem_fee_sats = parse_env_u64("BRIDGE_REDEEM_FEE_SATS", 1_000)?;
        let monitor_timeout_blocks = parse_env_u64("BRIDGE_MONITOR_TIMEOUT_BLOCKS", 20)?;
        let manager_tick_secs = parse_env_u64("BRIDGE_MANAGER_TICK_SECS", 10)?;
        let vault_sweep_secs = parse_env_u64("BRIDGE_VAULT_SWEEP_SECS", 60)?;

        let signing = load_signing_config(network)?;

        let reporter_port = env::var("BRIDGE_REPORTER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3030);

        let log_level = env::var("BRIDGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = env::var("BRIDGE_LOG_JSON").map(|v| v == "1").unwrap_or(false);

        Ok(Self {
            network,
            db_path,
            chain_id,
            mirror_start_block,
            btc_start_block,
            mirror_poll_ms,
            btc_poll_ms,
            btc_api,
            vault_address,
            btc_confirmations,
            redeem_fee_sats,
            monitor_timeout_blocks,
            manager_tick_secs,
            vault_sweep_secs,
            signing,
            reporter_port,
            log_level,
            log_json,
        })
    }

    /// Print configuration summary (hiding sensitive values)
    pub fn print_summary(&self) {
        println!("=== Bridge Configuration ===");
        println!("Network: {:?}", self.network);
        println!("Database: {}", self.db_path);
        println!("Chain ID: {}", self.chain_id);
        println!(
            "Mirror scan: from block {} every {} ms",
            self.mirror_start_block, self.mirror_poll_ms
        );
        println!(
            "BTC scan: from block {} every {} ms",
            self.btc_start_block, self.btc_poll_ms
        );
        println!("BTC API: {}", self.btc_api);
        match &self.vault_address {
            Some(addr) => println!("Vault Address: {}", addr),
            None => println!("Vault Address: (unset, demo BTC ledger)"),
        }
        println!("Redeem fee: {} sats", self.redeem_fee_sats);
        println!(
            "Signing Mode: {}",
            match &self.signing {
                SigningMode::Local { .. } => "Local Key (POC)".to_string(),
                SigningMode::Remote { url } => format!("Remote ({})", url),
            }
        );
        println!("Reporter Port: {}", self.reporter_port);
        println!("Log Level: {}", self.log_level);
        println!("============================");
    }
}

fn parse_env_u64(var_name: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var_name) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidValue(var_name.to_string(), v.clone())),
        Err(_) => Ok(default),
    }
}

/// Load signing configuration from environment
fn load_signing_config(network: Network) -> Result<SigningMode, ConfigError> {
    let mode = env::var("BRIDGE_SIGNING_MODE").unwrap_or_else(|_| {
        if network == Network::Mainnet {
            "remote".to_string()
        } else {
            "local".to_string()
        }
    });

    match mode.to_lowercase().as_str() {
        "local" => {
            let key = env::var("BRIDGE_SIGNER_KEY").unwrap_or_default();
            if key.is_empty() && network != Network::Devnet {
                return Err(ConfigError::MissingEnvVar("BRIDGE_SIGNER_KEY".to_string()));
            }
            Ok(SigningMode::Local { key })
        }
        "remote" => {
            let url = env::var("BRIDGE_SIGNER_URL").map_err(|_| {
                ConfigError::SigningIncomplete("BRIDGE_SIGNER_URL required".to_string())
            })?;
            Ok(SigningMode::Remote { url })
        }
        _ => Err(ConfigError::InvalidValue(
            "BRIDGE_SIGNING_MODE".to_string(),
            format!("unknown mode: {} (use 'local' or 'remote')", mode),
        )),
    }
}
