//! BTC Vault
//!
//! Custodies unspent outputs and supplies the chain-tx manager with inputs
//! for redeems. Selection and every lock transition run under one exclusive
//! mutex plus a SQL transaction, so no two callers ever hold overlapping
//! sets of locked UTXOs.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy_primitives::B256;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::types::VaultUtxo;

/// Seconds a selection stays locked before the housekeeper may reclaim it
pub const LOCK_TIMEOUT_SECS: u64 = 1800;

/// Vault errors
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("not enough spendable funds: need more than {required}, have {available}")]
    NotEnough { required: u64, available: u64 },

    #[error("duplicate utxo: {0}")]
    Duplicate(String),

    #[error("utxo not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl VaultError {
    /// NotEnough defers to the next tick; db trouble retries likewise
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::NotEnough { .. } | VaultError::Database(_) | VaultError::Connection(_)
        )
    }
}

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// SQLite-backed UTXO vault
pub struct Vault {
    pool: Pool<SqliteConnectionManager>,
    /// Serializes lock transitions; `choose_and_lock` is the only writer
    /// that flips lockup false→true.
    lock: Mutex<()>,
}

impl Vault {
    /// Create a vault backed by the given database file
    pub fn new<P: AsRef<Path>>(db_path: P) -> VaultResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| VaultError::Connection(e.to_string()))?;

        let vault = Self {
            pool,
            lock: Mutex::new(()),
        };
        vault.run_migrations()?;
        Ok(vault)
    }

    /// Create an in-memory vault (for testing)
    pub fn in_memory() -> VaultResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| VaultError::Connection(e.to_string()))?;

        let vault = Self {
            pool,
            lock: Mutex::new(()),
        };
        vault.run_migrations()?;
        Ok(vault)
    }

    fn conn(&self) -> VaultResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| VaultError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> VaultResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vault_utxo (
                txid TEXT NOT NULL,
                vout INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_hash TEXT NOT NULL,
                amount INTEGER NOT NULL,
                pk_script BLOB NOT NULL,
                lockup INTEGER NOT NULL DEFAULT 0,
                spent INTEGER NOT NULL DEFAULT 0,
                timeout INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (txid, vout)
            );

            CREATE INDEX IF NOT EXISTS idx_vault_spendable ON vault_utxo(lockup, spent);
            "#,
        )
        .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(())
    }

    /// Register a custodied output
    ///
    /// Errors with `Duplicate` when (txid, vout) already exists.
    pub fn add_utxo(&self, utxo: &VaultUtxo) -> VaultResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO vault_utxo (
                txid, vout, block_number, block_hash, amount, pk_script,
                lockup, spent, timeout
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, 0)
            "#,
            params![
                hex::encode(utxo.txid),
                utxo.vout,
                utxo.block_number as i64,
                hex::encode(utxo.block_hash),
                utxo.amount as i64,
                utxo.pk_script,
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return VaultError::Duplicate(format!("{}:{}", hex::encode(utxo.txid), utxo.vout));
                }
            }
            VaultError::Database(e.to_string())
        })?;

        debug!(
            target: "bridge::vault",
            txid = %hex::encode(utxo.txid),
            vout = utxo.vout,
            amount = utxo.amount,
            "utxo added"
        );
        Ok(())
    }

    /// Select and lock enough outputs to cover `target`
    ///
    /// Picks the minimum-count prefix of spendable outputs in
    /// descending-amount order whose cumulative amount strictly exceeds the
    /// target, and marks each selected row locked with a fresh timeout. All
    /// selections and lock updates commit together or not at all.
    pub async fn choose_and_lock(&self, target: u64) -> VaultResult<Vec<VaultUtxo>> {
        let _guard = self.lock.lock().await;

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| VaultError::Database(e.to_string()))?;

        let candidates = {
            let mut stmt = tx
                .prepare(
                    r#"
                    SELECT * FROM vault_utxo
                    WHERE lockup = 0 AND spent = 0
                    ORDER BY amount DESC, txid ASC, vout ASC
                    "#,
                )
                .map_err(|e| VaultError::Database(e.to_string()))?;

            let rows = stmt
                .query_map([], row_to_utxo)
                .map_err(|e| VaultError::Database(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| VaultError::Database(e.to_string()))?;
            rows
        };

        let mut selected = Vec::new();
        let mut sum: u64 = 0;
        for utxo in candidates {
            sum += utxo.amount;
            selected.push(utxo);
            if sum > target {
                break;
            }
        }

        if sum <= target {
            return Err(VaultError::NotEnough {
                required: target,
                available: sum,
            });
        }

        let timeout = now_unix() + LOCK_TIMEOUT_SECS;
        for utxo in &selected {
            tx.execute(
                "UPDATE vault_utxo SET lockup = 1, timeout = ?3 WHERE txid = ?1 AND vout = ?2",
                params![hex::encode(utxo.txid), utxo.vout, timeout as i64],
            )
            .map_err(|e| VaultError::Database(e.to_string()))?;
        }

        tx.commit().map_err(|e| VaultError::Database(e.to_string()))?;

        for utxo in &mut selected {
            utxo.lockup = true;
            utxo.timeout = timeout;
        }

        info!(
            target: "bridge::vault",
            target_sats = target,
            selected = selected.len(),
            locked_sats = sum,
            "utxos locked"
        );
        Ok(selected)
    }

    /// Unlock every lock whose timeout has passed; returns the count
    pub async fn release_expired(&self) -> VaultResult<usize> {
        self.release_expired_at(now_unix()).await
    }

    /// Unlock every lock whose timeout is before `now`
    pub async fn release_expired_at(&self, now: u64) -> VaultResult<usize> {
        let _guard = self.lock.lock().await;
        let conn = self.conn()?;

        let released = conn
            .execute(
                "UPDATE vault_utxo SET lockup = 0, timeout = 0 WHERE lockup = 1 AND timeout < ?1",
                params![now as i64],
            )
            .map_err(|e| VaultError::Database(e.to_string()))?;

        if released > 0 {
            warn!(target: "bridge::vault", released, "expired locks released");
        }
        Ok(released)
    }

    /// Unconditionally unlock one output
    pub async fn release_by_command(&self, txid: &B256, vout: u32) -> VaultResult<()> {
        let _guard = self.lock.lock().await;
        let conn = self.conn()?;

        let updated = conn
            .execute(
                "UPDATE vault_utxo SET lockup = 0, timeout = 0 WHERE txid = ?1 AND vout = ?2",
                params![hex::encode(txid), vout],
            )
            .map_err(|e| VaultError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(VaultError::NotFound(format!("{}:{}", hex::encode(txid), vout)));
        }
        Ok(())
    }

    /// Mark one output as spent; it is never selected again
    pub async fn mark_spent(&self, txid: &B256, vout: u32) -> VaultResult<()> {
        let _guard = self.lock.lock().await;
        let conn = self.conn()?;

        let updated = conn
            .execute(
                "UPDATE vault_utxo SET spent = 1, lockup = 0, timeout = 0 WHERE txid = ?1 AND vout = ?2",
                params![hex::encode(txid), vout],
            )
            .map_err(|e| VaultError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(VaultError::NotFound(format!("{}:{}", hex::encode(txid), vout)));
        }
        Ok(())
    }

    /// Sum of spendable (unlocked, unspent) amounts
    pub fn sum_money(&self) -> VaultResult<u64> {
        let conn = self.conn()?;

        let total: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM vault_utxo WHERE lockup = 0 AND spent = 0",
                [],
                |row| row.get(0),
            )
            .map_err(|e| VaultError::Database(e.to_string()))?;

        Ok(total as u64)
    }

    /// Look up one output by reference
    pub fn get_utxo(&self, txid: &B256, vout: u32) -> VaultResult<Option<VaultUtxo>> {
        use rusqlite::OptionalExtension;
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM vault_utxo WHERE txid = ?1 AND vout = ?2",
            params![hex::encode(txid), vout],
            row_to_utxo,
        )
        .optional()
        .map_err(|e| VaultError::Database(e.to_string()))
    }
}

/// Periodic lock-expiry sweep
pub async fn run_housekeeper(vault: Arc<Vault>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!(target: "bridge::vault", "housekeeper stopping");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = vault.release_expired().await {
                    warn!(target: "bridge::vault", error = %e, "lock-expiry sweep failed");
                }
            }
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn row_to_utxo(row: &rusqlite::Row) -> rusqlite::Result<VaultUtxo> {
    let txid: String = row.get("txid")?;
    let block_hash: String = row.get("block_hash")?;

    Ok(VaultUtxo {
        txid: parse_hash(&txid)?,
        vout: row.get("vout")?,
        block_number: row.get::<_, i64>("block_number")? as u64,
        block_hash: parse_hash(&block_hash)?,
        amount: row.get::<_, i64>("amount")? as u64,
        pk_script: row.get("pk_script")?,
        lockup: row.get::<_, i64>("lockup")? != 0,
        spent: row.get::<_, i64>("spent")? != 0,
        timeout: row.get::<_, i64>("timeout")? as u64,
    })
}

fn parse_hash(s: &str) -> rusqlite::Result<B256> {
    let bytes = hex::decode(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })?;
    if bytes.len() != 32 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("expected 32 bytes, got {}", bytes.len()).into(),
        ));
    }
    Ok(B256::from_slice(&bytes))
}
