//! Monitored Transaction Store
//!
//! Persists one row per submitted transaction so in-flight work survives a
//! restart. Nullable ledger numbers are stored as the `-1` sentinel; the
//! sentinel never leaves this module.

use std::path::Path;

use alloy_primitives::B256;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use thiserror::Error;

use crate::types::{ledger_num_from_db, ledger_num_to_db, MonitoredTx, MonitoredTxStatus};

/// Monitored-tx store errors
#[derive(Debug, Error)]
pub enum MonitorStoreError {
    #[error("duplicate monitored tx: {0}")]
    Duplicate(String),

    #[error("monitored tx not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Result type for monitored-tx operations
pub type MonitorResult<T> = Result<T, MonitorStoreError>;

/// SQLite-backed monitored transaction store
pub struct MonitoredTxStore {
    pool: Pool<SqliteConnectionManager>,
}

impl MonitoredTxStore {
    /// Create a store backed by the given database file
    pub fn new<P: AsRef<Path>>(db_path: P) -> MonitorResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| MonitorStoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> MonitorResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| MonitorStoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> MonitorResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| MonitorStoreError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> MonitorResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS monitored_tx (
                tx_id TEXT PRIMARY KEY,
                ref_id TEXT NOT NULL,
                sent_at INTEGER NOT NULL DEFAULT -1,
                found_at INTEGER NOT NULL DEFAULT -1,
                status TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_monitored_ref ON monitored_tx(ref_id);
            CREATE INDEX IF NOT EXISTS idx_monitored_status ON monitored_tx(status);
            "#,
        )
        .map_err(|e| MonitorStoreError::Database(e.to_string()))?;

        Ok(())
    }

    /// Insert a freshly-submitted transaction
    pub fn insert(&self, tx: &MonitoredTx) -> MonitorResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO monitored_tx (tx_id, ref_id, sent_at, found_at, status)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                hex::encode(tx.tx_id),
                hex::encode(tx.ref_id),
                ledger_num_to_db(tx.sent_at),
                ledger_num_to_db(tx.found_at),
                tx.status.to_string(),
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return MonitorStoreError::Duplicate(hex::encode(tx.tx_id));
                }
            }
            MonitorStoreError::Database(e.to_string())
        })?;

        Ok(())
    }

    /// Get one row by tx id
    pub fn get(&self, tx_id: &B256) -> MonitorResult<Option<MonitoredTx>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM monitored_tx WHERE tx_id = ?1",
            params![hex::encode(tx_id)],
            row_to_monitored,
        )
        .optional()
        .map_err(|e| MonitorStoreError::Database(e.to_string()))
    }

    /// Update the status of a row
    pub fn set_status(&self, tx_id: &B256, status: MonitoredTxStatus) -> MonitorResult<()> {
        let conn = self.conn()?;

        let updated = conn
            .execute(
                "UPDATE monitored_tx SET status = ?2 WHERE tx_id = ?1",
                params![hex::encode(tx_id), status.to_string()],
            )
            .map_err(|e| MonitorStoreError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(MonitorStoreError::NotFound(hex::encode(tx_id)));
        }
        Ok(())
    }

    /// Record where the chain first saw the tx, together with its status
    pub fn set_found(
        &self,
        tx_id: &B256,
        found_at: Option<u64>,
        status: MonitoredTxStatus,
    ) -> MonitorResult<()> {
        let conn = self.conn()?;

        let updated = conn
            .execute(
                "UPDATE monitored_tx SET found_at = ?2, status = ?3 WHERE tx_id = ?1",
                params![
                    hex::encode(tx_id),
                    ledger_num_to_db(found_at),
                    status.to_string()
                ],
            )
            .map_err(|e| MonitorStoreError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(MonitorStoreError::NotFound(hex::encode(tx_id)));
        }
        Ok(())
    }

    /// All rows still awaiting a terminal status
    pub fn active(&self) -> MonitorResult<Vec<MonitoredTx>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM monitored_tx WHERE status IN ('limbo', 'pending') ORDER BY tx_id ASC")
            .map_err(|e| MonitorStoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], row_to_monitored)
            .map_err(|e| MonitorStoreError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MonitorStoreError::Database(e.to_string()))?;

        Ok(rows)
    }

    /// All rows with a given status
    pub fn by_status(&self, status: MonitoredTxStatus) -> MonitorResult<Vec<MonitoredTx>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM monitored_tx WHERE status = ?1 ORDER BY tx_id ASC")
            .map_err(|e| MonitorStoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![status.to_string()], row_to_monitored)
            .map_err(|e| MonitorStoreError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MonitorStoreError::Database(e.to_string()))?;

        Ok(rows)
    }

    /// Whether a reference currently has an in-flight submission
    pub fn has_active_for(&self, ref_id: &B256) -> MonitorResult<bool> {
        let conn = self.conn()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM monitored_tx WHERE ref_id = ?1 AND status IN ('limbo', 'pending')",
                params![hex::encode(ref_id)],
                |row| row.get(0),
            )
            .map_err(|e| MonitorStoreError::Database(e.to_string()))?;

        Ok(count > 0)
    }

    /// Whether a reference is parked in Reorg awaiting an operator
    pub fn has_reorg_for(&self, ref_id: &B256) -> MonitorResult<bool> {
        let conn = self.conn()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM monitored_tx WHERE ref_id = ?1 AND status = 'reorg'",
                params![hex::encode(ref_id)],
                |row| row.get(0),
            )
            .map_err(|e| MonitorStoreError::Database(e.to_string()))?;

        Ok(count > 0)
    }
}

fn row_to_monitored(row: &rusqlite::Row) -> rusqlite::Result<MonitoredTx> {
    let status: String = row.get("status")?;
    let status: MonitoredTxStatus = status.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(MonitoredTx {
        tx_id: parse_hash(row, "tx_id")?,
        ref_id: parse_hash(row, "ref_id")?,
        sent_at: ledger_num_from_db(row.get("sent_at")?),
        found_at: ledger_num_from_db(row.get("found_at")?),
        status,
    })
}

fn parse_hash(row: &rusqlite::Row, idx: &str) -> rusqlite::Result<B256> {
    let s: String = row.get(idx)?;
    let bytes = hex::decode(&s).map_err(|e| {
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
            format!("{}: expected 32 bytes", idx).into(),
        ));
    }
    Ok(B256::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    #[test]
    fn test_insert_and_get() {
        let store = MonitoredTxStore::in_memory().unwrap();
        let tx = MonitoredTx::submitted(txid(0x01), txid(0xaa), Some(7));

        store.insert(&tx).unwrap();

        let loaded = store.get(&txid(0x01)).unwrap().unwrap();
        assert_eq!(loaded, tx);
        assert!(matches!(store.insert(&tx), Err(MonitorStoreError::Duplicate(_))));
    }

    #[test]
    fn test_nullable_ledger_numbers_round_trip() {
        let store = MonitoredTxStore::in_memory().unwrap();

        // no sent_at known (BTC-side submission)
        let tx = MonitoredTx::submitted(txid(0x01), txid(0xaa), None);
        store.insert(&tx).unwrap();

        let loaded = store.get(&txid(0x01)).unwrap().unwrap();
        assert_eq!(loaded.sent_at, None);
        assert_eq!(loaded.found_at, None);

        // zero is a valid ledger number, distinct from "none"
        let tx = MonitoredTx::submitted(txid(0x02), txid(0xaa), Some(0));
        store.insert(&tx).unwrap();
        assert_eq!(store.get(&txid(0x02)).unwrap().unwrap().sent_at, Some(0));
    }

    #[test]
    fn test_status_updates() {
        let store = MonitoredTxStore::in_memory().unwrap();
        let tx = MonitoredTx::submitted(txid(0x01), txid(0xaa), Some(7));
        store.insert(&tx).unwrap();

        store
            .set_found(&txid(0x01), Some(9), MonitoredTxStatus::Pending)
            .unwrap();
        let loaded = store.get(&txid(0x01)).unwrap().unwrap();
        assert_eq!(loaded.found_at, Some(9));
        assert_eq!(loaded.status, MonitoredTxStatus::Pending);

        store.set_status(&txid(0x01), MonitoredTxStatus::Success).unwrap();
        let loaded = store.get(&txid(0x01)).unwrap().unwrap();
        assert_eq!(loaded.status, MonitoredTxStatus::Success);

        assert!(matches!(
            store.set_status(&txid(0x7f), MonitoredTxStatus::Success),
            Err(MonitorStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_active_filtering() {
        let store = MonitoredTxStore::in_memory().unwrap();

        store
            .insert(&MonitoredTx::submitted(txid(0x01), txid(0xaa), Some(1)))
            .unwrap();
        store
            .insert(&MonitoredTx::submitted(txid(0x02), txid(0xbb), Some(2)))
            .unwrap();
        store.set_status(&txid(0x02), MonitoredTxStatus::Success).unwrap();

        let active = store.active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].tx_id, txid(0x01));

        assert!(store.has_active_for(&txid(0xaa)).unwrap());
        assert!(!store.has_active_for(&txid(0xbb)).unwrap());
    }

    #[test]
    fn test_reorg_parks_reference() {
        let store = MonitoredTxStore::in_memory().unwrap();
        store
            .insert(&MonitoredTx::submitted(txid(0x01), txid(0xaa), Some(1)))
            .unwrap();

        store.set_status(&txid(0x01), MonitoredTxStatus::Reorg).unwrap();

        assert!(store.has_reorg_for(&txid(0xaa)).unwrap());
        assert!(!store.has_active_for(&txid(0xaa)).unwrap());
    }
}
