//! SQLite State Store
//!
//! Durable storage for mints, redeems, and process metadata. The store is
//! the only source of truth for bridge state; every mutation commits before
//! the owning event is acknowledged. Uses connection pooling via r2d2.
//!
//! Hash columns store 64 lowercase hex characters without a `0x` prefix;
//! amounts store as 64-bit signed integers.

use alloy_primitives::{Address, B256, U256};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use thiserror::Error;

use crate::types::{decode_outpoints, encode_outpoints, Chain, Mint, MintStatus, Outpoint, Redeem,
    RedeemStatus};

/// Well-known metadata key: Mirror-Chain finalized cursor
const KEY_MIRROR_FINALIZED: B256 = B256::with_last_byte(0x01);
/// Well-known metadata key: BTC finalized cursor
const KEY_BTC_FINALIZED: B256 = B256::with_last_byte(0x02);
/// Well-known metadata key: pinned chain id
const KEY_CHAIN_ID: B256 = B256::with_last_byte(0x03);

/// State store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("chain id mismatch: stored {stored}, configured {configured}")]
    ChainIdMismatch { stored: u32, configured: u32 },

    #[error("database error: {0}")]
    Database(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Lock contention and connection trouble are retryable on the next tick
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Connection(_))
    }

    /// Errors that must terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::ChainIdMismatch { .. } | StoreError::Corrupt(_)
        )
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// SQLite-backed bridge state store
pub struct StateStore {
    pool: Pool<SqliteConnectionManager>,
}

impl StateStore {
    /// Create a store backed by the given database file
    ///
    /// Creates the file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS mint (
                btcTxId TEXT PRIMARY KEY,
                mintTxHash TEXT UNIQUE,
                receiver TEXT NOT NULL,
                amount INTEGER NOT NULL CHECK (amount > 0),
                status TEXT NOT NULL CHECK (status IN ('requested', 'completed'))
            );

            CREATE TABLE IF NOT EXISTS redeem (
                requestTxHash TEXT PRIMARY KEY,
                prepareTxHash TEXT UNIQUE,
                btcTxId TEXT UNIQUE,
                requester TEXT NOT NULL,
                receiver TEXT NOT NULL,
                amount INTEGER NOT NULL CHECK (amount > 0),
                outpoints BLOB NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('requested', 'prepared', 'completed', 'invalid'))
            );

            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_mint_status ON mint(status);
            CREATE INDEX IF NOT EXISTS idx_redeem_status ON redeem(status);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    // =========================================================================
    // Mint operations
    // =========================================================================

    /// Insert a mint row
    pub fn insert_mint(&self, mint: &Mint) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO mint (btcTxId, mintTxHash, receiver, amount, status)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                hex32(&mint.btc_txid),
                mint.mint_tx_hash.as_ref().map(hex32),
                hex_addr(&mint.receiver),
                mint.amount as i64,
                mint.status.to_string(),
            ],
        )
        .map_err(|e| map_insert_err(e, &hex32(&mint.btc_txid)))?;

        Ok(())
    }

    /// Get a mint by its BTC txid
    pub fn get_mint(&self, btc_txid: &B256) -> StoreResult<Option<Mint>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM mint WHERE btcTxId = ?1",
            params![hex32(btc_txid)],
            row_to_mint,
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// List mints with a given status, oldest key first
    pub fn mints_by_status(&self, status: MintStatus) -> StoreResult<Vec<Mint>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM mint WHERE status = ?1 ORDER BY btcTxId ASC")
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![status.to_string()], row_to_mint)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows)
    }

    /// Transition a Requested mint to Completed
    ///
    /// Returns `Conflict` when the row is already completed so callers can
    /// ignore duplicate close-outs.
    pub fn complete_mint(&self, btc_txid: &B256, mint_tx_hash: &B256) -> StoreResult<()> {
        let conn = self.conn()?;

        let updated = conn
            .execute(
                r#"
                UPDATE mint SET mintTxHash = ?2, status = 'completed'
                WHERE btcTxId = ?1 AND status = 'requested'
                "#,
                params![hex32(btc_txid), hex32(mint_tx_hash)],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if updated == 0 {
            return match self.get_mint(btc_txid)? {
                Some(_) => Err(StoreError::Conflict(format!(
                    "mint {} already completed",
                    hex32(btc_txid)
                ))),
                None => Err(StoreError::NotFound(hex32(btc_txid))),
            };
        }

        Ok(())
    }

    // =========================================================================
    // Redeem operations
    // =========================================================================

    /// Insert a redeem row
    pub fn insert_redeem(&self, redeem: &Redeem) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO redeem (
                requestTxHash, prepareTxHash, btcTxId, requester, receiver,
                amount, outpoints, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                hex32(&redeem.request_tx_hash),
                redeem.prepare_tx_hash.as_ref().map(hex32),
                redeem.btc_txid.as_ref().map(hex32),
                hex_addr(&redeem.requester),
                redeem.receiver,
                redeem.amount as i64,
                encode_outpoints(&redeem.outpoints),
                redeem.status.to_string(),
            ],
        )
        .map_err(|e| map_insert_err(e, &hex32(&redeem.request_tx_hash)))?;

        Ok(())
    }

    /// Get a redeem by its request tx hash
    pub fn get_redeem(&self, request_tx_hash: &B256) -> StoreResult<Option<Redeem>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM redeem WHERE requestTxHash = ?1",
            params![hex32(request_tx_hash)],
            row_to_redeem,
        )
        .optional()
        .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// List redeems with a given status, oldest key first
    pub fn redeems_by_status(&self, status: RedeemStatus) -> StoreResult<Vec<Redeem>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM redeem WHERE status = ?1 ORDER BY requestTxHash ASC")
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![status.to_string()], row_to_redeem)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows)
    }

    /// Transition a Requested redeem to Prepared with its committed outpoints
    pub fn set_redeem_prepared(
        &self,
        request_tx_hash: &B256,
        prepare_tx_hash: &B256,
        outpoints: &[Outpoint],
    ) -> StoreResult<()> {
        let conn = self.conn()?;

        let updated = conn
            .execute(
                r#"
                UPDATE redeem SET prepareTxHash = ?2, outpoints = ?3, status = 'prepared'
                WHERE requestTxHash = ?1 AND status = 'requested'
                "#,
                params![
                    hex32(request_tx_hash),
                    hex32(prepare_tx_hash),
                    encode_outpoints(outpoints),
                ],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if updated == 0 {
            return match self.get_redeem(request_tx_hash)? {
                Some(r) => Err(StoreError::Conflict(format!(
                    "redeem {} is {}, not requested",
                    hex32(request_tx_hash),
                    r.status
                ))),
                None => Err(StoreError::NotFound(hex32(request_tx_hash))),
            };
        }

        Ok(())
    }

    /// Transition a Prepared redeem to Completed with its BTC payout txid
    pub fn set_redeem_completed(&self, request_tx_hash: &B256, btc_txid: &B256) -> StoreResult<()> {
        let conn = self.conn()?;

        let updated = conn
            .execute(
                r#"
                UPDATE redeem SET btcTxId = ?2, status = 'completed'
                WHERE requestTxHash = ?1 AND status = 'prepared'
                "#,
                params![hex32(request_tx_hash), hex32(btc_txid)],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if updated == 0 {
            return match self.get_redeem(request_tx_hash)? {
                Some(r) => Err(StoreError::Conflict(format!(
                    "redeem {} is {}, not prepared",
                    hex32(request_tx_hash),
                    r.status
                ))),
                None => Err(StoreError::NotFound(hex32(request_tx_hash))),
            };
        }

        Ok(())
    }

    // =========================================================================
    // Metadata operations
    // =========================================================================

    /// Write a metadata value
    pub fn put_kv(&self, key: &B256, value: &B256) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![hex32(key), hex32(value)],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    /// Read a metadata value
    pub fn get_kv(&self, key: &B256) -> StoreResult<Option<B256>> {
        let conn = self.conn()?;

        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![hex32(key)],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        value.as_deref().map(parse_b256).transpose()
    }

    /// Stored finalized cursor for a chain, if any
    pub fn finalized_block_number(&self, chain: Chain) -> StoreResult<Option<u64>> {
        match self.get_kv(&cursor_key(chain))? {
            Some(value) => Ok(Some(b256_to_u64(&value)?)),
            None => Ok(None),
        }
    }

    /// Persist the finalized cursor for a chain
    pub fn set_finalized_block_number(&self, chain: Chain, number: u64) -> StoreResult<()> {
        self.put_kv(&cursor_key(chain), &u64_to_b256(number))
    }

    /// Pin the configured chain id on first start; fail on later mismatch
    pub fn ensure_chain_id(&self, configured: u32) -> StoreResult<()> {
        match self.get_kv(&KEY_CHAIN_ID)? {
            Some(value) => {
                let stored = b256_to_u64(&value)? as u32;
                if stored != configured {
                    return Err(StoreError::ChainIdMismatch { stored, configured });
                }
                Ok(())
            }
            None => self.put_kv(&KEY_CHAIN_ID, &u64_to_b256(configured as u64)),
        }
    }
}

fn cursor_key(chain: Chain) -> B256 {
    match chain {
        Chain::Mirror => KEY_MIRROR_FINALIZED,
        Chain::Btc => KEY_BTC_FINALIZED,
    }
}

// =============================================================================
// Row and column mapping
// =============================================================================

fn hex32(hash: &B256) -> String {
    hex::encode(hash)
}

fn hex_addr(addr: &Address) -> String {
    hex::encode(addr)
}

fn parse_b256(s: &str) -> StoreResult<B256> {
    let bytes = hex::decode(s).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(StoreError::Corrupt(format!("expected 32 bytes, got {}", bytes.len())));
    }
    Ok(B256::from_slice(&bytes))
}

fn u64_to_b256(n: u64) -> B256 {
    B256::from(U256::from(n))
}

fn b256_to_u64(value: &B256) -> StoreResult<u64> {
    u64::try_from(U256::from_be_slice(value.as_slice()))
        .map_err(|_| StoreError::Corrupt("metadata value exceeds u64".to_string()))
}

fn map_insert_err(e: rusqlite::Error, key: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e {
        // 1555 = primary key, 2067 = unique constraint
        if err.extended_code == 1555 || err.extended_code == 2067 {
            return StoreError::Duplicate(key.to_string());
        }
    }
    StoreError::Database(e.to_string())
}

fn col_b256(row: &rusqlite::Row, idx: &str) -> rusqlite::Result<B256> {
    let s: String = row.get(idx)?;
    parse_b256(&s).map_err(|e| column_err(idx, e))
}

fn col_b256_opt(row: &rusqlite::Row, idx: &str) -> rusqlite::Result<Option<B256>> {
    let s: Option<String> = row.get(idx)?;
    s.as_deref()
        .map(parse_b256)
        .transpose()
        .map_err(|e| column_err(idx, e))
}

fn col_addr(row: &rusqlite::Row, idx: &str) -> rusqlite::Result<Address> {
    let s: String = row.get(idx)?;
    let bytes = hex::decode(&s).map_err(|e| column_err(idx, StoreError::Corrupt(e.to_string())))?;
    if bytes.len() != 20 {
        return Err(column_err(
            idx,
            StoreError::Corrupt(format!("expected 20 bytes, got {}", bytes.len())),
        ));
    }
    Ok(Address::from_slice(&bytes))
}

fn column_err(idx: &str, e: StoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("{}: {}", idx, e).into(),
    )
}

fn row_to_mint(row: &rusqlite::Row) -> rusqlite::Result<Mint> {
    let status: String = row.get("status")?;
    let status: MintStatus = status
        .parse()
        .map_err(|e: String| column_err("status", StoreError::Corrupt(e)))?;

    Ok(Mint {
        btc_txid: col_b256(row, "btcTxId")?,
        mint_tx_hash: col_b256_opt(row, "mintTxHash")?,
        receiver: col_addr(row, "receiver")?,
        amount: row.get::<_, i64>("amount")? as u64,
        status,
    })
}

fn row_to_redeem(row: &rusqlite::Row) -> rusqlite::Result<Redeem> {
    let status: String = row.get("status")?;
    let status: RedeemStatus = status
        .parse()
        .map_err(|e: String| column_err("status", StoreError::Corrupt(e)))?;

    let blob: Vec<u8> = row.get("outpoints")?;
    let outpoints = decode_outpoints(&blob)
        .map_err(|e| column_err("outpoints", StoreError::Corrupt(e.to_string())))?;

    Ok(Redeem {
        request_tx_hash: col_b256(row, "requestTxHash")?,
        prepare_tx_hash: col_b256_opt(row, "prepareTxHash")?,
        btc_txid: col_b256_opt(row, "btcTxId")?,
        requester: col_addr(row, "requester")?,
        receiver: row.get("receiver")?,
        amount: row.get::<_, i64>("amount")? as u64,
        outpoints,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    fn sample_mint() -> Mint {
        Mint::requested(txid(0xaa), Address::repeat_byte(0x01), 100_000_000)
    }

    fn sample_redeem() -> Redeem {
        Redeem::requested(
            txid(0x01),
            Address::repeat_byte(0x02),
            "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".to_string(),
            240,
        )
    }

    #[test]
    fn test_mint_insert_and_get() {
        let store = StateStore::in_memory().unwrap();
        let mint = sample_mint();

        store.insert_mint(&mint).unwrap();

        let loaded = store.get_mint(&mint.btc_txid).unwrap().unwrap();
        assert_eq!(loaded, mint);
        assert!(store.get_mint(&txid(0xbb)).unwrap().is_none());
    }

    #[test]
    fn test_mint_duplicate() {
        let store = StateStore::in_memory().unwrap();
        let mint = sample_mint();

        store.insert_mint(&mint).unwrap();
        assert!(matches!(
            store.insert_mint(&mint),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn test_complete_mint() {
        let store = StateStore::in_memory().unwrap();
        let mint = sample_mint();
        store.insert_mint(&mint).unwrap();

        store.complete_mint(&mint.btc_txid, &txid(0x11)).unwrap();

        let loaded = store.get_mint(&mint.btc_txid).unwrap().unwrap();
        assert_eq!(loaded.status, MintStatus::Completed);
        assert_eq!(loaded.mint_tx_hash, Some(txid(0x11)));

        // second completion is a conflict, not a mutation
        assert!(matches!(
            store.complete_mint(&mint.btc_txid, &txid(0x12)),
            Err(StoreError::Conflict(_))
        ));
        let loaded = store.get_mint(&mint.btc_txid).unwrap().unwrap();
        assert_eq!(loaded.mint_tx_hash, Some(txid(0x11)));

        assert!(matches!(
            store.complete_mint(&txid(0xcc), &txid(0x11)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_mints_by_status() {
        let store = StateStore::in_memory().unwrap();
        store.insert_mint(&sample_mint()).unwrap();

        let mut other = sample_mint();
        other.btc_txid = txid(0xab);
        store.insert_mint(&other).unwrap();
        store.complete_mint(&other.btc_txid, &txid(0x11)).unwrap();

        assert_eq!(store.mints_by_status(MintStatus::Requested).unwrap().len(), 1);
        assert_eq!(store.mints_by_status(MintStatus::Completed).unwrap().len(), 1);
    }

    #[test]
    fn test_redeem_lifecycle() {
        let store = StateStore::in_memory().unwrap();
        let redeem = sample_redeem();
        store.insert_redeem(&redeem).unwrap();

        let outpoints = vec![Outpoint::new(txid(0x0a), 0), Outpoint::new(txid(0x0b), 2)];
        store
            .set_redeem_prepared(&redeem.request_tx_hash, &txid(0x20), &outpoints)
            .unwrap();

        let loaded = store.get_redeem(&redeem.request_tx_hash).unwrap().unwrap();
        assert_eq!(loaded.status, RedeemStatus::Prepared);
        assert_eq!(loaded.outpoints, outpoints);
        assert_eq!(loaded.prepare_tx_hash, Some(txid(0x20)));

        store
            .set_redeem_completed(&redeem.request_tx_hash, &txid(0x30))
            .unwrap();
        let loaded = store.get_redeem(&redeem.request_tx_hash).unwrap().unwrap();
        assert_eq!(loaded.status, RedeemStatus::Completed);
        assert_eq!(loaded.btc_txid, Some(txid(0x30)));
    }

    #[test]
    fn test_redeem_prepare_requires_requested() {
        let store = StateStore::in_memory().unwrap();
        let redeem = Redeem::invalid(
            txid(0x01),
            Address::repeat_byte(0x02),
            "abcd".to_string(),
            50,
        );
        store.insert_redeem(&redeem).unwrap();

        let outpoints = vec![Outpoint::new(txid(0x0a), 0)];
        assert!(matches!(
            store.set_redeem_prepared(&redeem.request_tx_hash, &txid(0x20), &outpoints),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.set_redeem_prepared(&txid(0x7f), &txid(0x20), &outpoints),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_kv_round_trip() {
        let store = StateStore::in_memory().unwrap();
        let key = B256::repeat_byte(0x42);

        assert!(store.get_kv(&key).unwrap().is_none());
        store.put_kv(&key, &txid(0x43)).unwrap();
        assert_eq!(store.get_kv(&key).unwrap(), Some(txid(0x43)));

        // overwrite
        store.put_kv(&key, &txid(0x44)).unwrap();
        assert_eq!(store.get_kv(&key).unwrap(), Some(txid(0x44)));
    }

    #[test]
    fn test_finalized_cursor() {
        let store = StateStore::in_memory().unwrap();

        assert_eq!(store.finalized_block_number(Chain::Mirror).unwrap(), None);
        store.set_finalized_block_number(Chain::Mirror, 123).unwrap();
        store.set_finalized_block_number(Chain::Btc, 9).unwrap();

        assert_eq!(store.finalized_block_number(Chain::Mirror).unwrap(), Some(123));
        assert_eq!(store.finalized_block_number(Chain::Btc).unwrap(), Some(9));
    }

    #[test]
    fn test_chain_id_pinning() {
        let store = StateStore::in_memory().unwrap();

        store.ensure_chain_id(1337).unwrap();
        store.ensure_chain_id(1337).unwrap();

        let err = store.ensure_chain_id(1).unwrap_err();
        assert!(matches!(
            err,
            StoreError::ChainIdMismatch { stored: 1337, configured: 1 }
        ));
        assert!(err.is_fatal());
    }
}
