//! Ledger Adapters
//!
//! Concrete clients behind the adapter interfaces the core consumes:
//!
//! - [`EsploraBtcAdapter`] - BTC adapter over the Esplora HTTP API
//! - [`MemoryLedger`] / [`MemoryBtcLedger`] - in-process ledgers for demos
//!   and integration tests

pub mod esplora;
pub mod memory;

pub use esplora::EsploraBtcAdapter;
pub use memory::{MemoryBtcLedger, MemoryLedger};
