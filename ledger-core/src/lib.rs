//! Bond Ledger Core
//!
//! Per-user and system-wide asset accounting with optimistic transactions
//! over a shared key-value store.
//!
//! # Architecture
//!
//! - **Pure mutators**: [`Balance`], [`Position`] and [`Module`] transitions
//!   are all-or-nothing; a failed call leaves the value untouched
//! - **Optimistic concurrency**: read-modify-write runs inside a watched
//!   transaction and is retried from scratch on conflict
//! - **Dirty tracking**: aggregates carry an explicit modified flag and a
//!   sequence bumped once per persisted mutation
//!
//! # Invariants
//!
//! - No operation creates value or drives Locked/Supplied negative
//! - Arithmetic overflow is always a typed error
//! - Application errors are never retried

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod amount;
pub mod asset;
pub mod balance;
pub mod balances;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod module;
pub mod position;
pub mod records;
mod revision;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod transaction;

// Re-exports
pub use amount::Amount;
pub use asset::{scale, AssetId, AssetInfo, AssetRegistry, AssetUsage, INTEREST_ASSET};
pub use balance::Balance;
pub use balances::Balances;
pub use config::{Config, TransactionConfig};
pub use error::{Error, ErrorKind, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use module::Module;
pub use position::Position;
pub use storage::{KvStore, KvTransaction, MemoryStore};
pub use transaction::{run_transaction, TransactionError, TransactionRunner};
