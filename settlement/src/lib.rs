//! Settlement helpers for order matching
//!
//! - **Stablecoin equivalence netting**: cover a shortfall in one
//!   stablecoin 1:1 from another and reverse it later
//! - **Fill iteration**: walk resting orders, fill them against pools or
//!   counter orders, move balances and emit transaction records
//! - **Position tracking**: an arena of the positions one matching pass
//!   touches, loaded from and saved back to the ledger store
//!
//! Order storage and matching priority belong to the caller; this crate
//! only applies fills.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod fill;
pub mod order;
pub mod record;
pub mod stablecoin;
pub mod tracker;

// Re-exports
pub use error::{Error, Result};
pub use fill::{lock_for_order, FillIterator, FillOutcome};
pub use order::{Book, Order, OrderStatus, Side};
pub use record::{Counterparty, TransactionRecord};
pub use stablecoin::{activate, cleanup, Conversion};
pub use tracker::PositionTracker;
