//! AMM pool engine
//!
//! Prices swaps and liquidity changes against two pool kinds:
//!
//! - **Product pools**: constant product with the fee taken from the input
//! - **Yield pools**: a bond curve `x^a + y^a = k` whose exponent decays
//!   towards 1 as maturity approaches, with the fee measured as the gap
//!   between the fee-free and the fee-bearing curve
//!
//! Reserve arithmetic is integer or `rust_decimal`, never floating point.
//! [`PoolService`] runs each operation inside a ledger transaction that
//! also moves the trader's position.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod liquidity;
pub mod pool;
pub mod product;
pub mod service;
pub mod store;
pub mod swap;
pub mod yield_curve;

pub use error::{Error, Result};
pub use liquidity::LiquidityChange;
pub use pool::Pool;
pub use service::{PoolService, SwapReceipt};
pub use swap::{executed_price, SwapQuote};
