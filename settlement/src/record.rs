//! Transaction records emitted by fills

use crate::Result;
use chrono::{DateTime, Utc};
use ledger_core::{AssetId, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an order was filled against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Counterparty {
    /// An AMM pool
    Pool {
        /// Pool swapped through
        pool_id: AssetId,
        /// Fee the pool kept
        fee: u64,
        /// Asset the fee is in
        fee_asset: AssetId,
    },
    /// Another order
    Order {
        /// Counter order ID
        order_id: Uuid,
        /// Counter order owner
        user_id: String,
    },
}

/// Audit record of one fill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Record ID, time-ordered
    pub record_id: Uuid,
    /// Order being filled
    pub order_id: Uuid,
    /// Its owner
    pub user_id: String,
    /// Pool or counter order
    pub counterparty: Counterparty,
    /// Base asset
    pub base_asset: AssetId,
    /// Quote asset
    pub quote_asset: AssetId,
    /// Base exchanged
    pub amount_base: u64,
    /// Quote exchanged
    pub amount_quote: u64,
    /// Quote per base in whole units
    pub executed_price: Decimal,
    /// Positions of every party before the fill
    pub before: Vec<Position>,
    /// Positions of every party after the fill
    pub after: Vec<Position>,
    /// When the fill happened
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Encode for publishing
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self).map_err(ledger_core::Error::from)?)
    }
}
