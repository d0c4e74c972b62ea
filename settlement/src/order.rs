//! Limit orders as seen by the fill loop
//!
//! Prices are quote base-units per base base-unit. A sell order reserves
//! its base quantity when placed; a buy order reserves
//! `ceil(quantity × price)` of the quote asset.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::{Amount, AssetId};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Pays quote, receives base
    Buy,
    /// Pays base, receives quote
    Sell,
}

impl Side {
    /// The other side
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Nothing filled yet
    Open,
    /// Some quantity filled
    PartiallyFilled,
    /// Fully filled
    Filled,
    /// Cancelled with a reason
    Cancelled(String),
}

impl OrderStatus {
    /// Filled or cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled(_))
    }
}

/// Base/quote pair an order trades
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Book {
    /// Traded asset
    pub base: AssetId,
    /// Pricing asset
    pub quote: AssetId,
}

impl fmt::Display for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Limit order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order ID
    pub order_id: Uuid,
    /// Owner
    pub user_id: String,
    /// Traded pair
    pub book: Book,
    /// Side
    pub side: Side,
    /// Limit price
    pub price: Decimal,
    /// Base quantity ordered
    pub quantity: u64,
    /// Base filled so far
    pub filled_base: u64,
    /// Quote exchanged so far
    pub filled_quote: u64,
    /// Lifecycle state
    pub status: OrderStatus,
    /// Placement time
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// New open order
    pub fn new(user_id: impl Into<String>, book: Book, side: Side, price: Decimal, quantity: u64) -> Result<Self> {
        if price <= Decimal::ZERO {
            return Err(Error::InvalidInput(format!("price {} must be positive", price)));
        }
        if quantity == 0 {
            return Err(Error::InvalidInput("zero order quantity".to_string()));
        }
        if book.base == book.quote {
            return Err(Error::InvalidInput(format!("book {} trades one asset", book)));
        }
        let order = Self {
            order_id: Uuid::new_v4(),
            user_id: user_id.into(),
            book,
            side,
            price,
            quantity,
            filled_base: 0,
            filled_quote: 0,
            status: OrderStatus::Open,
            created_at: Utc::now(),
        };
        // the reservation must be representable
        order.reservation()?;
        Ok(order)
    }

    /// What placing the order reserves
    pub fn reservation(&self) -> Result<Amount> {
        Ok(match self.side {
            Side::Sell => Amount::new(self.book.base.clone(), self.quantity),
            Side::Buy => Amount::new(self.book.quote.clone(), quote_for(self.quantity, self.price, true)?),
        })
    }

    /// Reservation not yet spent
    pub fn remaining_reservation(&self) -> Result<Amount> {
        let reserved = self.reservation()?;
        let spent = match self.side {
            Side::Sell => self.filled_base,
            Side::Buy => self.filled_quote,
        };
        Ok(Amount::new(reserved.asset_id, reserved.quantity.saturating_sub(spent)))
    }

    /// Base quantity that can still fill at the limit price
    ///
    /// A buy order whose remaining quote cannot buy one base unit has no
    /// fillable remainder even if base quantity is outstanding.
    pub fn fillable_base(&self) -> u64 {
        if self.status.is_terminal() {
            return 0;
        }
        let outstanding = self.quantity.saturating_sub(self.filled_base);
        match self.side {
            Side::Sell => outstanding,
            Side::Buy => {
                let budget = self
                    .remaining_reservation()
                    .map(|amount| amount.quantity)
                    .unwrap_or(0);
                let affordable = (Decimal::from(budget) / self.price)
                    .floor()
                    .to_u64()
                    .unwrap_or(u64::MAX);
                outstanding.min(affordable)
            }
        }
    }

    /// Record a fill of `base` against `quote`
    pub fn record_fill(&mut self, base: u64, quote: u64) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "order {} is {:?}",
                self.order_id, self.status
            )));
        }
        let filled_base = self
            .filled_base
            .checked_add(base)
            .filter(|filled| *filled <= self.quantity)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "fill of {} exceeds order {} remainder {}",
                    base,
                    self.order_id,
                    self.quantity - self.filled_base
                ))
            })?;
        let filled_quote = self
            .filled_quote
            .checked_add(quote)
            .ok_or_else(|| Error::InvalidInput(format!("quote fill overflows on {}", self.order_id)))?;
        if self.side == Side::Buy && filled_quote > self.reservation()?.quantity {
            return Err(Error::InvalidInput(format!(
                "fill spends {} quote, order {} reserved {}",
                filled_quote,
                self.order_id,
                self.reservation()?.quantity
            )));
        }
        self.filled_base = filled_base;
        self.filled_quote = filled_quote;
        self.status = if filled_base == self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        Ok(())
    }

    /// Cancel with a reason
    pub fn cancel(&mut self, reason: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = OrderStatus::Cancelled(reason.into());
        }
    }

    /// Whether trading `base` for `quote` respects the limit price
    pub fn accepts(&self, base: u64, quote: u64) -> bool {
        let Some(at_limit) = Decimal::from(base).checked_mul(self.price) else {
            return false;
        };
        match self.side {
            Side::Buy => Decimal::from(quote) <= at_limit.ceil(),
            Side::Sell => Decimal::from(quote) >= at_limit.floor(),
        }
    }
}

/// Quote needed for `base` at `price`, rounded as asked
pub fn quote_for(base: u64, price: Decimal, round_up: bool) -> Result<u64> {
    let exact = Decimal::from(base)
        .checked_mul(price)
        .ok_or_else(|| Error::InvalidInput(format!("{} × {} overflows", base, price)))?;
    let rounded = if round_up { exact.ceil() } else { exact.floor() };
    rounded
        .to_u64()
        .ok_or_else(|| Error::InvalidInput(format!("quote {} out of range", rounded)))
}
