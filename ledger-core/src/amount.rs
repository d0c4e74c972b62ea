//! Single-asset quantity with checked arithmetic

use crate::{AssetId, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset ID plus unsigned quantity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    /// Asset
    pub asset_id: AssetId,

    /// Quantity in the asset's smallest unit
    pub quantity: u64,
}

impl Amount {
    /// Create new amount
    pub fn new(asset_id: AssetId, quantity: u64) -> Self {
        Self { asset_id, quantity }
    }

    /// Zero of the given asset
    pub fn zero(asset_id: AssetId) -> Self {
        Self::new(asset_id, 0)
    }

    /// Parse the asset ID and build an amount
    pub fn parse(asset_id: &str, quantity: u64) -> Result<Self> {
        Ok(Self::new(AssetId::new(asset_id)?, quantity))
    }

    /// Quantity is zero
    pub fn is_zero(&self) -> bool {
        self.quantity == 0
    }

    /// Quantity as a signed ledger entry
    pub fn signed(&self) -> Result<i64> {
        i64::try_from(self.quantity)
            .map_err(|_| Error::Overflow(format!("{} exceeds signed range", self)))
    }

    /// Checked addition
    pub fn add(&self, other: &Amount) -> Result<Amount> {
        self.ensure_same_asset(other)?;
        let quantity = self
            .quantity
            .checked_add(other.quantity)
            .ok_or_else(|| Error::Overflow(format!("{} + {}", self, other)))?;
        Ok(Amount::new(self.asset_id.clone(), quantity))
    }

    /// Checked subtraction; a negative result is an error
    pub fn sub(&self, other: &Amount) -> Result<Amount> {
        self.ensure_same_asset(other)?;
        let quantity = self
            .quantity
            .checked_sub(other.quantity)
            .ok_or_else(|| Error::insufficient(self.asset_id.as_str(), other.quantity, self.quantity))?;
        Ok(Amount::new(self.asset_id.clone(), quantity))
    }

    /// Subtract as much as possible, clamping at zero
    ///
    /// Returns the remainder and the quantity actually subtracted.
    pub fn sub_to_zero(&self, other: &Amount) -> Result<(Amount, Amount)> {
        self.ensure_same_asset(other)?;
        let taken = self.quantity.min(other.quantity);
        Ok((
            Amount::new(self.asset_id.clone(), self.quantity - taken),
            Amount::new(self.asset_id.clone(), taken),
        ))
    }

    pub(crate) fn ensure_same_asset(&self, other: &Amount) -> Result<()> {
        if self.asset_id != other.asset_id {
            return Err(Error::InvalidInput(format!(
                "asset mismatch: {} vs {}",
                self.asset_id, other.asset_id
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.quantity, self.asset_id)
    }
}
