//! Per-user, per-asset balance breakdown
//!
//! A `Balance` is the unit of value movement between economic states.
//! Every transition returns a new value; on error the receiver is unchanged.
//!
//! ```text
//!            lock ──────────▶ locked
//!  available supply ────────▶ supplied
//!            post_collateral ▶ collateral
//!            ◀──── borrow ─── borrowed | virtual
//! ```

use crate::{Amount, AssetId, Error, Result};
use serde::{Deserialize, Serialize};

/// Balance of one asset for one owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Asset (persisted as the record field name, not in the value)
    #[serde(skip)]
    asset_id: Option<AssetId>,

    /// Freely spendable
    pub available: u64,

    /// Debt drawn from pooled supply
    pub borrowed: u64,

    /// Posted as collateral
    pub collateral: u64,

    /// Supplied to the lending pool
    pub supplied: u64,

    /// Minted synthetic debt not backed by pooled supply
    #[serde(rename = "virtual")]
    pub virtual_: u64,

    /// Reserved by open orders
    pub locked: u64,
}

impl Balance {
    /// Zero balance of an asset
    pub fn zero(asset_id: AssetId) -> Self {
        Self {
            asset_id: Some(asset_id),
            available: 0,
            borrowed: 0,
            collateral: 0,
            supplied: 0,
            virtual_: 0,
            locked: 0,
        }
    }

    /// Decode a persisted record field
    pub fn from_json(asset_id: AssetId, json: &str) -> Result<Self> {
        let mut balance: Balance = serde_json::from_str(json)
            .map_err(|e| Error::InvalidData(format!("balance {}: {}", asset_id, e)))?;
        balance.asset_id = Some(asset_id);
        Ok(balance)
    }

    /// Encode for a record field
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Asset of this balance
    pub fn asset_id(&self) -> Result<&AssetId> {
        self.asset_id
            .as_ref()
            .ok_or_else(|| Error::Internal("balance without asset id".to_string()))
    }

    /// Every field is zero
    pub fn is_zero(&self) -> bool {
        self.available == 0
            && self.borrowed == 0
            && self.collateral == 0
            && self.supplied == 0
            && self.virtual_ == 0
            && self.locked == 0
    }

    /// Credit available
    pub fn add(&self, amount: &Amount) -> Result<Balance> {
        self.check(amount)?;
        let mut next = self.clone();
        next.available = credit(self.available, amount)?;
        Ok(next)
    }

    /// Debit available
    pub fn sub(&self, amount: &Amount) -> Result<Balance> {
        self.check(amount)?;
        let mut next = self.clone();
        next.available = debit(self.available, amount)?;
        Ok(next)
    }

    /// Move available to locked
    pub fn lock(&self, amount: &Amount) -> Result<Balance> {
        self.check(amount)?;
        let mut next = self.clone();
        next.available = debit(self.available, amount)?;
        next.locked = credit(self.locked, amount)?;
        Ok(next)
    }

    /// Move locked back to available, clamping at what is locked
    pub fn unlock(&self, amount: &Amount) -> Result<Balance> {
        self.check(amount)?;
        let released = self.locked.min(amount.quantity);
        let mut next = self.clone();
        next.locked -= released;
        next.available = self
            .available
            .checked_add(released)
            .ok_or_else(|| Error::Overflow(format!("unlock {}", amount)))?;
        Ok(next)
    }

    /// Move available to supplied
    pub fn supply(&self, amount: &Amount) -> Result<Balance> {
        self.check(amount)?;
        let mut next = self.clone();
        next.available = debit(self.available, amount)?;
        next.supplied = credit(self.supplied, amount)?;
        Ok(next)
    }

    /// Move supplied back to available
    pub fn withdraw(&self, amount: &Amount) -> Result<Balance> {
        self.check(amount)?;
        let mut next = self.clone();
        next.supplied = debit(self.supplied, amount)?;
        next.available = credit(self.available, amount)?;
        Ok(next)
    }

    /// Credit available and record the debt as borrowed or virtual
    pub fn borrow(&self, amount: &Amount, is_virtual: bool) -> Result<Balance> {
        self.check(amount)?;
        let mut next = self.clone();
        next.available = credit(self.available, amount)?;
        if is_virtual {
            next.virtual_ = credit(self.virtual_, amount)?;
        } else {
            next.borrowed = credit(self.borrowed, amount)?;
        }
        Ok(next)
    }

    /// Debit available and reduce borrowed or virtual debt
    pub fn repay(&self, amount: &Amount, is_virtual: bool) -> Result<Balance> {
        self.check(amount)?;
        let mut next = self.clone();
        next.available = debit(self.available, amount)?;
        if is_virtual {
            next.virtual_ = debit(self.virtual_, amount)?;
        } else {
            next.borrowed = debit(self.borrowed, amount)?;
        }
        Ok(next)
    }

    /// Move available to collateral
    pub fn post_collateral(&self, amount: &Amount) -> Result<Balance> {
        self.check(amount)?;
        let mut next = self.clone();
        next.available = debit(self.available, amount)?;
        next.collateral = credit(self.collateral, amount)?;
        Ok(next)
    }

    /// Move collateral back to available
    pub fn release_collateral(&self, amount: &Amount) -> Result<Balance> {
        self.check(amount)?;
        let mut next = self.clone();
        next.collateral = debit(self.collateral, amount)?;
        next.available = credit(self.available, amount)?;
        Ok(next)
    }

    fn check(&self, amount: &Amount) -> Result<()> {
        let asset = self.asset_id()?;
        if asset != &amount.asset_id {
            return Err(Error::InvalidInput(format!(
                "balance of {} cannot move {}",
                asset, amount
            )));
        }
        Ok(())
    }
}

fn credit(field: u64, amount: &Amount) -> Result<u64> {
    field
        .checked_add(amount.quantity)
        .ok_or_else(|| Error::Overflow(format!("{} + {}", field, amount)))
}

fn debit(field: u64, amount: &Amount) -> Result<u64> {
    field
        .checked_sub(amount.quantity)
        .ok_or_else(|| Error::insufficient(amount.asset_id.as_str(), amount.quantity, field))
}
