//! A user's full asset state
//!
//! # Invariants
//!
//! - Owned, SSEQ and InterestSources may be negative
//! - Locked and Supplied are never negative
//! - available(asset) = max(Owned − Locked − Supplied, 0)
//! - Mutators are all-or-nothing and mark the position modified

use crate::{
    revision::Revision, Amount, AssetId, Balance, Balances, Error, Result, INTEREST_ASSET,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Per-user aggregate of balances plus bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Owner
    pub user_id: String,

    /// Net ownership; negative means net borrow
    #[serde(default)]
    owned: Balances,

    /// Reserved by open orders
    #[serde(default)]
    locked: Balances,

    /// Supplied to the lending pool
    #[serde(default)]
    supplied: Balances,

    /// Simple stablecoin equivalence ledger
    #[serde(default)]
    sseq: Balances,

    /// Parked holdings, e.g. matured bonds awaiting redemption
    #[serde(default)]
    inactive: Balances,

    /// Attribution of Interest holdings to coupon periods
    #[serde(default)]
    interest_sources: Balances,

    /// Asset the user deposits and withdraws in
    #[serde(default)]
    native_asset: Option<AssetId>,

    #[serde(flatten)]
    revision: Revision,
}

impl Position {
    /// Fresh, empty position (sequence 0)
    pub fn initial(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            owned: Balances::new(),
            locked: Balances::new(),
            supplied: Balances::new(),
            sseq: Balances::new(),
            inactive: Balances::new(),
            interest_sources: Balances::new(),
            native_asset: None,
            revision: Revision::default().loaded(),
        }
    }

    /// Decode persisted state and capture it as the baseline
    pub fn load(json: &str) -> Result<Self> {
        let mut position: Position = serde_json::from_str(json)
            .map_err(|e| Error::InvalidData(format!("position: {}", e)))?;
        position.locked.ensure_non_negative("locked")?;
        position.supplied.ensure_non_negative("supplied")?;
        position.revision = position.revision.loaded();
        Ok(position)
    }

    /// Serialize for persistence, bumping the sequence once if modified
    pub fn snapshot(&mut self) -> Result<String> {
        self.snapshot_at(Utc::now().timestamp())
    }

    /// `snapshot` with an explicit clock
    pub fn snapshot_at(&mut self, now: i64) -> Result<String> {
        self.revision.stamp(now);
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize without touching the revision
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Mutated since load or last snapshot
    pub fn is_modified(&self) -> bool {
        self.revision.is_modified()
    }

    /// Sequence the next persisted mutation will carry
    pub fn next_sequence(&self) -> u64 {
        self.revision.next_sequence()
    }

    /// Current sequence
    pub fn sequence(&self) -> u64 {
        self.revision.sequence
    }

    /// Unix seconds of the last persisted mutation
    pub fn last_updated(&self) -> i64 {
        self.revision.last_updated
    }

    /// Net ownership
    pub fn owned(&self) -> &Balances {
        &self.owned
    }

    /// Locked by orders
    pub fn locked(&self) -> &Balances {
        &self.locked
    }

    /// Supplied to lending
    pub fn supplied(&self) -> &Balances {
        &self.supplied
    }

    /// Stablecoin equivalence ledger
    pub fn sseq(&self) -> &Balances {
        &self.sseq
    }

    /// Parked holdings
    pub fn inactive(&self) -> &Balances {
        &self.inactive
    }

    /// Interest attribution
    pub fn interest_sources(&self) -> &Balances {
        &self.interest_sources
    }

    /// Native asset
    pub fn native_asset(&self) -> Option<&AssetId> {
        self.native_asset.as_ref()
    }

    /// Set the native asset
    pub fn set_native_asset(&mut self, asset: AssetId) {
        if self.native_asset.as_ref() != Some(&asset) {
            self.native_asset = Some(asset);
            self.revision.touch();
        }
    }

    /// Spendable quantity: Owned minus Locked and Supplied, floored at zero
    pub fn available(&self, asset: &AssetId) -> u64 {
        let owned = self.owned.get(asset) as i128;
        let reserved = self.locked.get(asset) as i128 + self.supplied.get(asset) as i128;
        (owned - reserved).clamp(0, u64::MAX as i128) as u64
    }

    /// Per-asset breakdown view
    pub fn balance(&self, asset: &AssetId) -> Balance {
        let mut view = Balance::zero(asset.clone());
        view.available = self.available(asset);
        view.locked = self.locked.get(asset).max(0) as u64;
        view.supplied = self.supplied.get(asset).max(0) as u64;
        view.borrowed = self.owned.get(asset).min(0).unsigned_abs();
        view
    }

    /// Credit Owned
    pub fn add(&mut self, amount: &Amount) -> Result<()> {
        let owned = self.owned.add_amount(amount)?;
        self.owned = owned;
        self.revision.touch();
        Ok(())
    }

    /// Debit Owned; requires the quantity to be available
    pub fn sub(&mut self, amount: &Amount) -> Result<()> {
        self.require_available(amount)?;
        let owned = self.owned.sub_amount(amount)?;
        self.owned = owned;
        self.revision.touch();
        Ok(())
    }

    /// Reserve available funds
    pub fn lock(&mut self, amount: &Amount) -> Result<()> {
        self.require_available(amount)?;
        let locked = self.locked.add_amount(amount)?;
        self.locked = locked;
        self.revision.touch();
        Ok(())
    }

    /// Release reserved funds, clamping at what is locked
    pub fn unlock(&mut self, amount: &Amount) -> Result<()> {
        let held = self.locked.get(&amount.asset_id).max(0);
        let released = held.min(amount.signed()?);
        if released == 0 {
            return Ok(());
        }
        let locked = self.locked.sub_asset(&amount.asset_id, released)?;
        self.locked = locked;
        self.revision.touch();
        Ok(())
    }

    /// Supply available funds to lending
    pub fn supply(&mut self, amount: &Amount) -> Result<()> {
        self.require_available(amount)?;
        let supplied = self.supplied.add_amount(amount)?;
        self.supplied = supplied;
        self.revision.touch();
        Ok(())
    }

    /// Withdraw supplied funds back to available
    pub fn withdraw(&mut self, amount: &Amount) -> Result<()> {
        let held = self.supplied.get(&amount.asset_id);
        let qty = amount.signed()?;
        if held < qty {
            return Err(Error::insufficient(amount.asset_id.as_str(), qty, held));
        }
        let supplied = self.supplied.sub_asset(&amount.asset_id, qty)?;
        self.supplied = supplied;
        self.revision.touch();
        Ok(())
    }

    /// Debit Owned past zero, creating net borrow
    pub fn borrow(&mut self, amount: &Amount) -> Result<()> {
        let owned = self.owned.sub_amount(amount)?;
        self.owned = owned;
        self.revision.touch();
        Ok(())
    }

    /// Credit Owned towards an outstanding net borrow
    pub fn repay(&mut self, amount: &Amount) -> Result<()> {
        let debt = self.owned.get(&amount.asset_id).min(0).unsigned_abs();
        if amount.quantity > debt {
            return Err(Error::InvalidInput(format!(
                "repay {} exceeds debt {}",
                amount, debt
            )));
        }
        self.add(amount)
    }

    /// Park available holdings as inactive
    pub fn deactivate(&mut self, amount: &Amount) -> Result<()> {
        self.require_available(amount)?;
        let owned = self.owned.sub_amount(amount)?;
        let inactive = self.inactive.add_amount(amount)?;
        self.owned = owned;
        self.inactive = inactive;
        self.revision.touch();
        Ok(())
    }

    /// Return parked holdings to Owned
    pub fn reactivate(&mut self, amount: &Amount) -> Result<()> {
        let held = self.inactive.get(&amount.asset_id);
        let qty = amount.signed()?;
        if held < qty {
            return Err(Error::insufficient(amount.asset_id.as_str(), qty, held));
        }
        let inactive = self.inactive.sub_asset(&amount.asset_id, qty)?;
        let owned = self.owned.add_amount(amount)?;
        self.owned = owned;
        self.inactive = inactive;
        self.revision.touch();
        Ok(())
    }

    /// Credit Interest and attribute it to a coupon period of `source`
    pub fn accrue_interest(&mut self, source: &AssetId, period_end: i64, quantity: u64) -> Result<()> {
        let interest = Amount::new(AssetId::new(INTEREST_ASSET)?, quantity);
        let key = AssetId::coupon_source(source, period_end)?;
        let owned = self.owned.add_amount(&interest)?;
        let sources = self.interest_sources.add_asset(&key, interest.signed()?)?;
        self.owned = owned;
        self.interest_sources = sources;
        self.revision.touch();
        Ok(())
    }

    /// Debit Interest previously attributed to a coupon period
    pub fn claim_interest(&mut self, source: &AssetId, period_end: i64, quantity: u64) -> Result<()> {
        let interest = Amount::new(AssetId::new(INTEREST_ASSET)?, quantity);
        let key = AssetId::coupon_source(source, period_end)?;
        let attributed = self.interest_sources.get(&key);
        let qty = interest.signed()?;
        if attributed < qty {
            return Err(Error::insufficient(key.as_str(), qty, attributed));
        }
        self.require_available(&interest)?;
        let owned = self.owned.sub_amount(&interest)?;
        let sources = self.interest_sources.sub_asset(&key, qty)?;
        self.owned = owned;
        self.interest_sources = sources;
        self.revision.touch();
        Ok(())
    }

    /// Record a 1:1 stablecoin substitution: `loss` leaves, `gain` arrives
    ///
    /// Both sides are applied to Owned and mirrored into SSEQ.
    pub fn convert_equivalent(&mut self, loss: &Amount, gain: &Amount) -> Result<()> {
        let owned = self.owned.sub_amount(loss)?.add_amount(gain)?;
        let sseq = self.sseq.sub_amount(loss)?.add_amount(gain)?;
        self.owned = owned;
        self.sseq = sseq;
        self.revision.touch();
        Ok(())
    }

    fn require_available(&self, amount: &Amount) -> Result<()> {
        let available = self.available(&amount.asset_id);
        if available < amount.quantity {
            return Err(Error::insufficient(
                amount.asset_id.as_str(),
                amount.quantity,
                available,
            ));
        }
        Ok(())
    }
}
