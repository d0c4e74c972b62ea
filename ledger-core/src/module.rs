//! System-wide asset state
//!
//! The module is the lending pool and coupon reserve shared by all users.
//! It follows the same dirty-tracking and sequence discipline as
//! [`Position`](crate::Position).

use crate::{revision::Revision, Amount, AssetId, AssetUsage, Balance, Balances, Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Supply snapshot value meaning "tracked but not yet recorded"
pub const SNAPSHOT_PENDING: i64 = -1;

/// Aggregate system state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Net store of pooled, unborrowed tokens
    #[serde(default)]
    balance: Balances,

    /// Total supplied by users
    #[serde(default)]
    supplied: Balances,

    /// Minted virtual debt
    #[serde(default, rename = "virtual")]
    virtual_: Balances,

    /// Directly borrowed from pooled supply
    #[serde(default)]
    borrowed: Balances,

    /// LP-funded interest reserve, kept apart from `balance`
    #[serde(default)]
    coupon_funds: Balances,

    /// Provenance of coupon funds by `{asset}-Coupon_{period}`
    #[serde(default)]
    dollar_coupon_fund_sources: Balances,

    /// Total supply per `{asset}-Snapshot_{period}`
    #[serde(default)]
    total_supply_snapshots: Balances,

    #[serde(flatten)]
    revision: Revision,
}

impl Module {
    /// Fresh, empty module state
    pub fn initial() -> Self {
        Self {
            revision: Revision::default().loaded(),
            ..Default::default()
        }
    }

    /// Decode persisted state and capture it as the baseline
    pub fn load(json: &str) -> Result<Self> {
        let mut module: Module = serde_json::from_str(json)
            .map_err(|e| Error::InvalidData(format!("module: {}", e)))?;
        module.balance.ensure_non_negative("module balance")?;
        module.supplied.ensure_non_negative("module supplied")?;
        module.virtual_.ensure_non_negative("module virtual")?;
        module.borrowed.ensure_non_negative("module borrowed")?;
        module.coupon_funds.ensure_non_negative("coupon funds")?;
        module
            .dollar_coupon_fund_sources
            .ensure_non_negative("coupon fund sources")?;
        if let Some((asset, qty)) = module
            .total_supply_snapshots
            .iter()
            .find(|(_, qty)| *qty < SNAPSHOT_PENDING)
        {
            return Err(Error::InvalidData(format!(
                "supply snapshot {} holds {}",
                asset, qty
            )));
        }
        module.revision = module.revision.loaded();
        Ok(module)
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

    /// Net store
    pub fn balances(&self) -> &Balances {
        &self.balance
    }

    /// Total supplied
    pub fn supplied(&self) -> &Balances {
        &self.supplied
    }

    /// Virtual debt
    pub fn virtual_debt(&self) -> &Balances {
        &self.virtual_
    }

    /// Direct debt
    pub fn borrowed(&self) -> &Balances {
        &self.borrowed
    }

    /// Coupon reserve
    pub fn coupon_funds(&self) -> &Balances {
        &self.coupon_funds
    }

    /// Coupon provenance
    pub fn coupon_fund_sources(&self) -> &Balances {
        &self.dollar_coupon_fund_sources
    }

    /// Per-asset breakdown view
    pub fn balance(&self, asset: &AssetId) -> Balance {
        let mut view = Balance::zero(asset.clone());
        view.available = self.balance.get(asset).max(0) as u64;
        view.supplied = self.supplied.get(asset).max(0) as u64;
        view.borrowed = self.borrowed.get(asset).max(0) as u64;
        view.virtual_ = self.virtual_.get(asset).max(0) as u64;
        view
    }

    /// Pooled tokens not lent out
    pub fn unborrowed(&self, asset: &AssetId) -> u64 {
        self.balance.get(asset).max(0) as u64
    }

    /// User supplies tokens to the pool
    pub fn supply(&mut self, amount: &Amount) -> Result<()> {
        let balance = self.balance.add_amount(amount)?;
        let supplied = self.supplied.add_amount(amount)?;
        self.balance = balance;
        self.supplied = supplied;
        self.revision.touch();
        Ok(())
    }

    /// User withdraws supplied tokens; requires unborrowed liquidity
    pub fn withdraw(&mut self, amount: &Amount) -> Result<()> {
        let qty = amount.signed()?;
        let asset = &amount.asset_id;
        if self.supplied.get(asset) < qty {
            return Err(Error::insufficient(asset.as_str(), qty, self.supplied.get(asset)));
        }
        if self.balance.get(asset) < qty {
            return Err(Error::insufficient(asset.as_str(), qty, self.balance.get(asset)));
        }
        let balance = self.balance.sub_asset(asset, qty)?;
        let supplied = self.supplied.sub_asset(asset, qty)?;
        self.balance = balance;
        self.supplied = supplied;
        self.revision.touch();
        Ok(())
    }

    /// Lend tokens out, directly from the pool or as virtual debt
    pub fn borrow(&mut self, amount: &Amount, is_virtual: bool) -> Result<()> {
        if is_virtual {
            let virtual_ = self.virtual_.add_amount(amount)?;
            self.virtual_ = virtual_;
        } else {
            let qty = amount.signed()?;
            let held = self.balance.get(&amount.asset_id);
            if held < qty {
                return Err(Error::insufficient(amount.asset_id.as_str(), qty, held));
            }
            let balance = self.balance.sub_asset(&amount.asset_id, qty)?;
            let borrowed = self.borrowed.add_amount(amount)?;
            self.balance = balance;
            self.borrowed = borrowed;
        }
        self.revision.touch();
        Ok(())
    }

    /// Take repaid tokens back
    pub fn repay(&mut self, amount: &Amount, is_virtual: bool) -> Result<()> {
        let qty = amount.signed()?;
        let asset = &amount.asset_id;
        if is_virtual {
            let owed = self.virtual_.get(asset);
            if owed < qty {
                return Err(Error::insufficient(asset.as_str(), qty, owed));
            }
            let virtual_ = self.virtual_.sub_asset(asset, qty)?;
            self.virtual_ = virtual_;
        } else {
            let owed = self.borrowed.get(asset);
            if owed < qty {
                return Err(Error::insufficient(asset.as_str(), qty, owed));
            }
            let borrowed = self.borrowed.sub_asset(asset, qty)?;
            let balance = self.balance.add_amount(amount)?;
            self.borrowed = borrowed;
            self.balance = balance;
        }
        self.revision.touch();
        Ok(())
    }

    /// Whether the module can lend `requested`
    ///
    /// Direct borrows need enough unborrowed balance of the asset. Virtual
    /// borrows pass a single global check, Σborrowed + Σvirtual + requested ≤
    /// Σsupplied, summed across assets without decimal normalisation or a
    /// utilisation cap.
    // TODO: normalise by asset decimals and apply a per-asset utilisation cap
    pub fn can_borrow(&self, requested: &Amount, usage: AssetUsage) -> bool {
        if requested.is_zero() {
            return true;
        }
        if !usage.borrowable {
            return false;
        }
        if !usage.virtual_borrow {
            return self.unborrowed(&requested.asset_id) >= requested.quantity;
        }
        let (Ok(borrowed), Ok(virtual_), Ok(supplied)) = (
            self.borrowed.total(),
            self.virtual_.total(),
            self.supplied.total(),
        ) else {
            return false;
        };
        borrowed as i128 + virtual_ as i128 + requested.quantity as i128 <= supplied as i128
    }

    /// Fund the coupon reserve for one coupon period
    pub fn add_coupon_funds(&mut self, amount: &Amount, period_end: i64) -> Result<()> {
        let key = AssetId::coupon_source(&amount.asset_id, period_end)?;
        let funds = self.coupon_funds.add_amount(amount)?;
        let sources = self.dollar_coupon_fund_sources.add_asset(&key, amount.signed()?)?;
        self.coupon_funds = funds;
        self.dollar_coupon_fund_sources = sources;
        self.revision.touch();
        Ok(())
    }

    /// Pay a coupon out of the reserve funded for that period
    pub fn pay_coupon(&mut self, amount: &Amount, period_end: i64) -> Result<()> {
        let key = AssetId::coupon_source(&amount.asset_id, period_end)?;
        let qty = amount.signed()?;
        let sourced = self.dollar_coupon_fund_sources.get(&key);
        if sourced < qty {
            return Err(Error::insufficient(key.as_str(), qty, sourced));
        }
        let held = self.coupon_funds.get(&amount.asset_id);
        if held < qty {
            return Err(Error::insufficient(amount.asset_id.as_str(), qty, held));
        }
        let funds = self.coupon_funds.sub_asset(&amount.asset_id, qty)?;
        let sources = self.dollar_coupon_fund_sources.sub_asset(&key, qty)?;
        self.coupon_funds = funds;
        self.dollar_coupon_fund_sources = sources;
        self.revision.touch();
        Ok(())
    }

    /// Start tracking total supply for a period; no-op if already tracked
    pub fn track_supply(&mut self, asset: &AssetId, period_end: i64) -> Result<()> {
        let key = AssetId::supply_snapshot(asset, period_end)?;
        if self.total_supply_snapshots.get(&key) != 0 {
            return Ok(());
        }
        self.total_supply_snapshots.set(key, SNAPSHOT_PENDING);
        self.revision.touch();
        Ok(())
    }

    /// Record the total supply observed at a period end
    pub fn record_supply_snapshot(&mut self, asset: &AssetId, period_end: i64, supply: u64) -> Result<()> {
        if supply == 0 {
            return Err(Error::InvalidInput(format!(
                "supply snapshot for {} must be positive",
                asset
            )));
        }
        let key = AssetId::supply_snapshot(asset, period_end)?;
        let value = i64::try_from(supply)
            .map_err(|_| Error::Overflow(format!("supply {} of {}", supply, asset)))?;
        self.total_supply_snapshots.set(key, value);
        self.revision.touch();
        Ok(())
    }

    /// Recorded total supply; `None` when untracked or still pending
    pub fn supply_snapshot(&self, asset: &AssetId, period_end: i64) -> Result<Option<u64>> {
        let key = AssetId::supply_snapshot(asset, period_end)?;
        Ok(match self.total_supply_snapshots.get(&key) {
            qty if qty > 0 => Some(qty as u64),
            _ => None,
        })
    }

    /// Whether a period is tracked but not yet recorded
    pub fn supply_pending(&self, asset: &AssetId, period_end: i64) -> Result<bool> {
        let key = AssetId::supply_snapshot(asset, period_end)?;
        Ok(self.total_supply_snapshots.get(&key) == SNAPSHOT_PENDING)
    }
}
