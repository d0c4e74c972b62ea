//! Ledger service
//!
//! Composes the pure mutators of [`Position`], [`Module`] and [`Balance`]
//! inside optimistic transactions. Every operation watches the records it
//! reads, so a concurrent writer forces a clean retry.
//!
//! # Example
//!
//! ```
//! use ledger_core::{storage::MemoryStore, Amount, Config, Ledger};
//! use std::sync::Arc;
//!
//! # fn main() -> ledger_core::Result<()> {
//! let mut config = Config::default();
//! config.assets.push(ledger_core::config::asset("USD", 2, true, Default::default())?);
//!
//! let ledger = Ledger::new(Arc::new(MemoryStore::new()), &config);
//! ledger.deposit("alice", &Amount::parse("USD", 1_000)?)?;
//! let balance = ledger.lock("alice", &Amount::parse("USD", 200)?)?;
//! assert_eq!((balance.available, balance.locked), (800, 200));
//! # Ok(())
//! # }
//! ```

use crate::{
    metrics::Metrics,
    records::{decode_balances, decode_prices, keys, InterestRecord, PriceRecord, Record},
    state,
    storage::{KvStore, KvTransaction},
    transaction::TransactionRunner,
    Amount, AssetId, AssetRegistry, Balance, Config, Error, Module, Position, Result,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Main ledger interface
pub struct Ledger<S: KvStore> {
    runner: TransactionRunner<S>,
    registry: AssetRegistry,
}

impl<S: KvStore> Ledger<S> {
    /// Create ledger over a store
    pub fn new(store: Arc<S>, config: &Config) -> Self {
        Self {
            runner: TransactionRunner::new(store, config.transaction.clone()),
            registry: config.registry(),
        }
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.runner = self.runner.with_metrics(metrics);
        self
    }

    /// Asset registry
    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    /// Transaction runner, for composing custom operations
    pub fn runner(&self) -> &TransactionRunner<S> {
        &self.runner
    }

    /// Credit externally received funds
    pub fn deposit(&self, user_id: &str, amount: &Amount) -> Result<Balance> {
        self.validate(amount)?;
        let balance = self.with_position(user_id, false, |position, _| position.add(amount), amount)?;
        info!(user_id, asset = %amount.asset_id, quantity = amount.quantity, "Deposit");
        Ok(balance)
    }

    /// Debit funds leaving the platform
    pub fn withdraw_funds(&self, user_id: &str, amount: &Amount) -> Result<Balance> {
        self.validate(amount)?;
        let balance = self.with_position(user_id, false, |position, _| position.sub(amount), amount)?;
        info!(user_id, asset = %amount.asset_id, quantity = amount.quantity, "Withdrawal");
        Ok(balance)
    }

    /// Reserve available funds
    pub fn lock(&self, user_id: &str, amount: &Amount) -> Result<Balance> {
        self.validate(amount)?;
        self.with_position(user_id, false, |position, _| position.lock(amount), amount)
    }

    /// Release reserved funds (clamps at what is locked)
    pub fn unlock(&self, user_id: &str, amount: &Amount) -> Result<Balance> {
        self.validate(amount)?;
        self.with_position(user_id, false, |position, _| position.unlock(amount), amount)
    }

    /// Supply available funds to the lending pool
    pub fn supply(&self, user_id: &str, amount: &Amount) -> Result<Balance> {
        self.validate(amount)?;
        let balance = self.with_position(
            user_id,
            true,
            |position, module| {
                position.supply(amount)?;
                module.supply(amount)
            },
            amount,
        )?;
        info!(user_id, asset = %amount.asset_id, quantity = amount.quantity, "Supplied");
        Ok(balance)
    }

    /// Withdraw supplied funds
    pub fn withdraw(&self, user_id: &str, amount: &Amount) -> Result<Balance> {
        self.validate(amount)?;
        let balance = self.with_position(
            user_id,
            true,
            |position, module| {
                position.withdraw(amount)?;
                module.withdraw(amount)
            },
            amount,
        )?;
        info!(user_id, asset = %amount.asset_id, quantity = amount.quantity, "Withdrew supply");
        Ok(balance)
    }

    /// Borrow from the module, directly or as virtual debt
    pub fn borrow(&self, user_id: &str, amount: &Amount) -> Result<Balance> {
        self.validate(amount)?;
        let usage = self.registry.usage(&amount.asset_id);
        let is_virtual = usage.virtual_borrow;
        let balance = self.run_user(user_id, true, |txn| {
            let mut module = state::load_module(txn)?;
            if !module.can_borrow(amount, usage) {
                return Err(Error::InvalidInput(format!("cannot borrow {}", amount)));
            }
            let mut position = state::load_position(txn, user_id)?;
            let record = state::load_balance(txn, user_id, &amount.asset_id)?.borrow(amount, is_virtual)?;
            module.borrow(amount, is_virtual)?;
            position.add(amount)?;
            state::save_balance(txn, user_id, &record)?;
            state::save_position(txn, &mut position)?;
            state::save_module(txn, &mut module)?;
            state::load_balance(txn, user_id, &amount.asset_id)
        })?;
        info!(user_id, asset = %amount.asset_id, quantity = amount.quantity, is_virtual, "Borrowed");
        Ok(balance)
    }

    /// Repay borrowed or virtual debt out of available funds
    pub fn repay(&self, user_id: &str, amount: &Amount) -> Result<Balance> {
        self.validate(amount)?;
        let is_virtual = self.registry.usage(&amount.asset_id).virtual_borrow;
        let balance = self.run_user(user_id, true, |txn| {
            let mut module = state::load_module(txn)?;
            let mut position = state::load_position(txn, user_id)?;
            let record = state::load_balance(txn, user_id, &amount.asset_id)?.repay(amount, is_virtual)?;
            position.sub(amount)?;
            module.repay(amount, is_virtual)?;
            state::save_balance(txn, user_id, &record)?;
            state::save_position(txn, &mut position)?;
            state::save_module(txn, &mut module)?;
            state::load_balance(txn, user_id, &amount.asset_id)
        })?;
        info!(user_id, asset = %amount.asset_id, quantity = amount.quantity, is_virtual, "Repaid");
        Ok(balance)
    }

    /// Move a user's funds into the coupon reserve for a period
    pub fn fund_coupons(&self, user_id: &str, amount: &Amount, period_end: i64) -> Result<()> {
        self.validate(amount)?;
        self.run_user(user_id, true, |txn| {
            let mut position = state::load_position(txn, user_id)?;
            let mut module = state::load_module(txn)?;
            position.sub(amount)?;
            module.add_coupon_funds(amount, period_end)?;
            state::save_position(txn, &mut position)?;
            state::save_module(txn, &mut module)?;
            Ok(())
        })?;
        info!(user_id, asset = %amount.asset_id, quantity = amount.quantity, period_end, "Coupon funds added");
        Ok(())
    }

    /// Accrue interest from `source` for one coupon period
    pub fn record_interest(&self, user_id: &str, source: &AssetId, period_end: i64, quantity: u64) -> Result<InterestRecord> {
        if quantity == 0 {
            return Err(Error::InvalidInput("zero interest".to_string()));
        }
        let user_key = keys::user_interest(user_id);
        let mut watched = Self::user_keys(user_id, false);
        watched.extend([user_key.clone(), keys::MODULE_INTEREST.to_string()]);

        let record = self.runner.run(&watched, |txn| -> Result<InterestRecord> {
            let mut position = state::load_position(txn, user_id)?;
            position.accrue_interest(source, period_end, quantity)?;

            let now = Utc::now();
            let mut earned = state::load_interest(txn, &user_key)?;
            earned.earned = earned.earned.add_asset(source, signed(quantity)?)?;
            earned.last_updated = now;
            let mut owed = state::load_interest(txn, keys::MODULE_INTEREST)?;
            owed.owed = owed.owed.add_asset(source, signed(quantity)?)?;
            owed.last_updated = now;

            state::save_position(txn, &mut position)?;
            state::save_interest(txn, &user_key, &earned)?;
            state::save_interest(txn, keys::MODULE_INTEREST, &owed)?;
            Ok(earned)
        })?;
        info!(user_id, source = %source, period_end, quantity, "Interest accrued");
        Ok(record)
    }

    /// Pay accrued interest out of the coupon reserve
    pub fn claim_interest(&self, user_id: &str, source: &AssetId, period_end: i64, payout: &Amount) -> Result<InterestRecord> {
        self.validate(payout)?;
        let user_key = keys::user_interest(user_id);
        let mut watched = Self::user_keys(user_id, true);
        watched.extend([user_key.clone(), keys::MODULE_INTEREST.to_string()]);

        let record = self.runner.run(&watched, |txn| -> Result<InterestRecord> {
            let mut position = state::load_position(txn, user_id)?;
            let mut module = state::load_module(txn)?;
            position.claim_interest(source, period_end, payout.quantity)?;
            module.pay_coupon(payout, period_end)?;
            position.add(payout)?;

            let now = Utc::now();
            let mut claimed = state::load_interest(txn, &user_key)?;
            claimed.claimed = claimed.claimed.add_asset(source, payout.signed()?)?;
            claimed.last_updated = now;
            let mut paid = state::load_interest(txn, keys::MODULE_INTEREST)?;
            paid.paid = paid.paid.add_asset(source, payout.signed()?)?;
            paid.last_updated = now;

            state::save_position(txn, &mut position)?;
            state::save_module(txn, &mut module)?;
            state::save_interest(txn, &user_key, &claimed)?;
            state::save_interest(txn, keys::MODULE_INTEREST, &paid)?;
            Ok(claimed)
        })?;
        info!(user_id, source = %source, period_end, payout = %payout, "Interest claimed");
        Ok(record)
    }

    /// Start tracking total supply of an asset for a period
    pub fn track_supply(&self, asset: &AssetId, period_end: i64) -> Result<()> {
        self.with_module(|module| module.track_supply(asset, period_end))
    }

    /// Record observed total supply at a period end
    pub fn record_supply_snapshot(&self, asset: &AssetId, period_end: i64, supply: u64) -> Result<()> {
        self.with_module(|module| module.record_supply_snapshot(asset, period_end, supply))
    }

    /// Set a reference price
    pub fn set_price(&self, asset: &AssetId, price: Decimal) -> Result<()> {
        if price.is_sign_negative() {
            return Err(Error::InvalidInput(format!("negative price {} for {}", price, asset)));
        }
        self.registry.get(asset)?;
        let record = PriceRecord {
            asset_id: asset.clone(),
            price,
        };
        let json = serde_json::to_string(&record)?;
        self.runner.run(&[keys::PRICES.to_string()], |txn| {
            txn.put_fields(keys::PRICES, Record::from([(asset.to_string(), json.clone())]))
        })
    }

    /// One asset of a user's balance record; zero when absent
    pub fn balance(&self, user_id: &str, asset: &AssetId) -> Result<Balance> {
        self.read(|txn| state::load_balance(txn, user_id, asset))
    }

    /// Every asset of a user's balance record
    pub fn balances(&self, user_id: &str) -> Result<BTreeMap<AssetId, Balance>> {
        self.read(|txn| decode_balances(&txn.get_all(&keys::user_balances(user_id))?))
    }

    /// Module per-asset balances
    pub fn module_balances(&self) -> Result<BTreeMap<AssetId, Balance>> {
        self.read(|txn| decode_balances(&txn.get_all(keys::MODULE_BALANCES)?))
    }

    /// A user's position; initial when absent
    pub fn position(&self, user_id: &str) -> Result<Position> {
        self.read(|txn| state::load_position(txn, user_id))
    }

    /// Module state; initial when absent
    pub fn module_state(&self) -> Result<Module> {
        self.read(state::load_module)
    }

    /// A user's interest record; empty when absent
    pub fn interest(&self, user_id: &str) -> Result<InterestRecord> {
        self.read(|txn| state::load_interest(txn, &keys::user_interest(user_id)))
    }

    /// System-wide interest record
    pub fn module_interest(&self) -> Result<InterestRecord> {
        self.read(|txn| state::load_interest(txn, keys::MODULE_INTEREST))
    }

    /// Price table
    pub fn prices(&self) -> Result<BTreeMap<AssetId, PriceRecord>> {
        self.read(|txn| decode_prices(&txn.get_all(keys::PRICES)?))
    }

    fn validate(&self, amount: &Amount) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::InvalidInput(format!("zero amount of {}", amount.asset_id)));
        }
        if !amount.asset_id.is_plain() {
            return Err(Error::InvalidInput(format!(
                "{} is not a plain asset",
                amount.asset_id
            )));
        }
        self.registry.get(&amount.asset_id)?;
        Ok(())
    }

    fn user_keys(user_id: &str, with_module: bool) -> Vec<String> {
        let mut watched = vec![keys::user_position(user_id), keys::user_balances(user_id)];
        if with_module {
            watched.push(keys::MODULE_POSITION.to_string());
            watched.push(keys::MODULE_BALANCES.to_string());
        }
        watched
    }

    fn run_user<T, F>(&self, user_id: &str, with_module: bool, body: F) -> Result<T>
    where
        F: FnMut(&mut dyn KvTransaction) -> Result<T>,
    {
        self.runner.run(&Self::user_keys(user_id, with_module), body)
    }

    fn with_position<F>(&self, user_id: &str, with_module: bool, mut apply: F, amount: &Amount) -> Result<Balance>
    where
        F: FnMut(&mut Position, &mut Module) -> Result<()>,
    {
        self.run_user(user_id, with_module, |txn| {
            let mut position = state::load_position(txn, user_id)?;
            let mut module = if with_module {
                state::load_module(txn)?
            } else {
                Module::initial()
            };
            apply(&mut position, &mut module)?;
            state::save_position(txn, &mut position)?;
            if with_module {
                state::save_module(txn, &mut module)?;
            }
            state::load_balance(txn, user_id, &amount.asset_id)
        })
    }

    fn with_module<F>(&self, mut apply: F) -> Result<()>
    where
        F: FnMut(&mut Module) -> Result<()>,
    {
        let watched = [keys::MODULE_POSITION.to_string(), keys::MODULE_BALANCES.to_string()];
        self.runner.run(&watched, |txn| {
            let mut module = state::load_module(txn)?;
            apply(&mut module)?;
            state::save_module(txn, &mut module)?;
            Ok(())
        })
    }

    fn read<T, F>(&self, mut body: F) -> Result<T>
    where
        F: FnMut(&mut dyn KvTransaction) -> Result<T>,
    {
        let mut txn = self.runner.store().watch(&[])?;
        body(&mut *txn)
    }
}

fn signed(quantity: u64) -> Result<i64> {
    i64::try_from(quantity).map_err(|_| Error::Overflow(format!("quantity {}", quantity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::asset;
    use crate::storage::MemoryStore;
    use crate::{AssetUsage, ErrorKind};
    use std::str::FromStr;

    fn ledger() -> (Ledger<MemoryStore>, Arc<MemoryStore>) {
        let mut config = Config::default();
        config.assets = vec![
            asset("USD", 2, true, AssetUsage { borrowable: true, virtual_borrow: false }).unwrap(),
            asset("USDC", 6, true, AssetUsage::default()).unwrap(),
            asset("BOND", 0, false, AssetUsage { borrowable: true, virtual_borrow: true }).unwrap(),
        ];
        let store = Arc::new(MemoryStore::new());
        (Ledger::new(store.clone(), &config), store)
    }

    fn amt(asset: &str, q: u64) -> Amount {
        Amount::parse(asset, q).unwrap()
    }

    fn id(s: &str) -> AssetId {
        AssetId::new(s).unwrap()
    }

    #[test]
    fn test_lock_supply_withdraw_scenario() {
        let (ledger, _) = ledger();
        ledger.deposit("alice", &amt("USD", 1000)).unwrap();

        let b = ledger.lock("alice", &amt("USD", 200)).unwrap();
        assert_eq!((b.available, b.locked), (800, 200));

        let b = ledger.supply("alice", &amt("USD", 300)).unwrap();
        assert_eq!((b.available, b.supplied), (500, 300));

        let b = ledger.withdraw("alice", &amt("USD", 100)).unwrap();
        assert_eq!((b.available, b.supplied), (600, 200));

        let module = ledger.module_balances().unwrap();
        assert_eq!(module[&id("USD")].supplied, 200);
        assert_eq!(ledger.position("alice").unwrap().sequence(), 4);
    }

    #[test]
    fn test_rejections_leave_state() {
        let (ledger, store) = ledger();
        ledger.deposit("alice", &amt("USD", 10)).unwrap();
        let before = store.get_all("positions:users:alice");

        let err = ledger.withdraw_funds("alice", &amt("USD", 11)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(ledger.deposit("alice", &amt("USD", 0)).unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(ledger.deposit("alice", &amt("EUR", 1)).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(ledger.deposit("alice", &amt("BOND-USD", 1)).unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(store.get_all("positions:users:alice"), before);
    }

    #[test]
    fn test_direct_borrow_and_repay() {
        let (ledger, _) = ledger();
        ledger.deposit("lender", &amt("USD", 500)).unwrap();
        ledger.supply("lender", &amt("USD", 500)).unwrap();

        assert!(ledger.borrow("bob", &amt("USD", 501)).is_err());
        let b = ledger.borrow("bob", &amt("USD", 200)).unwrap();
        assert_eq!((b.available, b.borrowed, b.virtual_), (200, 200, 0));
        assert_eq!(ledger.module_state().unwrap().unborrowed(&id("USD")), 300);

        // lender cannot pull what is lent out
        assert!(ledger.withdraw("lender", &amt("USD", 301)).is_err());

        let b = ledger.repay("bob", &amt("USD", 200)).unwrap();
        assert!(b.is_zero());
        assert_eq!(ledger.module_state().unwrap().unborrowed(&id("USD")), 500);
    }

    #[test]
    fn test_virtual_borrow() {
        let (ledger, _) = ledger();
        ledger.deposit("lender", &amt("USD", 100)).unwrap();
        ledger.supply("lender", &amt("USD", 100)).unwrap();

        let b = ledger.borrow("bob", &amt("BOND", 60)).unwrap();
        assert_eq!((b.available, b.borrowed, b.virtual_), (60, 0, 60));
        assert!(ledger.borrow("bob", &amt("BOND", 41)).is_err());
        assert!(ledger.borrow("bob", &amt("USDC", 1)).is_err());
    }

    #[test]
    fn test_interest_flow() {
        let (ledger, _) = ledger();
        ledger.deposit("issuer", &amt("USD", 1_000)).unwrap();
        ledger.fund_coupons("issuer", &amt("USD", 300), 1_700_000_000).unwrap();

        let record = ledger.record_interest("alice", &id("BOND"), 1_700_000_000, 120).unwrap();
        assert_eq!(record.earned.get(&id("BOND")), 120);
        assert_eq!(ledger.module_interest().unwrap().owed.get(&id("BOND")), 120);

        let record = ledger
            .claim_interest("alice", &id("BOND"), 1_700_000_000, &amt("USD", 120))
            .unwrap();
        assert_eq!(record.unclaimed().unwrap().get(&id("BOND")), 0);
        assert_eq!(ledger.balance("alice", &id("USD")).unwrap().available, 120);
        assert_eq!(ledger.module_state().unwrap().coupon_funds().get(&id("USD")), 180);
        assert!(ledger.interest("nobody").unwrap().earned.is_empty());
    }

    #[test]
    fn test_prices() {
        let (ledger, _) = ledger();
        ledger.set_price(&id("BOND"), Decimal::from_str("0.9875").unwrap()).unwrap();
        assert!(ledger.set_price(&id("EUR"), Decimal::ONE).is_err());
        assert!(ledger.set_price(&id("BOND"), Decimal::from(-1)).is_err());
        let prices = ledger.prices().unwrap();
        assert_eq!(prices[&id("BOND")].price, Decimal::from_str("0.9875").unwrap());
    }

    #[test]
    fn test_supply_snapshots() {
        let (ledger, _) = ledger();
        ledger.track_supply(&id("BOND"), 42).unwrap();
        ledger.record_supply_snapshot(&id("BOND"), 42, 9_000).unwrap();
        let module = ledger.module_state().unwrap();
        assert_eq!(module.supply_snapshot(&id("BOND"), 42).unwrap(), Some(9_000));
    }
}
