//! Transactional pool operations
//!
//! Every operation watches the pool record and the trader's position and
//! balance records, so a concurrent swap on the same pool or a concurrent
//! ledger write for the same user forces a clean retry.

use crate::{
    store::{load_pool, save_pool},
    swap::executed_price,
    Error, LiquidityChange, Pool, Result, SwapQuote,
};
use chrono::{DateTime, Utc};
use ledger_core::{
    records::keys, state, Amount, AssetRegistry, Config, KvStore, KvTransaction, Metrics,
    TransactionRunner,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Result of an executed swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapReceipt {
    /// Priced swap as applied
    pub quote: SwapQuote,
    /// Output per input in whole units
    pub executed_price: Decimal,
}

/// Pool engine over a shared store
pub struct PoolService<S: KvStore> {
    runner: TransactionRunner<S>,
    registry: AssetRegistry,
}

impl<S: KvStore> PoolService<S> {
    /// Create service
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

    /// Persist a new pool; both assets must be registered
    pub fn create_pool(&self, pool: Pool) -> Result<Pool> {
        self.registry.get(&pool.base_asset)?;
        self.registry.get(&pool.quote_asset)?;
        let key = keys::pool(pool.pool_id.as_str());
        self.runner.run(&[key], |txn| -> Result<()> {
            if load_pool(txn, pool.pool_id.as_str())?.is_some() {
                return Err(Error::InvalidInput(format!("pool {} already exists", pool.pool_id)));
            }
            save_pool(txn, &pool)
        })?;
        info!(
            pool_id = %pool.pool_id,
            product = pool.is_product_pool,
            fee_factor = %pool.fee_factor,
            "Pool created"
        );
        Ok(pool)
    }

    /// Current pool state
    pub fn pool(&self, pool_id: &str) -> Result<Pool> {
        let mut txn = self.runner.store().watch(&[])?;
        require(&mut *txn, pool_id)
    }

    /// Swap `amount_in` through a pool, paying at least `min_out`
    pub fn execute_swap(&self, user_id: &str, pool_id: &str, amount_in: &Amount, min_out: u64) -> Result<SwapReceipt> {
        self.execute_swap_at(user_id, pool_id, amount_in, min_out, Utc::now())
    }

    /// [`Self::execute_swap`] priced at `now`
    pub fn execute_swap_at(
        &self,
        user_id: &str,
        pool_id: &str,
        amount_in: &Amount,
        min_out: u64,
        now: DateTime<Utc>,
    ) -> Result<SwapReceipt> {
        let quote = self.runner.run(&watched(user_id, pool_id), |txn| -> Result<SwapQuote> {
            let mut pool = require(txn, pool_id)?;
            let quote = pool.quote_swap(&amount_in.asset_id, amount_in.quantity, now)?;
            if quote.amount_out < min_out {
                return Err(Error::Slippage {
                    minimum: min_out,
                    actual: quote.amount_out,
                });
            }
            pool.apply_swap(&quote)?;

            let mut position = state::load_position(txn, user_id)?;
            position.sub(amount_in)?;
            position.add(&Amount::new(quote.asset_out.clone(), quote.amount_out))?;
            state::save_position(txn, &mut position)?;
            save_pool(txn, &pool)?;
            Ok(quote)
        })?;

        let executed_price = executed_price(
            quote.amount_in,
            self.registry.decimals(&quote.asset_in)?,
            quote.amount_out,
            self.registry.decimals(&quote.asset_out)?,
        )?;
        info!(
            user_id,
            pool_id,
            asset_in = %quote.asset_in,
            amount_in = quote.amount_in,
            amount_out = quote.amount_out,
            fee = quote.fee,
            price = %executed_price,
            "Swap executed"
        );
        Ok(SwapReceipt { quote, executed_price })
    }

    /// Deposit `base` plus the matching quote, minting shares to the user
    pub fn provide_liquidity(&self, user_id: &str, pool_id: &str, base: u64) -> Result<LiquidityChange> {
        let change = self.runner.run(&watched(user_id, pool_id), |txn| -> Result<LiquidityChange> {
            let mut pool = require(txn, pool_id)?;
            let change = pool.quote_add_liquidity(base)?;
            pool.apply_deposit(&change)?;

            let mut position = state::load_position(txn, user_id)?;
            position.sub(&Amount::new(pool.base_asset.clone(), change.base))?;
            position.sub(&Amount::new(pool.quote_asset.clone(), change.quote))?;
            position.add(&Amount::new(pool.pool_id.clone(), change.shares))?;
            state::save_position(txn, &mut position)?;
            save_pool(txn, &pool)?;
            Ok(change)
        })?;
        info!(user_id, pool_id, base = change.base, quote = change.quote, shares = change.shares, "Liquidity added");
        Ok(change)
    }

    /// Burn `shares` for the proportional reserves
    pub fn withdraw_liquidity(&self, user_id: &str, pool_id: &str, shares: u64) -> Result<LiquidityChange> {
        let change = self.runner.run(&watched(user_id, pool_id), |txn| -> Result<LiquidityChange> {
            let mut pool = require(txn, pool_id)?;
            let change = pool.quote_remove_liquidity(shares)?;
            pool.apply_withdrawal(&change)?;

            let mut position = state::load_position(txn, user_id)?;
            position.sub(&Amount::new(pool.pool_id.clone(), change.shares))?;
            position.add(&Amount::new(pool.base_asset.clone(), change.base))?;
            position.add(&Amount::new(pool.quote_asset.clone(), change.quote))?;
            state::save_position(txn, &mut position)?;
            save_pool(txn, &pool)?;
            Ok(change)
        })?;
        info!(user_id, pool_id, base = change.base, quote = change.quote, shares = change.shares, "Liquidity removed");
        Ok(change)
    }

    /// Asset registry
    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }
}

fn require(txn: &mut dyn KvTransaction, pool_id: &str) -> Result<Pool> {
    load_pool(txn, pool_id)?.ok_or_else(|| Error::NotFound(pool_id.to_string()))
}

fn watched(user_id: &str, pool_id: &str) -> Vec<String> {
    vec![
        keys::pool(pool_id),
        keys::user_position(user_id),
        keys::user_balances(user_id),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{config::asset, AssetId, AssetUsage, ErrorKind, Ledger, MemoryStore};
    use std::str::FromStr;

    struct Fixture {
        ledger: Ledger<MemoryStore>,
        pools: PoolService<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let mut config = Config::default();
        config.assets = vec![
            asset("BOND", 0, false, AssetUsage::default()).unwrap(),
            asset("USD", 2, true, AssetUsage::default()).unwrap(),
        ];
        let store = Arc::new(MemoryStore::new());
        let pools = PoolService::new(store.clone(), &config);
        pools
            .create_pool(
                Pool::product(
                    AssetId::new("BOND").unwrap(),
                    AssetId::new("USD").unwrap(),
                    Decimal::from_str("0.01").unwrap(),
                    Decimal::ONE,
                    Utc::now(),
                )
                .unwrap(),
            )
            .unwrap();
        Fixture {
            ledger: Ledger::new(store, &config),
            pools,
        }
    }

    fn amt(asset: &str, q: u64) -> Amount {
        Amount::parse(asset, q).unwrap()
    }

    fn owned(f: &Fixture, user: &str, asset: &str) -> i64 {
        f.ledger
            .position(user)
            .unwrap()
            .owned()
            .get(&AssetId::new(asset).unwrap())
    }

    fn seeded() -> Fixture {
        let f = fixture();
        f.ledger.deposit("alice", &amt("BOND", 10_000)).unwrap();
        f.ledger.deposit("alice", &amt("USD", 10_000)).unwrap();
        let change = f.pools.provide_liquidity("alice", "BOND-USD", 5_000).unwrap();
        assert_eq!(change, LiquidityChange { base: 5_000, quote: 5_000, shares: 10_000 });
        f
    }

    #[test]
    fn test_liquidity_moves_user_funds() {
        let f = seeded();
        assert_eq!(owned(&f, "alice", "BOND"), 5_000);
        assert_eq!(owned(&f, "alice", "USD"), 5_000);
        assert_eq!(owned(&f, "alice", "BOND-USD"), 10_000);

        let change = f.pools.withdraw_liquidity("alice", "BOND-USD", 10_000).unwrap();
        assert_eq!((change.base, change.quote), (5_000, 5_000));
        assert_eq!(owned(&f, "alice", "BOND-USD"), 0);
        assert_eq!(f.pools.pool("BOND-USD").unwrap().shares, 0);
    }

    #[test]
    fn test_swap_executes_and_prices() {
        let f = seeded();
        f.ledger.deposit("bob", &amt("USD", 1_000)).unwrap();

        let receipt = f.pools.execute_swap("bob", "BOND-USD", &amt("USD", 1_000), 800).unwrap();
        // fee 10, 5000 × 990 / 5990
        assert_eq!((receipt.quote.amount_out, receipt.quote.fee), (826, 10));
        assert_eq!(receipt.executed_price, Decimal::from_str("82.6").unwrap());
        assert_eq!(owned(&f, "bob", "USD"), 0);
        assert_eq!(owned(&f, "bob", "BOND"), 826);

        let pool = f.pools.pool("BOND-USD").unwrap();
        assert_eq!((pool.amount_base, pool.amount_quote), (4_174, 6_000));
        assert_eq!(pool.fees_collected_quote, 10);
    }

    #[test]
    fn test_rejected_swaps_leave_state() {
        let f = seeded();
        f.ledger.deposit("bob", &amt("USD", 1_000)).unwrap();

        let err = f.pools.execute_swap("bob", "BOND-USD", &amt("USD", 1_000), 900).unwrap_err();
        assert!(matches!(err, Error::Slippage { minimum: 900, actual: 826 }));

        let err = f.pools.execute_swap("carol", "BOND-USD", &amt("USD", 100), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = f.pools.execute_swap("bob", "EUR-USD", &amt("USD", 100), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let pool = f.pools.pool("BOND-USD").unwrap();
        assert_eq!((pool.amount_base, pool.amount_quote), (5_000, 5_000));
        assert_eq!(owned(&f, "bob", "USD"), 1_000);
    }

    #[test]
    fn test_create_pool_rules() {
        let f = fixture();
        let duplicate = Pool::product(
            AssetId::new("BOND").unwrap(),
            AssetId::new("USD").unwrap(),
            Decimal::ZERO,
            Decimal::ONE,
            Utc::now(),
        )
        .unwrap();
        assert!(matches!(f.pools.create_pool(duplicate), Err(Error::InvalidInput(_))));

        let unknown = Pool::product(
            AssetId::new("EUR").unwrap(),
            AssetId::new("USD").unwrap(),
            Decimal::ZERO,
            Decimal::ONE,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(f.pools.create_pool(unknown).unwrap_err().kind(), ErrorKind::NotFound);
    }
}
