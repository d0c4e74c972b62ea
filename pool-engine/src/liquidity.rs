//! Adding and removing liquidity
//!
//! Deposits are sized from the base input. Quote is rounded up and shares
//! down, withdrawals floor both sides, so a provider never gains from
//! rounding.

use crate::{product::floor_fraction, Error, Pool, Result};
use serde::{Deserialize, Serialize};

/// Liquidity moved into or out of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityChange {
    /// Base quantity
    pub base: u64,
    /// Quote quantity
    pub quote: u64,
    /// Shares minted or burned
    pub shares: u64,
}

impl Pool {
    /// Size a deposit of `base` plus the matching quote
    pub fn quote_add_liquidity(&self, base: u64) -> Result<LiquidityChange> {
        if base == 0 {
            return Err(Error::InvalidInput("zero base deposit".to_string()));
        }
        let change = if self.shares == 0 {
            let quote = floor_fraction(base, self.initial_assets_ratio)?;
            let shares = base
                .checked_add(quote)
                .ok_or_else(|| Error::Math("initial shares overflow".to_string()))?;
            LiquidityChange { base, quote, shares }
        } else {
            if self.amount_base == 0 {
                return Err(Error::InsufficientLiquidity(format!(
                    "pool {} has shares but no base reserve",
                    self.pool_id
                )));
            }
            LiquidityChange {
                base,
                quote: mul_div(base, self.amount_quote, self.amount_base, true)?,
                shares: mul_div(base, self.shares, self.amount_base, false)?,
            }
        };
        if change.quote == 0 || change.shares == 0 {
            return Err(Error::InvalidInput(format!(
                "deposit of {} base is too small for pool {}",
                base, self.pool_id
            )));
        }
        Ok(change)
    }

    /// Size the withdrawal for burning `shares`
    pub fn quote_remove_liquidity(&self, shares: u64) -> Result<LiquidityChange> {
        if shares == 0 {
            return Err(Error::InvalidInput("zero shares".to_string()));
        }
        if shares > self.shares {
            return Err(Error::InsufficientLiquidity(format!(
                "burning {} of {} shares",
                shares, self.shares
            )));
        }
        Ok(LiquidityChange {
            base: mul_div(shares, self.amount_base, self.shares, false)?,
            quote: mul_div(shares, self.amount_quote, self.shares, false)?,
            shares,
        })
    }

    /// Credit reserves and shares by a deposit
    pub fn apply_deposit(&mut self, change: &LiquidityChange) -> Result<()> {
        let overflow = |what: &str| Error::Math(format!("{} of {} overflows", what, self.pool_id));
        let base = self.amount_base.checked_add(change.base).ok_or_else(|| overflow("base"))?;
        let quote = self.amount_quote.checked_add(change.quote).ok_or_else(|| overflow("quote"))?;
        let shares = self.shares.checked_add(change.shares).ok_or_else(|| overflow("shares"))?;
        self.amount_base = base;
        self.amount_quote = quote;
        self.shares = shares;
        Ok(())
    }

    /// Debit reserves and shares by a withdrawal
    pub fn apply_withdrawal(&mut self, change: &LiquidityChange) -> Result<()> {
        let short = |what: &str| {
            Error::InsufficientLiquidity(format!("{} of {} would go negative", what, self.pool_id))
        };
        let base = self.amount_base.checked_sub(change.base).ok_or_else(|| short("base"))?;
        let quote = self.amount_quote.checked_sub(change.quote).ok_or_else(|| short("quote"))?;
        let shares = self.shares.checked_sub(change.shares).ok_or_else(|| short("shares"))?;
        self.amount_base = base;
        self.amount_quote = quote;
        self.shares = shares;
        Ok(())
    }
}

/// `a × b / c` in u128, rounded up or down
fn mul_div(a: u64, b: u64, c: u64, round_up: bool) -> Result<u64> {
    if c == 0 {
        return Err(Error::Math(format!("{} × {} / 0", a, b)));
    }
    let product = a as u128 * b as u128;
    let c = c as u128;
    let mut result = product / c;
    if round_up && product % c != 0 {
        result += 1;
    }
    u64::try_from(result).map_err(|_| Error::Math(format!("{} × {} / {} overflows", a, b, c)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledger_core::AssetId;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn pool(base: u64, quote: u64, shares: u64) -> Pool {
        let mut pool = Pool::product(
            AssetId::new("BOND").unwrap(),
            AssetId::new("USD").unwrap(),
            Decimal::ZERO,
            Decimal::from_str("0.5").unwrap(),
            Utc::now(),
        )
        .unwrap();
        pool.amount_base = base;
        pool.amount_quote = quote;
        pool.shares = shares;
        pool
    }

    #[test]
    fn test_add_liquidity_scenario() {
        let mut pool = pool(10, 10_000, 10_010);
        let change = pool.quote_add_liquidity(1).unwrap();
        assert_eq!(change, LiquidityChange { base: 1, quote: 1_000, shares: 1_001 });
        pool.apply_deposit(&change).unwrap();
        assert_eq!((pool.amount_base, pool.amount_quote, pool.shares), (11, 11_000, 11_011));
    }

    #[test]
    fn test_empty_pool_uses_initial_ratio() {
        let change = pool(0, 0, 0).quote_add_liquidity(1_000).unwrap();
        assert_eq!(change, LiquidityChange { base: 1_000, quote: 500, shares: 1_500 });
        // floor(1 × 0.5) = 0
        assert!(pool(0, 0, 0).quote_add_liquidity(1).is_err());
    }

    #[test]
    fn test_quote_rounds_up_shares_down() {
        let change = pool(3, 10, 7).quote_add_liquidity(1).unwrap();
        assert_eq!(change.quote, 4);
        assert_eq!(change.shares, 2);
    }

    #[test]
    fn test_remove_liquidity() {
        let mut pool = pool(11, 11_000, 11_011);
        let change = pool.quote_remove_liquidity(1_001).unwrap();
        assert_eq!(change, LiquidityChange { base: 1, quote: 1_000, shares: 1_001 });
        pool.apply_withdrawal(&change).unwrap();
        assert_eq!((pool.amount_base, pool.amount_quote, pool.shares), (10, 10_000, 10_010));

        assert!(matches!(
            pool.quote_remove_liquidity(10_011),
            Err(Error::InsufficientLiquidity(_))
        ));
        assert!(pool.quote_remove_liquidity(0).is_err());
    }

    #[test]
    fn test_withdrawal_never_partially_applies() {
        let mut pool = pool(5, 5, 10);
        let change = LiquidityChange { base: 1, quote: 6, shares: 1 };
        assert!(pool.apply_withdrawal(&change).is_err());
        assert_eq!((pool.amount_base, pool.amount_quote, pool.shares), (5, 5, 10));
    }
}
