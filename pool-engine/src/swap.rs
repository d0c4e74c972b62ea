//! Swap quoting and application

use crate::{product, yield_curve, Error, Pool, Result};
use chrono::{DateTime, Utc};
use ledger_core::AssetId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Priced swap, ready to apply to the pool it was quoted on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapQuote {
    /// Pool quoted against
    pub pool_id: AssetId,
    /// Asset paid in
    pub asset_in: AssetId,
    /// Asset paid out
    pub asset_out: AssetId,
    /// Quantity paid in, fee included
    pub amount_in: u64,
    /// Quantity paid out
    pub amount_out: u64,
    /// Fee retained by the pool
    pub fee: u64,
    /// Asset the fee is denominated in
    pub fee_asset: AssetId,
}

impl Pool {
    /// Price a swap without touching reserves
    pub fn quote_swap(&self, asset_in: &AssetId, amount_in: u64, now: DateTime<Utc>) -> Result<SwapQuote> {
        let asset_out = self.counter_asset(asset_in)?.clone();
        let reserve_in = self.reserve(asset_in)?;
        let reserve_out = self.reserve(&asset_out)?;

        let (amount_out, fee, fee_asset) = if self.is_product_pool {
            let priced = product::swap(reserve_in, reserve_out, amount_in, self.fee_factor)?;
            (priced.amount_out, priced.fee, asset_in.clone())
        } else {
            let t = self.time_remaining(now);
            let base_in = asset_in == &self.base_asset;
            let priced = yield_curve::swap(reserve_in, reserve_out, amount_in, t, self.fee_factor, base_in)?;
            // matured pools take their fee from the input
            let fee_asset = if t.is_zero() { asset_in.clone() } else { asset_out.clone() };
            (priced.amount_out, priced.fee, fee_asset)
        };
        if amount_out == 0 {
            return Err(Error::InvalidInput(format!(
                "swap of {} {} yields nothing",
                amount_in, asset_in
            )));
        }

        Ok(SwapQuote {
            pool_id: self.pool_id.clone(),
            asset_in: asset_in.clone(),
            asset_out,
            amount_in,
            amount_out,
            fee,
            fee_asset,
        })
    }

    /// Move reserves and fee counters by a quote
    ///
    /// All of `amount_in` joins the input reserve; output-side fees never
    /// leave the output reserve.
    pub fn apply_swap(&mut self, quote: &SwapQuote) -> Result<()> {
        if quote.pool_id != self.pool_id {
            return Err(Error::InvalidInput(format!(
                "quote for {} applied to {}",
                quote.pool_id, self.pool_id
            )));
        }
        let base_in = quote.asset_in == self.base_asset;
        let (reserve_in, reserve_out) = if base_in {
            (self.amount_base, self.amount_quote)
        } else {
            (self.amount_quote, self.amount_base)
        };
        let new_in = reserve_in
            .checked_add(quote.amount_in)
            .ok_or_else(|| Error::Math(format!("{} reserve overflows", quote.asset_in)))?;
        let new_out = reserve_out.checked_sub(quote.amount_out).ok_or_else(|| {
            Error::InsufficientLiquidity(format!(
                "{} reserve {} below {}",
                quote.asset_out, reserve_out, quote.amount_out
            ))
        })?;
        let fee_on_base = quote.fee_asset == self.base_asset;
        let fees = if fee_on_base {
            self.fees_collected_base
        } else {
            self.fees_collected_quote
        };
        let fees = fees
            .checked_add(quote.fee)
            .ok_or_else(|| Error::Math("fee counter overflows".to_string()))?;

        if base_in {
            self.amount_base = new_in;
            self.amount_quote = new_out;
        } else {
            self.amount_quote = new_in;
            self.amount_base = new_out;
        }
        if fee_on_base {
            self.fees_collected_base = fees;
        } else {
            self.fees_collected_quote = fees;
        }
        Ok(())
    }
}

/// `(out / 10^dec_out) / (in / 10^dec_in)`
pub fn executed_price(amount_in: u64, decimals_in: u32, amount_out: u64, decimals_out: u32) -> Result<Decimal> {
    if amount_in == 0 {
        return Err(Error::InvalidInput("price of a zero input".to_string()));
    }
    let scaled = |quantity: u64, decimals: u32| {
        Decimal::try_from_i128_with_scale(quantity as i128, decimals)
            .map_err(|e| Error::Math(format!("{} at scale {}: {}", quantity, decimals, e)))
    };
    scaled(amount_out, decimals_out)?
        .checked_div(scaled(amount_in, decimals_in)?)
        .map(|price| price.normalize())
        .ok_or_else(|| Error::Math(format!("{} / {}", amount_out, amount_in)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::str::FromStr;

    fn id(s: &str) -> AssetId {
        AssetId::new(s).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn product_pool() -> Pool {
        let mut pool = Pool::product(id("BOND"), id("USD"), dec("0.01"), Decimal::ONE, created()).unwrap();
        pool.amount_base = 1_000_000;
        pool.amount_quote = 1_000_000;
        pool.shares = 2_000_000;
        pool
    }

    #[test]
    fn test_product_swap_moves_reserves() {
        let mut pool = product_pool();
        let quote = pool.quote_swap(&id("BOND"), 1_000, created()).unwrap();
        assert_eq!(quote.asset_out, id("USD"));
        assert_eq!((quote.amount_out, quote.fee), (989, 10));
        assert_eq!(quote.fee_asset, id("BOND"));

        pool.apply_swap(&quote).unwrap();
        assert_eq!(pool.amount_base, 1_001_000);
        assert_eq!(pool.amount_quote, 999_011);
        assert_eq!(pool.fees_collected_base, 10);
        assert_eq!(pool.fees_collected_quote, 0);
    }

    #[test]
    fn test_quote_rejects_foreign_asset() {
        let pool = product_pool();
        assert!(matches!(
            pool.quote_swap(&id("EUR"), 10, created()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_matured_yield_pool() {
        let mut pool = Pool::yield_curve(
            id("BOND"),
            id("USD"),
            dec("0.98"),
            Decimal::ONE,
            created(),
            created() + Duration::days(30),
        )
        .unwrap();
        pool.amount_base = 10_000;
        pool.amount_quote = 10_000;
        pool.shares = 20_000;

        let quote = pool
            .quote_swap(&id("USD"), 500, created() + Duration::days(31))
            .unwrap();
        assert_eq!((quote.amount_out, quote.fee), (490, 10));
        assert_eq!(quote.fee_asset, id("USD"));
        pool.apply_swap(&quote).unwrap();
        assert_eq!((pool.amount_base, pool.amount_quote), (9_510, 10_500));
        assert_eq!(pool.fees_collected_quote, 10);
    }

    #[test]
    fn test_live_yield_pool_fee_in_output() {
        let mut pool = Pool::yield_curve(
            id("BOND"),
            id("USD"),
            dec("0.95"),
            Decimal::ONE,
            created(),
            created() + Duration::days(100),
        )
        .unwrap();
        pool.amount_base = 1_000_000;
        pool.amount_quote = 2_000_000;
        pool.shares = 3_000_000;

        let quote = pool
            .quote_swap(&id("BOND"), 1_000, created() + Duration::days(50))
            .unwrap();
        assert_eq!(quote.fee_asset, id("USD"));
        pool.apply_swap(&quote).unwrap();
        assert_eq!(pool.amount_quote, 2_000_000 - quote.amount_out);
        assert_eq!(pool.fees_collected_quote, quote.fee);
    }

    #[test]
    fn test_apply_checks_pool() {
        let quote = product_pool().quote_swap(&id("USD"), 100, created()).unwrap();
        let mut other = Pool::product(id("EUR"), id("USD"), Decimal::ZERO, Decimal::ONE, created()).unwrap();
        assert!(other.apply_swap(&quote).is_err());
    }

    #[test]
    fn test_executed_price() {
        // 2.000000 USDC for 1.00 USD
        assert_eq!(executed_price(100, 2, 2_000_000, 6).unwrap(), dec("2"));
        assert_eq!(executed_price(4, 0, 1, 0).unwrap(), dec("0.25"));
        assert!(executed_price(0, 2, 1, 2).is_err());
    }
}
