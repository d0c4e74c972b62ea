//! Pool model and persistence
//!
//! A pool holds reserves of a base and a quote asset and issues shares
//! under the asset ID `{base}-{quote}`. Product pools price on a constant
//! product; yield pools price on a curve that flattens towards 1:1 as the
//! bond approaches maturity.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::{records::Record, AssetId};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Liquidity pool state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    /// `{base}-{quote}`, also the share asset
    pub pool_id: AssetId,

    /// Base asset (the bond for yield pools)
    pub base_asset: AssetId,

    /// Quote asset
    pub quote_asset: AssetId,

    /// Constant-product pricing instead of the yield curve
    pub is_product_pool: bool,

    /// Shares outstanding
    pub shares: u64,

    /// Base reserve
    pub amount_base: u64,

    /// Quote reserve
    pub amount_quote: u64,

    /// Product pools: input fee fraction. Yield pools: curve factor G
    pub fee_factor: Decimal,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Bond maturity (yield pools)
    pub maturity_at: Option<DateTime<Utc>>,

    /// Fees retained in base units
    pub fees_collected_base: u64,

    /// Fees retained in quote units
    pub fees_collected_quote: u64,

    /// Quote per base used to seed an empty pool
    pub initial_assets_ratio: Decimal,
}

impl Pool {
    /// Create an empty constant-product pool
    pub fn product(
        base_asset: AssetId,
        quote_asset: AssetId,
        fee_factor: Decimal,
        initial_assets_ratio: Decimal,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if fee_factor.is_sign_negative() || fee_factor >= Decimal::ONE {
            return Err(Error::InvalidInput(format!(
                "product fee factor {} outside [0, 1)",
                fee_factor
            )));
        }
        Self::build(base_asset, quote_asset, true, fee_factor, initial_assets_ratio, created_at, None)
    }

    /// Create an empty yield pool maturing at `maturity_at`
    pub fn yield_curve(
        base_asset: AssetId,
        quote_asset: AssetId,
        fee_factor: Decimal,
        initial_assets_ratio: Decimal,
        created_at: DateTime<Utc>,
        maturity_at: DateTime<Utc>,
    ) -> Result<Self> {
        if fee_factor <= Decimal::ZERO || fee_factor > Decimal::ONE {
            return Err(Error::InvalidInput(format!(
                "yield factor {} outside (0, 1]",
                fee_factor
            )));
        }
        if maturity_at <= created_at {
            return Err(Error::InvalidInput(format!(
                "maturity {} not after creation {}",
                maturity_at, created_at
            )));
        }
        Self::build(
            base_asset,
            quote_asset,
            false,
            fee_factor,
            initial_assets_ratio,
            created_at,
            Some(maturity_at),
        )
    }

    fn build(
        base_asset: AssetId,
        quote_asset: AssetId,
        is_product_pool: bool,
        fee_factor: Decimal,
        initial_assets_ratio: Decimal,
        created_at: DateTime<Utc>,
        maturity_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        if base_asset == quote_asset {
            return Err(Error::InvalidInput(format!(
                "pool base and quote are both {}",
                base_asset
            )));
        }
        if initial_assets_ratio <= Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "initial assets ratio {} must be positive",
                initial_assets_ratio
            )));
        }
        let pool_id = AssetId::pool_share(&base_asset, &quote_asset)?;
        Ok(Self {
            pool_id,
            base_asset,
            quote_asset,
            is_product_pool,
            shares: 0,
            amount_base: 0,
            amount_quote: 0,
            fee_factor,
            created_at,
            maturity_at,
            fees_collected_base: 0,
            fees_collected_quote: 0,
            initial_assets_ratio,
        })
    }

    /// Fraction of the bond's life remaining, in [0, 1]
    ///
    /// Product pools always report 1. Matured pools and pools with a
    /// zero-length life report 0.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Decimal {
        let Some(maturity) = self.maturity_at else {
            return Decimal::ONE;
        };
        let total = (maturity - self.created_at).num_seconds();
        let left = (maturity - now).num_seconds();
        if total <= 0 || left <= 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(left) / Decimal::from(total)).min(Decimal::ONE)
    }

    /// Reserve of an asset in this pool
    pub fn reserve(&self, asset: &AssetId) -> Result<u64> {
        if asset == &self.base_asset {
            Ok(self.amount_base)
        } else if asset == &self.quote_asset {
            Ok(self.amount_quote)
        } else {
            Err(Error::InvalidInput(format!(
                "{} is not traded in pool {}",
                asset, self.pool_id
            )))
        }
    }

    /// The other asset of the pair
    pub fn counter_asset(&self, asset: &AssetId) -> Result<&AssetId> {
        if asset == &self.base_asset {
            Ok(&self.quote_asset)
        } else if asset == &self.quote_asset {
            Ok(&self.base_asset)
        } else {
            Err(Error::InvalidInput(format!(
                "{} is not traded in pool {}",
                asset, self.pool_id
            )))
        }
    }

    /// Encode as flat record fields
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("pool_id".into(), self.pool_id.to_string());
        record.insert("base_asset".into(), self.base_asset.to_string());
        record.insert("quote_asset".into(), self.quote_asset.to_string());
        record.insert("is_product_pool".into(), self.is_product_pool.to_string());
        record.insert("shares".into(), self.shares.to_string());
        record.insert("amount_base".into(), self.amount_base.to_string());
        record.insert("amount_quote".into(), self.amount_quote.to_string());
        record.insert("fee_factor".into(), self.fee_factor.to_string());
        record.insert("created_at".into(), self.created_at.to_rfc3339());
        if let Some(maturity) = self.maturity_at {
            record.insert("maturity_at".into(), maturity.to_rfc3339());
        }
        record.insert("fees_collected_base".into(), self.fees_collected_base.to_string());
        record.insert("fees_collected_quote".into(), self.fees_collected_quote.to_string());
        record.insert("initial_assets_ratio".into(), self.initial_assets_ratio.to_string());
        record
    }

    /// Decode flat record fields
    pub fn from_record(record: &Record) -> Result<Self> {
        let pool = Self {
            pool_id: parse(record, "pool_id", AssetId::from_str)?,
            base_asset: parse(record, "base_asset", AssetId::from_str)?,
            quote_asset: parse(record, "quote_asset", AssetId::from_str)?,
            is_product_pool: parse(record, "is_product_pool", bool::from_str)?,
            shares: parse(record, "shares", u64::from_str)?,
            amount_base: parse(record, "amount_base", u64::from_str)?,
            amount_quote: parse(record, "amount_quote", u64::from_str)?,
            fee_factor: parse(record, "fee_factor", Decimal::from_str)?,
            created_at: parse(record, "created_at", parse_time)?,
            maturity_at: match record.get("maturity_at") {
                Some(text) => Some(parse_time(text).map_err(|e| {
                    Error::InvalidData(format!("maturity_at: {}", e))
                })?),
                None => None,
            },
            fees_collected_base: parse(record, "fees_collected_base", u64::from_str)?,
            fees_collected_quote: parse(record, "fees_collected_quote", u64::from_str)?,
            initial_assets_ratio: parse(record, "initial_assets_ratio", Decimal::from_str)?,
        };
        let expected = AssetId::pool_share(&pool.base_asset, &pool.quote_asset)
            .map_err(|e| Error::InvalidData(e.to_string()))?;
        if pool.pool_id != expected || pool.base_asset == pool.quote_asset {
            return Err(Error::InvalidData(format!(
                "pool {} does not match {}/{}",
                pool.pool_id, pool.base_asset, pool.quote_asset
            )));
        }
        Ok(pool)
    }
}

fn parse_time(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|t| t.with_timezone(&Utc))
}

fn parse<T, E, F>(record: &Record, field: &str, parser: F) -> Result<T>
where
    F: FnOnce(&str) -> std::result::Result<T, E>,
    E: std::fmt::Display,
{
    let text = record
        .get(field)
        .ok_or_else(|| Error::InvalidData(format!("missing field {}", field)))?;
    parser(text).map_err(|e| Error::InvalidData(format!("{} {:?}: {}", field, text, e)))
}
