//! Persisted record layout
//!
//! Every entity is a hash-shaped record: key → field → text.
//!
//! | key                         | fields                                       |
//! |-----------------------------|----------------------------------------------|
//! | `balances:users:{user}`     | one per asset, JSON [`Balance`]              |
//! | `balances:modules`          | one per asset, JSON [`Balance`]              |
//! | `positions:users:{user}`    | `position`                                   |
//! | `positions`                 | `module`                                     |
//! | `pools:{pool_id}`           | flat pool attributes                         |
//! | `interest:users:{user}`     | `earned`, `owed`, `claimed`, `paid`, `last_updated` |
//! | `interest:users:module`     | as above, system-wide                        |
//! | `prices`                    | one per asset, JSON [`PriceRecord`]          |

use crate::{AssetId, Balance, Balances, Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field → text map stored under one key
pub type Record = BTreeMap<String, String>;

/// Store key builders
pub mod keys {
    /// Module balance record
    pub const MODULE_BALANCES: &str = "balances:modules";

    /// Module position record
    pub const MODULE_POSITION: &str = "positions";

    /// Field holding a user position
    pub const POSITION_FIELD: &str = "position";

    /// Field holding the module state
    pub const MODULE_FIELD: &str = "module";

    /// System-wide interest record
    pub const MODULE_INTEREST: &str = "interest:users:module";

    /// Price table
    pub const PRICES: &str = "prices";

    /// User balance record
    pub fn user_balances(user_id: &str) -> String {
        format!("balances:users:{}", user_id)
    }

    /// User position record
    pub fn user_position(user_id: &str) -> String {
        format!("positions:users:{}", user_id)
    }

    /// Pool record
    pub fn pool(pool_id: &str) -> String {
        format!("pools:{}", pool_id)
    }

    /// User interest record
    pub fn user_interest(user_id: &str) -> String {
        format!("interest:users:{}", user_id)
    }
}

/// Decode every field of a balance record
pub fn decode_balances(record: &Record) -> Result<BTreeMap<AssetId, Balance>> {
    record
        .iter()
        .map(|(field, json)| {
            let asset = AssetId::new(field.as_str())?;
            let balance = Balance::from_json(asset.clone(), json)?;
            Ok((asset, balance))
        })
        .collect()
}

/// Decode one asset's balance from a record field; absent means zero
pub fn decode_balance(asset: &AssetId, field: Option<&str>) -> Result<Balance> {
    match field {
        Some(json) => Balance::from_json(asset.clone(), json),
        None => Ok(Balance::zero(asset.clone())),
    }
}

/// Interest accounting for a user or the module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterestRecord {
    /// Accrued to the holder
    pub earned: Balances,

    /// Owed by the holder
    pub owed: Balances,

    /// Earned interest already claimed
    pub claimed: Balances,

    /// Owed interest already paid
    pub paid: Balances,

    /// Last change
    pub last_updated: DateTime<Utc>,
}

impl InterestRecord {
    /// Empty record, used when nothing is persisted yet
    pub fn empty() -> Self {
        Self {
            earned: Balances::new(),
            owed: Balances::new(),
            claimed: Balances::new(),
            paid: Balances::new(),
            last_updated: DateTime::<Utc>::default(),
        }
    }

    /// Earned minus claimed
    pub fn unclaimed(&self) -> Result<Balances> {
        self.earned.sub(&self.claimed)
    }

    /// Owed minus paid
    pub fn unpaid(&self) -> Result<Balances> {
        self.owed.sub(&self.paid)
    }

    /// Encode as record fields
    pub fn to_record(&self) -> Result<Record> {
        let mut record = Record::new();
        record.insert("earned".to_string(), serde_json::to_string(&self.earned)?);
        record.insert("owed".to_string(), serde_json::to_string(&self.owed)?);
        record.insert("claimed".to_string(), serde_json::to_string(&self.claimed)?);
        record.insert("paid".to_string(), serde_json::to_string(&self.paid)?);
        record.insert("last_updated".to_string(), self.last_updated.to_rfc3339());
        Ok(record)
    }

    /// Decode from record fields; an empty record is an empty interest record
    pub fn from_record(record: &Record) -> Result<Self> {
        if record.is_empty() {
            return Ok(Self::empty());
        }
        let last_updated = match record.get("last_updated") {
            Some(text) => DateTime::parse_from_rfc3339(text)
                .map_err(|e| Error::InvalidData(format!("interest last_updated: {}", e)))?
                .with_timezone(&Utc),
            None => DateTime::<Utc>::default(),
        };
        Ok(Self {
            earned: balances_field(record, "earned")?,
            owed: balances_field(record, "owed")?,
            claimed: balances_field(record, "claimed")?,
            paid: balances_field(record, "paid")?,
            last_updated,
        })
    }
}

fn balances_field(record: &Record, field: &str) -> Result<Balances> {
    match record.get(field) {
        Some(json) => serde_json::from_str(json)
            .map_err(|e| Error::InvalidData(format!("interest {}: {}", field, e))),
        None => Ok(Balances::new()),
    }
}

/// Reference price of an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Priced asset
    pub asset_id: AssetId,

    /// Price in the reference currency
    pub price: Decimal,
}

/// Decode the price table
pub fn decode_prices(record: &Record) -> Result<BTreeMap<AssetId, PriceRecord>> {
    record
        .iter()
        .map(|(field, json)| {
            let price: PriceRecord = serde_json::from_str(json)
                .map_err(|e| Error::InvalidData(format!("price {}: {}", field, e)))?;
            if price.asset_id.as_str() != field {
                return Err(Error::InvalidData(format!(
                    "price field {} holds {}",
                    field, price.asset_id
                )));
            }
            Ok((price.asset_id.clone(), price))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn id(s: &str) -> AssetId {
        AssetId::new(s).unwrap()
    }

    #[test]
    fn test_keys() {
        assert_eq!(keys::user_balances("u1"), "balances:users:u1");
        assert_eq!(keys::user_position("u1"), "positions:users:u1");
        assert_eq!(keys::pool("BOND-USD"), "pools:BOND-USD");
        assert_eq!(keys::user_interest("u1"), "interest:users:u1");
    }

    #[test]
    fn test_interest_record_round_trip() {
        let record = InterestRecord {
            earned: Balances::from_entries(vec![(id("USD"), 30)]).unwrap(),
            owed: Balances::new(),
            claimed: Balances::from_entries(vec![(id("USD"), 10)]).unwrap(),
            paid: Balances::new(),
            last_updated: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        };
        let fields = record.to_record().unwrap();
        assert_eq!(fields["earned"], r#"{"USD":30}"#);
        assert_eq!(fields["last_updated"], "2026-03-01T12:00:00+00:00");

        let decoded = InterestRecord::from_record(&fields).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.unclaimed().unwrap().get(&id("USD")), 20);
    }

    #[test]
    fn test_missing_interest_is_empty() {
        assert_eq!(InterestRecord::from_record(&Record::new()).unwrap(), InterestRecord::empty());
    }

    #[test]
    fn test_price_decoding() {
        let mut record = Record::new();
        record.insert("BOND".to_string(), r#"{"asset_id":"BOND","price":"0.975"}"#.to_string());
        let prices = decode_prices(&record).unwrap();
        assert_eq!(prices[&id("BOND")].price, Decimal::from_str("0.975").unwrap());

        record.insert("USD".to_string(), r#"{"asset_id":"EUR","price":"1"}"#.to_string());
        assert!(decode_prices(&record).is_err());
    }

    #[test]
    fn test_missing_balance_is_zero() {
        let balance = decode_balance(&id("USD"), None).unwrap();
        assert!(balance.is_zero());
    }
}
