//! Sparse signed asset vector
//!
//! `Balances` backs real balances (owned, locked, supplied, ...) and two
//! recycled encodings keyed by derived asset IDs: coupon fund sources and
//! total supply snapshots. Zero entries are never stored.

use crate::{Amount, AssetId, Error, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Map of asset ID to signed quantity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Balances(BTreeMap<AssetId, i64>);

impl Balances {
    /// Empty balances
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from (asset, quantity) pairs, summing duplicates
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (AssetId, i64)>,
    {
        entries
            .into_iter()
            .try_fold(Balances::new(), |acc, (asset, qty)| acc.add_asset(&asset, qty))
    }

    /// Quantity held (zero when absent)
    pub fn get(&self, asset: &AssetId) -> i64 {
        self.0.get(asset).copied().unwrap_or(0)
    }

    /// Overwrite one entry; zero removes it
    pub fn set(&mut self, asset: AssetId, quantity: i64) {
        if quantity == 0 {
            self.0.remove(&asset);
        } else {
            self.0.insert(asset, quantity);
        }
    }

    /// No nonzero entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of nonzero entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate nonzero entries in asset order
    pub fn iter(&self) -> impl Iterator<Item = (&AssetId, i64)> {
        self.0.iter().map(|(asset, qty)| (asset, *qty))
    }

    /// Sum of all entries
    pub fn total(&self) -> Result<i64> {
        self.0.values().try_fold(0i64, |acc, qty| {
            acc.checked_add(*qty)
                .ok_or_else(|| Error::Overflow("balances total".to_string()))
        })
    }

    /// Add a signed quantity to one asset
    pub fn add_asset(&self, asset: &AssetId, quantity: i64) -> Result<Balances> {
        let current = self.get(asset);
        let next = current
            .checked_add(quantity)
            .ok_or_else(|| Error::Overflow(format!("{} {} + {}", asset, current, quantity)))?;
        let mut out = self.clone();
        out.set(asset.clone(), next);
        Ok(out)
    }

    /// Subtract a signed quantity from one asset
    pub fn sub_asset(&self, asset: &AssetId, quantity: i64) -> Result<Balances> {
        let current = self.get(asset);
        let next = current
            .checked_sub(quantity)
            .ok_or_else(|| Error::Overflow(format!("{} {} - {}", asset, current, quantity)))?;
        let mut out = self.clone();
        out.set(asset.clone(), next);
        Ok(out)
    }

    /// Add an Amount
    pub fn add_amount(&self, amount: &Amount) -> Result<Balances> {
        self.add_asset(&amount.asset_id, amount.signed()?)
    }

    /// Subtract an Amount (result may be negative)
    pub fn sub_amount(&self, amount: &Amount) -> Result<Balances> {
        self.sub_asset(&amount.asset_id, amount.signed()?)
    }

    /// Entry-wise addition
    pub fn add(&self, other: &Balances) -> Result<Balances> {
        other
            .iter()
            .try_fold(self.clone(), |acc, (asset, qty)| acc.add_asset(asset, qty))
    }

    /// Entry-wise subtraction
    pub fn sub(&self, other: &Balances) -> Result<Balances> {
        other
            .iter()
            .try_fold(self.clone(), |acc, (asset, qty)| acc.sub_asset(asset, qty))
    }

    /// Negate every entry
    pub fn invert(&self) -> Result<Balances> {
        let mut out = Balances::new();
        for (asset, qty) in self.iter() {
            let negated = qty
                .checked_neg()
                .ok_or_else(|| Error::Overflow(format!("invert {} {}", asset, qty)))?;
            out.set(asset.clone(), negated);
        }
        Ok(out)
    }

    /// Strictly positive entries
    pub fn positive(&self) -> Balances {
        Balances(self.0.iter().filter(|(_, q)| **q > 0).map(|(a, q)| (a.clone(), *q)).collect())
    }

    /// Strictly negative entries
    pub fn negative(&self) -> Balances {
        Balances(self.0.iter().filter(|(_, q)| **q < 0).map(|(a, q)| (a.clone(), *q)).collect())
    }

    /// Subtract `other`'s positive entries without crossing zero
    ///
    /// Returns the reduced balances and the surplus of `other` that could not
    /// be subtracted. Entries of `self` that are already zero or negative are
    /// left untouched and the whole request is reported as surplus.
    pub fn sub_to_zero(&self, other: &Balances) -> (Balances, Balances) {
        let mut remaining = self.clone();
        let mut surplus = Balances::new();
        for (asset, requested) in other.positive().iter() {
            let held = self.get(asset).max(0);
            let taken = held.min(requested);
            remaining.set(asset.clone(), self.get(asset) - taken);
            surplus.set(asset.clone(), requested - taken);
        }
        (remaining, surplus)
    }

    /// Every threshold in `other` is met
    ///
    /// Non-negative thresholds require at least that much; negative thresholds
    /// require the entry to be at least as negative.
    pub fn has_at_least(&self, other: &Balances) -> bool {
        other.iter().all(|(asset, threshold)| {
            let held = self.get(asset);
            if threshold >= 0 {
                held >= threshold
            } else {
                held <= threshold
            }
        })
    }

    /// Reject any negative entry
    pub fn ensure_non_negative(&self, what: &str) -> Result<()> {
        match self.0.iter().find(|(_, qty)| **qty < 0) {
            Some((asset, qty)) => Err(Error::InvalidData(format!(
                "{} holds negative {} {}",
                what, qty, asset
            ))),
            None => Ok(()),
        }
    }

    /// Coupon fund sources recorded for an asset, as (period_end, quantity)
    pub fn coupon_sources<'a>(&'a self, asset: &'a AssetId) -> impl Iterator<Item = (i64, i64)> + 'a {
        self.iter().filter_map(move |(id, qty)| match id.parse_coupon_source() {
            Some((source, period)) if &source == asset => Some((period, qty)),
            _ => None,
        })
    }
}

impl Serialize for Balances {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        // BTreeMap iteration is already sorted; zero entries are never stored
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (asset, qty) in &self.0 {
            map.serialize_entry(asset.as_str(), qty)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Balances {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct BalancesVisitor;

        impl<'de> Visitor<'de> for BalancesVisitor {
            type Value = Balances;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of asset id to integer quantity")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> std::result::Result<Balances, M::Error> {
                let mut out = Balances::new();
                while let Some((key, qty)) = access.next_entry::<String, i64>()? {
                    let asset = AssetId::new(key).map_err(serde::de::Error::custom)?;
                    out.set(asset, qty);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(BalancesVisitor)
    }
}

impl fmt::Display for Balances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(a, q)| format!("{}:{}", a, q)).collect();
        write!(f, "{{{}}}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AssetId {
        AssetId::new(s).unwrap()
    }

    fn bal(entries: &[(&str, i64)]) -> Balances {
        Balances::from_entries(entries.iter().map(|(a, q)| (id(a), *q))).unwrap()
    }

    #[test]
    fn test_zero_entries_absent() {
        let b = bal(&[("USD", 5)]).sub_asset(&id("USD"), 5).unwrap();
        assert!(b.is_empty());
        assert_eq!(b.get(&id("USD")), 0);
    }

    #[test]
    fn test_add_sub_invert() {
        let a = bal(&[("USD", 10), ("EUR", -3)]);
        let b = bal(&[("USD", 4), ("GBP", 2)]);
        let sum = a.add(&b).unwrap();
        assert_eq!(sum, bal(&[("USD", 14), ("EUR", -3), ("GBP", 2)]));
        assert_eq!(sum.sub(&b).unwrap(), a);
        assert_eq!(a.invert().unwrap(), bal(&[("USD", -10), ("EUR", 3)]));
        assert!(bal(&[("USD", i64::MIN)]).invert().is_err());
        assert!(bal(&[("USD", i64::MAX)]).add_asset(&id("USD"), 1).is_err());
    }

    #[test]
    fn test_partition() {
        let a = bal(&[("USD", 10), ("EUR", -3), ("GBP", 1)]);
        assert_eq!(a.positive(), bal(&[("USD", 10), ("GBP", 1)]));
        assert_eq!(a.negative(), bal(&[("EUR", -3)]));
    }

    #[test]
    fn test_sub_to_zero_reports_surplus() {
        let held = bal(&[("USD", 10), ("EUR", 2)]);
        let (rest, surplus) = held.sub_to_zero(&bal(&[("USD", 4), ("EUR", 5), ("GBP", 1)]));
        assert_eq!(rest, bal(&[("USD", 6)]));
        assert_eq!(surplus, bal(&[("EUR", 3), ("GBP", 1)]));
    }

    #[test]
    fn test_has_at_least_symmetric() {
        let held = bal(&[("USD", 10), ("EUR", -5)]);
        assert!(held.has_at_least(&bal(&[("USD", 10)])));
        assert!(!held.has_at_least(&bal(&[("USD", 11)])));
        assert!(held.has_at_least(&bal(&[("EUR", -5)])));
        assert!(held.has_at_least(&bal(&[("EUR", -4)])));
        assert!(!held.has_at_least(&bal(&[("EUR", -6)])));
    }

    #[test]
    fn test_json_sorted_bare_integers() {
        let b = bal(&[("USDC", 7), ("BOND", -2), ("EUR", 0)]);
        assert_eq!(serde_json::to_string(&b).unwrap(), r#"{"BOND":-2,"USDC":7}"#);

        let decoded: Balances = serde_json::from_str(r#"{"USD":0,"EUR":3}"#).unwrap();
        assert_eq!(decoded, bal(&[("EUR", 3)]));

        assert!(serde_json::from_str::<Balances>(r#"{"bad id":1}"#).is_err());
        assert!(serde_json::from_str::<Balances>(r#"{"USD":"1"}"#).is_err());
    }

    #[test]
    fn test_coupon_sources() {
        let usd = id("USD");
        let b = Balances::from_entries(vec![
            (AssetId::coupon_source(&usd, 100).unwrap(), 5),
            (AssetId::coupon_source(&usd, 200).unwrap(), 7),
            (AssetId::coupon_source(&id("EUR"), 100).unwrap(), 9),
        ])
        .unwrap();
        let sources: Vec<(i64, i64)> = b.coupon_sources(&usd).collect();
        assert_eq!(sources, vec![(100, 5), (200, 7)]);
    }
}
