//! Asset identifiers and per-asset metadata
//!
//! A plain asset ID is alphanumeric/underscore. Derived IDs carry exactly one
//! internal hyphen:
//!
//! - pool shares: `{base}-{quote}`
//! - coupon fund sources: `{asset}-Coupon_{unixPeriodEnd}`
//! - total supply snapshots: `{asset}-Snapshot_{unixPeriodEnd}`

use crate::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

lazy_static! {
    static ref ASSET_ID_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9_]+(-[A-Za-z0-9_]+)?$").expect("asset id pattern compiles");
}

/// Prefixes a plain asset may not start with
pub const RESERVED_PREFIXES: [&str; 2] = [COUPON_TAG, SNAPSHOT_TAG];

const COUPON_TAG: &str = "Coupon_";
const SNAPSHOT_TAG: &str = "Snapshot_";

/// Asset credited when interest accrues to a position
pub const INTEREST_ASSET: &str = "Interest";

/// Validated asset identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetId(String);

impl AssetId {
    /// Parse and validate an asset ID (plain or derived)
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidData("empty asset id".to_string()));
        }
        if !ASSET_ID_PATTERN.is_match(&id) {
            return Err(Error::InvalidData(format!("invalid asset id {:?}", id)));
        }
        Ok(Self(id))
    }

    /// Parse an ID that must be a plain asset (no hyphen, no reserved prefix)
    pub fn plain(id: impl Into<String>) -> Result<Self> {
        let asset = Self::new(id)?;
        if !asset.is_plain() {
            return Err(Error::InvalidData(format!(
                "{} is not a plain asset id",
                asset
            )));
        }
        Ok(asset)
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// No hyphen and no reserved prefix
    pub fn is_plain(&self) -> bool {
        !self.0.contains('-') && !RESERVED_PREFIXES.iter().any(|p| self.0.starts_with(p))
    }

    /// Pool share ID for a base/quote pair
    pub fn pool_share(base: &AssetId, quote: &AssetId) -> Result<Self> {
        if !base.is_plain() || !quote.is_plain() {
            return Err(Error::InvalidInput(format!(
                "pool assets must be plain: {}, {}",
                base, quote
            )));
        }
        Self::new(format!("{}-{}", base, quote))
    }

    /// `{asset}-Coupon_{period_end}`
    pub fn coupon_source(asset: &AssetId, period_end: i64) -> Result<Self> {
        Self::derived(asset, COUPON_TAG, period_end)
    }

    /// `{asset}-Snapshot_{period_end}`
    pub fn supply_snapshot(asset: &AssetId, period_end: i64) -> Result<Self> {
        Self::derived(asset, SNAPSHOT_TAG, period_end)
    }

    /// Split a coupon source ID into its asset and period end
    pub fn parse_coupon_source(&self) -> Option<(AssetId, i64)> {
        self.split_derived(COUPON_TAG)
    }

    /// Split a snapshot ID into its asset and period end
    pub fn parse_supply_snapshot(&self) -> Option<(AssetId, i64)> {
        self.split_derived(SNAPSHOT_TAG)
    }

    fn derived(asset: &AssetId, tag: &str, period_end: i64) -> Result<Self> {
        if !asset.is_plain() {
            return Err(Error::InvalidInput(format!(
                "{} cannot carry a {} suffix",
                asset, tag
            )));
        }
        if period_end < 0 {
            return Err(Error::InvalidInput(format!(
                "negative period end {}",
                period_end
            )));
        }
        Self::new(format!("{}-{}{}", asset, tag, period_end))
    }

    fn split_derived(&self, tag: &str) -> Option<(AssetId, i64)> {
        let (asset, suffix) = self.0.split_once('-')?;
        let period = suffix.strip_prefix(tag)?.parse().ok()?;
        Some((AssetId(asset.to_string()), period))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AssetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl Serialize for AssetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AssetId::new(raw).map_err(serde::de::Error::custom)
    }
}

/// How an asset may be borrowed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetUsage {
    /// Asset may be borrowed at all
    #[serde(default)]
    pub borrowable: bool,

    /// Borrows mint virtual debt instead of drawing pooled supply
    #[serde(default)]
    pub virtual_borrow: bool,
}

/// Per-asset metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Asset ID
    pub asset_id: AssetId,

    /// Decimal exponent (USD with cents = 2)
    pub decimals: u32,

    /// Interchangeable stablecoin, eligible for SSEQ netting
    #[serde(default)]
    pub is_currency: bool,

    /// Borrow flags
    #[serde(default)]
    pub usage: AssetUsage,
}

/// Lookup table of known assets
#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    assets: HashMap<AssetId, AssetInfo>,
}

impl AssetRegistry {
    /// Build from a list of asset definitions
    pub fn new(assets: impl IntoIterator<Item = AssetInfo>) -> Self {
        Self {
            assets: assets
                .into_iter()
                .map(|info| (info.asset_id.clone(), info))
                .collect(),
        }
    }

    /// Register or replace an asset
    pub fn insert(&mut self, info: AssetInfo) {
        self.assets.insert(info.asset_id.clone(), info);
    }

    /// Metadata for an asset
    pub fn get(&self, asset: &AssetId) -> Result<&AssetInfo> {
        self.assets
            .get(asset)
            .ok_or_else(|| Error::NotFound(format!("asset {}", asset)))
    }

    /// Decimal exponent for an asset
    pub fn decimals(&self, asset: &AssetId) -> Result<u32> {
        Ok(self.get(asset)?.decimals)
    }

    /// Borrow flags; unknown assets are not borrowable
    pub fn usage(&self, asset: &AssetId) -> AssetUsage {
        self.assets
            .get(asset)
            .map(|info| info.usage)
            .unwrap_or_default()
    }

    /// Whether the asset is a recognised stablecoin
    pub fn is_currency(&self, asset: &AssetId) -> bool {
        self.assets.get(asset).map_or(false, |info| info.is_currency)
    }

    /// All recognised stablecoins, sorted by asset ID
    pub fn currencies(&self) -> Vec<&AssetInfo> {
        let mut currencies: Vec<&AssetInfo> =
            self.assets.values().filter(|info| info.is_currency).collect();
        currencies.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        currencies
    }
}

/// `10^exp` as an integer scale
pub fn scale(exp: u32) -> Result<i64> {
    10i64
        .checked_pow(exp)
        .ok_or_else(|| Error::Overflow(format!("10^{}", exp)))
}
