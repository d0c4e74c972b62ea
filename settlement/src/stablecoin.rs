//! Stablecoin equivalence netting
//!
//! A user short of one stablecoin may cover the gap 1:1 at dollar value
//! with another they hold. Every substitution is mirrored in the position's
//! SSEQ ledger (the source asset negative, the covered asset positive) so
//! it can be reversed once the user holds the covered asset again.
//!
//! Rounding: the shortfall is rounded up to whole dollars and every source
//! is rounded down, so a conversion never under-funds and never takes more
//! than the source can give.

use crate::{Error, Result};
use ledger_core::{scale, Amount, AssetId, AssetRegistry, Position};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One 1:1 substitution between stablecoins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    /// Leaves Owned
    pub loss: Amount,
    /// Arrives in Owned
    pub gain: Amount,
}

/// Cover a shortfall of `required` from the user's other stablecoins
///
/// No-op when the asset is not a registered currency or enough is already
/// available. Sources are drawn greedily in asset ID order; if they run
/// out the shortfall is only partly covered.
pub fn activate(position: &mut Position, required: &Amount, registry: &AssetRegistry) -> Result<Vec<Conversion>> {
    let target = &required.asset_id;
    if !registry.is_currency(target) {
        return Ok(Vec::new());
    }
    let available = position.available(target);
    if available >= required.quantity {
        return Ok(Vec::new());
    }

    let target_unit = unit(registry.decimals(target)?)?;
    let shortfall = required.quantity - available;
    let mut dollars = shortfall.div_ceil(target_unit);
    let mut conversions = Vec::new();

    for info in registry.currencies() {
        if dollars == 0 {
            break;
        }
        if &info.asset_id == target {
            continue;
        }
        let source_unit = unit(info.decimals)?;
        let take = (position.available(&info.asset_id) / source_unit).min(dollars);
        if take == 0 {
            continue;
        }
        let conversion = Conversion {
            loss: Amount::new(info.asset_id.clone(), scaled(take, source_unit)?),
            gain: Amount::new(target.clone(), scaled(take, target_unit)?),
        };
        position.convert_equivalent(&conversion.loss, &conversion.gain)?;
        debug!(
            user_id = %position.user_id,
            loss = %conversion.loss,
            gain = %conversion.gain,
            "Stablecoin equivalence activated"
        );
        dollars -= take;
        conversions.push(conversion);
    }
    Ok(conversions)
}

/// Reverse one outstanding substitution
///
/// Picks the first asset with a positive SSEQ entry and the first with a
/// negative one, and converts back the smallest of: the positive asset
/// available, its SSEQ credit, and the negative asset's SSEQ debit, all at
/// the coarser of the two decimal exponents. Only one pair is reconciled
/// per call.
pub fn cleanup(position: &mut Position, registry: &AssetRegistry) -> Result<Option<Conversion>> {
    let sseq = position.sseq();
    let positive = sseq.iter().find(|(_, q)| *q > 0).map(|(a, q)| (a.clone(), q));
    let negative = sseq.iter().find(|(_, q)| *q < 0).map(|(a, q)| (a.clone(), q));
    let (Some((covered, credit)), Some((source, debit))) = (positive, negative) else {
        return Ok(None);
    };

    let covered_decimals = registry.decimals(&covered)?;
    let source_decimals = registry.decimals(&source)?;
    let shared = covered_decimals.min(source_decimals);
    let covered_step = unit(covered_decimals - shared)?;
    let source_step = unit(source_decimals - shared)?;

    let units = (position.available(&covered) / covered_step)
        .min(credit.unsigned_abs() / covered_step)
        .min(debit.unsigned_abs() / source_step);
    if units == 0 {
        return Ok(None);
    }

    let conversion = Conversion {
        loss: Amount::new(covered, scaled(units, covered_step)?),
        gain: Amount::new(source, scaled(units, source_step)?),
    };
    position.convert_equivalent(&conversion.loss, &conversion.gain)?;
    debug!(
        user_id = %position.user_id,
        loss = %conversion.loss,
        gain = %conversion.gain,
        "Stablecoin equivalence reconciled"
    );
    Ok(Some(conversion))
}

fn unit(decimals: u32) -> Result<u64> {
    Ok(scale(decimals)?.unsigned_abs())
}

fn scaled(units: u64, step: u64) -> Result<u64> {
    units
        .checked_mul(step)
        .ok_or_else(|| Error::InvalidInput(format!("{} × {} overflows", units, step)))
}

/// Net SSEQ exposure of an asset; zero when nothing is substituted
pub fn exposure(position: &Position, asset: &AssetId) -> i64 {
    position.sseq().get(asset)
}
