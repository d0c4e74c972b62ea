//! Maturity-decaying bond curve
//!
//! The invariant is `x^a + y^a = k` with `a = 1 − t·g`, where `t` is the
//! fraction of the bond's life remaining and `g` the curve parameter. As
//! `t` falls to zero the curve flattens into a 1:1 constant sum.
//!
//! The pool's factor `G` (0 < G ≤ 1) is applied as `g = 1/G` when the base
//! asset is swapped in and `g = G` otherwise. Each swap is priced with
//! `g = 1` and with the pool's `g`; the smaller output is paid and the
//! difference is the fee, denominated in the output asset.

use crate::product::floor_fraction;
use crate::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};

/// Outcome of a yield-curve swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YieldSwap {
    /// Output paid to the trader
    pub amount_out: u64,
    /// Output retained by the pool
    pub fee: u64,
}

/// Price a swap on the bond curve
///
/// `t` is the fraction of life remaining; `base_in` selects the fee side.
pub fn swap(
    reserve_in: u64,
    reserve_out: u64,
    amount_in: u64,
    t: Decimal,
    factor: Decimal,
    base_in: bool,
) -> Result<YieldSwap> {
    if reserve_in == 0 || reserve_out == 0 {
        return Err(Error::InsufficientLiquidity("pool has an empty reserve".to_string()));
    }
    if amount_in == 0 {
        return Err(Error::InvalidInput("zero swap input".to_string()));
    }
    if factor <= Decimal::ZERO || factor > Decimal::ONE {
        return Err(Error::InvalidInput(format!("curve factor {} outside (0, 1]", factor)));
    }
    if t.is_zero() {
        return matured(reserve_out, amount_in, factor);
    }

    let g = if base_in { Decimal::ONE / factor } else { factor };
    let without_fee = curve_out(reserve_in, reserve_out, amount_in, exponent(t, Decimal::ONE)?)?;
    let with_fee = curve_out(reserve_in, reserve_out, amount_in, exponent(t, g)?)?;
    let amount_out = with_fee.min(without_fee);
    if amount_out == 0 {
        return Err(Error::InvalidInput(format!(
            "input {} too small to price",
            amount_in
        )));
    }
    Ok(YieldSwap {
        amount_out,
        fee: without_fee.max(with_fee) - amount_out,
    })
}

/// A matured pool settles 1:1 less `floor(in × (1 − min(G, 1/G)))`
fn matured(reserve_out: u64, amount_in: u64, factor: Decimal) -> Result<YieldSwap> {
    let discount = factor.min(Decimal::ONE / factor);
    let fee = floor_fraction(amount_in, Decimal::ONE - discount)?;
    let amount_out = amount_in - fee.min(amount_in);
    if amount_out == 0 {
        return Err(Error::InvalidInput(format!(
            "input {} is consumed entirely by the fee",
            amount_in
        )));
    }
    if amount_out >= reserve_out {
        return Err(Error::InsufficientLiquidity(format!(
            "matured pool holds {}, swap needs {}",
            reserve_out, amount_out
        )));
    }
    Ok(YieldSwap { amount_out, fee })
}

/// `a = 1 − t·g`, which must stay positive
pub fn exponent(t: Decimal, g: Decimal) -> Result<Decimal> {
    let a = t
        .checked_mul(g)
        .and_then(|tg| Decimal::ONE.checked_sub(tg))
        .ok_or_else(|| Error::Math(format!("1 − {}·{}", t, g)))?;
    if a <= Decimal::ZERO {
        return Err(Error::Math(format!("curve exponent {} not positive", a)));
    }
    Ok(a)
}

/// `floor(y − (x^a + y^a − (x + in)^a)^(1/a))`
fn curve_out(reserve_in: u64, reserve_out: u64, amount_in: u64, a: Decimal) -> Result<u64> {
    let x = Decimal::from(reserve_in);
    let y = Decimal::from(reserve_out);
    let x_after = x + Decimal::from(amount_in);
    let k = pow(x, a)?
        .checked_add(pow(y, a)?)
        .ok_or_else(|| Error::Math("curve invariant overflows".to_string()))?;
    let remaining = k - pow(x_after, a)?;
    if remaining <= Decimal::ZERO {
        return Err(Error::InsufficientLiquidity(format!(
            "swap of {} exhausts the curve",
            amount_in
        )));
    }
    let y_after = pow(remaining, Decimal::ONE / a)?;
    let out = (y - y_after).floor();
    if out.is_sign_negative() {
        return Ok(0);
    }
    let out = out
        .to_u64()
        .ok_or_else(|| Error::Math(format!("curve output {} out of range", out)))?;
    if out >= reserve_out {
        return Err(Error::InsufficientLiquidity(format!(
            "swap of {} drains the reserve",
            amount_in
        )));
    }
    Ok(out)
}

fn pow(base: Decimal, exp: Decimal) -> Result<Decimal> {
    if exp == Decimal::ONE {
        return Ok(base);
    }
    base.checked_powd(exp)
        .ok_or_else(|| Error::Math(format!("{}^{}", base, exp)))
}
