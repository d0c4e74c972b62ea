//! Constant-product pricing
//!
//! The fee is taken from the input side before the curve is applied:
//!
//! ```text
//! fee  = floor(in × f)
//! in'  = in − fee
//! out  = floor(R_out × in' / (R_in + in'))
//! ```

use crate::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Outcome of a constant-product swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductSwap {
    /// Input retained as fee
    pub fee: u64,
    /// Output paid to the trader
    pub amount_out: u64,
}

/// `floor(quantity × fraction)` for a fraction in [0, 1]
pub fn floor_fraction(quantity: u64, fraction: Decimal) -> Result<u64> {
    Decimal::from(quantity)
        .checked_mul(fraction)
        .and_then(|v| v.floor().to_u64())
        .ok_or_else(|| Error::Math(format!("{} × {}", quantity, fraction)))
}

/// Price a swap of `amount_in` against the given reserves
pub fn swap(reserve_in: u64, reserve_out: u64, amount_in: u64, fee_factor: Decimal) -> Result<ProductSwap> {
    if reserve_in == 0 || reserve_out == 0 {
        return Err(Error::InsufficientLiquidity("pool has an empty reserve".to_string()));
    }
    if amount_in == 0 {
        return Err(Error::InvalidInput("zero swap input".to_string()));
    }
    let fee = floor_fraction(amount_in, fee_factor)?;
    let net_in = amount_in - fee.min(amount_in);
    if net_in == 0 {
        return Err(Error::InvalidInput(format!(
            "input {} is consumed entirely by the fee",
            amount_in
        )));
    }
    let numerator = reserve_out as u128 * net_in as u128;
    let denominator = reserve_in as u128 + net_in as u128;
    let amount_out = u64::try_from(numerator / denominator)
        .map_err(|_| Error::Math(format!("output {} overflows", numerator / denominator)))?;
    Ok(ProductSwap { fee, amount_out })
}
