//! Fixed-point money and quantity arithmetic.
//!
//! All prices are unsigned integers in *micro-units*: one unit of quote
//! currency equals [`PRICE_SCALE`] micro-units. Quantities are unsigned
//! integers in *micro-lots*: one contract equals [`QTY_SCALE`] micro-lots.
//! Every settlement-path computation (notional, fees, margin, PnL) is pure
//! integer math over these representations; floats exist only at the display
//! boundary and never on a path that moves money.

/// Micro-units per unit of quote currency (fixed-point scale for prices).
pub const PRICE_SCALE: u64 = 1_000_000;

/// Micro-lots per contract (fixed-point scale for quantities).
pub const QTY_SCALE: u64 = 1_000_000;

/// Basis-point denominator: 1 bps = 0.01% = 1/10_000.
pub const BPS_DENOM: u128 = 10_000;

/// Snap a price to the nearest multiple of `tick_size`.
///
/// Ties round up (half-away-from-zero on an unsigned domain). A zero tick
/// size returns the price unchanged.
#[inline]
#[must_use]
pub fn snap_to_tick(price: u64, tick_size: u64) -> u64 {
    if tick_size == 0 {
        return price;
    }
    let rem = price % tick_size;
    if rem == 0 {
        price
    } else if rem * 2 >= tick_size {
        price.saturating_add(tick_size - rem)
    } else {
        price - rem
    }
}

/// Returns `true` when `value` is a non-zero multiple of `step`.
#[inline]
#[must_use]
pub fn is_multiple(value: u64, step: u64) -> bool {
    step != 0 && value != 0 && value % step == 0
}

/// Notional value of `qty` micro-lots at `price` micro-units, in micro-units
/// of quote currency.
///
/// `contract_size` is the per-product notional multiplier (1 for plain
/// contracts). The intermediate product is computed in `u128`; the division
/// by [`QTY_SCALE`] happens last so no precision is lost before it.
#[inline]
#[must_use]
pub fn notional(price: u64, qty: u64, contract_size: u64) -> u128 {
    (price as u128) * (qty as u128) * (contract_size as u128) / (QTY_SCALE as u128)
}

/// Fee on a notional amount at `fee_bps` basis points, floored at `min_fee`.
///
/// Negative `fee_bps` is a rebate; the floor only applies to charges, never
/// to rebates, so a maker rebate is returned as a negative amount unchanged.
#[inline]
#[must_use]
pub fn fee_on(notional: u128, fee_bps: i32, min_fee: u64) -> i64 {
    let raw = (notional as i128)
        .checked_mul(fee_bps as i128)
        .map(|p| p / BPS_DENOM as i128)
        .unwrap_or(i128::MAX);
    let fee = if raw > 0 { raw.max(min_fee as i128) } else { raw };
    fee.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Initial or maintenance margin on a notional at `rate_bps`.
#[inline]
#[must_use]
pub fn margin_on(notional: u128, rate_bps: u32) -> i128 {
    (notional * rate_bps as u128 / BPS_DENOM) as i128
}

/// Absolute relative deviation of `price` from `reference`, in basis points.
///
/// Returns 0 when the reference is 0 (no reference means no deviation).
#[inline]
#[must_use]
pub fn deviation_bps(price: u64, reference: u64) -> u64 {
    if reference == 0 {
        return 0;
    }
    let diff = price.abs_diff(reference) as u128;
    (diff * BPS_DENOM / reference as u128) as u64
}
