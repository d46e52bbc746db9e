//! Signed position state and the open/reduce/reverse fill math.
//!
//! The authoritative entry state is the *cost basis* (`entry_notional`,
//! micro-units): reductions realize proceeds minus a proportional slice of
//! the basis and subtract exactly that slice, so no dust ever leaks from
//! integer division; whatever truncation leaves behind stays in the basis
//! and realizes on the final close. The volume-weighted `entry_price` is
//! derived from the basis for display and liquidation estimates.

use crate::catalog::Product;
use crate::types::money::{margin_on, notional};
use crate::types::{BPS_DENOM, QTY_SCALE, Side};
use serde::{Deserialize, Serialize};

/// A user's net position in one symbol.
///
/// `size` is signed micro-lots (positive long, negative short). When the
/// position is flat, basis, entry price, and margin are all zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// The symbol this position is in.
    pub symbol: String,
    /// Signed size, micro-lots.
    pub size: i64,
    /// Cost basis of the open size, micro-units.
    pub entry_notional: u128,
    /// Volume-weighted entry price derived from the basis, micro-units.
    pub entry_price: u64,
    /// Initial margin currently reserved, micro-units.
    pub margin_used: i128,
    /// Cumulative realized PnL, micro-units.
    pub realized_pnl: i128,
    /// Mark-to-market PnL at the last mark, micro-units.
    pub unrealized_pnl: i128,
    /// Estimated liquidation price, micro-units; 0 when flat.
    pub liquidation_price: u64,
}

impl Position {
    /// A flat position in `symbol`.
    #[must_use]
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            size: 0,
            entry_notional: 0,
            entry_price: 0,
            margin_used: 0,
            realized_pnl: 0,
            unrealized_pnl: 0,
            liquidation_price: 0,
        }
    }

    /// `true` when no exposure remains.
    #[inline]
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.size == 0
    }
}

/// What a single fill did to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillOutcome {
    /// PnL realized by the reducing/reversing part of the fill.
    pub realized_pnl: i128,
    /// Change in reserved initial margin (`new - old`); negative releases.
    pub margin_delta: i128,
}

impl Position {
    /// Apply one fill of `qty` micro-lots at `price`.
    ///
    /// Same-direction fills (or fills on a flat position) open or increase,
    /// growing the basis by the fill notional with no realized PnL.
    /// Opposite fills up to the position size reduce it, realizing fill
    /// notional against the proportional basis slice. Larger opposite
    /// fills close the whole basis and open the remainder fresh at
    /// `price`. Margin is re-snapshotted at the fill price after every
    /// fill.
    pub fn apply_fill(&mut self, side: Side, qty: u64, price: u64, product: &Product) -> FillOutcome {
        let signed = side.sign() * qty as i64;
        let old_margin = self.margin_used;
        let fill_notional = notional(price, qty, product.contract_size);
        let mut realized = 0i128;

        if self.size == 0 || self.size.signum() == signed.signum() {
            self.size += signed;
            self.entry_notional += fill_notional;
        } else if (qty as i64) <= self.size.abs() {
            let basis = self.entry_notional * qty as u128 / self.size.unsigned_abs() as u128;
            realized = if self.size > 0 {
                fill_notional as i128 - basis as i128
            } else {
                basis as i128 - fill_notional as i128
            };
            self.entry_notional -= basis;
            self.size += signed;
        } else {
            let close_notional =
                notional(price, self.size.unsigned_abs(), product.contract_size);
            realized = if self.size > 0 {
                close_notional as i128 - self.entry_notional as i128
            } else {
                self.entry_notional as i128 - close_notional as i128
            };
            let open_qty = qty - self.size.unsigned_abs();
            self.entry_notional = notional(price, open_qty, product.contract_size);
            self.size += signed;
        }

        self.realized_pnl += realized;
        if self.size == 0 {
            self.entry_notional = 0;
            self.entry_price = 0;
            self.margin_used = 0;
            self.liquidation_price = 0;
            self.unrealized_pnl = 0;
        } else {
            self.entry_price = self.derived_entry_price(product);
            self.margin_used = margin_on(
                notional(price, self.size.unsigned_abs(), product.contract_size),
                product.margin_rate_bps,
            );
        }

        FillOutcome {
            realized_pnl: realized,
            margin_delta: self.margin_used - old_margin,
        }
    }

    /// Refresh mark-dependent fields against `mark_price`.
    pub fn mark(&mut self, mark_price: u64, product: &Product) {
        if self.size == 0 || mark_price == 0 {
            self.unrealized_pnl = 0;
            return;
        }
        let mark_notional = notional(mark_price, self.size.unsigned_abs(), product.contract_size);
        self.unrealized_pnl = if self.size > 0 {
            mark_notional as i128 - self.entry_notional as i128
        } else {
            self.entry_notional as i128 - mark_notional as i128
        };
        self.liquidation_price = self.estimate_liquidation_price(product);
    }

    /// Maintenance margin requirement at `mark_price`.
    #[must_use]
    pub fn maintenance_margin(&self, mark_price: u64, product: &Product) -> i128 {
        margin_on(
            notional(mark_price, self.size.unsigned_abs(), product.contract_size),
            product.maintenance_margin_rate_bps,
        )
    }

    /// First-order liquidation price estimate: the entry moved against the
    /// position by the initial-minus-maintenance margin fraction.
    fn estimate_liquidation_price(&self, product: &Product) -> u64 {
        let buffer_bps = product
            .margin_rate_bps
            .saturating_sub(product.maintenance_margin_rate_bps) as u128;
        let shift = (self.entry_price as u128 * buffer_bps / BPS_DENOM) as u64;
        if self.size > 0 {
            self.entry_price.saturating_sub(shift)
        } else {
            self.entry_price.saturating_add(shift)
        }
    }

    fn derived_entry_price(&self, product: &Product) -> u64 {
        let denom = self.size.unsigned_abs() as u128 * product.contract_size as u128;
        if denom == 0 {
            return 0;
        }
        (self.entry_notional * QTY_SCALE as u128 / denom) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PRICE_SCALE, QTY_SCALE};

    fn product() -> Product {
        Product {
            symbol: "XAU-USD".to_string(),
            tick_size: PRICE_SCALE,
            lot_size: QTY_SCALE,
            contract_size: 1,
            margin_rate_bps: 1_000,
            maintenance_margin_rate_bps: 500,
            maker_fee_bps: 0,
            taker_fee_bps: 0,
            min_notional: 0,
            min_fee: 0,
            active: true,
            hedge_symbol: None,
        }
    }

    const P: u64 = PRICE_SCALE;
    const Q: u64 = QTY_SCALE;

    #[test]
    fn test_open_and_increase_vwap() {
        let p = product();
        let mut pos = Position::flat("XAU-USD");
        let out = pos.apply_fill(Side::Buy, Q, 100 * P, &p);
        assert_eq!(out.realized_pnl, 0);
        assert_eq!(pos.size, Q as i64);
        assert_eq!(pos.entry_price, 100 * P);
        // 10% of 100 notional.
        assert_eq!(pos.margin_used, 10 * P as i128);

        pos.apply_fill(Side::Buy, Q, 102 * P, &p);
        assert_eq!(pos.size, 2 * Q as i64);
        assert_eq!(pos.entry_price, 101 * P);
        assert_eq!(pos.entry_notional, 202 * P as u128);
    }

    #[test]
    fn test_reduce_realizes_against_basis() {
        let p = product();
        let mut pos = Position::flat("XAU-USD");
        pos.apply_fill(Side::Buy, 2 * Q, 100 * P, &p);
        let out = pos.apply_fill(Side::Sell, Q, 110 * P, &p);
        // (110 - 100) × 1 contract = 10 units profit.
        assert_eq!(out.realized_pnl, 10 * P as i128);
        assert_eq!(pos.size, Q as i64);
        assert_eq!(pos.entry_price, 100 * P);
        assert_eq!(pos.entry_notional, 100 * P as u128);
        assert!(out.margin_delta < 0);
    }

    #[test]
    fn test_close_to_flat_clears_state() {
        let p = product();
        let mut pos = Position::flat("XAU-USD");
        pos.apply_fill(Side::Buy, Q, 100 * P, &p);
        let out = pos.apply_fill(Side::Sell, Q, 90 * P, &p);
        assert_eq!(out.realized_pnl, -(10 * P as i128));
        assert!(pos.is_flat());
        assert_eq!(pos.entry_price, 0);
        assert_eq!(pos.entry_notional, 0);
        assert_eq!(pos.margin_used, 0);
    }

    #[test]
    fn test_reverse_closes_then_reopens() {
        let p = product();
        let mut pos = Position::flat("XAU-USD");
        pos.apply_fill(Side::Buy, Q, 100 * P, &p);
        // Sell 3 against long 1: close 1 at a profit, go short 2 at 105.
        let out = pos.apply_fill(Side::Sell, 3 * Q, 105 * P, &p);
        assert_eq!(out.realized_pnl, 5 * P as i128);
        assert_eq!(pos.size, -(2 * Q as i64));
        assert_eq!(pos.entry_price, 105 * P);
        assert_eq!(pos.entry_notional, 210 * P as u128);
    }

    #[test]
    fn test_short_side_pnl() {
        let p = product();
        let mut pos = Position::flat("XAU-USD");
        pos.apply_fill(Side::Sell, Q, 100 * P, &p);
        assert_eq!(pos.size, -(Q as i64));
        // Buying back lower is profit for a short.
        let out = pos.apply_fill(Side::Buy, Q, 95 * P, &p);
        assert_eq!(out.realized_pnl, 5 * P as i128);
    }

    #[test]
    fn test_uneven_basis_conserves_to_the_micro_unit() {
        let p = product();
        let mut pos = Position::flat("XAU-USD");
        // Basis 100 + 180 = 280 over 3 lots: per-lot VWAP truncates, the
        // basis does not.
        pos.apply_fill(Side::Buy, Q, 100 * P, &p);
        pos.apply_fill(Side::Buy, 2 * Q, 90 * P, &p);
        assert_eq!(pos.entry_notional, 280 * P as u128);

        // Close the whole position at 95: realized must be exactly
        // 285 − 280 = 5 units despite the truncated display entry.
        let out = pos.apply_fill(Side::Sell, 3 * Q, 95 * P, &p);
        assert_eq!(out.realized_pnl, 5 * P as i128);
        assert!(pos.is_flat());
    }

    #[test]
    fn test_partial_reduce_keeps_dust_in_basis() {
        let p = product();
        let mut pos = Position::flat("XAU-USD");
        pos.apply_fill(Side::Buy, Q, 100 * P, &p);
        pos.apply_fill(Side::Buy, 2 * Q, 90 * P, &p);
        // Reduce 1 of 3: basis slice = 280/3 truncated; the remainder
        // stays in the open basis.
        let out1 = pos.apply_fill(Side::Sell, Q, 95 * P, &p);
        let out2 = pos.apply_fill(Side::Sell, 2 * Q, 95 * P, &p);
        assert_eq!(out1.realized_pnl + out2.realized_pnl, 5 * P as i128);
        assert!(pos.is_flat());
    }

    #[test]
    fn test_mark_and_maintenance() {
        let p = product();
        let mut pos = Position::flat("XAU-USD");
        pos.apply_fill(Side::Buy, Q, 100 * P, &p);
        pos.mark(110 * P, &p);
        assert_eq!(pos.unrealized_pnl, 10 * P as i128);
        // Maintenance margin: 5% of mark notional.
        assert_eq!(pos.maintenance_margin(110 * P, &p), (110 * P / 20) as i128);
        // Liquidation estimate sits below entry for a long.
        assert!(pos.liquidation_price < 100 * P);

        pos.mark(90 * P, &p);
        assert_eq!(pos.unrealized_pnl, -(10 * P as i128));
    }
}
