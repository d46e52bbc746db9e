//! Per-product maker/taker fee schedule.

use crate::types::money::fee_on;
use serde::{Deserialize, Serialize};

/// Configurable fee schedule for maker and taker fees.
///
/// Fees are expressed in basis points (bps), where 1 bps = 0.01% = 0.0001.
/// Negative maker values represent rebates. `min_fee` (micro-units) floors
/// every positive charge; rebates are never floored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Maker fee in basis points (negative = rebate).
    pub maker_fee_bps: i32,
    /// Taker fee in basis points. Expected non-negative.
    pub taker_fee_bps: i32,
    /// Minimum charge per execution, in micro-units of quote currency.
    pub min_fee: u64,
}

impl FeeSchedule {
    /// Create a new fee schedule.
    #[must_use = "FeeSchedule does nothing unless used"]
    pub fn new(maker_fee_bps: i32, taker_fee_bps: i32, min_fee: u64) -> Self {
        Self {
            maker_fee_bps,
            taker_fee_bps,
            min_fee,
        }
    }

    /// A schedule that charges nothing.
    #[must_use]
    pub fn zero_fee() -> Self {
        Self::new(0, 0, 0)
    }

    /// `true` when both sides trade for free.
    #[must_use]
    #[inline]
    pub fn is_zero_fee(&self) -> bool {
        self.maker_fee_bps == 0 && self.taker_fee_bps == 0 && self.min_fee == 0
    }

    /// Fee amount for a notional value (micro-units), maker or taker side.
    ///
    /// Positive values are charges, negative values are rebates.
    #[must_use = "Fee calculation result must be used"]
    #[inline]
    pub fn calculate_fee(&self, notional: u128, is_maker: bool) -> i64 {
        let bps = if is_maker {
            self.maker_fee_bps
        } else {
            self.taker_fee_bps
        };
        fee_on(notional, bps, self.min_fee)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::zero_fee()
    }
}
