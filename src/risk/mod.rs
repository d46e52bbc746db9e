//! Pre-trade risk engine.
//!
//! Admission gate run before an order reaches the matching engine. Checks
//! run in a fixed order and short-circuit on the first failure: day-boundary
//! reset, blocked flag, order rate, projected position, fat-finger distance,
//! daily loss. Per-user limit overrides take precedence over the defaults.

use crate::orderbook::RiskReason;
use crate::types::money::deviation_bps;
use crate::types::{Side, UserId};
use crate::utils::day_of;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// Rolling window length for the order-rate check.
const RATE_WINDOW_US: u64 = 1_000_000;

/// Limits applied to one user (or to everyone, as the default set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum absolute net position per symbol, micro-lots.
    pub max_position_size: u64,
    /// Daily realized loss that blocks the user until the next day,
    /// micro-units.
    pub daily_loss_limit: u64,
    /// Maximum orders per rolling second.
    pub max_orders_per_second: usize,
    /// Maximum relative distance from the reference price, basis points.
    pub fat_finger_bps: u64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: 100 * crate::types::QTY_SCALE,
            daily_loss_limit: 10_000 * crate::types::PRICE_SCALE,
            max_orders_per_second: 10,
            fat_finger_bps: 1_000, // 10%
        }
    }
}

/// Mutable per-user risk state.
#[derive(Debug, Default)]
struct UserRisk {
    /// Net position per symbol, micro-lots signed.
    positions: HashMap<String, i64>,
    /// Realized PnL accumulated today, micro-units.
    daily_pnl: i128,
    /// Timestamps of recent order submissions, ascending.
    order_times: VecDeque<u64>,
    /// Set when the daily loss limit trips; cleared at the day boundary.
    blocked: bool,
    /// Day (days since epoch) the daily PnL was last reset.
    pnl_reset_day: u64,
}

/// The pre-trade risk engine. Single-writer: called only from the matching
/// thread and from admin paths holding the owning lock.
pub struct RiskEngine {
    defaults: RiskLimits,
    overrides: HashMap<UserId, RiskLimits>,
    users: HashMap<UserId, UserRisk>,
}

impl RiskEngine {
    /// Create an engine with the given default limits.
    #[must_use]
    pub fn new(defaults: RiskLimits) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            users: HashMap::new(),
        }
    }

    /// Install per-user limits that override the defaults.
    pub fn set_user_limits(&mut self, user: UserId, limits: RiskLimits) {
        self.overrides.insert(user, limits);
    }

    /// The limits effective for `user`.
    #[must_use]
    pub fn limits_for(&self, user: UserId) -> RiskLimits {
        self.overrides.get(&user).copied().unwrap_or(self.defaults)
    }

    /// Admission check; returns the first failing reason.
    ///
    /// On acceptance the submission timestamp is recorded in the rate
    /// window; rejected orders do not consume rate budget.
    pub fn check_order(
        &mut self,
        user: UserId,
        symbol: &str,
        side: Side,
        price: u64,
        qty: u64,
        reference_price: u64,
        now_us: u64,
    ) -> Result<(), RiskReason> {
        let limits = self.limits_for(user);
        let state = self.users.entry(user).or_default();

        // 1. Calendar-day boundary: reset the daily loss and unblock.
        let today = day_of(now_us);
        if today > state.pnl_reset_day {
            state.daily_pnl = 0;
            state.blocked = false;
            state.pnl_reset_day = today;
        }

        // 2. Standing block from a previous daily-loss trip.
        if state.blocked {
            return Err(RiskReason::DailyLossLimit);
        }

        // 3. Order rate over the trailing second.
        let cutoff = now_us.saturating_sub(RATE_WINDOW_US);
        while state.order_times.front().is_some_and(|t| *t < cutoff) {
            state.order_times.pop_front();
        }
        if state.order_times.len() >= limits.max_orders_per_second {
            return Err(RiskReason::RateLimit);
        }

        // 4. Projected position against the per-symbol cap.
        let current = state.positions.get(symbol).copied().unwrap_or(0);
        let projected = current + side.sign() * qty as i64;
        if projected.unsigned_abs() > limits.max_position_size {
            return Err(RiskReason::PositionLimit);
        }

        // 5. Fat-finger distance from the reference price.
        if reference_price > 0
            && price > 0
            && deviation_bps(price, reference_price) > limits.fat_finger_bps
        {
            return Err(RiskReason::FatFinger);
        }

        // 6. Daily loss limit.
        if state.daily_pnl < -(limits.daily_loss_limit as i128) {
            state.blocked = true;
            warn!(user, pnl = state.daily_pnl, "daily loss limit tripped");
            return Err(RiskReason::DailyLossLimit);
        }

        // 7. Accept and consume rate budget.
        state.order_times.push_back(now_us);
        Ok(())
    }

    /// Record the outcome of a fill: position delta and realized PnL.
    ///
    /// Crossing the daily loss limit here blocks the user's next admission
    /// rather than rejecting retroactively.
    pub fn update_position(
        &mut self,
        user: UserId,
        symbol: &str,
        delta: i64,
        realized_pnl: i128,
        now_us: u64,
    ) {
        let limits = self.limits_for(user);
        let state = self.users.entry(user).or_default();
        let today = day_of(now_us);
        if today > state.pnl_reset_day {
            state.daily_pnl = 0;
            state.blocked = false;
            state.pnl_reset_day = today;
        }
        let position = state.positions.entry(symbol.to_string()).or_insert(0);
        *position += delta;
        if *position == 0 {
            state.positions.remove(symbol);
        }
        state.daily_pnl += realized_pnl;
        if state.daily_pnl < -(limits.daily_loss_limit as i128) && !state.blocked {
            state.blocked = true;
            warn!(user, pnl = state.daily_pnl, "daily loss limit tripped on fill");
        }
    }

    /// Whether the user is currently blocked by the daily loss limit.
    #[must_use]
    pub fn is_blocked(&self, user: UserId) -> bool {
        self.users.get(&user).is_some_and(|s| s.blocked)
    }

    /// Today's realized PnL for a user, micro-units.
    #[must_use]
    pub fn daily_pnl(&self, user: UserId) -> i128 {
        self.users.get(&user).map_or(0, |s| s.daily_pnl)
    }
}
