//! Circuit breakers: per-symbol price-limit and halt state machines plus a
//! market-wide halt.
//!
//! Limits are computed from a rolling reference price: `upper/lower =
//! reference × (1 ± price_limit)`. A trade moving beyond the halt threshold
//! trips a time-bounded HALT; when it expires the reference clears and
//! re-seeds from the first subsequent trade. Admin halts override the
//! machine from any state.

use crate::types::Side;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Per-symbol breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Trading freely.
    Normal,
    /// Buy orders at/above the upper limit are blocked; asks still trade.
    LimitUp,
    /// Sell orders at/below the lower limit are blocked; bids still trade.
    LimitDown,
    /// No orders admitted until the halt expires or an admin resumes.
    Halted,
    /// Call-auction mode (admin only; admission behaves like `Halted`).
    Auction,
}

/// Outcome of a breaker admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Order may proceed.
    Allow,
    /// Symbol or market is halted.
    Halted,
    /// This side is blocked at a price limit.
    LimitBlocked(Side),
}

/// Breaker tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Price-limit distance from the reference, basis points.
    pub price_limit_bps: u64,
    /// Halt trigger distance from the reference, basis points.
    pub halt_threshold_bps: u64,
    /// Reference-price refresh window, seconds.
    pub time_window_secs: u64,
    /// Automatic halt duration, seconds.
    pub halt_duration_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            price_limit_bps: 500,     // 5%
            halt_threshold_bps: 1_000, // 10%
            time_window_secs: 300,
            halt_duration_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SymbolBreaker {
    state: BreakerState,
    /// 0 until seeded by the first trade of a window.
    reference_price: u64,
    upper_limit: u64,
    lower_limit: u64,
    window_start_us: u64,
    halt_end_us: u64,
    trigger_count: u32,
}

impl SymbolBreaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Normal,
            reference_price: 0,
            upper_limit: 0,
            lower_limit: 0,
            window_start_us: 0,
            halt_end_us: 0,
            trigger_count: 0,
        }
    }
}

/// All circuit breakers of the core. Single-writer from the matching thread;
/// admin paths take the owning lock.
pub struct CircuitBreakers {
    config: BreakerConfig,
    symbols: HashMap<String, SymbolBreaker>,
    market_halted: bool,
    /// 0 means an admin halt with no automatic expiry.
    market_halt_end_us: u64,
}

impl CircuitBreakers {
    /// Create breakers with the given tuning.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            symbols: HashMap::new(),
            market_halted: false,
            market_halt_end_us: 0,
        }
    }

    /// Admission check for an order at `price`.
    ///
    /// A market-wide halt pre-empts everything. Symbol halts auto-release
    /// once their end time passes; the reference price then clears and
    /// re-seeds from the next trade.
    pub fn check_order(
        &mut self,
        symbol: &str,
        side: Side,
        price: u64,
        now_us: u64,
    ) -> BreakerDecision {
        if self.market_halted {
            if self.market_halt_end_us != 0 && now_us >= self.market_halt_end_us {
                self.market_halted = false;
                self.market_halt_end_us = 0;
                info!("market-wide halt expired");
            } else {
                return BreakerDecision::Halted;
            }
        }

        let breaker = self.symbols.entry(symbol.to_string()).or_insert_with(SymbolBreaker::new);

        match breaker.state {
            BreakerState::Halted => {
                if breaker.halt_end_us != 0 && now_us >= breaker.halt_end_us {
                    breaker.state = BreakerState::Normal;
                    breaker.reference_price = 0;
                    breaker.upper_limit = 0;
                    breaker.lower_limit = 0;
                    breaker.halt_end_us = 0;
                    info!(symbol, "halt expired, reference cleared");
                } else {
                    return BreakerDecision::Halted;
                }
            }
            BreakerState::Auction => return BreakerDecision::Halted,
            _ => {}
        }

        if breaker.reference_price == 0 || price == 0 {
            return BreakerDecision::Allow;
        }

        match side {
            Side::Buy if price >= breaker.upper_limit => {
                breaker.state = BreakerState::LimitUp;
                breaker.trigger_count += 1;
                warn!(symbol, price, limit = breaker.upper_limit, "limit-up: buy blocked");
                BreakerDecision::LimitBlocked(Side::Buy)
            }
            Side::Sell if price <= breaker.lower_limit => {
                breaker.state = BreakerState::LimitDown;
                breaker.trigger_count += 1;
                warn!(symbol, price, limit = breaker.lower_limit, "limit-down: sell blocked");
                BreakerDecision::LimitBlocked(Side::Sell)
            }
            _ => {
                // An in-band order on the constrained side releases the
                // limit state.
                if matches!(breaker.state, BreakerState::LimitUp | BreakerState::LimitDown) {
                    breaker.state = BreakerState::Normal;
                }
                BreakerDecision::Allow
            }
        }
    }

    /// Feed a trade print into the breaker.
    ///
    /// Seeds or refreshes the reference price and trips HALT when the print
    /// moves `halt_threshold_bps` or more away from it.
    pub fn on_trade(&mut self, symbol: &str, price: u64, now_us: u64) {
        let config = self.config;
        let breaker = self.symbols.entry(symbol.to_string()).or_insert_with(SymbolBreaker::new);
        if breaker.state == BreakerState::Halted || price == 0 {
            return;
        }

        let window_us = config.time_window_secs * 1_000_000;
        if breaker.reference_price == 0
            || now_us.saturating_sub(breaker.window_start_us) >= window_us
        {
            Self::seed_reference(breaker, &config, price, now_us);
            return;
        }

        let deviation = crate::types::money::deviation_bps(price, breaker.reference_price);
        if deviation >= config.halt_threshold_bps {
            breaker.state = BreakerState::Halted;
            breaker.halt_end_us = now_us + config.halt_duration_secs * 1_000_000;
            breaker.trigger_count += 1;
            warn!(
                symbol,
                price,
                reference = breaker.reference_price,
                deviation_bps = deviation,
                "halt tripped"
            );
        }
    }

    /// Admin halt of one symbol, from any state. `duration_secs` of 0 halts
    /// until an explicit resume.
    pub fn halt_symbol(&mut self, symbol: &str, duration_secs: u64, now_us: u64) {
        let breaker = self.symbols.entry(symbol.to_string()).or_insert_with(SymbolBreaker::new);
        breaker.state = BreakerState::Halted;
        breaker.halt_end_us = if duration_secs == 0 {
            0
        } else {
            now_us + duration_secs * 1_000_000
        };
        breaker.trigger_count += 1;
        info!(symbol, duration_secs, "admin halt");
    }

    /// Put one symbol into call-auction mode. Admission behaves like a
    /// halt until an explicit [`Self::resume_symbol`].
    pub fn begin_auction(&mut self, symbol: &str) {
        let breaker = self.symbols.entry(symbol.to_string()).or_insert_with(SymbolBreaker::new);
        breaker.state = BreakerState::Auction;
        breaker.halt_end_us = 0;
        info!(symbol, "auction mode");
    }

    /// Admin resume of one symbol: state returns to NORMAL and the
    /// reference re-seeds from the next trade.
    pub fn resume_symbol(&mut self, symbol: &str) {
        if let Some(breaker) = self.symbols.get_mut(symbol) {
            breaker.state = BreakerState::Normal;
            breaker.reference_price = 0;
            breaker.halt_end_us = 0;
            info!(symbol, "admin resume");
        }
    }

    /// Market-wide halt. `duration_secs` of 0 halts until resume.
    pub fn halt_market(&mut self, duration_secs: u64, now_us: u64) {
        self.market_halted = true;
        self.market_halt_end_us = if duration_secs == 0 {
            0
        } else {
            now_us + duration_secs * 1_000_000
        };
        warn!(duration_secs, "market-wide halt");
    }

    /// Lift the market-wide halt.
    pub fn resume_market(&mut self) {
        self.market_halted = false;
        self.market_halt_end_us = 0;
        info!("market-wide resume");
    }

    /// Current state of a symbol's breaker.
    #[must_use]
    pub fn state(&self, symbol: &str) -> BreakerState {
        self.symbols
            .get(symbol)
            .map_or(BreakerState::Normal, |b| b.state)
    }

    /// Whether the whole market is halted.
    #[must_use]
    pub fn market_halted(&self) -> bool {
        self.market_halted
    }

    /// Times this symbol's breaker has tripped (limits and halts).
    #[must_use]
    pub fn trigger_count(&self, symbol: &str) -> u32 {
        self.symbols.get(symbol).map_or(0, |b| b.trigger_count)
    }

    fn seed_reference(
        breaker: &mut SymbolBreaker,
        config: &BreakerConfig,
        price: u64,
        now_us: u64,
    ) {
        breaker.reference_price = price;
        breaker.window_start_us = now_us;
        let limit = (price as u128 * config.price_limit_bps as u128
            / crate::types::BPS_DENOM) as u64;
        breaker.upper_limit = price.saturating_add(limit);
        breaker.lower_limit = price.saturating_sub(limit);
    }
}
