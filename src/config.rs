//! Core configuration with overridable named parameters.

use crate::breaker::BreakerConfig;
use crate::risk::RiskLimits;
use crate::types::{PRICE_SCALE, QTY_SCALE};
use serde::{Deserialize, Serialize};

/// Tunable parameters of the trading core. Every field has a default and
/// can be overridden by the embedding process (typically deserialized from
/// its own configuration file).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Default maximum absolute position per user per symbol, micro-lots.
    pub max_position_size: u64,
    /// Default daily realized loss limit, micro-units.
    pub daily_loss_limit: u64,
    /// Default maximum orders per rolling second.
    pub max_orders_per_second: usize,
    /// Default fat-finger band, basis points from the reference price.
    pub fat_finger_bps: u64,
    /// Circuit-breaker price-limit distance, basis points.
    pub cb_price_limit_bps: u64,
    /// Circuit-breaker halt threshold, basis points.
    pub cb_halt_threshold_bps: u64,
    /// Circuit-breaker reference window, seconds.
    pub cb_time_window_seconds: u64,
    /// Circuit-breaker automatic halt duration, seconds.
    pub cb_halt_duration_seconds: u64,
    /// Fraction of each taker fee routed to the insurance fund, bps.
    pub insurance_contrib_bps: u32,
    /// Mark-price staleness threshold, seconds; stale symbols are halted.
    pub mark_stale_after_seconds: u64,
    /// Journal directory; `None` selects the in-memory journal.
    pub journal_dir: Option<std::path::PathBuf>,
    /// Group-commit batch: records per journal flush.
    pub journal_flush_every: u32,
    /// Journal segment size in bytes.
    pub journal_segment_bytes: usize,
    /// Timeout for synchronous command submission, milliseconds.
    pub sync_timeout_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_position_size: 100 * QTY_SCALE,
            daily_loss_limit: 10_000 * PRICE_SCALE,
            max_orders_per_second: 10,
            fat_finger_bps: 1_000,
            cb_price_limit_bps: 500,
            cb_halt_threshold_bps: 1_000,
            cb_time_window_seconds: 300,
            cb_halt_duration_seconds: 300,
            insurance_contrib_bps: 2_000,
            mark_stale_after_seconds: 60,
            journal_dir: None,
            journal_flush_every: 64,
            journal_segment_bytes: 64 * 1024 * 1024,
            sync_timeout_ms: 5_000,
        }
    }
}

impl CoreConfig {
    /// Risk-engine default limits derived from this config.
    #[must_use]
    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_position_size: self.max_position_size,
            daily_loss_limit: self.daily_loss_limit,
            max_orders_per_second: self.max_orders_per_second,
            fat_finger_bps: self.fat_finger_bps,
        }
    }

    /// Circuit-breaker tuning derived from this config.
    #[must_use]
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            price_limit_bps: self.cb_price_limit_bps,
            halt_threshold_bps: self.cb_halt_threshold_bps,
            time_window_secs: self.cb_time_window_seconds,
            halt_duration_secs: self.cb_halt_duration_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.max_orders_per_second, 10);
        assert_eq!(config.cb_halt_threshold_bps, 1_000);
        assert_eq!(config.sync_timeout_ms, 5_000);
        assert!(config.journal_dir.is_none());
    }

    #[test]
    fn test_partial_override_from_json() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"daily_loss_limit": 5, "journal_flush_every": 8}"#).unwrap();
        assert_eq!(config.daily_loss_limit, 5);
        assert_eq!(config.journal_flush_every, 8);
        // Untouched fields keep their defaults.
        assert_eq!(config.max_orders_per_second, 10);
    }

    #[test]
    fn test_derived_configs() {
        let config = CoreConfig::default();
        assert_eq!(config.risk_limits().fat_finger_bps, 1_000);
        assert_eq!(config.breaker_config().halt_duration_secs, 300);
    }
}
