//! Thread-safe FX-rate and mark-price cache.
//!
//! A mutex-guarded map of currency-pair rates plus per-symbol mark prices.
//! Readers are frequent and short. Cross rates pivot through USD. A feed
//! failure degrades to the last-known value; symbols whose mark goes stale
//! past the configured threshold are reported so the breaker can halt them.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::trace;

/// Fixed-point scale of rates: micro-units per quote unit.
const RATE_SCALE: u128 = 1_000_000;

#[derive(Debug, Clone, Copy)]
struct Entry {
    /// Rate or price in micro-units.
    value: u64,
    updated_ts_us: u64,
}

/// FX-rate and mark-price cache.
pub struct RateProvider {
    /// `(base, quote)` currency-pair rates, e.g. `("USD", "MNT")`.
    rates: Mutex<HashMap<(String, String), Entry>>,
    /// Per-symbol mark prices.
    marks: Mutex<HashMap<String, Entry>>,
    /// Age past which a mark is considered stale, microseconds.
    stale_after_us: u64,
}

impl RateProvider {
    /// Create a provider whose marks go stale after `stale_after_secs`.
    #[must_use]
    pub fn new(stale_after_secs: u64) -> Self {
        Self {
            rates: Mutex::new(HashMap::new()),
            marks: Mutex::new(HashMap::new()),
            stale_after_us: stale_after_secs.saturating_mul(1_000_000),
        }
    }

    /// Install an FX rate (micro-units of `quote` per unit of `base`).
    pub fn set_rate(&self, base: &str, quote: &str, rate: u64, now_us: u64) {
        if rate == 0 {
            return;
        }
        trace!(base, quote, rate, "rate update");
        self.rates
            .lock()
            .expect("rates lock poisoned")
            .insert(
                (base.to_string(), quote.to_string()),
                Entry {
                    value: rate,
                    updated_ts_us: now_us,
                },
            );
    }

    /// Direct rate for a pair, if known.
    #[must_use]
    pub fn get_rate(&self, base: &str, quote: &str) -> Option<u64> {
        if base == quote {
            return Some(RATE_SCALE as u64);
        }
        self.rates
            .lock()
            .expect("rates lock poisoned")
            .get(&(base.to_string(), quote.to_string()))
            .map(|e| e.value)
    }

    /// Rate for a pair, direct, inverted, or crossed through USD.
    #[must_use]
    pub fn cross_rate(&self, base: &str, quote: &str) -> Option<u64> {
        if let Some(direct) = self.get_rate(base, quote) {
            return Some(direct);
        }
        if let Some(inverse) = self.get_rate(quote, base) {
            if inverse == 0 {
                return None;
            }
            return Some((RATE_SCALE * RATE_SCALE / inverse as u128) as u64);
        }
        // Pivot through USD: base→USD→quote.
        let base_usd = self
            .get_rate(base, "USD")
            .or_else(|| self.get_rate("USD", base).map(invert))?;
        let usd_quote = self
            .get_rate("USD", quote)
            .or_else(|| self.get_rate(quote, "USD").map(invert))?;
        Some((base_usd as u128 * usd_quote as u128 / RATE_SCALE) as u64)
    }

    /// Install a mark price for a symbol.
    pub fn set_mark(&self, symbol: &str, price: u64, now_us: u64) {
        if price == 0 {
            return;
        }
        self.marks.lock().expect("marks lock poisoned").insert(
            symbol.to_string(),
            Entry {
                value: price,
                updated_ts_us: now_us,
            },
        );
    }

    /// Last-known mark for a symbol, fresh or not.
    #[must_use]
    pub fn mark(&self, symbol: &str) -> Option<u64> {
        self.marks
            .lock()
            .expect("marks lock poisoned")
            .get(symbol)
            .map(|e| e.value)
    }

    /// Symbols whose mark has not updated within the staleness window.
    #[must_use]
    pub fn stale_symbols(&self, now_us: u64) -> Vec<String> {
        if self.stale_after_us == 0 {
            return Vec::new();
        }
        self.marks
            .lock()
            .expect("marks lock poisoned")
            .iter()
            .filter(|(_, e)| now_us.saturating_sub(e.updated_ts_us) > self.stale_after_us)
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }
}

fn invert(rate: u64) -> u64 {
    if rate == 0 {
        0
    } else {
        (RATE_SCALE * RATE_SCALE / rate as u128) as u64
    }
}
