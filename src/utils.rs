//! Small shared helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in microseconds since the Unix epoch.
///
/// All timestamps in the core (orders, trades, journal records) use this
/// resolution. Falls back to 0 if the system clock is before the epoch,
/// which only happens on badly misconfigured hosts.
#[must_use]
pub fn current_time_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Number of whole days since the Unix epoch for a microsecond timestamp.
///
/// Used by the risk engine to detect calendar-day boundaries for the
/// daily-loss reset.
#[inline]
#[must_use]
pub fn day_of(ts_us: u64) -> u64 {
    ts_us / 86_400_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_micros_is_monotonic_enough() {
        let a = current_time_micros();
        let b = current_time_micros();
        assert!(b >= a);
        // Sanity: we are after 2020-01-01.
        assert!(a > 1_577_836_800_000_000);
    }

    #[test]
    fn test_day_of_boundaries() {
        assert_eq!(day_of(0), 0);
        assert_eq!(day_of(86_400_000_000 - 1), 0);
        assert_eq!(day_of(86_400_000_000), 1);
        assert_eq!(day_of(3 * 86_400_000_000 + 5), 3);
    }
}
