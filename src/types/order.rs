//! Order model: sides, kinds, statuses, flags, and the [`Order`] record.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique, monotonically increasing order identifier assigned by the engine.
pub type OrderId = u64;

/// Opaque owner identifier. The core never interprets it beyond equality.
pub type UserId = u64;

/// The side of an order or trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Bid: buys the contract.
    Buy,
    /// Ask: sells the contract.
    Sell,
}

impl Side {
    /// The opposing side.
    #[inline]
    #[must_use]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Position sign contribution: +1 for buys, -1 for sells.
    #[inline]
    #[must_use]
    pub fn sign(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Supported order types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    /// Rests at its limit price after matching what crosses.
    Limit,
    /// Crosses unconditionally, never rests; remainder is cancelled.
    Market,
    /// Immediate-or-cancel: like Limit but the remainder is cancelled.
    Ioc,
    /// Fill-or-kill: executes in full or not at all.
    Fok,
    /// Maker-only: rejected if it would trade on arrival.
    PostOnly,
    /// Parked until the stop price trades, then injected as a limit order.
    StopLimit,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderKind::Limit => "LIMIT",
            OrderKind::Market => "MARKET",
            OrderKind::Ioc => "IOC",
            OrderKind::Fok => "FOK",
            OrderKind::PostOnly => "POST_ONLY",
            OrderKind::StopLimit => "STOP_LIMIT",
        };
        write!(f, "{s}")
    }
}

/// Order lifecycle status.
///
/// An order is *active* in `New` or `PartiallyFilled`; the other three
/// states are terminal and the matching engine never mutates a terminal
/// order again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted, nothing filled yet.
    New,
    /// Some quantity filled, remainder still working.
    PartiallyFilled,
    /// Fully executed.
    Filled,
    /// Removed before completion (user cancel, IOC/market remainder,
    /// self-trade prevention).
    Cancelled,
    /// Refused on admission; the book was never touched.
    Rejected,
}

impl OrderStatus {
    /// `true` for `Filled`, `Cancelled`, and `Rejected`.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

bitflags! {
    /// Behavioral flags attached to an order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct OrderFlags: u8 {
        /// May only reduce an existing position, never open or extend one.
        const REDUCE_ONLY = 0b0000_0001;
        /// A stop-limit order whose stop price has traded.
        const TRIGGERED = 0b0000_0010;
        /// Forced close-out submitted by the liquidation pathway. Bypasses
        /// risk and circuit-breaker admission.
        const LIQUIDATION = 0b0000_0100;
    }
}

/// A single order as owned by its book.
///
/// Quantities are in micro-lots, prices in micro-units. `filled` is
/// monotonically non-decreasing and never exceeds `quantity`; the remaining
/// quantity is always derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique engine-assigned identifier.
    pub id: OrderId,
    /// Symbol this order trades.
    pub symbol: String,
    /// Owner of the order.
    pub user: UserId,
    /// Buy or sell.
    pub side: Side,
    /// Order type.
    pub kind: OrderKind,
    /// Limit price in micro-units; 0 for market orders.
    pub price: u64,
    /// Stop trigger price in micro-units; 0 unless `kind == StopLimit`.
    pub stop_price: u64,
    /// Original quantity in micro-lots.
    pub quantity: u64,
    /// Executed quantity in micro-lots.
    pub filled: u64,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Behavioral flags.
    pub flags: OrderFlags,
    /// Optional opaque client correlation tag.
    pub client_tag: Option<String>,
    /// Microsecond creation timestamp.
    pub created_ts_us: u64,
    /// Microsecond timestamp of the last mutation.
    pub updated_ts_us: u64,
}

impl Order {
    /// Quantity still unexecuted.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.quantity.saturating_sub(self.filled)
    }

    /// `true` while the order can still trade or be cancelled.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// `true` for a stop-limit order still waiting on its trigger price.
    #[inline]
    #[must_use]
    pub fn is_parked_stop(&self) -> bool {
        self.kind == OrderKind::StopLimit && !self.flags.contains(OrderFlags::TRIGGERED)
    }

    /// Apply an execution of `qty` micro-lots at `ts_us`.
    ///
    /// Transitions to `PartiallyFilled` or `Filled` as the remainder allows.
    /// Quantity beyond the remainder is ignored (the matching loop never
    /// produces it, but the status machine must not go inconsistent if a
    /// caller does).
    pub fn fill(&mut self, qty: u64, ts_us: u64) {
        self.filled = (self.filled + qty).min(self.quantity);
        self.status = if self.remaining() == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_ts_us = ts_us;
    }

    /// Move the order to a terminal `Cancelled` state.
    pub fn cancel(&mut self, ts_us: u64) {
        self.status = OrderStatus::Cancelled;
        self.updated_ts_us = ts_us;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(quantity: u64) -> Order {
        Order {
            id: 1,
            symbol: "BTC-USD".to_string(),
            user: 7,
            side: Side::Buy,
            kind: OrderKind::Limit,
            price: 100,
            stop_price: 0,
            quantity,
            filled: 0,
            status: OrderStatus::New,
            flags: OrderFlags::empty(),
            client_tag: None,
            created_ts_us: 0,
            updated_ts_us: 0,
        }
    }

    #[test]
    fn test_fill_progression() {
        let mut o = order(10);
        o.fill(4, 1);
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.remaining(), 6);
        o.fill(6, 2);
        assert_eq!(o.status, OrderStatus::Filled);
        assert_eq!(o.remaining(), 0);
        assert_eq!(o.updated_ts_us, 2);
    }

    #[test]
    fn test_overfill_is_clamped() {
        let mut o = order(10);
        o.fill(25, 1);
        assert_eq!(o.filled, 10);
        assert_eq!(o.status, OrderStatus::Filled);
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.sign(), -1);
        assert_eq!(Side::Buy.to_string(), "BUY");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_flags_roundtrip() {
        let f = OrderFlags::REDUCE_ONLY | OrderFlags::LIQUIDATION;
        assert!(f.contains(OrderFlags::REDUCE_ONLY));
        assert!(!f.contains(OrderFlags::TRIGGERED));
    }
}
