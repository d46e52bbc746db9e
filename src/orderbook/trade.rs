//! Trade records, book lifecycle events, and listener types.

use crate::orderbook::error::RejectReason;
use crate::types::{Order, OrderId, Side, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An immutable execution record.
///
/// Produced by the matching loop whenever a taker crosses a resting maker.
/// The execution price is always the maker's price: price improvement goes
/// to the taker. Fees are in micro-units; a negative maker fee is a rebate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Monotonic trade identifier, unique across all books of an engine.
    pub trade_id: u64,
    /// Symbol the trade printed on.
    pub symbol: String,
    /// The resting order.
    pub maker_order_id: OrderId,
    /// The incoming crossing order.
    pub taker_order_id: OrderId,
    /// Owner of the maker order.
    pub maker_user: UserId,
    /// Owner of the taker order.
    pub taker_user: UserId,
    /// Side of the taker (the aggressor).
    pub taker_side: Side,
    /// Execution price in micro-units (the maker's price).
    pub price: u64,
    /// Executed quantity in micro-lots.
    pub quantity: u64,
    /// Fee charged to the maker (negative = rebate), micro-units.
    pub maker_fee: i64,
    /// Fee charged to the taker, micro-units.
    pub taker_fee: i64,
    /// Microsecond execution timestamp.
    pub ts_us: u64,
}

impl Trade {
    /// Signed position delta this trade applies to the given participant.
    #[must_use]
    pub fn position_delta_for(&self, user: UserId) -> i64 {
        let qty = self.quantity as i64;
        if user == self.taker_user {
            self.taker_side.sign() * qty
        } else if user == self.maker_user {
            self.taker_side.opposite().sign() * qty
        } else {
            0
        }
    }
}

/// Callback invoked for every trade, shared across threads.
pub type TradeListener = Arc<dyn Fn(&Trade) + Send + Sync>;

/// Order lifecycle notification emitted by a book alongside its trades.
///
/// Every variant carries a full denormalized snapshot of the order at the
/// moment of the event, so consumers (journal, SSE, candle writers) need no
/// further lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookEvent {
    /// The order passed validation and entered the book, parked, or began
    /// matching.
    Accepted(Order),
    /// The order progressed: a fill, a modify, or a status change.
    Updated(Order),
    /// The order left the book without completing (user cancel, IOC/market
    /// remainder, self-trade prevention).
    Cancelled(Order),
    /// A parked stop-limit order was released into the book.
    Triggered(Order),
    /// The order was refused; the book was not touched.
    Rejected {
        /// Snapshot of the rejected order.
        order: Order,
        /// Why it was refused.
        reason: RejectReason,
    },
}

impl BookEvent {
    /// The order snapshot inside this event.
    #[must_use]
    pub fn order(&self) -> &Order {
        match self {
            BookEvent::Accepted(o)
            | BookEvent::Updated(o)
            | BookEvent::Cancelled(o)
            | BookEvent::Triggered(o) => o,
            BookEvent::Rejected { order, .. } => order,
        }
    }
}

/// Callback invoked for every book event, shared across threads.
pub type EventListener = Arc<dyn Fn(&BookEvent) + Send + Sync>;

/// Everything a single `submit` produced.
#[derive(Debug, Clone)]
pub struct SubmitResult {
    /// Final snapshot of the submitted order (including fills and status).
    pub order: Order,
    /// Trades generated, in execution order. Includes trades from stop
    /// orders this submission triggered.
    pub trades: Vec<Trade>,
    /// Lifecycle events for every order touched, in occurrence order.
    pub events: Vec<BookEvent>,
    /// Present when the order was rejected; `trades` is then empty and the
    /// book is untouched.
    pub reject: Option<RejectReason>,
}

impl SubmitResult {
    /// Build a rejection result: no trades, no book mutation.
    #[must_use]
    pub fn rejected(order: Order, reason: RejectReason) -> Self {
        Self {
            events: vec![BookEvent::Rejected {
                order: order.clone(),
                reason: reason.clone(),
            }],
            order,
            trades: Vec::new(),
            reject: Some(reason),
        }
    }

    /// `true` when the order was refused on admission.
    #[must_use]
    #[inline]
    pub fn is_rejected(&self) -> bool {
        self.reject.is_some()
    }

    /// Total executed quantity across all trades of this submission.
    #[must_use]
    pub fn executed_quantity(&self) -> u64 {
        self.trades.iter().map(|t| t.quantity).sum()
    }
}

/// Outcome of a stop-trigger scan.
#[derive(Debug, Clone, Default)]
pub struct TriggerResult {
    /// Trades generated by released stop orders.
    pub trades: Vec<Trade>,
    /// Lifecycle events for released and touched orders.
    pub events: Vec<BookEvent>,
}
