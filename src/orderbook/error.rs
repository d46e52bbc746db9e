//! Rejection and error types for order admission and book operations.
//!
//! None of these are panics: every failure on the trading path is a typed
//! value returned to the caller. Validation failures and policy rejections
//! leave the book untouched.

use crate::types::{OrderId, Side};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The specific risk check that refused an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskReason {
    /// Projected position would exceed the user's maximum.
    PositionLimit,
    /// Too many orders inside the rolling one-second window.
    RateLimit,
    /// Price too far from the reference price.
    FatFinger,
    /// Daily realized loss limit breached; user is blocked until the next
    /// calendar day.
    DailyLossLimit,
}

/// Why an order (or cancel/modify/withdraw) was refused.
///
/// Validation errors mean bad input; policy rejections mean the input was
/// well-formed but inadmissible right now. Either way, no state changed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RejectReason {
    /// The symbol is unknown or not activated for trading.
    #[error("unknown or inactive symbol: {symbol}")]
    InvalidSymbol {
        /// The offending symbol.
        symbol: String,
    },

    /// Quantity is zero or not a multiple of the product lot size.
    #[error("invalid quantity {quantity}: not a positive multiple of lot size {lot_size}")]
    InvalidQty {
        /// The offending quantity in micro-lots.
        quantity: u64,
        /// The product lot size.
        lot_size: u64,
    },

    /// Price did not survive tick validation.
    #[error("invalid price {price}: tick size is {tick_size}")]
    InvalidPriceTick {
        /// The offending price in micro-units.
        price: u64,
        /// The product tick size.
        tick_size: u64,
    },

    /// Order notional is below the product minimum.
    #[error("notional {notional} below minimum {min_notional}")]
    BelowMinNotional {
        /// Computed order notional in micro-units.
        notional: u128,
        /// The product minimum notional.
        min_notional: u64,
    },

    /// A stop-limit order arrived without a positive stop price.
    #[error("stop-limit order requires a positive stop price")]
    MissingStopPrice,

    /// The referenced order does not exist in this book.
    #[error("order {order_id} not found")]
    UnknownOrder {
        /// The missing order id.
        order_id: OrderId,
    },

    /// The referenced order is already filled, cancelled, or rejected.
    #[error("order {order_id} is already terminal")]
    AlreadyTerminal {
        /// The terminal order id.
        order_id: OrderId,
    },

    /// The symbol (or the whole market) is halted by a circuit breaker.
    #[error("circuit breaker halted")]
    CircuitHalted,

    /// The symbol is at a price limit and this side is blocked.
    #[error("{side} orders blocked at circuit price limit")]
    CircuitLimit {
        /// The blocked side.
        side: Side,
    },

    /// A post-only order would have traded on arrival.
    #[error("post-only order would take liquidity")]
    PostOnlyWouldTake,

    /// A fill-or-kill order could not be filled in full.
    #[error("fill-or-kill quantity not achievable")]
    FokUnfillable,

    /// The account cannot reserve the initial margin this order requires.
    #[error("insufficient margin: required {required}, available {available}")]
    InsufficientMargin {
        /// Required initial margin in micro-units.
        required: i128,
        /// Available balance in micro-units.
        available: i128,
    },

    /// Withdrawal exceeds the available balance.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// A reduce-only order would open or extend a position.
    #[error("reduce-only order would extend position")]
    ReduceOnlyWouldExtend,

    /// The pre-trade risk engine refused the order.
    #[error("risk rejected: {0:?}")]
    Risk(RiskReason),

    /// The core has halted after a fatal internal error and is waiting for
    /// supervisory restart.
    #[error("core halted")]
    CoreHalted,
}
