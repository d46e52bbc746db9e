//! Journal record types: kinds, payloads, and the sequenced record.

use crate::orderbook::Trade;
use crate::types::{Order, UserId};
use serde::{Deserialize, Serialize};

/// On-disk record kind tag (`u8` in the record header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    /// A new order was accepted.
    OrderSubmitted = 1,
    /// An order progressed (fill, modify, trigger).
    OrderUpdated = 2,
    /// A trade executed.
    Trade = 3,
    /// An order left the book without completing.
    Cancel = 4,
    /// A customer deposit.
    Deposit = 5,
    /// A customer withdrawal.
    Withdraw = 6,
    /// A funding transfer settled against a customer.
    FundingPayment = 7,
    /// A forced close-out began.
    Liquidation = 8,
    /// Part of a taker fee accrued to the insurance fund.
    InsuranceContribution = 9,
    /// The insurance fund covered a bankrupt account.
    InsuranceDraw = 10,
    /// Residual loss socialized after the fund ran dry.
    SocializedLoss = 11,
    /// The core halted on a fatal internal error.
    CoreHalted = 12,
}

/// Fully denormalized record payload, serialized as JSON inside the binary
/// record frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    /// A new order was accepted (final snapshot after matching).
    OrderSubmitted {
        /// The accepted order.
        order: Order,
    },
    /// An order progressed: a fill, a modify, or a stop trigger.
    OrderUpdated {
        /// Snapshot after the change.
        order: Order,
    },
    /// A trade executed. Carries both sides' realized PnL so downstream
    /// consumers (and the ledger) need no position state.
    Trade {
        /// The execution record.
        trade: Trade,
        /// Realized PnL of the maker side, micro-units.
        maker_realized: i128,
        /// Realized PnL of the taker side, micro-units.
        taker_realized: i128,
    },
    /// An order left the book without completing.
    Cancel {
        /// Final snapshot of the cancelled order.
        order: Order,
    },
    /// A customer deposit.
    Deposit {
        /// The credited user.
        user: UserId,
        /// Amount in micro-units.
        amount: u64,
    },
    /// A customer withdrawal.
    Withdraw {
        /// The debited user.
        user: UserId,
        /// Amount in micro-units.
        amount: u64,
    },
    /// A funding transfer (signed: positive credits the user).
    FundingPayment {
        /// The user funded.
        user: UserId,
        /// The perpetual symbol the payment relates to.
        symbol: String,
        /// Signed amount, micro-units.
        amount: i128,
    },
    /// A forced close-out was initiated.
    Liquidation {
        /// The under-margined user.
        user: UserId,
        /// Symbol being closed.
        symbol: String,
        /// Signed size being closed, micro-lots.
        size: i64,
        /// Mark price at eligibility.
        mark_price: u64,
    },
    /// Insurance fund contribution skimmed from a taker fee.
    InsuranceContribution {
        /// Contribution amount, micro-units.
        amount: i128,
        /// Fund balance after.
        balance: i128,
    },
    /// Insurance fund draw covering a bankrupt account.
    InsuranceDraw {
        /// The covered user.
        user: UserId,
        /// Draw amount, micro-units.
        amount: i128,
        /// Fund balance after.
        balance: i128,
    },
    /// Loss socialized after the insurance fund was exhausted.
    SocializedLoss {
        /// The bankrupt user whose shortfall was socialized.
        user: UserId,
        /// Socialized amount, micro-units.
        amount: i128,
    },
    /// The core halted and awaits supervisory restart.
    CoreHalted {
        /// Human-readable cause.
        reason: String,
    },
}

impl EventPayload {
    /// The header kind byte for this payload.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::OrderSubmitted { .. } => EventKind::OrderSubmitted,
            EventPayload::OrderUpdated { .. } => EventKind::OrderUpdated,
            EventPayload::Trade { .. } => EventKind::Trade,
            EventPayload::Cancel { .. } => EventKind::Cancel,
            EventPayload::Deposit { .. } => EventKind::Deposit,
            EventPayload::Withdraw { .. } => EventKind::Withdraw,
            EventPayload::FundingPayment { .. } => EventKind::FundingPayment,
            EventPayload::Liquidation { .. } => EventKind::Liquidation,
            EventPayload::InsuranceContribution { .. } => EventKind::InsuranceContribution,
            EventPayload::InsuranceDraw { .. } => EventKind::InsuranceDraw,
            EventPayload::SocializedLoss { .. } => EventKind::SocializedLoss,
            EventPayload::CoreHalted { .. } => EventKind::CoreHalted,
        }
    }
}

/// A sequenced, timestamped journal record.
///
/// Sequence numbers are assigned by the journal on append: monotonic and
/// gap-free within one journal. Replaying records from sequence 0 rebuilds
/// account and position state exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic sequence number.
    pub seq: u64,
    /// Microsecond wall-clock timestamp.
    pub ts_us: u64,
    /// The denormalized payload.
    pub payload: EventPayload,
}

/// Callback invoked with every appended record, in sequence order.
pub type RecordListener = std::sync::Arc<dyn Fn(&EventRecord) + Send + Sync>;
