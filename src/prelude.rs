//! Convenience re-exports for embedding the trading core.
//!
//! ```
//! use dexcore::prelude::*;
//! ```

pub use crate::accounts::{Account, AccountManager, AccountSnapshot, ExposureChange, Position};
pub use crate::breaker::{BreakerConfig, BreakerDecision, BreakerState, CircuitBreakers};
pub use crate::catalog::{FeeSchedule, Product, ProductCatalog};
pub use crate::config::CoreConfig;
pub use crate::core::{CoreError, CoreState, ExchangeCore, build_core};
pub use crate::engine::{MatchingEngine, OrderRequest};
pub use crate::journal::{
    EventKind, EventPayload, EventRecord, FileJournal, Journal, JournalError, Ledger,
    MemoryJournal, replay_into,
};
pub use crate::orderbook::{
    BookEvent, DepthSnapshot, OrderBook, RejectReason, RiskReason, SubmitResult, Trade,
};
pub use crate::rates::RateProvider;
pub use crate::risk::{RiskEngine, RiskLimits};
pub use crate::sequencer::{Command, CommandResult, CommandSender};
pub use crate::types::{
    Order, OrderFlags, OrderId, OrderKind, OrderStatus, PRICE_SCALE, QTY_SCALE, Side, UserId,
};
