//! # Dexcore: a deterministic derivatives exchange trading core
//!
//! Dexcore is the matching heart of a digital derivatives exchange: limit
//! order books with strict price-time priority, a single-writer matching
//! thread, pre-trade risk gates and circuit breakers, integer-money
//! position and margin accounting, and an append-only event journal with a
//! double-entry verification mirror.
//!
//! ## Architecture
//!
//! - **Single-writer matching.** One thread drains an MPSC command queue
//!   and owns all book and position mutation; FIFO queue order is the
//!   global serialization order. Read paths take short per-book locks and
//!   never traverse the queue.
//! - **Integer money end to end.** Prices are unsigned micro-units
//!   (10⁻⁶ of a quote unit), quantities micro-lots. No floating point
//!   touches a settlement path.
//! - **Typed failures.** Validation errors and policy rejections are
//!   values ([`RejectReason`]), never panics; a fatal journal failure
//!   halts command intake and publishes `CoreHalted` instead of losing
//!   events.
//! - **Deterministic replay.** Every state transition is journaled with a
//!   monotonic sequence number and CRC; replaying from sequence 0 rebuilds
//!   account and position state exactly, and an in-memory double-entry
//!   ledger proves `Σ debits == Σ credits` after every record.
//!
//! ## Quick start
//!
//! ```no_run
//! use dexcore::prelude::*;
//!
//! let product = Product {
//!     symbol: "XAU-USD".to_string(),
//!     tick_size: PRICE_SCALE / 100,
//!     lot_size: QTY_SCALE / 100,
//!     contract_size: 1,
//!     margin_rate_bps: 1_000,
//!     maintenance_margin_rate_bps: 500,
//!     maker_fee_bps: 2,
//!     taker_fee_bps: 5,
//!     min_notional: PRICE_SCALE,
//!     min_fee: 0,
//!     active: true,
//!     hedge_symbol: None,
//! };
//! let mut core = build_core(CoreConfig::default(), [product]).expect("build");
//! core.start();
//! core.deposit(1, 1_000_000 * PRICE_SCALE);
//! let result = core.submit_order(OrderRequest {
//!     symbol: "XAU-USD".to_string(),
//!     user: 1,
//!     side: Side::Buy,
//!     kind: OrderKind::Limit,
//!     price: 3_500 * PRICE_SCALE,
//!     stop_price: 0,
//!     quantity: QTY_SCALE,
//!     reduce_only: false,
//!     client_tag: None,
//! });
//! println!("{result:?}");
//! core.graceful_shutdown();
//! ```

pub mod accounts;
pub mod breaker;
pub mod catalog;
pub mod config;
pub mod core;
pub mod engine;
pub mod journal;
pub mod orderbook;
pub mod prelude;
pub mod rates;
pub mod risk;
pub mod sequencer;
pub mod types;
mod utils;

pub use accounts::{
    Account, AccountManager, AccountSnapshot, ExposureChange, ExposureListener, Position,
};
pub use breaker::{BreakerConfig, BreakerDecision, BreakerState, CircuitBreakers};
pub use catalog::{FeeSchedule, Product, ProductCatalog};
pub use config::CoreConfig;
pub use core::{CoreError, CoreServices, CoreState, ExchangeCore, build_core};
pub use engine::{MatchingEngine, OrderRequest};
pub use journal::{
    EventKind, EventPayload, EventRecord, FileJournal, Journal, JournalError, Ledger,
    MemoryJournal, replay_into,
};
pub use orderbook::{
    BookEvent, DepthLevel, DepthSnapshot, OrderBook, RejectReason, RiskReason, SubmitResult, Trade,
    TradeListener,
};
pub use rates::RateProvider;
pub use risk::{RiskEngine, RiskLimits};
pub use sequencer::{Command, CommandError, CommandResult, CommandSender, Sequencer};
pub use types::{
    Order, OrderFlags, OrderId, OrderKind, OrderStatus, PRICE_SCALE, QTY_SCALE, Side, UserId,
};
pub use utils::current_time_micros;
