//! Core value types: fixed-point money/quantity primitives and the order model.

pub mod money;
pub mod order;

pub use money::{BPS_DENOM, PRICE_SCALE, QTY_SCALE};
pub use order::{Order, OrderFlags, OrderId, OrderKind, OrderStatus, Side, UserId};
