//! Cancel and modify operations on resting and parked orders.

use crate::orderbook::book::OrderBook;
use crate::orderbook::error::RejectReason;
use crate::orderbook::trade::{BookEvent, SubmitResult};
use crate::types::money::{is_multiple, snap_to_tick};
use crate::types::{Order, OrderId, OrderStatus, UserId};
use tracing::trace;

impl OrderBook {
    /// Cancel an active order.
    ///
    /// Returns the final snapshot of the cancelled order, or an error when
    /// the id is unknown or already terminal. Unknown ids leave the book
    /// untouched.
    pub fn cancel(&mut self, order_id: OrderId, now_us: u64) -> Result<Order, RejectReason> {
        let Some(order) = self.orders.get(&order_id).cloned() else {
            if self.done.contains_key(&order_id) {
                return Err(RejectReason::AlreadyTerminal { order_id });
            }
            return Err(RejectReason::UnknownOrder { order_id });
        };
        self.orders.remove(&order_id);
        self.detach(&order);
        let mut order = order;
        order.cancel(now_us);
        self.retire(order.clone());
        trace!(symbol = %self.symbol(), id = order_id, "order cancelled");
        self.debug_check_invariants();
        Ok(order)
    }

    /// Cancel every active order owned by `user`, resting and parked.
    ///
    /// Returns the cancelled snapshots in ascending id order.
    pub fn cancel_all_for_user(&mut self, user: UserId, now_us: u64) -> Vec<Order> {
        let ids = self.user_order_ids(user);
        let mut cancelled = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(order) = self.cancel(id, now_us) {
                cancelled.push(order);
            }
        }
        cancelled
    }

    /// Modify an active order's price and/or quantity.
    ///
    /// A price change (either direction) or a quantity increase is executed
    /// as cancel + re-submit through the full matching path: time priority
    /// is lost and the replacement may trade immediately. A quantity
    /// decrease shrinks the order in place, preserving priority; shrinking
    /// to or below the filled quantity completes the order as `Filled`.
    pub fn modify(
        &mut self,
        order_id: OrderId,
        new_price: Option<u64>,
        new_qty: Option<u64>,
        now_us: u64,
    ) -> Result<SubmitResult, RejectReason> {
        let Some(existing) = self.orders.get(&order_id).cloned() else {
            if self.done.contains_key(&order_id) {
                return Err(RejectReason::AlreadyTerminal { order_id });
            }
            return Err(RejectReason::UnknownOrder { order_id });
        };

        let target_qty = match new_qty {
            Some(q) => {
                if !is_multiple(q, self.product.lot_size) {
                    return Err(RejectReason::InvalidQty {
                        quantity: q,
                        lot_size: self.product.lot_size,
                    });
                }
                q
            }
            None => existing.quantity,
        };
        let target_price = new_price
            .map(|p| snap_to_tick(p, self.product.tick_size))
            .filter(|p| *p != existing.price);

        // Shrinking to (or below) what has already executed completes the
        // order; nothing is left to work regardless of the price change.
        if target_qty <= existing.filled {
            self.orders.remove(&order_id);
            self.detach(&existing);
            let mut order = existing;
            order.quantity = order.filled;
            order.status = OrderStatus::Filled;
            order.updated_ts_us = now_us;
            self.retire(order.clone());
            self.debug_check_invariants();
            return Ok(SubmitResult {
                events: vec![BookEvent::Updated(order.clone())],
                order,
                trades: Vec::new(),
                reject: None,
            });
        }

        if target_price.is_some() || target_qty > existing.quantity {
            // Cancel/replace: the order leaves its queue slot and re-enters
            // the matching path as if newly arrived, keeping its id.
            self.orders.remove(&order_id);
            self.detach(&existing);
            let mut order = existing;
            if let Some(p) = target_price {
                order.price = p;
            }
            order.quantity = target_qty;
            order.status = if order.filled == 0 {
                OrderStatus::New
            } else {
                OrderStatus::PartiallyFilled
            };
            order.updated_ts_us = now_us;
            trace!(
                symbol = %self.symbol(),
                id = order_id,
                price = order.price,
                qty = order.quantity,
                "modify via cancel/replace"
            );
            let result = self.submit_inner(order, now_us);
            self.debug_check_invariants();
            return Ok(result);
        }

        if target_qty == existing.quantity {
            // No-op modify.
            return Ok(SubmitResult {
                order: existing,
                trades: Vec::new(),
                events: Vec::new(),
                reject: None,
            });
        }

        // In-place shrink: priority preserved.
        let delta = existing.quantity - target_qty;
        let Some(order) = self.orders.get_mut(&order_id) else {
            return Err(RejectReason::UnknownOrder { order_id });
        };
        order.quantity = target_qty;
        order.updated_ts_us = now_us;
        let snapshot = order.clone();
        if !snapshot.is_parked_stop() {
            let price = snapshot.price;
            let map = self.level_map(snapshot.side);
            if let Some(level) = map.get_mut(&price) {
                level.total_qty = level.total_qty.saturating_sub(delta);
            }
        }
        trace!(
            symbol = %self.symbol(),
            id = order_id,
            qty = target_qty,
            "modify shrank in place"
        );
        self.debug_check_invariants();
        Ok(SubmitResult {
            events: vec![BookEvent::Updated(snapshot.clone())],
            order: snapshot,
            trades: Vec::new(),
            reject: None,
        })
    }
}
