//! The matching loop: validation, crossing, type post-processing, and stop
//! triggering.
//!
//! Matching is price-time priority. The taker walks the best opposing level
//! first and the FIFO queue within it; every execution prints at the maker's
//! price, so price improvement always goes to the taker. Self-trade
//! prevention cancels the resting maker instead of printing a trade.

use crate::orderbook::book::OrderBook;
use crate::orderbook::error::RejectReason;
use crate::orderbook::trade::{BookEvent, SubmitResult, Trade, TriggerResult};
use crate::types::money::{is_multiple, snap_to_tick};
use crate::types::{Order, OrderFlags, OrderKind, OrderStatus, Side};
use tracing::trace;

impl OrderBook {
    /// Submit an order to this book.
    ///
    /// Runs the full pipeline: validation, stop parking, fill-or-kill
    /// feasibility, post-only protection, the cross loop, remainder
    /// handling per order type, and the stop-trigger cascade for any
    /// prices that printed.
    ///
    /// Rejections return a result with `reject` set and the book untouched;
    /// the book itself never panics on the trading path.
    pub fn submit(&mut self, order: Order, now_us: u64) -> SubmitResult {
        trace!(
            symbol = %self.product.symbol,
            id = order.id,
            side = %order.side,
            kind = %order.kind,
            price = order.price,
            qty = order.quantity,
            "submit"
        );
        let result = self.submit_inner(order, now_us);
        self.debug_check_invariants();
        result
    }

    pub(super) fn submit_inner(&mut self, mut order: Order, now_us: u64) -> SubmitResult {
        if let Some(reason) = self.validate_new(&mut order) {
            order.status = OrderStatus::Rejected;
            order.updated_ts_us = now_us;
            return SubmitResult::rejected(order, reason);
        }

        let triggered = order.flags.contains(OrderFlags::TRIGGERED);

        // Untriggered stop-limits are parked away from the bid/ask trees and
        // cannot match until their stop price trades.
        if order.kind == OrderKind::StopLimit && !triggered {
            order.status = OrderStatus::New;
            order.updated_ts_us = now_us;
            let events = vec![BookEvent::Accepted(order.clone())];
            self.park_stop(order.clone());
            return SubmitResult {
                order,
                trades: Vec::new(),
                events,
                reject: None,
            };
        }

        let effective = effective_kind(&order);

        // Fill-or-kill is atomic: prove the full quantity is reachable
        // (excluding own resting orders) before touching the book.
        if effective == OrderKind::Fok {
            let achievable =
                self.achievable_qty(order.side, Some(order.price), order.user, order.quantity);
            if achievable < order.quantity {
                order.status = OrderStatus::Rejected;
                order.updated_ts_us = now_us;
                return SubmitResult::rejected(order, RejectReason::FokUnfillable);
            }
        }

        // Post-only must never cross, not even against own orders: resting
        // through the opposing side would leave the book crossed.
        if effective == OrderKind::PostOnly && self.would_cross(order.side, order.price) {
            order.status = OrderStatus::Rejected;
            order.updated_ts_us = now_us;
            return SubmitResult::rejected(order, RejectReason::PostOnlyWouldTake);
        }

        let mut trades = Vec::new();
        let mut events = Vec::new();
        if !triggered {
            events.push(BookEvent::Accepted(order.clone()));
        }

        self.cross(&mut order, effective, now_us, &mut trades, &mut events);

        match effective {
            OrderKind::Market | OrderKind::Ioc | OrderKind::Fok => {
                if order.remaining() > 0 {
                    if order.filled == 0 {
                        order.status = OrderStatus::Cancelled;
                    }
                    order.updated_ts_us = now_us;
                    events.push(BookEvent::Cancelled(order.clone()));
                }
            }
            OrderKind::Limit | OrderKind::PostOnly => {
                if order.remaining() > 0 {
                    order.status = if order.filled == 0 {
                        OrderStatus::New
                    } else {
                        OrderStatus::PartiallyFilled
                    };
                    order.updated_ts_us = now_us;
                    self.rest_order(order.clone());
                }
            }
            // Triggered stops matched as Limit above; untriggered ones
            // parked earlier.
            OrderKind::StopLimit => {}
        }

        if order.status.is_terminal() {
            self.retire(order.clone());
        }

        if !trades.is_empty() {
            self.run_stop_triggers(now_us, &mut trades, &mut events);
        }

        SubmitResult {
            order,
            trades,
            events,
            reject: None,
        }
    }

    /// Release every parked stop whose condition is satisfied by
    /// `trigger_price`, injecting each as a limit order at its limit price.
    ///
    /// Buy stops trigger when `trigger_price >= stop_price` and release in
    /// ascending stop order; sell stops trigger when
    /// `trigger_price <= stop_price` and release in descending stop order.
    /// Cascades from the resulting trades are handled recursively.
    pub fn check_stop_orders(&mut self, trigger_price: u64, now_us: u64) -> TriggerResult {
        let mut result = TriggerResult::default();
        loop {
            let released = self.release_next_stop(trigger_price, now_us, &mut result);
            if !released {
                break;
            }
        }
        self.debug_check_invariants();
        result
    }

    // --- internals ---

    fn validate_new(&self, order: &mut Order) -> Option<RejectReason> {
        let product = &self.product;
        if !is_multiple(order.quantity, product.lot_size) {
            return Some(RejectReason::InvalidQty {
                quantity: order.quantity,
                lot_size: product.lot_size,
            });
        }
        if order.kind == OrderKind::StopLimit {
            if order.stop_price == 0 {
                return Some(RejectReason::MissingStopPrice);
            }
            order.stop_price = snap_to_tick(order.stop_price, product.tick_size);
        }
        if order.kind == OrderKind::Market {
            order.price = 0;
            // Notional can only be estimated against the last print.
            if self.has_traded {
                let notional = self.order_notional(self.last_trade_price, order.quantity);
                if notional < product.min_notional as u128 {
                    return Some(RejectReason::BelowMinNotional {
                        notional,
                        min_notional: product.min_notional,
                    });
                }
            }
            return None;
        }
        order.price = snap_to_tick(order.price, product.tick_size);
        if order.price == 0 {
            return Some(RejectReason::InvalidPriceTick {
                price: order.price,
                tick_size: product.tick_size,
            });
        }
        let notional = self.order_notional(order.price, order.quantity);
        if notional < product.min_notional as u128 {
            return Some(RejectReason::BelowMinNotional {
                notional,
                min_notional: product.min_notional,
            });
        }
        None
    }

    fn would_cross(&self, side: Side, price: u64) -> bool {
        match side {
            Side::Buy => self.best_ask().is_some_and(|ask| price >= ask),
            Side::Sell => self.best_bid().is_some_and(|bid| price <= bid),
        }
    }

    fn cross(
        &mut self,
        taker: &mut Order,
        effective: OrderKind,
        now_us: u64,
        trades: &mut Vec<Trade>,
        events: &mut Vec<BookEvent>,
    ) {
        loop {
            if taker.remaining() == 0 {
                break;
            }
            let best = match taker.side {
                Side::Buy => self.best_ask(),
                Side::Sell => self.best_bid(),
            };
            let Some(level_price) = best else { break };
            if effective != OrderKind::Market {
                let crosses = match taker.side {
                    Side::Buy => taker.price >= level_price,
                    Side::Sell => taker.price <= level_price,
                };
                if !crosses {
                    break;
                }
            }

            let maker_ids: Vec<_> = {
                let map = match taker.side {
                    Side::Buy => &self.asks,
                    Side::Sell => &self.bids,
                };
                map.get(&level_price)
                    .map(|level| level.orders.iter().copied().collect())
                    .unwrap_or_default()
            };

            for maker_id in maker_ids {
                if taker.remaining() == 0 {
                    break;
                }
                let Some(maker) = self.orders.get(&maker_id) else {
                    continue;
                };

                if maker.user == taker.user {
                    // Self-trade prevention: the resting maker is cancelled,
                    // no trade prints, matching continues with the next maker.
                    let Some(mut cancelled) = self.orders.remove(&maker_id) else {
                        continue;
                    };
                    trace!(
                        symbol = %self.product.symbol,
                        maker = maker_id,
                        taker = taker.id,
                        "self-trade prevention cancelled resting maker"
                    );
                    self.detach(&cancelled);
                    cancelled.cancel(now_us);
                    events.push(BookEvent::Cancelled(cancelled.clone()));
                    self.retire(cancelled);
                    continue;
                }

                let fill_qty = taker.remaining().min(maker.remaining());
                let price = maker.price;
                let maker_user = maker.user;
                let notional = self.order_notional(price, fill_qty);
                let maker_fee = self.fees.calculate_fee(notional, true);
                let taker_fee = self.fees.calculate_fee(notional, false);
                let trade_id = self.alloc_trade_id();

                let Some(maker) = self.orders.get_mut(&maker_id) else {
                    continue;
                };
                maker.fill(fill_qty, now_us);
                let maker_done = maker.remaining() == 0;
                let maker_snapshot = maker.clone();
                taker.fill(fill_qty, now_us);

                trades.push(Trade {
                    trade_id,
                    symbol: self.product.symbol.clone(),
                    maker_order_id: maker_id,
                    taker_order_id: taker.id,
                    maker_user,
                    taker_user: taker.user,
                    taker_side: taker.side,
                    price,
                    quantity: fill_qty,
                    maker_fee,
                    taker_fee,
                    ts_us: now_us,
                });
                events.push(BookEvent::Updated(maker_snapshot));
                self.record_trade_price(price, fill_qty, now_us);

                let map = self.level_map(taker.side.opposite());
                if let Some(level) = map.get_mut(&level_price) {
                    level.total_qty = level.total_qty.saturating_sub(fill_qty);
                    if maker_done {
                        level.orders.retain(|id| *id != maker_id);
                    }
                    if level.orders.is_empty() {
                        map.remove(&level_price);
                    }
                }
                if maker_done {
                    if let Some(filled_maker) = self.orders.remove(&maker_id) {
                        self.retire(filled_maker);
                    }
                }
            }

            // The level must be gone by now if the taker still wants more;
            // bail rather than spin if the structure disagrees.
            if taker.remaining() > 0 {
                let still_there = match taker.side {
                    Side::Buy => self.asks.contains_key(&level_price),
                    Side::Sell => self.bids.contains_key(&level_price),
                };
                if still_there {
                    break;
                }
            }
        }
    }

    fn run_stop_triggers(
        &mut self,
        now_us: u64,
        trades: &mut Vec<Trade>,
        events: &mut Vec<BookEvent>,
    ) {
        loop {
            let Some(price) = self.last_trade_price() else {
                return;
            };
            let mut result = TriggerResult::default();
            if !self.release_next_stop(price, now_us, &mut result) {
                trades.append(&mut result.trades);
                events.append(&mut result.events);
                return;
            }
            trades.append(&mut result.trades);
            events.append(&mut result.events);
        }
    }

    /// Release the single next eligible stop for `trigger_price`: the lowest
    /// eligible buy stop first, then the highest eligible sell stop.
    /// Returns `false` when nothing is eligible.
    fn release_next_stop(
        &mut self,
        trigger_price: u64,
        now_us: u64,
        result: &mut TriggerResult,
    ) -> bool {
        let next_buy = self
            .buy_stops
            .range(..=trigger_price)
            .next()
            .map(|(stop, _)| *stop);
        let candidate = if let Some(stop) = next_buy {
            Some((Side::Buy, stop))
        } else {
            self.sell_stops
                .range(trigger_price..)
                .next_back()
                .map(|(stop, _)| (Side::Sell, *stop))
        };
        let Some((side, stop_price)) = candidate else {
            return false;
        };

        let parked = match side {
            Side::Buy => &mut self.buy_stops,
            Side::Sell => &mut self.sell_stops,
        };
        let Some(bucket) = parked.get_mut(&stop_price) else {
            return false;
        };
        if bucket.is_empty() {
            parked.remove(&stop_price);
            return false;
        }
        let order_id = bucket.remove(0);
        if bucket.is_empty() {
            parked.remove(&stop_price);
        }
        let Some(mut order) = self.orders.remove(&order_id) else {
            return false;
        };

        order.flags |= OrderFlags::TRIGGERED;
        order.updated_ts_us = now_us;
        trace!(
            symbol = %self.product.symbol,
            id = order.id,
            stop = stop_price,
            trigger = trigger_price,
            "stop-limit triggered"
        );
        result.events.push(BookEvent::Triggered(order.clone()));

        let sub = self.submit_inner(order, now_us);
        result.trades.extend(sub.trades);
        result.events.extend(sub.events);
        true
    }
}

/// The kind an order matches as: a triggered stop behaves as a limit order
/// at its limit price.
#[inline]
fn effective_kind(order: &Order) -> OrderKind {
    if order.kind == OrderKind::StopLimit && order.flags.contains(OrderFlags::TRIGGERED) {
        OrderKind::Limit
    } else {
        order.kind
    }
}
