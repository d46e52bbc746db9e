//! Core single-symbol order book state and read-side queries.
//!
//! A book owns its orders for their lifetime in the book. Bids and asks are
//! sorted maps of price to FIFO [`PriceLevel`]; an `OrderId` index gives
//! O(1) lookup; untriggered stop-limit orders live in separate parked maps
//! keyed by stop price so the cross loop can never reach them. The book is
//! single-writer: all mutation happens on the matching thread, readers take
//! the owning mutex for short snapshot sections.

use crate::catalog::{FeeSchedule, Product};
use crate::types::money::notional;
use crate::types::{Order, OrderFlags, OrderId, OrderKind, Side, UserId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Microseconds in 24 hours, the rolling-volume window.
const DAY_US: u64 = 86_400_000_000;

/// One price level: resting orders in arrival order plus the running sum of
/// their remaining quantities.
#[derive(Debug, Default)]
pub struct PriceLevel {
    /// Order ids in FIFO (time-priority) order.
    pub(super) orders: VecDeque<OrderId>,
    /// Sum of remaining quantities of the member orders, micro-lots.
    pub(super) total_qty: u64,
}

impl PriceLevel {
    /// Number of resting orders at this level.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Total resting quantity at this level, micro-lots.
    #[must_use]
    pub fn total_quantity(&self) -> u64 {
        self.total_qty
    }
}

/// One aggregated level of a depth snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthLevel {
    /// Level price, micro-units.
    pub price: u64,
    /// Total resting quantity, micro-lots.
    pub qty: u64,
    /// Number of orders at the level.
    pub orders: usize,
}

/// A point-in-time view of the top of a book.
#[derive(Debug, Clone, Serialize)]
pub struct DepthSnapshot {
    /// The book's symbol.
    pub symbol: String,
    /// Snapshot timestamp, microseconds.
    pub ts_us: u64,
    /// Best-first bid levels.
    pub bids: Vec<DepthLevel>,
    /// Best-first ask levels.
    pub asks: Vec<DepthLevel>,
}

/// A price-time priority limit order book for a single symbol.
pub struct OrderBook {
    pub(super) product: Product,
    pub(super) fees: FeeSchedule,
    /// Bid levels; best bid is the greatest key.
    pub(super) bids: BTreeMap<u64, PriceLevel>,
    /// Ask levels; best ask is the least key.
    pub(super) asks: BTreeMap<u64, PriceLevel>,
    /// Every active order (resting or parked), by id.
    pub(super) orders: HashMap<OrderId, Order>,
    /// Final snapshots of orders that reached a terminal state in this book.
    /// Kept so cancels and modifies can report `AlreadyTerminal` instead of
    /// `UnknownOrder`.
    pub(super) done: HashMap<OrderId, Order>,
    /// Parked BUY stop-limits by stop price, FIFO within a price.
    pub(super) buy_stops: BTreeMap<u64, Vec<OrderId>>,
    /// Parked SELL stop-limits by stop price, FIFO within a price.
    pub(super) sell_stops: BTreeMap<u64, Vec<OrderId>>,
    /// Price of the most recent trade; 0 until the first trade.
    pub(super) last_trade_price: u64,
    pub(super) has_traded: bool,
    /// Shared monotonic trade-id allocator (engine-wide).
    pub(super) trade_ids: Arc<AtomicU64>,
    /// Rolling (timestamp, quantity) pairs for the 24 h volume figure.
    pub(super) volume_window: VecDeque<(u64, u64)>,
}

impl OrderBook {
    /// Create a book for `product`, drawing trade ids from `trade_ids`.
    #[must_use]
    pub fn new(product: Product, trade_ids: Arc<AtomicU64>) -> Self {
        let fees = product.fee_schedule();
        Self {
            product,
            fees,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: HashMap::new(),
            done: HashMap::new(),
            buy_stops: BTreeMap::new(),
            sell_stops: BTreeMap::new(),
            last_trade_price: 0,
            has_traded: false,
            trade_ids,
            volume_window: VecDeque::new(),
        }
    }

    /// The book's symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.product.symbol
    }

    /// The product definition this book trades under.
    #[must_use]
    pub fn product(&self) -> &Product {
        &self.product
    }

    /// Best bid and best ask prices, if present.
    #[must_use]
    pub fn bbo(&self) -> (Option<u64>, Option<u64>) {
        (self.best_bid(), self.best_ask())
    }

    /// Highest resting buy price.
    #[must_use]
    pub fn best_bid(&self) -> Option<u64> {
        self.bids.keys().next_back().copied()
    }

    /// Lowest resting sell price.
    #[must_use]
    pub fn best_ask(&self) -> Option<u64> {
        self.asks.keys().next().copied()
    }

    /// Price of the most recent trade, if any trade has occurred.
    #[must_use]
    pub fn last_trade_price(&self) -> Option<u64> {
        self.has_traded.then_some(self.last_trade_price)
    }

    /// Look up an order by id: active first, then terminal snapshots.
    #[must_use]
    pub fn get_order(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id).or_else(|| self.done.get(&order_id))
    }

    /// Look up only among active (resting or parked) orders.
    #[must_use]
    pub fn get_active_order(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    /// Ids of all active orders owned by `user`, resting and parked.
    #[must_use]
    pub fn user_order_ids(&self, user: UserId) -> Vec<OrderId> {
        let mut ids: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| o.user == user)
            .map(|o| o.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of active orders in the book (resting and parked).
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Top `levels` of each side, best-first.
    #[must_use]
    pub fn depth(&self, levels: usize, now_us: u64) -> DepthSnapshot {
        let collect = |iter: &mut dyn Iterator<Item = (&u64, &PriceLevel)>| {
            iter.take(levels)
                .map(|(price, level)| DepthLevel {
                    price: *price,
                    qty: level.total_qty,
                    orders: level.orders.len(),
                })
                .collect()
        };
        DepthSnapshot {
            symbol: self.product.symbol.clone(),
            ts_us: now_us,
            bids: collect(&mut self.bids.iter().rev()),
            asks: collect(&mut self.asks.iter()),
        }
    }

    /// Traded quantity over the trailing 24 hours, micro-lots.
    pub fn volume_24h(&mut self, now_us: u64) -> u64 {
        self.purge_volume(now_us);
        self.volume_window.iter().map(|(_, q)| *q).sum()
    }

    /// Quantity on the opposing side that an order for `user` could execute
    /// against, honoring the limit price and skipping same-owner makers.
    ///
    /// Stops accumulating at `needed`. This is the fill-or-kill feasibility
    /// scan; it never mutates the book.
    #[must_use]
    pub(super) fn achievable_qty(
        &self,
        side: Side,
        limit_price: Option<u64>,
        user: UserId,
        needed: u64,
    ) -> u64 {
        let levels: Box<dyn Iterator<Item = (&u64, &PriceLevel)>> = match side {
            Side::Buy => Box::new(self.asks.iter()),
            Side::Sell => Box::new(self.bids.iter().rev()),
        };
        let mut achievable = 0u64;
        for (price, level) in levels {
            if let Some(limit) = limit_price {
                let crosses = match side {
                    Side::Buy => *price <= limit,
                    Side::Sell => *price >= limit,
                };
                if !crosses {
                    break;
                }
            }
            for id in &level.orders {
                if let Some(maker) = self.orders.get(id) {
                    if maker.user != user {
                        achievable = achievable.saturating_add(maker.remaining());
                    }
                }
            }
            if achievable >= needed {
                return needed;
            }
        }
        achievable.min(needed)
    }

    // --- internal plumbing shared by matching and operations ---

    pub(super) fn level_map(&mut self, side: Side) -> &mut BTreeMap<u64, PriceLevel> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Insert an active order at its limit price and index it.
    pub(super) fn rest_order(&mut self, order: Order) {
        let level = self
            .level_map(order.side)
            .entry(order.price)
            .or_default();
        level.orders.push_back(order.id);
        level.total_qty += order.remaining();
        self.orders.insert(order.id, order);
    }

    /// Park an untriggered stop-limit order, keyed by its stop price.
    pub(super) fn park_stop(&mut self, order: Order) {
        let parked = match order.side {
            Side::Buy => &mut self.buy_stops,
            Side::Sell => &mut self.sell_stops,
        };
        parked.entry(order.stop_price).or_default().push(order.id);
        self.orders.insert(order.id, order);
    }

    /// Detach `order_id` from its price level (resting) or parked map
    /// (untriggered stop). Does not touch the `orders` index.
    pub(super) fn detach(&mut self, order: &Order) {
        if order.is_parked_stop() {
            let parked = match order.side {
                Side::Buy => &mut self.buy_stops,
                Side::Sell => &mut self.sell_stops,
            };
            if let Some(ids) = parked.get_mut(&order.stop_price) {
                ids.retain(|id| *id != order.id);
                if ids.is_empty() {
                    parked.remove(&order.stop_price);
                }
            }
            return;
        }
        let remaining = order.remaining();
        let map = self.level_map(order.side);
        if let Some(level) = map.get_mut(&order.price) {
            level.orders.retain(|id| *id != order.id);
            level.total_qty = level.total_qty.saturating_sub(remaining);
            if level.orders.is_empty() {
                map.remove(&order.price);
            }
        }
    }

    /// Archive the final snapshot of an order that left the book.
    pub(super) fn retire(&mut self, order: Order) {
        self.done.insert(order.id, order);
    }

    pub(super) fn alloc_trade_id(&self) -> u64 {
        self.trade_ids.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn record_trade_price(&mut self, price: u64, qty: u64, now_us: u64) {
        self.last_trade_price = price;
        self.has_traded = true;
        self.volume_window.push_back((now_us, qty));
        self.purge_volume(now_us);
    }

    pub(super) fn order_notional(&self, price: u64, qty: u64) -> u128 {
        notional(price, qty, self.product.contract_size)
    }

    fn purge_volume(&mut self, now_us: u64) {
        let cutoff = now_us.saturating_sub(DAY_US);
        while let Some((ts, _)) = self.volume_window.front() {
            if *ts < cutoff {
                self.volume_window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Structural consistency check, run after every mutating operation in
    /// debug builds and callable from tests.
    ///
    /// Verifies: no empty levels; level sums equal member remainders; the
    /// id index agrees with level and parked membership; the book is not
    /// crossed; parked orders are untriggered stop-limits.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen = 0usize;
        for (side, map) in [(Side::Buy, &self.bids), (Side::Sell, &self.asks)] {
            for (price, level) in map {
                if level.orders.is_empty() {
                    return Err(format!("empty {side} level at {price}"));
                }
                let mut sum = 0u64;
                for id in &level.orders {
                    let order = self
                        .orders
                        .get(id)
                        .ok_or_else(|| format!("order {id} in level {price} missing from index"))?;
                    if order.side != side || order.price != *price {
                        return Err(format!("order {id} misfiled at {side} {price}"));
                    }
                    if !order.is_active() {
                        return Err(format!("terminal order {id} resting at {price}"));
                    }
                    sum += order.remaining();
                    seen += 1;
                }
                if sum != level.total_qty {
                    return Err(format!(
                        "level {price} sum {sum} != cached total {}",
                        level.total_qty
                    ));
                }
            }
        }
        for (side, parked) in [(Side::Buy, &self.buy_stops), (Side::Sell, &self.sell_stops)] {
            for (stop, ids) in parked {
                if ids.is_empty() {
                    return Err(format!("empty parked {side} bucket at {stop}"));
                }
                for id in ids {
                    let order = self
                        .orders
                        .get(id)
                        .ok_or_else(|| format!("parked order {id} missing from index"))?;
                    if order.kind != OrderKind::StopLimit
                        || order.flags.contains(OrderFlags::TRIGGERED)
                    {
                        return Err(format!("non-stop order {id} parked at {stop}"));
                    }
                    seen += 1;
                }
            }
        }
        if seen != self.orders.len() {
            return Err(format!(
                "index holds {} orders but levels/parked hold {seen}",
                self.orders.len()
            ));
        }
        if let (Some(bid), Some(ask)) = self.bbo() {
            if bid >= ask {
                return Err(format!("crossed book: bid {bid} >= ask {ask}"));
            }
        }
        Ok(())
    }

    #[inline]
    pub(super) fn debug_check_invariants(&self) {
        #[cfg(debug_assertions)]
        if let Err(msg) = self.check_invariants() {
            panic!("order book invariant violated: {msg}");
        }
    }
}
