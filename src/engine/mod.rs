//! Multi-book matching engine: lazy book registry, centralized event
//! fan-out, and read-side queries that bypass the command queue.
//!
//! The engine owns one [`OrderBook`] per symbol behind its own mutex. All
//! mutation happens on the single matching thread; readers take a book's
//! mutex for a short snapshot section, so queries are consistent up to some
//! recent point without being linearizable with in-flight commands.

use crate::catalog::ProductCatalog;
use crate::orderbook::{
    BookEvent, DepthSnapshot, EventListener, OrderBook, RejectReason, SubmitResult, Trade,
    TradeListener, TriggerResult,
};
use crate::types::{Order, OrderFlags, OrderId, OrderKind, OrderStatus, Side, UserId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, trace};

/// Parameters of a new order as supplied by a caller. The engine assigns
/// the id and timestamps.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Target symbol.
    pub symbol: String,
    /// Owner of the order.
    pub user: UserId,
    /// Buy or sell.
    pub side: Side,
    /// Order type.
    pub kind: OrderKind,
    /// Limit price in micro-units; ignored for market orders.
    pub price: u64,
    /// Stop price in micro-units; only meaningful for stop-limits.
    pub stop_price: u64,
    /// Quantity in micro-lots.
    pub quantity: u64,
    /// May only reduce an existing position.
    pub reduce_only: bool,
    /// Optional opaque client correlation tag.
    pub client_tag: Option<String>,
}

/// Routes orders to per-symbol books and fans trade/order events out to
/// registered listeners.
pub struct MatchingEngine {
    catalog: Arc<ProductCatalog>,
    books: DashMap<String, Arc<Mutex<OrderBook>>>,
    /// Secondary index: which (symbol, order) pairs each user has active.
    user_orders: DashMap<UserId, HashSet<(String, OrderId)>>,
    next_order_id: AtomicU64,
    trade_ids: Arc<AtomicU64>,
    trade_listeners: RwLock<Vec<TradeListener>>,
    event_listeners: RwLock<Vec<EventListener>>,
}

impl MatchingEngine {
    /// Create an engine over `catalog`. Books are created lazily on first
    /// touch of each active symbol.
    #[must_use]
    pub fn new(catalog: Arc<ProductCatalog>) -> Self {
        Self {
            catalog,
            books: DashMap::new(),
            user_orders: DashMap::new(),
            next_order_id: AtomicU64::new(1),
            trade_ids: Arc::new(AtomicU64::new(1)),
            trade_listeners: RwLock::new(Vec::new()),
            event_listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback invoked for every trade on every book.
    pub fn add_trade_listener(&self, listener: TradeListener) {
        self.trade_listeners
            .write()
            .expect("listener lock poisoned")
            .push(listener);
    }

    /// Register a callback invoked for every order lifecycle event.
    pub fn add_event_listener(&self, listener: EventListener) {
        self.event_listeners
            .write()
            .expect("listener lock poisoned")
            .push(listener);
    }

    /// Allocate the next order id.
    #[must_use]
    pub fn next_order_id(&self) -> OrderId {
        self.next_order_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The book for `symbol`, creating it on first use.
    ///
    /// Returns `None` for symbols the catalog does not know or has
    /// deactivated (existing books of deactivated symbols stay queryable).
    pub fn get_or_create_book(&self, symbol: &str) -> Option<Arc<Mutex<OrderBook>>> {
        if let Some(book) = self.books.get(symbol) {
            return Some(Arc::clone(book.value()));
        }
        let product = self.catalog.get_active(symbol)?;
        let book = Arc::new(Mutex::new(OrderBook::new(
            product,
            Arc::clone(&self.trade_ids),
        )));
        info!(symbol, "order book created");
        self.books.insert(symbol.to_string(), Arc::clone(&book));
        Some(book)
    }

    /// An existing book, if one has been created for `symbol`.
    #[must_use]
    pub fn get_book(&self, symbol: &str) -> Option<Arc<Mutex<OrderBook>>> {
        self.books.get(symbol).map(|b| Arc::clone(b.value()))
    }

    /// Materialize an [`Order`] from a request and submit it to its book.
    ///
    /// This is the single mutation entry point used by the command loop.
    /// Risk and circuit-breaker admission happen before this call; here the
    /// book applies its own validation and matching.
    pub fn submit(&self, request: OrderRequest, now_us: u64) -> SubmitResult {
        let order = Order {
            id: self.next_order_id(),
            symbol: request.symbol.clone(),
            user: request.user,
            side: request.side,
            kind: request.kind,
            price: request.price,
            stop_price: request.stop_price,
            quantity: request.quantity,
            filled: 0,
            status: OrderStatus::New,
            flags: if request.reduce_only {
                OrderFlags::REDUCE_ONLY
            } else {
                OrderFlags::empty()
            },
            client_tag: request.client_tag,
            created_ts_us: now_us,
            updated_ts_us: now_us,
        };
        self.submit_order(order, now_us)
    }

    /// Submit a fully-formed order (used by the liquidation pathway, which
    /// constructs flagged orders itself).
    pub fn submit_order(&self, order: Order, now_us: u64) -> SubmitResult {
        let Some(book) = self.get_or_create_book(&order.symbol) else {
            let mut rejected = order;
            rejected.status = OrderStatus::Rejected;
            let reason = RejectReason::InvalidSymbol {
                symbol: rejected.symbol.clone(),
            };
            return SubmitResult::rejected(rejected, reason);
        };
        let result = {
            let mut guard = book.lock().expect("book lock poisoned");
            guard.submit(order, now_us)
        };
        self.index_result(&result);
        self.notify(&result.trades, &result.events);
        result
    }

    /// Cancel one order on one book.
    pub fn cancel(
        &self,
        symbol: &str,
        order_id: OrderId,
        now_us: u64,
    ) -> Result<Order, RejectReason> {
        let book = self.get_book(symbol).ok_or_else(|| RejectReason::InvalidSymbol {
            symbol: symbol.to_string(),
        })?;
        let cancelled = {
            let mut guard = book.lock().expect("book lock poisoned");
            guard.cancel(order_id, now_us)?
        };
        self.untrack(cancelled.user, symbol, order_id);
        let event = BookEvent::Cancelled(cancelled.clone());
        self.notify(&[], std::slice::from_ref(&event));
        Ok(cancelled)
    }

    /// Cancel every active order of `user` across all books.
    pub fn cancel_all(&self, user: UserId, now_us: u64) -> Vec<Order> {
        let mut cancelled = Vec::new();
        for entry in self.books.iter() {
            let mut guard = entry.value().lock().expect("book lock poisoned");
            cancelled.extend(guard.cancel_all_for_user(user, now_us));
        }
        self.user_orders.remove(&user);
        let events: Vec<BookEvent> = cancelled
            .iter()
            .map(|o| BookEvent::Cancelled(o.clone()))
            .collect();
        self.notify(&[], &events);
        trace!(user, count = cancelled.len(), "cancel-all");
        cancelled
    }

    /// Modify an order (see [`OrderBook::modify`] for the two paths).
    pub fn modify(
        &self,
        symbol: &str,
        order_id: OrderId,
        new_price: Option<u64>,
        new_qty: Option<u64>,
        now_us: u64,
    ) -> Result<SubmitResult, RejectReason> {
        let book = self.get_book(symbol).ok_or_else(|| RejectReason::InvalidSymbol {
            symbol: symbol.to_string(),
        })?;
        let result = {
            let mut guard = book.lock().expect("book lock poisoned");
            guard.modify(order_id, new_price, new_qty, now_us)?
        };
        self.index_result(&result);
        self.notify(&result.trades, &result.events);
        Ok(result)
    }

    /// Run the stop-trigger scan of one book against an externally supplied
    /// price (e.g. a mark-price move rather than a local print).
    pub fn check_stop_orders(
        &self,
        symbol: &str,
        trigger_price: u64,
        now_us: u64,
    ) -> TriggerResult {
        let Some(book) = self.get_book(symbol) else {
            return TriggerResult::default();
        };
        let result = {
            let mut guard = book.lock().expect("book lock poisoned");
            guard.check_stop_orders(trigger_price, now_us)
        };
        for event in &result.events {
            self.index_event(event);
        }
        self.notify(&result.trades, &result.events);
        result
    }

    // --- read-side queries (short per-book locks, no queue traversal) ---

    /// Best bid/ask for a symbol.
    #[must_use]
    pub fn get_bbo(&self, symbol: &str) -> (Option<u64>, Option<u64>) {
        match self.get_book(symbol) {
            Some(book) => book.lock().expect("book lock poisoned").bbo(),
            None => (None, None),
        }
    }

    /// Top-of-book depth snapshot.
    #[must_use]
    pub fn get_depth(&self, symbol: &str, levels: usize, now_us: u64) -> Option<DepthSnapshot> {
        self.get_book(symbol)
            .map(|book| book.lock().expect("book lock poisoned").depth(levels, now_us))
    }

    /// Last trade price of a symbol, if it has traded.
    #[must_use]
    pub fn last_trade_price(&self, symbol: &str) -> Option<u64> {
        self.get_book(symbol)
            .and_then(|book| book.lock().expect("book lock poisoned").last_trade_price())
    }

    /// Snapshot of one order, active or terminal.
    #[must_use]
    pub fn get_order(&self, symbol: &str, order_id: OrderId) -> Option<Order> {
        self.get_book(symbol)
            .and_then(|book| book.lock().expect("book lock poisoned").get_order(order_id).cloned())
    }

    /// All active orders of `user` across all books, via the secondary
    /// index.
    #[must_use]
    pub fn get_user_orders(&self, user: UserId) -> Vec<Order> {
        let Some(index) = self.user_orders.get(&user) else {
            return Vec::new();
        };
        let mut orders: Vec<Order> = index
            .iter()
            .filter_map(|(symbol, id)| {
                let book = self.get_book(symbol)?;
                let guard = book.lock().expect("book lock poisoned");
                guard.get_active_order(*id).cloned()
            })
            .collect();
        orders.sort_unstable_by_key(|o| o.id);
        orders
    }

    /// Symbols with live books.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.books.iter().map(|e| e.key().clone()).collect()
    }

    // --- internals ---

    fn index_result(&self, result: &SubmitResult) {
        for event in &result.events {
            self.index_event(event);
        }
    }

    fn index_event(&self, event: &BookEvent) {
        let order = event.order();
        match event {
            BookEvent::Accepted(_) | BookEvent::Updated(_) | BookEvent::Triggered(_) => {
                if order.is_active() {
                    self.user_orders
                        .entry(order.user)
                        .or_default()
                        .insert((order.symbol.clone(), order.id));
                } else {
                    self.untrack(order.user, &order.symbol, order.id);
                }
            }
            BookEvent::Cancelled(_) | BookEvent::Rejected { .. } => {
                self.untrack(order.user, &order.symbol, order.id);
            }
        }
    }

    fn untrack(&self, user: UserId, symbol: &str, order_id: OrderId) {
        if let Some(mut set) = self.user_orders.get_mut(&user) {
            set.remove(&(symbol.to_string(), order_id));
        }
    }

    fn notify(&self, trades: &[Trade], events: &[BookEvent]) {
        if !events.is_empty() {
            let listeners = self.event_listeners.read().expect("listener lock poisoned");
            for event in events {
                for listener in listeners.iter() {
                    listener(event);
                }
            }
        }
        if !trades.is_empty() {
            let listeners = self.trade_listeners.read().expect("listener lock poisoned");
            for trade in trades {
                for listener in listeners.iter() {
                    listener(trade);
                }
            }
        }
    }
}
