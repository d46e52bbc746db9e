//! Core assembly: explicit system objects wired by [`build_core`], the
//! inbound operation surface, and the post-trade settlement pipeline.
//!
//! There is no hidden global state: every component is constructed here and
//! handed to the others at build time. The admission pipeline for a submit
//! runs market-halt → catalog → circuit breaker → risk → reduce-only →
//! margin, short-circuiting on the first refusal, and only then touches the
//! book. Settlement (journal, ledger, accounts, risk feedback, breaker and
//! mark updates, liquidation sweep) runs on the matching thread right after
//! the book call.

use crate::accounts::{AccountManager, AccountSnapshot, ExposureListener, LiquidationCandidate};
use crate::breaker::{BreakerDecision, CircuitBreakers};
use crate::catalog::ProductCatalog;
use crate::config::CoreConfig;
use crate::engine::{MatchingEngine, OrderRequest};
use crate::journal::{
    EventPayload, EventRecord, FileJournal, Journal, JournalError, Ledger, MemoryJournal,
    RecordListener, replay_into,
};
use crate::orderbook::{BookEvent, RejectReason, SubmitResult, Trade};
use crate::risk::RiskEngine;
use crate::rates::RateProvider;
use crate::sequencer::{Command, CommandError, CommandResult, Sequencer};
use crate::types::{Order, OrderFlags, OrderId, OrderKind, OrderStatus, Side, UserId};
use crate::utils::current_time_micros;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

/// Maximum liquidation sweep passes per settlement, so a cascade cannot
/// spin the matching thread forever.
const MAX_LIQUIDATION_PASSES: usize = 3;

/// Infrastructure failures of the core (distinct from trading rejections,
/// which are [`RejectReason`] values).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Journal construction or I/O failed.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// The command loop is not running.
    #[error("core not started")]
    NotStarted,
    /// A synchronous command wait failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Snapshot returned by `get_state`.
#[derive(Debug, Clone, Serialize)]
pub struct CoreState {
    /// Account and positions.
    pub account: AccountSnapshot,
    /// The user's active orders across all books.
    pub open_orders: Vec<Order>,
    /// Best bid/offer per live symbol.
    pub bbo: HashMap<String, (Option<u64>, Option<u64>)>,
}

/// Every system object of the core, constructed once by [`build_core`].
pub struct CoreServices {
    /// Product definitions.
    pub catalog: Arc<ProductCatalog>,
    /// Book registry and matching.
    pub engine: Arc<MatchingEngine>,
    /// Pre-trade risk admission.
    pub risk: Mutex<RiskEngine>,
    /// Circuit breakers.
    pub breakers: Mutex<CircuitBreakers>,
    /// Balances, positions, insurance.
    pub accounts: Mutex<AccountManager>,
    /// The append-only event journal.
    pub journal: Arc<dyn Journal>,
    /// Double-entry mirror of the journal.
    pub ledger: Mutex<Ledger>,
    /// FX and mark-price cache.
    pub rates: Arc<RateProvider>,
    /// Static configuration.
    pub config: CoreConfig,
    /// Set on fatal internal error; all commands reject until restart.
    halted: AtomicBool,
    record_listeners: RwLock<Vec<RecordListener>>,
}

impl CoreServices {
    /// Register a subscriber for journal records in sequence order.
    pub fn add_record_listener(&self, listener: RecordListener) {
        self.record_listeners
            .write()
            .expect("listener lock poisoned")
            .push(listener);
    }

    /// `true` after a fatal internal error.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    // --- command execution (matching thread) ---

    /// Full submit pipeline: admission checks, book call, settlement.
    pub fn execute_submit(
        &self,
        request: OrderRequest,
    ) -> Result<(Order, Vec<Trade>), RejectReason> {
        if self.is_halted() {
            return Err(RejectReason::CoreHalted);
        }
        let now_us = current_time_micros();
        let Some(product) = self.catalog.get_active(&request.symbol) else {
            return Err(RejectReason::InvalidSymbol {
                symbol: request.symbol.clone(),
            });
        };

        let check_price = if request.kind == OrderKind::Market {
            0
        } else {
            crate::types::money::snap_to_tick(request.price, product.tick_size)
        };

        match self.breakers.lock().expect("breaker lock poisoned").check_order(
            &request.symbol,
            request.side,
            check_price,
            now_us,
        ) {
            BreakerDecision::Allow => {}
            BreakerDecision::Halted => return Err(RejectReason::CircuitHalted),
            BreakerDecision::LimitBlocked(side) => {
                return Err(RejectReason::CircuitLimit { side });
            }
        }

        let reference = self.reference_price(&request.symbol);
        self.risk
            .lock()
            .expect("risk lock poisoned")
            .check_order(
                request.user,
                &request.symbol,
                request.side,
                check_price,
                request.quantity,
                reference,
                now_us,
            )
            .map_err(RejectReason::Risk)?;

        {
            let accounts = self.accounts.lock().expect("accounts lock poisoned");
            if request.reduce_only {
                let position = accounts.position_size(request.user, &request.symbol);
                let reduces = position != 0
                    && position.signum() != request.side.sign()
                    && request.quantity as i64 <= position.abs();
                if !reduces {
                    return Err(RejectReason::ReduceOnlyWouldExtend);
                }
            }
            let margin_price = if check_price > 0 { check_price } else { reference };
            let required = accounts.required_margin(
                request.user,
                &request.symbol,
                request.side,
                margin_price,
                request.quantity,
            );
            if required > 0 {
                let available = accounts.available(request.user);
                if available < required {
                    return Err(RejectReason::InsufficientMargin {
                        required,
                        available,
                    });
                }
            }
        }

        let result = self.engine.submit(request, now_us);
        if let Some(reason) = result.reject.clone() {
            return Err(reason);
        }
        self.settle(&result, now_us);
        Ok((result.order, result.trades))
    }

    /// Cancel one order, journaling the cancel.
    pub fn execute_cancel(
        &self,
        symbol: &str,
        order_id: OrderId,
    ) -> Result<Order, RejectReason> {
        if self.is_halted() {
            return Err(RejectReason::CoreHalted);
        }
        let now_us = current_time_micros();
        let cancelled = self.engine.cancel(symbol, order_id, now_us)?;
        self.publish(EventPayload::Cancel {
            order: cancelled.clone(),
        });
        Ok(cancelled)
    }

    /// Cancel all orders of a user across every book.
    pub fn execute_cancel_all(&self, user: UserId) -> usize {
        if self.is_halted() {
            return 0;
        }
        let now_us = current_time_micros();
        let cancelled = self.engine.cancel_all(user, now_us);
        for order in &cancelled {
            self.publish(EventPayload::Cancel {
                order: order.clone(),
            });
        }
        cancelled.len()
    }

    /// Modify an order; the replace path settles like a submit.
    pub fn execute_modify(
        &self,
        symbol: &str,
        order_id: OrderId,
        new_price: Option<u64>,
        new_qty: Option<u64>,
    ) -> Result<(Order, Vec<Trade>), RejectReason> {
        if self.is_halted() {
            return Err(RejectReason::CoreHalted);
        }
        let now_us = current_time_micros();
        let result = self
            .engine
            .modify(symbol, order_id, new_price, new_qty, now_us)?;
        self.settle(&result, now_us);
        Ok((result.order, result.trades))
    }

    // --- settlement pipeline (matching thread) ---

    /// Journal the result's events, settle its trades through accounts and
    /// the ledger, feed risk and breakers, refresh marks, and sweep for
    /// liquidations.
    fn settle(&self, result: &SubmitResult, now_us: u64) {
        self.journal_events(&result.events);
        for trade in &result.trades {
            self.settle_trade(trade, now_us);
        }
        if !result.trades.is_empty() {
            self.run_liquidations(now_us);
        }
    }

    fn journal_events(&self, events: &[BookEvent]) {
        for event in events {
            let payload = match event {
                BookEvent::Accepted(order) => EventPayload::OrderSubmitted {
                    order: order.clone(),
                },
                BookEvent::Updated(order) | BookEvent::Triggered(order) => {
                    EventPayload::OrderUpdated {
                        order: order.clone(),
                    }
                }
                BookEvent::Cancelled(order) => EventPayload::Cancel {
                    order: order.clone(),
                },
                // Rejections never touched the book and are not journaled.
                BookEvent::Rejected { .. } => continue,
            };
            self.publish(payload);
        }
    }

    fn settle_trade(&self, trade: &Trade, now_us: u64) {
        let settlement = self
            .accounts
            .lock()
            .expect("accounts lock poisoned")
            .apply_trade(trade, now_us);

        self.publish(EventPayload::Trade {
            trade: trade.clone(),
            maker_realized: settlement.maker.realized_pnl,
            taker_realized: settlement.taker.realized_pnl,
        });
        if settlement.insurance_contribution > 0 {
            self.publish(EventPayload::InsuranceContribution {
                amount: settlement.insurance_contribution as i128,
                balance: settlement.insurance_balance,
            });
        }

        {
            let mut risk = self.risk.lock().expect("risk lock poisoned");
            risk.update_position(
                settlement.maker.user,
                &trade.symbol,
                settlement.maker.position_delta,
                settlement.maker.realized_pnl,
                now_us,
            );
            risk.update_position(
                settlement.taker.user,
                &trade.symbol,
                settlement.taker.position_delta,
                settlement.taker.realized_pnl,
                now_us,
            );
        }

        self.breakers
            .lock()
            .expect("breaker lock poisoned")
            .on_trade(&trade.symbol, trade.price, now_us);
        self.rates.set_mark(&trade.symbol, trade.price, now_us);
    }

    /// Re-mark everything and force-close under-margined positions until
    /// the sweep converges or the pass bound is hit.
    fn run_liquidations(&self, now_us: u64) {
        for _ in 0..MAX_LIQUIDATION_PASSES {
            let candidates = self
                .accounts
                .lock()
                .expect("accounts lock poisoned")
                .update_all_pnl();
            if candidates.is_empty() {
                return;
            }
            for candidate in candidates {
                self.liquidate(&candidate, now_us);
            }
        }
        warn!("liquidation sweep did not converge within pass bound");
    }

    /// Close one under-margined position with an IOC counter-order at the
    /// mark price. The order bypasses risk and breaker admission (forced
    /// deleveraging must not be blockable) but its trades still feed the
    /// breaker. Shortfall is covered by the insurance fund, then
    /// socialized explicitly.
    fn liquidate(&self, candidate: &LiquidationCandidate, now_us: u64) {
        warn!(
            user = candidate.user,
            symbol = %candidate.symbol,
            size = candidate.size,
            mark = candidate.mark_price,
            "liquidating position"
        );
        self.publish(EventPayload::Liquidation {
            user: candidate.user,
            symbol: candidate.symbol.clone(),
            size: candidate.size,
            mark_price: candidate.mark_price,
        });

        let side = if candidate.size > 0 { Side::Sell } else { Side::Buy };
        let order = Order {
            id: self.engine.next_order_id(),
            symbol: candidate.symbol.clone(),
            user: candidate.user,
            side,
            kind: OrderKind::Ioc,
            price: candidate.mark_price,
            stop_price: 0,
            quantity: candidate.size.unsigned_abs(),
            filled: 0,
            status: OrderStatus::New,
            flags: OrderFlags::LIQUIDATION | OrderFlags::REDUCE_ONLY,
            client_tag: None,
            created_ts_us: now_us,
            updated_ts_us: now_us,
        };
        let result = self.engine.submit_order(order, now_us);
        self.journal_events(&result.events);
        for trade in &result.trades {
            self.settle_trade(trade, now_us);
        }

        let outcome = self
            .accounts
            .lock()
            .expect("accounts lock poisoned")
            .settle_liquidation(candidate.user, now_us);
        if outcome.insurance_draw > 0 {
            let balance = self
                .accounts
                .lock()
                .expect("accounts lock poisoned")
                .insurance_balance();
            self.publish(EventPayload::InsuranceDraw {
                user: candidate.user,
                amount: outcome.insurance_draw,
                balance,
            });
        }
        if outcome.socialized_loss > 0 {
            self.publish(EventPayload::SocializedLoss {
                user: candidate.user,
                amount: outcome.socialized_loss,
            });
        }
    }

    // --- shared plumbing ---

    /// Append a record, mirror it into the ledger, and fan it out to
    /// subscribers. A journal failure is fatal: the core halts command
    /// intake and waits for supervisory restart rather than losing events.
    fn publish(&self, payload: EventPayload) {
        let ts_us = current_time_micros();
        let seq = match self.journal.append(&payload, ts_us) {
            Ok(seq) => seq,
            Err(e) => {
                self.halt_fatal(&format!("journal append failed: {e}"));
                return;
            }
        };
        let record = EventRecord { seq, ts_us, payload };
        {
            let mut ledger = self.ledger.lock().expect("ledger lock poisoned");
            ledger.post(&record);
            debug_assert!(ledger.verify_balance(), "ledger unbalanced at seq {seq}");
        }
        let listeners = self.record_listeners.read().expect("listener lock poisoned");
        for listener in listeners.iter() {
            listener(&record);
        }
    }

    fn halt_fatal(&self, reason: &str) {
        if self.halted.swap(true, Ordering::AcqRel) {
            return;
        }
        error!(reason, "core halted");
        let ts_us = current_time_micros();
        // Best effort: the halt record itself may fail if the journal is
        // the thing that broke.
        let _ = self.journal.append(
            &EventPayload::CoreHalted {
                reason: reason.to_string(),
            },
            ts_us,
        );
    }

    /// Reference price for fat-finger and margin estimation: external mark
    /// first, then the book's last trade.
    fn reference_price(&self, symbol: &str) -> u64 {
        self.rates
            .mark(symbol)
            .or_else(|| self.engine.last_trade_price(symbol))
            .unwrap_or(0)
    }

    /// Halt symbols whose external mark has gone stale: a degraded feed
    /// stops trading instead of trading on fiction.
    pub fn halt_stale_symbols(&self) {
        let now_us = current_time_micros();
        let stale = self.rates.stale_symbols(now_us);
        if stale.is_empty() {
            return;
        }
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        for symbol in stale {
            warn!(symbol = %symbol, "mark price stale, halting symbol");
            breakers.halt_symbol(&symbol, self.config.cb_halt_duration_seconds, now_us);
        }
    }
}

/// The assembled trading core.
///
/// `build_core` constructs everything; [`ExchangeCore::start`] spawns the
/// matching thread; [`ExchangeCore::graceful_shutdown`] stops intake,
/// drains the queue, flushes the journal, and returns.
pub struct ExchangeCore {
    services: Arc<CoreServices>,
    sequencer: Option<Sequencer>,
}

/// Construct the core's system objects from configuration and a product
/// set. Nothing runs until [`ExchangeCore::start`].
pub fn build_core(
    config: CoreConfig,
    products: impl IntoIterator<Item = crate::catalog::Product>,
) -> Result<ExchangeCore, CoreError> {
    let catalog = Arc::new(ProductCatalog::with_products(products));
    let engine = Arc::new(MatchingEngine::new(Arc::clone(&catalog)));
    let journal: Arc<dyn Journal> = match &config.journal_dir {
        Some(dir) => Arc::new(FileJournal::open_with(
            dir,
            config.journal_segment_bytes,
            config.journal_flush_every,
        )?),
        None => Arc::new(MemoryJournal::new()),
    };
    let services = Arc::new(CoreServices {
        risk: Mutex::new(RiskEngine::new(config.risk_limits())),
        breakers: Mutex::new(CircuitBreakers::new(config.breaker_config())),
        accounts: Mutex::new(AccountManager::new(
            Arc::clone(&catalog),
            config.insurance_contrib_bps,
        )),
        journal,
        ledger: Mutex::new(Ledger::new()),
        rates: Arc::new(RateProvider::new(config.mark_stale_after_seconds)),
        catalog,
        engine,
        config,
        halted: AtomicBool::new(false),
        record_listeners: RwLock::new(Vec::new()),
    });
    info!(
        products = services.catalog.len(),
        "core built"
    );
    Ok(ExchangeCore {
        services,
        sequencer: None,
    })
}

impl ExchangeCore {
    /// Spawn the matching thread. Idempotent.
    pub fn start(&mut self) {
        if self.sequencer.is_none() {
            let timeout = Duration::from_millis(self.services.config.sync_timeout_ms);
            self.sequencer = Some(Sequencer::start(Arc::clone(&self.services), timeout));
        }
    }

    /// Stop accepting commands, drain the queue, flush the journal, and
    /// join the matching thread.
    pub fn graceful_shutdown(mut self) {
        if let Some(sequencer) = self.sequencer.take() {
            sequencer.shutdown();
        }
        if let Err(e) = self.services.journal.flush() {
            error!(error = %e, "final journal flush failed");
        }
        info!("core shut down");
    }

    /// Direct access to the system objects (tests, embedders, admin).
    #[must_use]
    pub fn services(&self) -> &Arc<CoreServices> {
        &self.services
    }

    // --- inbound operations ---

    /// Submit an order and wait for its outcome.
    pub fn submit_order(&self, request: OrderRequest) -> Result<CommandResult, CoreError> {
        let sender = self.sender()?;
        Ok(sender.send_sync(|reply| Command::Submit {
            request,
            reply: Some(reply),
        })?)
    }

    /// Cancel an order and wait for the outcome.
    pub fn cancel_order(&self, symbol: &str, order_id: OrderId) -> Result<CommandResult, CoreError> {
        let sender = self.sender()?;
        let symbol = symbol.to_string();
        Ok(sender.send_sync(|reply| Command::Cancel {
            symbol,
            order_id,
            reply: Some(reply),
        })?)
    }

    /// Cancel all of a user's orders and wait for the count.
    pub fn cancel_all(&self, user: UserId) -> Result<CommandResult, CoreError> {
        let sender = self.sender()?;
        Ok(sender.send_sync(|reply| Command::CancelAll {
            user,
            reply: Some(reply),
        })?)
    }

    /// Modify an order and wait for the outcome.
    pub fn modify_order(
        &self,
        symbol: &str,
        order_id: OrderId,
        new_price: Option<u64>,
        new_qty: Option<u64>,
    ) -> Result<CommandResult, CoreError> {
        let sender = self.sender()?;
        let symbol = symbol.to_string();
        Ok(sender.send_sync(|reply| Command::Modify {
            symbol,
            order_id,
            new_price,
            new_qty,
            reply: Some(reply),
        })?)
    }

    /// Credit a deposit. Runs on the caller thread under the account lock;
    /// the journal records it like any other event.
    pub fn deposit(&self, user: UserId, amount: u64) -> bool {
        if self.services.is_halted() {
            return false;
        }
        self.services
            .accounts
            .lock()
            .expect("accounts lock poisoned")
            .deposit(user, amount);
        self.services.publish(EventPayload::Deposit { user, amount });
        true
    }

    /// Debit a withdrawal; `false` when it exceeds the available balance.
    pub fn withdraw(&self, user: UserId, amount: u64) -> bool {
        if self.services.is_halted() {
            return false;
        }
        let withdrawn = self
            .services
            .accounts
            .lock()
            .expect("accounts lock poisoned")
            .withdraw(user, amount)
            .is_ok();
        if withdrawn {
            self.services.publish(EventPayload::Withdraw { user, amount });
        }
        withdrawn
    }

    /// Settle a funding payment against a user (schedule is external).
    pub fn apply_funding(&self, user: UserId, symbol: &str, amount: i128) {
        self.services
            .accounts
            .lock()
            .expect("accounts lock poisoned")
            .apply_funding(user, amount);
        self.services.publish(EventPayload::FundingPayment {
            user,
            symbol: symbol.to_string(),
            amount,
        });
    }

    /// Read-side snapshot: account, positions, open orders, per-symbol BBO.
    #[must_use]
    pub fn get_state(&self, user: UserId) -> CoreState {
        let account = self
            .services
            .accounts
            .lock()
            .expect("accounts lock poisoned")
            .snapshot(user);
        let open_orders = self.services.engine.get_user_orders(user);
        let bbo = self
            .services
            .engine
            .symbols()
            .into_iter()
            .map(|s| {
                let quote = self.services.engine.get_bbo(&s);
                (s, quote)
            })
            .collect();
        CoreState {
            account,
            open_orders,
            bbo,
        }
    }

    /// Register an exposure subscriber (e.g. an external hedger).
    pub fn add_exposure_listener(&self, listener: ExposureListener) {
        self.services
            .accounts
            .lock()
            .expect("accounts lock poisoned")
            .add_exposure_listener(listener);
    }

    /// Rebuild account state from the journal and compare digests with the
    /// live manager. Returns `true` when replay reproduces the live state.
    pub fn verify_replay(&self) -> Result<bool, CoreError> {
        let mut rebuilt = AccountManager::new(
            Arc::clone(&self.services.catalog),
            self.services.config.insurance_contrib_bps,
        );
        let mut ledger = Ledger::new();
        replay_into(self.services.journal.as_ref(), &mut rebuilt, Some(&mut ledger))?;
        let live = self
            .services
            .accounts
            .lock()
            .expect("accounts lock poisoned")
            .state_digest();
        Ok(ledger.verify_balance() && live == rebuilt.state_digest())
    }

    fn sender(&self) -> Result<crate::sequencer::CommandSender, CoreError> {
        self.sequencer
            .as_ref()
            .map(Sequencer::sender)
            .ok_or(CoreError::NotStarted)
    }
}
