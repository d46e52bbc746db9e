//! Position & account manager: balances, margin, PnL, liquidation, the
//! insurance fund, and net client exposure.
//!
//! All monetary state is integer micro-units. The manager is single-writer
//! for trade settlement (the matching thread) while deposits, withdrawals,
//! and snapshots take the owning lock for short sections. The invariant the
//! whole module defends: for every fill, `balance + margin_used` changes by
//! exactly `realized PnL − fees`.

mod position;

pub use position::{FillOutcome, Position};

use crate::catalog::ProductCatalog;
use crate::orderbook::{RejectReason, Trade};
use crate::types::money::{margin_on, notional};
use crate::types::{BPS_DENOM, Side, UserId};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// One user's cash and margin state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Account {
    /// Free cash balance (reserved margin excluded), micro-units.
    /// Non-negative in normal operation; a bankrupt liquidation may take it
    /// transiently negative until the insurance fund or socialization
    /// restores it.
    pub balance: i128,
    /// Initial margin reserved by open positions, micro-units.
    pub margin_used: i128,
    /// Aggregate mark-to-market PnL across positions, micro-units.
    pub unrealized_pnl: i128,
}

impl Account {
    /// Total cash (free balance plus reserved margin) marked to market.
    #[inline]
    #[must_use]
    pub fn equity(&self) -> i128 {
        self.balance + self.margin_used + self.unrealized_pnl
    }

    /// `equity − margin_used`: the sole source of further margin
    /// reservation and withdrawals.
    #[inline]
    #[must_use]
    pub fn available(&self) -> i128 {
        self.balance + self.unrealized_pnl
    }

    /// `margin_used / equity` in basis points; `None` when equity ≤ 0.
    #[must_use]
    pub fn margin_ratio_bps(&self) -> Option<u64> {
        let equity = self.equity();
        (equity > 0).then(|| (self.margin_used * BPS_DENOM as i128 / equity).max(0) as u64)
    }
}

/// Point-in-time view of one user, served by `get_state`.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    /// The user this snapshot describes.
    pub user: UserId,
    /// Cash and margin state.
    pub account: Account,
    /// Equity at snapshot time.
    pub equity: i128,
    /// Available balance at snapshot time.
    pub available: i128,
    /// Open positions, flat ones excluded.
    pub positions: Vec<Position>,
}

/// Settlement of one side of a trade.
#[derive(Debug, Clone, Copy)]
pub struct SideSettlement {
    /// The settled user.
    pub user: UserId,
    /// Signed position delta, micro-lots.
    pub position_delta: i64,
    /// Realized PnL from the reducing part of the fill, micro-units.
    pub realized_pnl: i128,
    /// Fee charged (negative = rebate), micro-units.
    pub fee: i64,
}

/// Everything `apply_trade` did, for journaling and risk feedback.
#[derive(Debug, Clone)]
pub struct TradeSettlement {
    /// The settled trade id.
    pub trade_id: u64,
    /// The traded symbol.
    pub symbol: String,
    /// Maker-side settlement.
    pub maker: SideSettlement,
    /// Taker-side settlement.
    pub taker: SideSettlement,
    /// Portion of the taker fee accrued to the insurance fund.
    pub insurance_contribution: i64,
    /// Insurance fund balance after the contribution.
    pub insurance_balance: i128,
}

/// A position eligible for forced close-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationCandidate {
    /// The under-margined user.
    pub user: UserId,
    /// The position's symbol.
    pub symbol: String,
    /// Signed position size to close, micro-lots.
    pub size: i64,
    /// Mark price the eligibility was computed at.
    pub mark_price: u64,
}

/// Cash consequences of finishing a liquidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiquidationOutcome {
    /// Amount drawn from the insurance fund, micro-units.
    pub insurance_draw: i128,
    /// Residual loss socialized after the fund ran dry, micro-units.
    pub socialized_loss: i128,
}

/// Net exposure update published after settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExposureChange {
    /// The symbol whose aggregate moved.
    pub symbol: String,
    /// New net client size, signed micro-lots.
    pub net_size: i64,
    /// Hedging linkage carried from the product definition.
    pub hedge_symbol: Option<String>,
}

/// Callback for [`ExposureChange`] notifications.
pub type ExposureListener = Arc<dyn Fn(&ExposureChange) + Send + Sync>;

/// One movement of the insurance fund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InsuranceEntry {
    /// When the movement happened.
    pub ts_us: u64,
    /// Signed movement: contributions positive, draws negative.
    pub delta: i128,
    /// Fund balance after the movement.
    pub balance: i128,
}

/// The position & account manager.
pub struct AccountManager {
    catalog: Arc<ProductCatalog>,
    accounts: HashMap<UserId, Account>,
    positions: HashMap<UserId, HashMap<String, Position>>,
    /// Current mark price per symbol, fed by trades and the rate provider.
    marks: HashMap<String, u64>,
    insurance_balance: i128,
    insurance_log: Vec<InsuranceEntry>,
    /// Fraction of each taker fee routed to the insurance fund, bps.
    insurance_contrib_bps: u32,
    fee_revenue: i128,
    socialized_total: i128,
    net_exposure: HashMap<String, i64>,
    /// Users excluded from the client-exposure aggregate (house accounts).
    house_users: HashSet<UserId>,
    exposure_listeners: Vec<ExposureListener>,
}

impl AccountManager {
    /// Create a manager over `catalog` with the given insurance skim.
    #[must_use]
    pub fn new(catalog: Arc<ProductCatalog>, insurance_contrib_bps: u32) -> Self {
        Self {
            catalog,
            accounts: HashMap::new(),
            positions: HashMap::new(),
            marks: HashMap::new(),
            insurance_balance: 0,
            insurance_log: Vec::new(),
            insurance_contrib_bps,
            fee_revenue: 0,
            socialized_total: 0,
            net_exposure: HashMap::new(),
            house_users: HashSet::new(),
            exposure_listeners: Vec::new(),
        }
    }

    /// Register a net-exposure subscriber.
    ///
    /// Listeners run inside the settlement critical section and must not
    /// call back into the manager.
    pub fn add_exposure_listener(&mut self, listener: ExposureListener) {
        self.exposure_listeners.push(listener);
    }

    /// Mark a user as a house account, excluded from client exposure.
    pub fn register_house_user(&mut self, user: UserId) {
        self.house_users.insert(user);
    }

    // --- balance lifecycle ---

    /// Credit `amount` micro-units to the user's balance.
    pub fn deposit(&mut self, user: UserId, amount: u64) {
        let account = self.accounts.entry(user).or_default();
        account.balance += amount as i128;
        info!(user, amount, "deposit");
    }

    /// Debit `amount` micro-units; fails when it exceeds `available`.
    pub fn withdraw(&mut self, user: UserId, amount: u64) -> Result<(), RejectReason> {
        let account = self.accounts.entry(user).or_default();
        if (amount as i128) > account.available() {
            return Err(RejectReason::InsufficientFunds);
        }
        account.balance -= amount as i128;
        info!(user, amount, "withdraw");
        Ok(())
    }

    /// Apply a funding payment (signed; positive credits the user).
    pub fn apply_funding(&mut self, user: UserId, amount: i128) {
        let account = self.accounts.entry(user).or_default();
        account.balance += amount;
    }

    // --- queries ---

    /// Copy of a user's account; default (zeroed) when unknown.
    #[must_use]
    pub fn account(&self, user: UserId) -> Account {
        self.accounts.get(&user).copied().unwrap_or_default()
    }

    /// Available balance for margin reservation.
    #[must_use]
    pub fn available(&self, user: UserId) -> i128 {
        self.account(user).available()
    }

    /// Signed position size in one symbol, micro-lots.
    #[must_use]
    pub fn position_size(&self, user: UserId, symbol: &str) -> i64 {
        self.positions
            .get(&user)
            .and_then(|m| m.get(symbol))
            .map_or(0, |p| p.size)
    }

    /// Full snapshot of one user's account and open positions.
    #[must_use]
    pub fn snapshot(&self, user: UserId) -> AccountSnapshot {
        let account = self.account(user);
        let mut positions: Vec<Position> = self
            .positions
            .get(&user)
            .map(|m| m.values().filter(|p| !p.is_flat()).cloned().collect())
            .unwrap_or_default();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        AccountSnapshot {
            user,
            account,
            equity: account.equity(),
            available: account.available(),
            positions,
        }
    }

    /// Current insurance fund balance, micro-units.
    #[must_use]
    pub fn insurance_balance(&self) -> i128 {
        self.insurance_balance
    }

    /// The monotonic insurance movement log.
    #[must_use]
    pub fn insurance_log(&self) -> &[InsuranceEntry] {
        &self.insurance_log
    }

    /// Exchange fee revenue net of insurance contributions, micro-units.
    #[must_use]
    pub fn fee_revenue(&self) -> i128 {
        self.fee_revenue
    }

    /// Cumulative socialized losses, micro-units.
    #[must_use]
    pub fn socialized_total(&self) -> i128 {
        self.socialized_total
    }

    /// Net client size per symbol, signed micro-lots.
    #[must_use]
    pub fn net_exposure(&self, symbol: &str) -> i64 {
        self.net_exposure.get(symbol).copied().unwrap_or(0)
    }

    /// Current mark price of a symbol.
    #[must_use]
    pub fn mark_price(&self, symbol: &str) -> Option<u64> {
        self.marks.get(symbol).copied()
    }

    // --- admission support ---

    /// Initial margin an order would reserve if it opened/extended at
    /// `price`. Orders that only reduce the current position require none.
    #[must_use]
    pub fn required_margin(
        &self,
        user: UserId,
        symbol: &str,
        side: Side,
        price: u64,
        qty: u64,
    ) -> i128 {
        let Some(product) = self.catalog.get(symbol) else {
            return 0;
        };
        let current = self.position_size(user, symbol);
        let signed = side.sign() * qty as i64;
        // Pure reduction (no reversal) reserves nothing.
        if current != 0 && current.signum() != signed.signum() && qty as i64 <= current.abs() {
            return 0;
        }
        let opening = if current != 0 && current.signum() != signed.signum() {
            qty - current.unsigned_abs()
        } else {
            qty
        };
        margin_on(
            notional(price, opening, product.contract_size),
            product.margin_rate_bps,
        )
    }

    // --- settlement (matching thread only) ---

    /// Settle one trade for both participants in a single critical section:
    /// fees, position update, realized PnL, margin move, insurance skim,
    /// mark refresh, and exposure accounting.
    pub fn apply_trade(&mut self, trade: &Trade, now_us: u64) -> TradeSettlement {
        let product = self
            .catalog
            .get(&trade.symbol)
            .unwrap_or_else(|| self.synthetic_product(&trade.symbol));

        let maker_side = trade.taker_side.opposite();
        let maker = self.apply_side(
            trade.maker_user,
            &trade.symbol,
            maker_side,
            trade.quantity,
            trade.price,
            trade.maker_fee,
            &product,
        );
        let taker = self.apply_side(
            trade.taker_user,
            &trade.symbol,
            trade.taker_side,
            trade.quantity,
            trade.price,
            trade.taker_fee,
            &product,
        );

        // Insurance skim comes out of the taker fee; the rest is revenue.
        let contribution = if trade.taker_fee > 0 {
            (trade.taker_fee as i128 * self.insurance_contrib_bps as i128 / BPS_DENOM as i128)
                as i64
        } else {
            0
        };
        if contribution > 0 {
            self.insurance_balance += contribution as i128;
            self.insurance_log.push(InsuranceEntry {
                ts_us: now_us,
                delta: contribution as i128,
                balance: self.insurance_balance,
            });
        }
        self.fee_revenue +=
            trade.maker_fee as i128 + trade.taker_fee as i128 - contribution as i128;

        // The trade is the freshest mark for its own symbol.
        self.marks.insert(trade.symbol.clone(), trade.price);
        self.refresh_user(trade.maker_user);
        self.refresh_user(trade.taker_user);

        self.update_exposure(&trade.symbol, &[maker, taker], product.hedge_symbol.clone());

        TradeSettlement {
            trade_id: trade.trade_id,
            symbol: trade.symbol.clone(),
            maker,
            taker,
            insurance_contribution: contribution,
            insurance_balance: self.insurance_balance,
        }
    }

    /// Install an externally computed mark price (rate provider feed).
    pub fn set_mark(&mut self, symbol: &str, price: u64) {
        if price > 0 {
            self.marks.insert(symbol.to_string(), price);
        }
    }

    /// Re-mark every position and collect liquidation candidates.
    ///
    /// A position is eligible when its owner's equity has fallen below the
    /// position's maintenance margin at the current mark.
    pub fn update_all_pnl(&mut self) -> Vec<LiquidationCandidate> {
        let users: Vec<UserId> = self.positions.keys().copied().collect();
        let mut candidates = Vec::new();
        for user in users {
            self.refresh_user(user);
            let equity = self.account(user).equity();
            let Some(positions) = self.positions.get(&user) else {
                continue;
            };
            for position in positions.values() {
                if position.is_flat() {
                    continue;
                }
                let Some(mark) = self.marks.get(&position.symbol).copied() else {
                    continue;
                };
                let Some(product) = self.catalog.get(&position.symbol) else {
                    continue;
                };
                if equity < position.maintenance_margin(mark, &product) {
                    candidates.push(LiquidationCandidate {
                        user,
                        symbol: position.symbol.clone(),
                        size: position.size,
                        mark_price: mark,
                    });
                }
            }
        }
        candidates
    }

    /// Settle the cash aftermath of a liquidation close-out.
    ///
    /// Any negative balance is first covered by the insurance fund; what
    /// the fund cannot cover is socialized explicitly, never silently
    /// rebalanced.
    pub fn settle_liquidation(&mut self, user: UserId, now_us: u64) -> LiquidationOutcome {
        let account = self.accounts.entry(user).or_default();
        if account.balance >= 0 {
            return LiquidationOutcome::default();
        }
        let shortfall = -account.balance;
        let draw = shortfall.min(self.insurance_balance.max(0));
        if draw > 0 {
            self.insurance_balance -= draw;
            self.insurance_log.push(InsuranceEntry {
                ts_us: now_us,
                delta: -draw,
                balance: self.insurance_balance,
            });
            let account = self.accounts.entry(user).or_default();
            account.balance += draw;
            warn!(user, draw, "insurance fund draw");
        }
        let account = self.accounts.entry(user).or_default();
        let socialized = if account.balance < 0 {
            let loss = -account.balance;
            account.balance = 0;
            self.socialized_total += loss;
            warn!(user, loss, "loss socialized: insurance fund exhausted");
            loss
        } else {
            0
        };
        LiquidationOutcome {
            insurance_draw: draw,
            socialized_loss: socialized,
        }
    }

    /// Apply insurance/socialization records during journal replay, where
    /// the amounts come from the log rather than being recomputed.
    pub fn replay_insurance_draw(&mut self, user: UserId, amount: i128, now_us: u64) {
        self.insurance_balance -= amount;
        self.insurance_log.push(InsuranceEntry {
            ts_us: now_us,
            delta: -amount,
            balance: self.insurance_balance,
        });
        self.accounts.entry(user).or_default().balance += amount;
    }

    /// Replay counterpart of the socialized-loss branch of
    /// [`Self::settle_liquidation`].
    pub fn replay_socialized_loss(&mut self, user: UserId, amount: i128) {
        let account = self.accounts.entry(user).or_default();
        account.balance += amount;
        if account.balance > 0 {
            account.balance = 0;
        }
        self.socialized_total += amount;
    }

    /// SHA-256 digest of the mark-independent account state, used by the
    /// replay-idempotence checks. Unrealized PnL is excluded: it is a pure
    /// function of marks, which are not journaled.
    #[must_use]
    pub fn state_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        let mut users: Vec<UserId> = self.accounts.keys().copied().collect();
        users.sort_unstable();
        for user in users {
            let account = self.account(user);
            hasher.update(user.to_le_bytes());
            hasher.update(account.balance.to_le_bytes());
            hasher.update(account.margin_used.to_le_bytes());
            if let Some(positions) = self.positions.get(&user) {
                let mut symbols: Vec<&String> = positions.keys().collect();
                symbols.sort();
                for symbol in symbols {
                    let p = &positions[symbol];
                    if p.is_flat() && p.realized_pnl == 0 {
                        continue;
                    }
                    hasher.update(symbol.as_bytes());
                    hasher.update(p.size.to_le_bytes());
                    hasher.update(p.entry_price.to_le_bytes());
                    hasher.update(p.realized_pnl.to_le_bytes());
                }
            }
        }
        hasher.update(self.insurance_balance.to_le_bytes());
        hasher.update(self.fee_revenue.to_le_bytes());
        hasher.update(self.socialized_total.to_le_bytes());
        hasher.finalize().into()
    }

    // --- internals ---

    #[allow(clippy::too_many_arguments)]
    fn apply_side(
        &mut self,
        user: UserId,
        symbol: &str,
        side: Side,
        qty: u64,
        price: u64,
        fee: i64,
        product: &crate::catalog::Product,
    ) -> SideSettlement {
        let position = self
            .positions
            .entry(user)
            .or_default()
            .entry(symbol.to_string())
            .or_insert_with(|| Position::flat(symbol));
        let outcome = position.apply_fill(side, qty, price, product);

        let account = self.accounts.entry(user).or_default();
        // Margin moves between balance and the reserve; realized PnL and
        // fees move cash in and out.
        account.margin_used += outcome.margin_delta;
        account.balance -= outcome.margin_delta;
        account.balance += outcome.realized_pnl;
        account.balance -= fee as i128;

        SideSettlement {
            user,
            position_delta: side.sign() * qty as i64,
            realized_pnl: outcome.realized_pnl,
            fee,
        }
    }

    fn refresh_user(&mut self, user: UserId) {
        let Some(positions) = self.positions.get_mut(&user) else {
            return;
        };
        let mut total_unrealized = 0i128;
        for position in positions.values_mut() {
            let mark = self.marks.get(&position.symbol).copied().unwrap_or(0);
            if let Some(product) = self.catalog.get(&position.symbol) {
                position.mark(mark, &product);
            }
            total_unrealized += position.unrealized_pnl;
        }
        self.accounts.entry(user).or_default().unrealized_pnl = total_unrealized;
    }

    fn update_exposure(
        &mut self,
        symbol: &str,
        sides: &[SideSettlement],
        hedge_symbol: Option<String>,
    ) {
        let mut delta = 0i64;
        for side in sides {
            if !self.house_users.contains(&side.user) {
                delta += side.position_delta;
            }
        }
        if delta == 0 {
            return;
        }
        let entry = self.net_exposure.entry(symbol.to_string()).or_insert(0);
        *entry += delta;
        let change = ExposureChange {
            symbol: symbol.to_string(),
            net_size: *entry,
            hedge_symbol,
        };
        for listener in &self.exposure_listeners {
            listener(&change);
        }
    }

    /// Fallback product for trades on symbols the catalog no longer knows
    /// (e.g. removed after the book was created). Fees were already set on
    /// the trade; only contract scale matters here.
    fn synthetic_product(&self, symbol: &str) -> crate::catalog::Product {
        crate::catalog::Product {
            symbol: symbol.to_string(),
            tick_size: 1,
            lot_size: 1,
            contract_size: 1,
            margin_rate_bps: 0,
            maintenance_margin_rate_bps: 0,
            maker_fee_bps: 0,
            taker_fee_bps: 0,
            min_notional: 0,
            min_fee: 0,
            active: false,
            hedge_symbol: None,
        }
    }
}
