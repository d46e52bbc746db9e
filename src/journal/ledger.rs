//! In-memory double-entry ledger mirroring the event journal.
//!
//! Every journal record posts equal debits and credits to named accounts,
//! so `verify_balance()` (Σ debits == Σ credits) holds after every event.
//! Balances are debit-positive: asset/expense accounts carry positive
//! balances, liability/revenue/equity accounts negative.

use super::types::{EventPayload, EventRecord};
use crate::types::UserId;
use std::collections::HashMap;

/// Cash custody account.
pub const ASSETS_BANK: &str = "Assets:Exchange:Bank";
/// Insurance fund account.
pub const ASSETS_INSURANCE: &str = "Assets:Insurance";
/// Fee revenue account.
pub const REVENUE_FEES: &str = "Revenue:Fees";
/// Counterpart for realized trading PnL transfers.
pub const EQUITY_TRADING: &str = "Equity:TradingClearing";
/// Counterpart for funding transfers.
pub const EQUITY_FUNDING: &str = "Equity:FundingClearing";
/// Counterpart for socialized losses.
pub const EQUITY_SOCIALIZED: &str = "Equity:Socialized";

/// Liability account holding one customer's claim.
#[must_use]
pub fn customer_account(user: UserId) -> String {
    format!("Liabilities:Customer:{user}")
}

/// The double-entry mirror of the journal.
#[derive(Debug, Default)]
pub struct Ledger {
    balances: HashMap<String, i128>,
    posted_records: u64,
}

impl Ledger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Post one journal record.
    ///
    /// Records without monetary effect (order lifecycle, halts) post
    /// nothing, which keeps the balance invariant trivially.
    pub fn post(&mut self, record: &EventRecord) {
        match &record.payload {
            EventPayload::Deposit { user, amount } => {
                self.transfer(ASSETS_BANK, &customer_account(*user), *amount as i128);
            }
            EventPayload::Withdraw { user, amount } => {
                self.transfer(&customer_account(*user), ASSETS_BANK, *amount as i128);
            }
            EventPayload::Trade {
                trade,
                maker_realized,
                taker_realized,
            } => {
                self.post_fee(trade.maker_user, trade.maker_fee);
                self.post_fee(trade.taker_user, trade.taker_fee);
                self.post_realized(trade.maker_user, *maker_realized);
                self.post_realized(trade.taker_user, *taker_realized);
            }
            EventPayload::InsuranceContribution { amount, .. } => {
                self.transfer(REVENUE_FEES, ASSETS_INSURANCE, *amount);
            }
            EventPayload::InsuranceDraw { user, amount, .. } => {
                self.transfer(ASSETS_INSURANCE, &customer_account(*user), *amount);
            }
            EventPayload::SocializedLoss { user, amount } => {
                self.transfer(EQUITY_SOCIALIZED, &customer_account(*user), *amount);
            }
            EventPayload::FundingPayment { user, amount, .. } => {
                if *amount >= 0 {
                    self.transfer(EQUITY_FUNDING, &customer_account(*user), *amount);
                } else {
                    self.transfer(&customer_account(*user), EQUITY_FUNDING, -*amount);
                }
            }
            EventPayload::OrderSubmitted { .. }
            | EventPayload::OrderUpdated { .. }
            | EventPayload::Cancel { .. }
            | EventPayload::Liquidation { .. }
            | EventPayload::CoreHalted { .. } => {}
        }
        self.posted_records += 1;
    }

    /// The invariant: total debits equal total credits.
    #[must_use]
    pub fn verify_balance(&self) -> bool {
        self.balances.values().sum::<i128>() == 0
    }

    /// Signed balance of a named account (debit-positive).
    #[must_use]
    pub fn balance(&self, account: &str) -> i128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Number of records posted so far.
    #[must_use]
    pub fn posted_records(&self) -> u64 {
        self.posted_records
    }

    /// Debit `debit`, credit `credit` by `amount` (must be non-negative).
    fn transfer(&mut self, debit: &str, credit: &str, amount: i128) {
        if amount == 0 {
            return;
        }
        *self.balances.entry(debit.to_string()).or_insert(0) += amount;
        *self.balances.entry(credit.to_string()).or_insert(0) -= amount;
    }

    /// A positive fee debits the customer and credits revenue; a rebate
    /// flows the other way.
    fn post_fee(&mut self, user: UserId, fee: i64) {
        if fee >= 0 {
            self.transfer(&customer_account(user), REVENUE_FEES, fee as i128);
        } else {
            self.transfer(REVENUE_FEES, &customer_account(user), -fee as i128);
        }
    }

    /// Realized PnL moves between the customer claim and the trading
    /// clearing account.
    fn post_realized(&mut self, user: UserId, realized: i128) {
        if realized >= 0 {
            self.transfer(EQUITY_TRADING, &customer_account(user), realized);
        } else {
            self.transfer(&customer_account(user), EQUITY_TRADING, -realized);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::Trade;
    use crate::types::Side;

    fn record(seq: u64, payload: EventPayload) -> EventRecord {
        EventRecord {
            seq,
            ts_us: seq,
            payload,
        }
    }

    fn trade_payload(maker_fee: i64, taker_fee: i64, realized: i128) -> EventPayload {
        EventPayload::Trade {
            trade: Trade {
                trade_id: 1,
                symbol: "XAU-USD".to_string(),
                maker_order_id: 1,
                taker_order_id: 2,
                maker_user: 10,
                taker_user: 20,
                taker_side: Side::Buy,
                price: 100,
                quantity: 1,
                maker_fee,
                taker_fee,
                ts_us: 0,
            },
            maker_realized: -realized,
            taker_realized: realized,
        }
    }

    #[test]
    fn test_deposit_withdraw_balance() {
        let mut ledger = Ledger::new();
        ledger.post(&record(0, EventPayload::Deposit { user: 1, amount: 1_000 }));
        assert!(ledger.verify_balance());
        assert_eq!(ledger.balance(ASSETS_BANK), 1_000);
        assert_eq!(ledger.balance(&customer_account(1)), -1_000);

        ledger.post(&record(1, EventPayload::Withdraw { user: 1, amount: 400 }));
        assert!(ledger.verify_balance());
        assert_eq!(ledger.balance(ASSETS_BANK), 600);
        assert_eq!(ledger.balance(&customer_account(1)), -600);
    }

    #[test]
    fn test_trade_posts_fees_and_pnl() {
        let mut ledger = Ledger::new();
        ledger.post(&record(0, trade_payload(20, 50, 300)));
        assert!(ledger.verify_balance());
        assert_eq!(ledger.balance(REVENUE_FEES), -70);
        // Maker lost 300 to the taker via the clearing account.
        assert_eq!(ledger.balance(&customer_account(10)), 300 + 20);
        assert_eq!(ledger.balance(&customer_account(20)), -300 + 50);
    }

    #[test]
    fn test_maker_rebate_flows_from_revenue() {
        let mut ledger = Ledger::new();
        ledger.post(&record(0, trade_payload(-20, 50, 0)));
        assert!(ledger.verify_balance());
        assert_eq!(ledger.balance(REVENUE_FEES), -30);
        assert_eq!(ledger.balance(&customer_account(10)), -20);
    }

    #[test]
    fn test_insurance_flow() {
        let mut ledger = Ledger::new();
        ledger.post(&record(
            0,
            EventPayload::InsuranceContribution { amount: 10, balance: 10 },
        ));
        ledger.post(&record(
            1,
            EventPayload::InsuranceDraw { user: 3, amount: 4, balance: 6 },
        ));
        ledger.post(&record(2, EventPayload::SocializedLoss { user: 3, amount: 7 }));
        assert!(ledger.verify_balance());
        assert_eq!(ledger.balance(ASSETS_INSURANCE), 6);
        assert_eq!(ledger.balance(&customer_account(3)), -11);
        assert_eq!(ledger.balance(EQUITY_SOCIALIZED), 7);
    }

    #[test]
    fn test_funding_both_directions() {
        let mut ledger = Ledger::new();
        ledger.post(&record(
            0,
            EventPayload::FundingPayment {
                user: 1,
                symbol: "XAU-USD".to_string(),
                amount: 100,
            },
        ));
        ledger.post(&record(
            1,
            EventPayload::FundingPayment {
                user: 2,
                symbol: "XAU-USD".to_string(),
                amount: -100,
            },
        ));
        assert!(ledger.verify_balance());
        assert_eq!(ledger.balance(EQUITY_FUNDING), 0);
        assert_eq!(ledger.balance(&customer_account(1)), -100);
        assert_eq!(ledger.balance(&customer_account(2)), 100);
    }

    #[test]
    fn test_lifecycle_records_post_nothing() {
        let mut ledger = Ledger::new();
        ledger.post(&record(
            0,
            EventPayload::CoreHalted {
                reason: "test".to_string(),
            },
        ));
        assert!(ledger.verify_balance());
        assert_eq!(ledger.posted_records(), 1);
        assert_eq!(ledger.balance(ASSETS_BANK), 0);
    }
}
