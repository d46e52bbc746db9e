//! Monetary conservation and exposure accounting at the system level.

use crate::common::*;
use dexcore::prelude::*;
use std::sync::{Arc, Mutex};

/// Sum of every user's wealth plus exchange sinks must equal net external
/// cash flow: deposits − withdrawals + socialized injections.
fn assert_conserved(core: &ExchangeCore, users: &[UserId], deposits: i128, withdrawals: i128) {
    let services = core.services();
    let mut accounts = services.accounts.lock().unwrap();
    accounts.update_all_pnl();
    let wealth: i128 = users
        .iter()
        .map(|u| {
            let a = accounts.account(*u);
            a.balance + a.margin_used + a.unrealized_pnl
        })
        .sum();
    let total = wealth + accounts.fee_revenue() + accounts.insurance_balance()
        - accounts.socialized_total();
    assert_eq!(total, deposits - withdrawals);
}

#[test]
fn test_conservation_through_trading() {
    let core = started_core(permissive_config(), [product_with_fees()]);
    let users: Vec<UserId> = (1..=4).collect();
    let deposit = 1_000_000 * P;
    for user in &users {
        core.deposit(*user, deposit);
    }

    submit_ok(&core, limit(1, Side::Sell, 100, 3));
    submit_ok(&core, limit(2, Side::Buy, 100, 2));
    submit_ok(&core, limit(3, Side::Buy, 100, 1));
    submit_ok(&core, limit(4, Side::Sell, 95, 2));
    submit_ok(&core, limit(2, Side::Sell, 90, 2));
    submit_ok(&core, limit(3, Side::Buy, 97, 2));

    assert!(core.withdraw(1, 123 * P));
    assert_conserved(
        &core,
        &users,
        users.len() as i128 * deposit as i128,
        123 * P as i128,
    );
    core.graceful_shutdown();
}

#[test]
fn test_quantity_conservation_per_trade() {
    let core = started_core(permissive_config(), [product()]);
    for user in 1..=2 {
        core.deposit(user, 1_000_000 * P);
    }
    submit_ok(&core, limit(1, Side::Sell, 100, 3));
    let (order, trades) = submit_ok(&core, limit(2, Side::Buy, 100, 2));

    let filled: u64 = trades.iter().map(|t| t.quantity).sum();
    assert_eq!(filled, order.filled);
    // The two sides' position deltas cancel exactly.
    let services = core.services();
    let accounts = services.accounts.lock().unwrap();
    assert_eq!(
        accounts.position_size(1, "XAU-USD") + accounts.position_size(2, "XAU-USD"),
        0
    );
    drop(accounts);
    core.graceful_shutdown();
}

#[test]
fn test_no_self_trade_records() {
    let core = started_core(permissive_config(), [product()]);
    core.deposit(1, 1_000_000 * P);
    core.deposit(2, 1_000_000 * P);
    let trades_seen = Arc::new(Mutex::new(Vec::<(UserId, UserId)>::new()));
    {
        let sink = Arc::clone(&trades_seen);
        core.services().add_record_listener(Arc::new(move |record| {
            if let EventPayload::Trade { trade, .. } = &record.payload {
                sink.lock().unwrap().push((trade.maker_user, trade.taker_user));
            }
        }));
    }

    submit_ok(&core, limit(1, Side::Sell, 100, 1));
    submit_ok(&core, limit(2, Side::Sell, 100, 1));
    submit_ok(&core, limit(1, Side::Buy, 100, 2));

    let seen = trades_seen.lock().unwrap();
    assert!(!seen.is_empty());
    for (maker, taker) in seen.iter() {
        assert_ne!(maker, taker, "self-trade printed");
    }
    core.graceful_shutdown();
}

#[test]
fn test_exposure_published_for_house_flow() {
    let core = started_core(permissive_config(), [product()]);
    let changes = Arc::new(Mutex::new(Vec::<ExposureChange>::new()));
    {
        let sink = Arc::clone(&changes);
        core.add_exposure_listener(Arc::new(move |change: &ExposureChange| {
            sink.lock().unwrap().push(change.clone());
        }));
    }
    core.services()
        .accounts
        .lock()
        .unwrap()
        .register_house_user(100);
    core.deposit(1, 1_000_000 * P);
    core.deposit(100, 1_000_000 * P);

    // House quotes, client lifts: net client exposure becomes +1.
    submit_ok(&core, limit(100, Side::Sell, 100, 1));
    submit_ok(&core, limit(1, Side::Buy, 100, 1));

    let seen = changes.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].symbol, "XAU-USD");
    assert_eq!(seen[0].net_size, Q as i64);
    drop(seen);
    core.graceful_shutdown();
}

#[test]
fn test_funding_payments_conserve() {
    let core = started_core(permissive_config(), [product()]);
    core.deposit(1, 1_000 * P);
    core.deposit(2, 1_000 * P);
    // Longs pay shorts: zero-sum across the pair.
    core.apply_funding(1, "XAU-USD", -(7 * P as i128));
    core.apply_funding(2, "XAU-USD", 7 * P as i128);

    let services = core.services();
    let accounts = services.accounts.lock().unwrap();
    assert_eq!(accounts.account(1).balance, 993 * P as i128);
    assert_eq!(accounts.account(2).balance, 1_007 * P as i128);
    drop(accounts);
    assert!(services.ledger.lock().unwrap().verify_balance());
    core.graceful_shutdown();
}
