//! Risk gates, circuit breakers, and operational lifecycle through the
//! assembled core.

use crate::common::*;
use dexcore::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn test_daily_loss_limit_blocks_user() {
    let config = CoreConfig {
        daily_loss_limit: 5 * P, // block beyond a 5-unit daily loss
        ..permissive_config()
    };
    let core = started_core(config, [product()]);
    for user in 1..=2 {
        core.deposit(user, 1_000_000 * P);
    }

    // User 1 buys at 100 then sells at 90: realizes −10.
    submit_ok(&core, limit(2, Side::Sell, 100, 1));
    submit_ok(&core, limit(1, Side::Buy, 100, 1));
    submit_ok(&core, limit(2, Side::Buy, 90, 1));
    submit_ok(&core, limit(1, Side::Sell, 90, 1));

    // Every further submit is refused until the day boundary.
    assert_eq!(
        submit_rejected(&core, limit(1, Side::Buy, 90, 1)),
        RejectReason::Risk(RiskReason::DailyLossLimit)
    );
    // The other side is unaffected.
    submit_ok(&core, limit(2, Side::Buy, 90, 1));
    core.graceful_shutdown();
}

#[test]
fn test_rate_limit_through_core() {
    let config = CoreConfig {
        max_orders_per_second: 3,
        ..permissive_config()
    };
    let core = started_core(config, [product()]);
    core.deposit(1, 1_000_000 * P);

    for i in 0..3 {
        submit_ok(&core, limit(1, Side::Buy, 100 + i, 1));
    }
    assert_eq!(
        submit_rejected(&core, limit(1, Side::Buy, 104, 1)),
        RejectReason::Risk(RiskReason::RateLimit)
    );
    core.graceful_shutdown();
}

#[test]
fn test_position_limit_through_core() {
    let config = CoreConfig {
        max_position_size: 2 * Q,
        ..permissive_config()
    };
    let core = started_core(config, [product()]);
    core.deposit(1, 1_000_000 * P);
    assert_eq!(
        submit_rejected(&core, limit(1, Side::Buy, 100, 3)),
        RejectReason::Risk(RiskReason::PositionLimit)
    );
    core.graceful_shutdown();
}

#[test]
fn test_fat_finger_against_mark() {
    let config = CoreConfig {
        fat_finger_bps: 1_000,
        ..permissive_config()
    };
    let core = started_core(config, [product()]);
    for user in 1..=2 {
        core.deposit(user, 1_000_000 * P);
    }
    // Seed a reference price at 100.
    submit_ok(&core, limit(2, Side::Sell, 100, 1));
    submit_ok(&core, limit(1, Side::Buy, 100, 1));

    // 11% away from the mark.
    assert_eq!(
        submit_rejected(&core, limit(1, Side::Buy, 111, 1)),
        RejectReason::Risk(RiskReason::FatFinger)
    );
    core.graceful_shutdown();
}

#[test]
fn test_halt_after_threshold_move() {
    let config = CoreConfig {
        cb_price_limit_bps: 5_000,    // wide limits so orders reach the book
        cb_halt_threshold_bps: 1_000, // 10% print move trips the halt
        cb_halt_duration_seconds: 300,
        fat_finger_bps: 100_000,
        ..permissive_config()
    };
    let core = started_core(config, [product()]);
    for user in 1..=2 {
        core.deposit(user, 10_000_000 * P);
    }

    // Reference seeds at 100, then a print at 111 trips the halt.
    submit_ok(&core, limit(2, Side::Sell, 100, 1));
    submit_ok(&core, limit(1, Side::Buy, 100, 1));
    submit_ok(&core, limit(2, Side::Sell, 111, 1));
    submit_ok(&core, limit(1, Side::Buy, 111, 1));

    assert_eq!(
        submit_rejected(&core, limit(1, Side::Buy, 100, 1)),
        RejectReason::CircuitHalted
    );
    core.graceful_shutdown();
}

#[test]
fn test_limit_up_blocks_buy_side_only() {
    let config = CoreConfig {
        cb_price_limit_bps: 500, // 5% bands
        fat_finger_bps: 100_000,
        cb_halt_threshold_bps: 100_000,
        ..permissive_config()
    };
    let core = started_core(config, [product()]);
    for user in 1..=3 {
        core.deposit(user, 10_000_000 * P);
    }
    submit_ok(&core, limit(2, Side::Sell, 100, 1));
    submit_ok(&core, limit(1, Side::Buy, 100, 1));

    // Buy at the +5% limit is blocked; a sell at that price is admitted.
    assert_eq!(
        submit_rejected(&core, limit(1, Side::Buy, 105, 1)),
        RejectReason::CircuitLimit { side: Side::Buy }
    );
    submit_ok(&core, limit(3, Side::Sell, 105, 1));
    core.graceful_shutdown();
}

#[test]
fn test_admin_market_halt() {
    let core = started_core(permissive_config(), [product()]);
    core.deposit(1, 1_000_000 * P);
    core.services()
        .breakers
        .lock()
        .unwrap()
        .halt_market(0, dexcore::current_time_micros());
    assert_eq!(
        submit_rejected(&core, limit(1, Side::Buy, 100, 1)),
        RejectReason::CircuitHalted
    );
    core.services().breakers.lock().unwrap().resume_market();
    submit_ok(&core, limit(1, Side::Buy, 100, 1));
    core.graceful_shutdown();
}

#[test]
fn test_reduce_only_enforcement() {
    let core = started_core(permissive_config(), [product()]);
    for user in 1..=2 {
        core.deposit(user, 1_000_000 * P);
    }
    // No position yet: reduce-only cannot open one.
    let mut request = limit(1, Side::Buy, 100, 1);
    request.reduce_only = true;
    assert_eq!(
        submit_rejected(&core, request),
        RejectReason::ReduceOnlyWouldExtend
    );

    // Long 1: a reduce-only sell of exactly 1 is admitted.
    submit_ok(&core, limit(2, Side::Sell, 100, 1));
    submit_ok(&core, limit(1, Side::Buy, 100, 1));
    let mut request = limit(1, Side::Sell, 100, 1);
    request.reduce_only = true;
    submit_ok(&core, request);
    core.graceful_shutdown();
}

#[test]
fn test_trade_sequence_ordering() {
    let core = started_core(permissive_config(), [product()]);
    for user in 1..=4 {
        core.deposit(user, 10_000_000 * P);
    }
    let last_trade_seq = Arc::new(AtomicU64::new(0));
    let violations = Arc::new(AtomicU64::new(0));
    {
        let last = Arc::clone(&last_trade_seq);
        let bad = Arc::clone(&violations);
        core.services().add_record_listener(Arc::new(move |record| {
            if matches!(record.payload, EventPayload::Trade { .. }) {
                let prev = last.swap(record.seq, Ordering::SeqCst);
                if prev >= record.seq {
                    bad.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }

    submit_ok(&core, limit(1, Side::Sell, 100, 1));
    submit_ok(&core, limit(2, Side::Sell, 100, 1));
    submit_ok(&core, limit(3, Side::Buy, 100, 1)); // trade A
    submit_ok(&core, limit(4, Side::Buy, 100, 1)); // trade B
    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert!(last_trade_seq.load(Ordering::SeqCst) > 0);
    core.graceful_shutdown();
}

#[test]
fn test_deposit_withdraw_and_get_state() {
    let core = started_core(permissive_config(), [product()]);
    assert!(core.deposit(1, 1_000 * P));
    assert!(core.withdraw(1, 400 * P));
    assert!(!core.withdraw(1, 601 * P));

    let state = core.get_state(1);
    assert_eq!(state.account.account.balance, 600 * P as i128);
    assert!(state.open_orders.is_empty());
    core.graceful_shutdown();
}

#[test]
fn test_liquidation_end_to_end() {
    let config = CoreConfig {
        insurance_contrib_bps: 2_000,
        ..permissive_config()
    };
    let core = started_core(config, [product_with_fees()]);
    // Deep accounts for the market, a thin one for the victim.
    core.deposit(1, 10_000_000 * P);
    core.deposit(2, 10_000_000 * P);
    core.deposit(3, 12 * P);

    let liquidations = Arc::new(Mutex::new(Vec::new()));
    {
        let sink = Arc::clone(&liquidations);
        core.services().add_record_listener(Arc::new(move |record| {
            if let EventPayload::Liquidation { user, .. } = &record.payload {
                sink.lock().unwrap().push(*user);
            }
        }));
    }

    // User 3 goes long 1 at 100 (margin 10, plus taker fee).
    submit_ok(&core, limit(1, Side::Sell, 100, 1));
    submit_ok(&core, limit(3, Side::Buy, 100, 1));

    // Bids rest below so the close-out has a counterparty, then the mark
    // collapses to 80: equity goes under maintenance and user 3 is closed.
    submit_ok(&core, limit(2, Side::Buy, 80, 5));
    submit_ok(&core, limit(1, Side::Sell, 80, 1));

    assert_eq!(liquidations.lock().unwrap().as_slice(), &[3]);
    let state = core.get_state(3);
    assert!(state.account.positions.is_empty(), "position closed");
    assert!(state.account.account.balance >= 0, "no negative balance survives");
    assert!(core.verify_replay().expect("replay runs"));
    core.graceful_shutdown();
}
