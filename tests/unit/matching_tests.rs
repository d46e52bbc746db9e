//! End-to-end matching scenarios through the full command pipeline.

use crate::common::*;
use dexcore::prelude::*;

fn funded_core() -> ExchangeCore {
    let core = started_core(permissive_config(), [product()]);
    for user in 1..=5 {
        assert!(core.deposit(user, 10_000_000 * P));
    }
    core
}

#[test]
fn test_single_maker_single_taker() {
    let core = funded_core();
    let (maker, trades) = submit_ok(&core, limit(1, Side::Sell, 3500, 1));
    assert!(trades.is_empty());
    assert_eq!(maker.status, OrderStatus::New);

    let (taker, trades) = submit_ok(&core, limit(2, Side::Buy, 3500, 1));
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].price, 3500 * P);
    assert_eq!(trades[0].quantity, Q);
    assert_eq!(taker.status, OrderStatus::Filled);

    // Book is empty again.
    let state = core.get_state(2);
    assert_eq!(state.bbo["XAU-USD"], (None, None));
    assert_eq!(state.account.positions.len(), 1);
    assert_eq!(state.account.positions[0].size, Q as i64);
    core.graceful_shutdown();
}

#[test]
fn test_price_walk_across_levels() {
    let core = funded_core();
    submit_ok(&core, limit(1, Side::Sell, 3500, 1));
    submit_ok(&core, limit(2, Side::Sell, 3600, 1));
    submit_ok(&core, limit(3, Side::Sell, 3700, 1));

    let (order, trades) = submit_ok(&core, limit(4, Side::Buy, 3600, 2));
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].price, 3500 * P);
    assert_eq!(trades[1].price, 3600 * P);
    assert_eq!(order.status, OrderStatus::Filled);

    let state = core.get_state(4);
    assert_eq!(state.bbo["XAU-USD"], (None, Some(3700 * P)));
    core.graceful_shutdown();
}

#[test]
fn test_fok_all_or_nothing() {
    let core = funded_core();
    submit_ok(&core, limit(1, Side::Sell, 3500, 1));

    let mut fok = limit(2, Side::Buy, 3500, 5);
    fok.kind = OrderKind::Fok;
    assert_eq!(submit_rejected(&core, fok), RejectReason::FokUnfillable);

    // Maker untouched.
    let state = core.get_state(1);
    assert_eq!(state.open_orders.len(), 1);
    assert_eq!(state.open_orders[0].remaining(), Q);
    core.graceful_shutdown();
}

#[test]
fn test_post_only_never_takes() {
    let core = funded_core();
    submit_ok(&core, limit(1, Side::Sell, 3500, 5));

    let mut post = limit(2, Side::Buy, 3500, 1);
    post.kind = OrderKind::PostOnly;
    assert_eq!(submit_rejected(&core, post), RejectReason::PostOnlyWouldTake);

    let mut post = limit(2, Side::Buy, 3400, 1);
    post.kind = OrderKind::PostOnly;
    let (order, trades) = submit_ok(&core, post);
    assert!(trades.is_empty());
    assert_eq!(order.status, OrderStatus::New);
    core.graceful_shutdown();
}

#[test]
fn test_self_trade_prevention_end_to_end() {
    let core = funded_core();
    submit_ok(&core, limit(1, Side::Sell, 3500, 1));
    let (_, trades) = submit_ok(&core, limit(1, Side::Buy, 3500, 1));
    assert!(trades.is_empty());

    let state = core.get_state(1);
    // The resting sell was cancelled, the buy now rests alone.
    assert_eq!(state.open_orders.len(), 1);
    assert_eq!(state.open_orders[0].side, Side::Buy);
    assert_eq!(state.account.positions.len(), 0);
    core.graceful_shutdown();
}

#[test]
fn test_stop_limit_trigger_flow() {
    let core = funded_core();
    // Park: BUY stop 3510, limit 3515.
    let mut stop = limit(3, Side::Buy, 3515, 1);
    stop.kind = OrderKind::StopLimit;
    stop.stop_price = 3510 * P;
    let (parked, trades) = submit_ok(&core, stop);
    assert!(trades.is_empty());
    assert_eq!(parked.status, OrderStatus::New);

    // Resting sell 3510 x 2, then a buy prints 3510 and releases the stop.
    submit_ok(&core, limit(1, Side::Sell, 3510, 2));
    let (_, trades) = submit_ok(&core, limit(2, Side::Buy, 3510, 1));
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[1].price, 3510 * P);
    assert_eq!(trades[1].taker_user, 3);

    let state = core.get_state(3);
    assert_eq!(state.account.positions[0].size, Q as i64);
    core.graceful_shutdown();
}

#[test]
fn test_cancel_and_cancel_all() {
    let core = funded_core();
    let (order, _) = submit_ok(&core, limit(1, Side::Sell, 3500, 1));
    submit_ok(&core, limit(1, Side::Sell, 3600, 1));

    match core.cancel_order("XAU-USD", order.id).expect("completes") {
        CommandResult::Cancelled(cancelled) => {
            assert_eq!(cancelled.id, order.id);
            assert_eq!(cancelled.status, OrderStatus::Cancelled);
        }
        other => panic!("expected cancel, got {other:?}"),
    }
    // Cancelling again reports the terminal state.
    match core.cancel_order("XAU-USD", order.id).expect("completes") {
        CommandResult::Rejected(RejectReason::AlreadyTerminal { order_id }) => {
            assert_eq!(order_id, order.id);
        }
        other => panic!("expected AlreadyTerminal, got {other:?}"),
    }

    match core.cancel_all(1).expect("completes") {
        CommandResult::CancelledAll(count) => assert_eq!(count, 1),
        other => panic!("expected cancel-all, got {other:?}"),
    }
    assert!(core.get_state(1).open_orders.is_empty());
    core.graceful_shutdown();
}

#[test]
fn test_modify_through_pipeline() {
    let core = funded_core();
    let (order, _) = submit_ok(&core, limit(1, Side::Sell, 3600, 2));
    submit_ok(&core, limit(2, Side::Buy, 3500, 1));

    // Reprice down through the bid: executes on the replace path.
    match core
        .modify_order("XAU-USD", order.id, Some(3500 * P), None)
        .expect("completes")
    {
        CommandResult::Modified { trades, .. } => {
            assert_eq!(trades.len(), 1);
            assert_eq!(trades[0].price, 3500 * P);
        }
        other => panic!("expected modify, got {other:?}"),
    }
    core.graceful_shutdown();
}

#[test]
fn test_insufficient_margin_rejection() {
    let core = started_core(permissive_config(), [product()]);
    core.deposit(9, 10 * P); // enough for ~0.1 contracts at 3500 with 10% margin
    let reason = submit_rejected(&core, limit(9, Side::Buy, 3500, 1));
    assert!(matches!(reason, RejectReason::InsufficientMargin { .. }));
    core.graceful_shutdown();
}

#[test]
fn test_unknown_symbol_rejection() {
    let core = funded_core();
    let mut request = limit(1, Side::Buy, 3500, 1);
    request.symbol = "BTC-USD".to_string();
    assert!(matches!(
        submit_rejected(&core, request),
        RejectReason::InvalidSymbol { .. }
    ));
    core.graceful_shutdown();
}
