//! Shared fixtures for the integration suite.

use dexcore::prelude::*;

/// One quote unit in micro-units.
pub const P: u64 = PRICE_SCALE;
/// One contract in micro-lots.
pub const Q: u64 = QTY_SCALE;

/// A gold contract with 10% initial / 5% maintenance margin and no fees.
pub fn product() -> Product {
    Product {
        symbol: "XAU-USD".to_string(),
        tick_size: P,
        lot_size: Q,
        contract_size: 1,
        margin_rate_bps: 1_000,
        maintenance_margin_rate_bps: 500,
        maker_fee_bps: 0,
        taker_fee_bps: 0,
        min_notional: 0,
        min_fee: 0,
        active: true,
        hedge_symbol: None,
    }
}

/// Same contract with 2 bps maker / 5 bps taker fees.
pub fn product_with_fees() -> Product {
    Product {
        maker_fee_bps: 2,
        taker_fee_bps: 5,
        ..product()
    }
}

/// A config with wide breaker/fat-finger bands so matching tests are not
/// tripped by admission gates they are not exercising.
pub fn permissive_config() -> CoreConfig {
    CoreConfig {
        max_position_size: 1_000 * Q,
        daily_loss_limit: 1_000_000 * P,
        max_orders_per_second: 1_000,
        fat_finger_bps: 100_000,
        cb_price_limit_bps: 100_000,
        cb_halt_threshold_bps: 100_000,
        ..CoreConfig::default()
    }
}

/// Build and start a core over the given products.
pub fn started_core(
    config: CoreConfig,
    products: impl IntoIterator<Item = Product>,
) -> ExchangeCore {
    let mut core = build_core(config, products).expect("core builds");
    core.start();
    core
}

/// A limit-order request.
pub fn limit(user: UserId, side: Side, price_units: u64, qty_lots: u64) -> OrderRequest {
    OrderRequest {
        symbol: "XAU-USD".to_string(),
        user,
        side,
        kind: OrderKind::Limit,
        price: price_units * P,
        stop_price: 0,
        quantity: qty_lots * Q,
        reduce_only: false,
        client_tag: None,
    }
}

/// Submit and expect acceptance; returns the order and its trades.
pub fn submit_ok(core: &ExchangeCore, request: OrderRequest) -> (Order, Vec<Trade>) {
    match core.submit_order(request).expect("command completes") {
        CommandResult::Submitted { order, trades } => (order, trades),
        other => panic!("expected acceptance, got {other:?}"),
    }
}

/// Submit and expect rejection; returns the reason.
pub fn submit_rejected(core: &ExchangeCore, request: OrderRequest) -> RejectReason {
    match core.submit_order(request).expect("command completes") {
        CommandResult::Rejected(reason) => reason,
        other => panic!("expected rejection, got {other:?}"),
    }
}
