//! Property tests: monetary conservation over random trade streams and
//! book integrity over random order streams.

use crate::common::*;
use dexcore::prelude::*;
use dexcore::types::money::notional;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

const USERS: &[UserId] = &[1, 2, 3, 4];
const DEPOSIT: u64 = 100_000_000 * P;
const INSURANCE_BPS: u32 = 2_000;

#[derive(Debug, Clone)]
struct TradeSpec {
    maker: usize,
    taker: usize,
    taker_buys: bool,
    price_units: u64,
    qty_lots: u64,
}

fn trade_spec() -> impl Strategy<Value = TradeSpec> {
    (0..USERS.len(), 0..USERS.len() - 1, any::<bool>(), 50u64..150, 1u64..10).prop_map(
        |(maker, taker_offset, taker_buys, price_units, qty_lots)| {
            // Offset guarantees maker != taker.
            let taker = (maker + 1 + taker_offset) % USERS.len();
            TradeSpec {
                maker,
                taker,
                taker_buys,
                price_units,
                qty_lots,
            }
        },
    )
}

fn build_trade(id: u64, spec: &TradeSpec, fees: &FeeSchedule) -> Trade {
    let price = spec.price_units * P;
    let quantity = spec.qty_lots * Q;
    let value = notional(price, quantity, 1);
    Trade {
        trade_id: id,
        symbol: "XAU-USD".to_string(),
        maker_order_id: id * 2,
        taker_order_id: id * 2 + 1,
        maker_user: USERS[spec.maker],
        taker_user: USERS[spec.taker],
        taker_side: if spec.taker_buys { Side::Buy } else { Side::Sell },
        price,
        quantity,
        maker_fee: fees.calculate_fee(value, true),
        taker_fee: fees.calculate_fee(value, false),
        ts_us: id,
    }
}

fn settle_all(specs: &[TradeSpec], ledger: Option<&mut Ledger>) -> AccountManager {
    let catalog = Arc::new(ProductCatalog::with_products([product_with_fees()]));
    let fees = product_with_fees().fee_schedule();
    let mut manager = AccountManager::new(catalog, INSURANCE_BPS);
    for user in USERS {
        manager.deposit(*user, DEPOSIT);
    }
    let mut ledger = ledger;
    for (i, spec) in specs.iter().enumerate() {
        let trade = build_trade(i as u64 + 1, spec, &fees);
        let settlement = manager.apply_trade(&trade, trade.ts_us);
        if let Some(ledger) = ledger.as_deref_mut() {
            ledger.post(&EventRecord {
                seq: i as u64,
                ts_us: trade.ts_us,
                payload: EventPayload::Trade {
                    trade: trade.clone(),
                    maker_realized: settlement.maker.realized_pnl,
                    taker_realized: settlement.taker.realized_pnl,
                },
            });
            if settlement.insurance_contribution > 0 {
                ledger.post(&EventRecord {
                    seq: i as u64,
                    ts_us: trade.ts_us,
                    payload: EventPayload::InsuranceContribution {
                        amount: settlement.insurance_contribution as i128,
                        balance: settlement.insurance_balance,
                    },
                });
            }
            assert!(ledger.verify_balance(), "ledger unbalanced after trade {i}");
        }
    }
    manager
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Conservation: user wealth plus exchange sinks equals deposits, to
    /// the micro-unit, for any trade stream.
    #[test]
    fn prop_conservation_over_random_trades(specs in proptest::collection::vec(trade_spec(), 1..40)) {
        let mut ledger = Ledger::new();
        let mut manager = settle_all(&specs, Some(&mut ledger));
        manager.update_all_pnl();

        let wealth: i128 = USERS
            .iter()
            .map(|u| {
                let a = manager.account(*u);
                a.balance + a.margin_used + a.unrealized_pnl
            })
            .sum();
        let total = wealth + manager.fee_revenue() + manager.insurance_balance();
        prop_assert_eq!(total, USERS.len() as i128 * DEPOSIT as i128);

        // The two sides of every trade cancel in aggregate position.
        let net: i64 = USERS.iter().map(|u| manager.position_size(*u, "XAU-USD")).sum();
        prop_assert_eq!(net, 0);
    }

    /// Replay determinism: settling the same stream twice produces
    /// identical state digests.
    #[test]
    fn prop_settlement_is_deterministic(specs in proptest::collection::vec(trade_spec(), 1..30)) {
        let a = settle_all(&specs, None);
        let b = settle_all(&specs, None);
        prop_assert_eq!(a.state_digest(), b.state_digest());
    }

    /// Book integrity: random limit-order streams never violate the book
    /// invariants, price bounds, or self-trade prevention.
    #[test]
    fn prop_book_invariants_hold(
        orders in proptest::collection::vec(
            (1u64..5, any::<bool>(), 90u64..111, 1u64..5),
            1..60,
        )
    ) {
        let mut book = OrderBook::new(product(), Arc::new(AtomicU64::new(1)));
        for (i, (user, is_buy, price_units, qty_lots)) in orders.iter().enumerate() {
            let side = if *is_buy { Side::Buy } else { Side::Sell };
            let order = Order {
                id: i as u64 + 1,
                symbol: "XAU-USD".to_string(),
                user: *user,
                side,
                kind: OrderKind::Limit,
                price: price_units * P,
                stop_price: 0,
                quantity: qty_lots * Q,
                filled: 0,
                status: OrderStatus::New,
                flags: OrderFlags::empty(),
                client_tag: None,
                created_ts_us: i as u64,
                updated_ts_us: i as u64,
            };
            let limit_price = order.price;
            let result = book.submit(order, i as u64);
            prop_assert!(result.reject.is_none());
            for trade in &result.trades {
                prop_assert_ne!(trade.maker_user, trade.taker_user);
                // Takers never trade through their limit.
                match trade.taker_side {
                    Side::Buy => prop_assert!(trade.price <= limit_price),
                    Side::Sell => prop_assert!(trade.price >= limit_price),
                }
            }
            prop_assert!(book.check_invariants().is_ok());
        }
    }
}
