//! Ledger durability and invariants under concurrency

use crate::common::{buy_once, market, Desk, WINDOW};
use chrono::{Duration, Utc};
use poly_snipe::engine::MarketMonitor;
use poly_snipe::executor::{ExecError, OrderExecutor};
use poly_snipe::gateway::Side;
use poly_snipe::market::{Outcome, Symbol};
use poly_snipe::store::{
    ExitReason, FillEffect, LedgerStore, OrderPurpose, OrderRecord, OrderStatus, PositionState,
    StoreError,
};
use poly_snipe::strategy::{Phase, PriceHistory};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_restart_reproduces_ledger() {
    let desk = Desk::new().await;
    let now = Utc::now();
    let btc = market(Symbol::Btc, WINDOW);
    let eth = market(Symbol::Eth, WINDOW);

    desk.executor
        .enter(&btc, Outcome::Up, dec!(0.98), dec!(10), &desk.risk, now)
        .await
        .unwrap();
    desk.gateway.tick(&btc.up_token_id, dec!(0.995), dec!(0.997));
    let handle = desk
        .executor
        .exit(&btc.condition_id, ExitReason::StrategyTarget, dec!(0.995), now)
        .await
        .unwrap();
    assert!(matches!(handle.effect, FillEffect::Closed(_)));

    desk.executor
        .enter(&eth, Outcome::Down, dec!(0.985), dec!(20), &desk.risk, now)
        .await
        .unwrap();
    desk.store.mark(&eth.condition_id, dec!(0.99)).await.unwrap();

    let trades = desk.store.trades().await;
    let summary = desk.store.summary().await;
    let positions = desk.store.positions().await;
    let cash = desk.store.cash().await;
    assert_eq!(summary.realized_pnl, dec!(0.15));

    let reopened = Arc::new(LedgerStore::open(desk.dir.path()).await.unwrap());
    assert_eq!(reopened.trades().await, trades);
    assert_eq!(reopened.summary().await, summary);
    assert_eq!(reopened.positions().await, positions);
    assert_eq!(reopened.cash().await, cash);

    // the traded set survives too
    let executor = OrderExecutor::new(
        desk.gateway.clone(),
        reopened.clone(),
        Default::default(),
    );
    let again = executor
        .enter(&btc, Outcome::Up, dec!(0.98), dec!(10), &desk.risk, now)
        .await;
    assert!(matches!(
        again,
        Err(ExecError::Store(StoreError::AlreadyTraded(_)))
    ));

    let position = reopened.position(&eth.condition_id).await.unwrap();
    assert_eq!(position.high_water, dec!(0.99));
    let monitor = MarketMonitor::new(
        eth,
        Box::new(buy_once()),
        PriceHistory::new(16),
        reopened,
        Arc::new(executor),
        desk.risk.clone(),
    )
    .resume(Some(&position));
    assert_eq!(monitor.phase(), Phase::Holding);
}

#[tokio::test]
async fn test_unsent_entry_is_rolled_back_after_restart() {
    let desk = Desk::new().await;
    let m = market(Symbol::Sol, WINDOW);
    let submitted_at = Utc::now() - Duration::seconds(120);

    // crash between the write-ahead record and the gateway call
    desk.store
        .begin_entry(
            &m,
            Outcome::Up,
            dec!(0.98),
            dec!(10),
            desk.risk.stop_loss_price(),
            desk.risk.limits(),
            submitted_at,
        )
        .await
        .unwrap();
    desk.store
        .record_order(OrderRecord {
            id: Uuid::new_v4(),
            exchange_id: None,
            condition_id: m.condition_id.clone(),
            token_id: m.up_token_id.clone(),
            purpose: OrderPurpose::Entry,
            side: Side::Buy,
            outcome: Outcome::Up,
            price: dec!(0.98),
            size: dec!(10),
            filled: Decimal::ZERO,
            avg_price: None,
            fees: Decimal::ZERO,
            submitted_at,
            status: OrderStatus::Pending,
            retries: 0,
            last_error: None,
        })
        .await
        .unwrap();

    let store = Arc::new(LedgerStore::open(desk.dir.path()).await.unwrap());
    assert_eq!(
        store.position(&m.condition_id).await.unwrap().state,
        PositionState::PendingEntry
    );
    let executor = OrderExecutor::new(desk.gateway.clone(), store.clone(), Default::default());
    executor.recover(Utc::now()).await;

    assert!(store.position(&m.condition_id).await.is_none());
    assert_eq!(store.cash().await, dec!(1000));
    assert_eq!(desk.gateway.orders_placed(), 0);

    // the market can be entered again
    let handle = executor
        .enter(&m, Outcome::Up, dec!(0.98), dec!(10), &desk.risk, Utc::now())
        .await
        .unwrap();
    assert!(matches!(handle.effect, FillEffect::EntryOpened(_)));
}

#[tokio::test]
async fn test_high_water_mark_only_rises() {
    let desk = Desk::new().await;
    let m = market(Symbol::Xrp, WINDOW);
    desk.executor
        .enter(&m, Outcome::Up, dec!(0.95), dec!(10), &desk.risk, Utc::now())
        .await
        .unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let mut expected = dec!(0.95);
    let mut previous = expected;
    for _ in 0..200 {
        let bid = Decimal::new(rng.gen_range(900..=1000), 3);
        let position = desk.store.mark(&m.condition_id, bid).await.unwrap();
        expected = expected.max(bid);

        assert!(position.high_water >= previous);
        assert_eq!(position.high_water, expected);
        assert_eq!(position.last_mark, Some(bid));
        previous = position.high_water;
    }

    let reopened = LedgerStore::open(desk.dir.path()).await.unwrap();
    let position = reopened.position(&m.condition_id).await.unwrap();
    assert_eq!(position.high_water, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_concurrent_orders_keep_one_position_per_market() {
    let desk = Desk::new().await;
    let markets: Vec<_> = [Symbol::Btc, Symbol::Eth, Symbol::Sol]
        .into_iter()
        .map(|s| market(s, WINDOW))
        .collect();

    let mut rng = StdRng::seed_from_u64(42);
    let plan: Vec<(usize, bool, Outcome)> = (0..60)
        .map(|_| {
            let outcome = if rng.gen_bool(0.5) {
                Outcome::Up
            } else {
                Outcome::Down
            };
            (rng.gen_range(0..markets.len()), rng.gen_bool(0.7), outcome)
        })
        .collect();

    let mut tasks = Vec::new();
    for (index, buy, outcome) in plan {
        let executor = desk.executor.clone();
        let risk = desk.risk.clone();
        let m = markets[index].clone();
        tasks.push(tokio::spawn(async move {
            let now = Utc::now();
            if buy {
                executor
                    .enter(&m, outcome, dec!(0.98), dec!(10), &risk, now)
                    .await
                    .map(|_| ())
            } else {
                executor
                    .exit(&m.condition_id, ExitReason::Manual, dec!(0.97), now)
                    .await
                    .map(|_| ())
            }
        }));
    }
    for task in tasks {
        // losing a race is an error result, never a panic
        let _ = task.await.unwrap();
    }

    let trades = desk.store.trades().await;
    for m in &markets {
        assert!(desk.gateway.bought(&m.condition_id) <= dec!(10));
        let closed = trades
            .iter()
            .filter(|t| t.condition_id == m.condition_id)
            .count();
        assert!(closed <= 1);
        assert!(!desk.executor.slot_busy(&m.condition_id));
    }

    let paper = desk.gateway.paper_balance().await;
    assert_eq!(desk.store.cash().await, paper);
}
