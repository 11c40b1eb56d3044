//! Trading scenarios driven through the market monitor

use crate::common::{at, market, Desk, RecordingGateway, WINDOW};
use chrono::Utc;
use poly_snipe::claim::ClaimScheduler;
use poly_snipe::config::{ClaimConfig, ExecutorConfig};
use poly_snipe::engine::MarketEvent;
use poly_snipe::executor::{ExecError, OrderEvent, OrderExecutor};
use poly_snipe::gateway::{AckStatus, ExchangeGateway};
use poly_snipe::market::{Outcome, Symbol};
use poly_snipe::store::{Attribution, ClaimState, ExitReason, FillEffect, PositionState};
use poly_snipe::strategy::Phase;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_buy_waits_for_band_and_final_window() {
    let desk = Desk::new().await;
    let mut monitor = desk.monitor(market(Symbol::Btc, WINDOW));

    // plenty of time left: nothing fires whatever the price
    for ask in [dec!(1.00), dec!(0.99), dec!(0.985)] {
        desk.tick(&mut monitor, Outcome::Up, ask - dec!(0.01), ask, 600)
            .await;
        assert_eq!(monitor.phase(), Phase::Watching);
    }

    // inside the final window but above the band
    desk.tick(&mut monitor, Outcome::Up, dec!(0.99), dec!(1.00), 150)
        .await;
    assert_eq!(monitor.phase(), Phase::Watching);
    assert_eq!(desk.gateway.orders_placed(), 0);

    desk.tick(&mut monitor, Outcome::Up, dec!(0.975), dec!(0.985), 140)
        .await;
    assert_eq!(monitor.phase(), Phase::Holding);

    let position = desk
        .store
        .position(&monitor.market().condition_id)
        .await
        .unwrap();
    assert_eq!(position.state, PositionState::Open);
    assert_eq!(position.entry_price, dec!(0.985));
    assert_eq!(position.size, dec!(10));
    assert_eq!(desk.gateway.orders_placed(), 1);
}

#[tokio::test]
async fn test_target_sell_books_profit() {
    let desk = Desk::new().await;
    let mut monitor = desk.monitor(market(Symbol::Eth, WINDOW));

    desk.tick(&mut monitor, Outcome::Up, dec!(0.97), dec!(0.98), 120)
        .await;
    assert_eq!(monitor.phase(), Phase::Holding);

    desk.tick(&mut monitor, Outcome::Up, dec!(0.998), dec!(0.999), 60)
        .await;
    assert_eq!(monitor.phase(), Phase::Sold);

    let trades = desk.store.trades().await;
    assert_eq!(trades.len(), 1);
    let trade = &trades[0];
    assert_eq!(trade.exit_reason, ExitReason::StrategyTarget);
    assert_eq!(trade.attribution, Attribution::Strategy);
    assert_eq!(trade.realized_pnl, dec!(0.18));
    assert_eq!(desk.store.cash().await, dec!(1000.18));
    assert!(desk.store.positions().await.is_empty());
}

#[tokio::test]
async fn test_stop_loss_is_a_risk_exit() {
    let desk = Desk::new().await;
    let mut monitor = desk.monitor(market(Symbol::Sol, WINDOW));

    desk.tick(&mut monitor, Outcome::Down, dec!(0.97), dec!(0.98), 120)
        .await;
    assert_eq!(monitor.phase(), Phase::Holding);

    desk.tick(&mut monitor, Outcome::Down, dec!(0.92), dec!(0.93), 90)
        .await;
    assert_eq!(monitor.phase(), Phase::Sold);

    let trade = &desk.store.trades().await[0];
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert_eq!(trade.attribution, Attribution::Risk);
    assert!(trade.realized_pnl < Decimal::ZERO);

    // the market stays traded for the rest of its window
    desk.tick(&mut monitor, Outcome::Down, dec!(0.97), dec!(0.98), 60)
        .await;
    assert_eq!(monitor.phase(), Phase::Sold);
    assert_eq!(desk.gateway.bought(&monitor.market().condition_id), dec!(10));
}

#[tokio::test]
async fn test_resolution_win_is_claimed_on_next_sweep() {
    let desk = Desk::new().await;
    let mut monitor = desk.monitor(market(Symbol::Xrp, WINDOW));
    let cid = monitor.market().condition_id.clone();

    desk.tick(&mut monitor, Outcome::Up, dec!(0.975), dec!(0.985), 45)
        .await;
    assert_eq!(monitor.phase(), Phase::Holding);

    let resolved_at = at(monitor.market(), 0);
    monitor.handle_event(MarketEvent::Deadline, resolved_at).await;
    monitor
        .handle_event(MarketEvent::Resolved(Outcome::Up), resolved_at)
        .await;
    assert_eq!(monitor.phase(), Phase::ResolvedWin);
    assert!(monitor.is_finished());

    let claim = desk.store.claim(&cid).await.unwrap();
    assert_eq!(claim.status, ClaimState::Pending);
    assert_eq!(claim.expected_payout, dec!(10));

    let scheduler = ClaimScheduler::new(
        desk.gateway.clone(),
        desk.store.clone(),
        ClaimConfig {
            spacing_secs: 0,
            ..Default::default()
        },
    );
    let cash_before = desk.store.cash().await;
    let sweep = scheduler.run_once(resolved_at).await;
    assert_eq!(sweep.confirmed, 1);
    assert!(desk.store.is_claim_confirmed(&cid).await);
    assert_eq!(desk.store.cash().await - cash_before, dec!(10));

    let trade = &desk.store.trades().await[0];
    assert_eq!(trade.exit_reason, ExitReason::Resolution);
    assert_eq!(trade.realized_pnl, dec!(0.15));
}

#[tokio::test]
async fn test_resolution_loss_closes_at_zero() {
    let desk = Desk::new().await;
    let mut monitor = desk.monitor(market(Symbol::Btc, WINDOW));
    let cid = monitor.market().condition_id.clone();

    desk.tick(&mut monitor, Outcome::Up, dec!(0.975), dec!(0.985), 45)
        .await;
    monitor
        .handle_event(MarketEvent::Resolved(Outcome::Down), at(monitor.market(), 0))
        .await;

    assert_eq!(monitor.phase(), Phase::ResolvedLoss);
    assert!(desk.store.claim(&cid).await.is_none());
    let trade = &desk.store.trades().await[0];
    assert_eq!(trade.exit_price, Decimal::ZERO);
    assert_eq!(trade.realized_pnl, dec!(-9.85));
}

#[tokio::test]
async fn test_concurrent_buys_share_one_slot() {
    let desk = Desk::with_gateway(RecordingGateway::new(dec!(1000)).gated()).await;
    let m = market(Symbol::Btc, WINDOW);
    let now = at(&m, 60);

    let first = {
        let executor = desk.executor.clone();
        let risk = desk.risk.clone();
        let m = m.clone();
        tokio::spawn(async move {
            executor
                .enter(&m, Outcome::Up, dec!(0.98), dec!(10), &risk, now)
                .await
        })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while !desk.executor.slot_busy(&m.condition_id) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let second = desk
        .executor
        .enter(&m, Outcome::Down, dec!(0.98), dec!(10), &desk.risk, now)
        .await;
    assert!(matches!(second, Err(ExecError::SlotBusy(_))));

    desk.gateway.release(1);
    let handle = first.await.unwrap().unwrap();
    assert!(matches!(handle.effect, FillEffect::EntryOpened(_)));
    assert_eq!(desk.gateway.orders_placed(), 1);
    assert!(!desk.executor.slot_busy(&m.condition_id));

    let position = desk.store.position(&m.condition_id).await.unwrap();
    assert_eq!(position.outcome, Outcome::Up);
}

#[tokio::test]
async fn test_resting_buy_fills_on_sweep() {
    let desk = Desk::new().await;
    let mut monitor = desk.monitor(market(Symbol::Eth, WINDOW));
    let cid = monitor.market().condition_id.clone();

    // the simulated book is above our limit so the buy rests
    desk.gateway
        .tick(&monitor.market().up_token_id, dec!(0.97), dec!(0.995));
    monitor
        .handle_event(
            MarketEvent::Tick {
                outcome: Outcome::Up,
                quote: poly_snipe::market::Quote {
                    best_bid: Some(dec!(0.97)),
                    best_ask: Some(dec!(0.98)),
                },
            },
            at(monitor.market(), 100),
        )
        .await;
    assert_eq!(monitor.phase(), Phase::BuyPending);
    assert!(desk.executor.slot_busy(&cid));

    // the book comes down through our price
    desk.gateway
        .tick(&monitor.market().up_token_id, dec!(0.97), dec!(0.98));
    let events: Vec<OrderEvent> = desk.executor.sweep(at(monitor.market(), 95)).await;
    assert_eq!(events.len(), 1);
    for event in events {
        monitor
            .handle_event(MarketEvent::Order(event), at(monitor.market(), 95))
            .await;
    }
    assert_eq!(monitor.phase(), Phase::Holding);
    assert!(!desk.executor.slot_busy(&cid));
}

/// Gated desk whose executor waits `drain_secs` for in-flight orders at shutdown
async fn stopping_desk(drain_secs: u64) -> (Desk, Arc<OrderExecutor>) {
    let desk = Desk::with_gateway(RecordingGateway::new(dec!(1000)).gated()).await;
    let executor = Arc::new(OrderExecutor::new(
        desk.gateway.clone(),
        desk.store.clone(),
        ExecutorConfig {
            shutdown_drain_secs: drain_secs,
            ..Default::default()
        },
    ));
    (desk, executor)
}

#[tokio::test]
async fn test_shutdown_waits_for_order_in_flight() {
    let (desk, executor) = stopping_desk(10).await;
    let m = market(Symbol::Btc, WINDOW);
    // the book is above our limit, so once sent the buy would rest
    desk.gateway.tick(&m.up_token_id, dec!(0.97), dec!(0.995));

    let entry = {
        let executor = executor.clone();
        let risk = desk.risk.clone();
        let m = m.clone();
        tokio::spawn(async move {
            executor
                .enter(&m, Outcome::Up, dec!(0.98), dec!(10), &risk, at(&m, 60))
                .await
        })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while !executor.slot_busy(&m.condition_id) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let stopping = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.shutdown(Utc::now()).await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while !executor.is_halted() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    desk.gateway.release(1);
    let handle = entry.await.unwrap().unwrap();
    stopping.await.unwrap();

    assert_eq!(handle.effect, FillEffect::EntryVoid);
    assert!(!handle.is_working());
    let on_exchange = desk.gateway.order_status(&handle.exchange_id).await.unwrap();
    assert_eq!(on_exchange.status, AckStatus::Cancelled);
    assert!(desk.store.open_orders().await.is_empty());
    assert!(desk.store.position(&m.condition_id).await.is_none());
    assert!(!executor.slot_busy(&m.condition_id));
}

#[tokio::test]
async fn test_order_acknowledged_after_shutdown_cancels_itself() {
    let (desk, executor) = stopping_desk(0).await;
    let m = market(Symbol::Eth, WINDOW);
    desk.gateway.tick(&m.down_token_id, dec!(0.97), dec!(0.995));

    let entry = {
        let executor = executor.clone();
        let risk = desk.risk.clone();
        let m = m.clone();
        tokio::spawn(async move {
            executor
                .enter(&m, Outcome::Down, dec!(0.98), dec!(10), &risk, at(&m, 60))
                .await
        })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while !executor.slot_busy(&m.condition_id) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    // shutdown gives up waiting and leaves the unsent order to its submitter
    let events = executor.shutdown(Utc::now()).await;
    assert!(events.is_empty());
    assert_eq!(desk.store.open_orders().await.len(), 1);
    assert_eq!(
        desk.store.position(&m.condition_id).await.unwrap().state,
        PositionState::PendingEntry
    );

    desk.gateway.release(1);
    let handle = entry.await.unwrap().unwrap();
    assert_eq!(handle.effect, FillEffect::EntryVoid);
    let on_exchange = desk.gateway.order_status(&handle.exchange_id).await.unwrap();
    assert_eq!(on_exchange.status, AckStatus::Cancelled);
    assert!(desk.store.open_orders().await.is_empty());
    assert!(desk.store.position(&m.condition_id).await.is_none());
    assert_eq!(desk.gateway.orders_placed(), 1);
}
