//! Engine wiring: discovery, restore and settlement

use crate::common::{market, Desk, StaticSource, WINDOW};
use chrono::Utc;
use poly_snipe::config::{Config, ExecutionMode, StrategyKind};
use poly_snipe::engine::Engine;
use poly_snipe::market::{window_start, Outcome, Symbol};
use poly_snipe::store::{ExitReason, LedgerStore, STATE_FILE};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_example_config_loads() {
    let config = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml.example")).unwrap();
    assert_eq!(config.gateway.mode, ExecutionMode::Paper);
    assert_eq!(config.strategy.kind, StrategyKind::BuyOnce);
    assert_eq!(config.markets.symbols.len(), 4);
}

#[tokio::test]
async fn test_refresh_starts_one_monitor_per_market() {
    let desk = Desk::new().await;
    let source = Arc::new(StaticSource::default());
    let current = market(Symbol::Btc, window_start(Utc::now()).timestamp());
    source.list(&current, None);

    let engine = Engine::new(
        Config::default(),
        desk.gateway.clone(),
        source,
        desk.store.clone(),
    );
    engine.refresh().await;
    engine.refresh().await;

    assert_eq!(engine.monitored().await, vec![current.condition_id.clone()]);
    assert!(engine.registry().get(&current.condition_id).await.is_some());
}

#[tokio::test]
async fn test_restored_position_settles_on_resolution() {
    let desk = Desk::new().await;
    let old = market(Symbol::Eth, WINDOW);
    desk.executor
        .enter(&old, Outcome::Down, dec!(0.98), dec!(10), &desk.risk, Utc::now())
        .await
        .unwrap();

    let source = Arc::new(StaticSource::default());
    source.list(&old, Some(Outcome::Down));
    let engine = Engine::new(
        Config::default(),
        desk.gateway.clone(),
        source,
        desk.store.clone(),
    );

    engine.restore().await;
    assert_eq!(engine.monitored().await, vec![old.condition_id.clone()]);

    engine.poll_resolutions().await;
    settled(&desk, &old.condition_id).await;
    assert_eq!(engine.monitored().await, vec![old.condition_id.clone()]);

    // archived on the poll after the ledger shows it settled
    engine.poll_resolutions().await;
    let trade = &desk.store.trades().await[0];
    assert_eq!(trade.exit_reason, ExitReason::Resolution);
    assert_eq!(trade.realized_pnl, dec!(0.2));
    assert!(desk.store.claim(&old.condition_id).await.is_some());
    assert!(engine.monitored().await.is_empty());
    assert!(engine.registry().get(&old.condition_id).await.is_none());

    engine.shutdown().await.unwrap();
    assert!(engine.executor().is_halted());
}

async fn settled(desk: &Desk, condition_id: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while desk.store.position(condition_id).await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn subscribers(desk: &Desk, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while desk.gateway.paper.tick_subscribers() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_one_market_data_subscription_follows_monitored_markets() {
    let desk = Desk::new().await;
    let old = market(Symbol::Eth, WINDOW);
    desk.executor
        .enter(&old, Outcome::Up, dec!(0.98), dec!(10), &desk.risk, Utc::now())
        .await
        .unwrap();
    let source = Arc::new(StaticSource::default());
    source.list(&old, None);
    let current = market(Symbol::Btc, window_start(Utc::now()).timestamp());
    source.list(&current, None);

    let engine = Engine::new(
        Config::default(),
        desk.gateway.clone(),
        source.clone(),
        desk.store.clone(),
    );
    engine.restore().await;
    subscribers(&desk, 1).await;

    // new window: the subscription is replaced, not added to
    engine.refresh().await;
    engine.refresh().await;
    subscribers(&desk, 1).await;

    source.list(&old, Some(Outcome::Up));
    engine.poll_resolutions().await;
    settled(&desk, &old.condition_id).await;
    engine.poll_resolutions().await;
    assert_eq!(engine.monitored().await, vec![current.condition_id.clone()]);
    subscribers(&desk, 1).await;

    engine.shutdown().await.unwrap();
    subscribers(&desk, 0).await;
}

#[tokio::test]
async fn test_failed_settlement_is_retried() {
    let desk = Desk::new().await;
    let old = market(Symbol::Sol, WINDOW);
    desk.executor
        .enter(&old, Outcome::Down, dec!(0.98), dec!(10), &desk.risk, Utc::now())
        .await
        .unwrap();
    let source = Arc::new(StaticSource::default());
    source.list(&old, Some(Outcome::Down));
    let engine = Engine::new(
        Config::default(),
        desk.gateway.clone(),
        source,
        desk.store.clone(),
    );
    engine.restore().await;

    // a directory in place of state.json makes every ledger write fail
    let state = desk.dir.path().join(STATE_FILE);
    tokio::fs::remove_file(&state).await.unwrap();
    tokio::fs::create_dir(&state).await.unwrap();

    engine.poll_resolutions().await;
    settled(&desk, &old.condition_id).await;
    engine.poll_resolutions().await;
    assert!(engine.registry().get(&old.condition_id).await.is_some());

    tokio::fs::remove_dir(&state).await.unwrap();
    engine.poll_resolutions().await;
    assert!(engine.registry().get(&old.condition_id).await.is_none());
    assert!(engine.monitored().await.is_empty());

    let reopened = LedgerStore::open(desk.dir.path()).await.unwrap();
    assert!(reopened.position(&old.condition_id).await.is_none());
    assert!(reopened.claim(&old.condition_id).await.is_some());
    assert_eq!(reopened.trades().await.len(), 1);
}
