//! Claim queue idempotence

use crate::common::{market, Desk, WINDOW};
use chrono::Utc;
use poly_snipe::claim::{ClaimOutcome, ClaimScheduler};
use poly_snipe::config::ClaimConfig;
use poly_snipe::market::{Outcome, Symbol};
use poly_snipe::store::{LedgerStore, Settlement};
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn test_winning_market_is_claimed_once() {
    let desk = Desk::new().await;
    let m = market(Symbol::Btc, WINDOW);
    let now = Utc::now();
    desk.executor
        .enter(&m, Outcome::Up, dec!(0.98), dec!(10), &desk.risk, now)
        .await
        .unwrap();
    let settled = desk.store.resolve(&m.condition_id, Outcome::Up, now).await.unwrap();
    assert!(matches!(settled, Settlement::Won { claim: Some(_), .. }));

    let config = ClaimConfig {
        spacing_secs: 0,
        ..Default::default()
    };
    let scheduler = ClaimScheduler::new(desk.gateway.clone(), desk.store.clone(), config.clone());
    assert_eq!(scheduler.run_once(now).await.confirmed, 1);
    assert_eq!(scheduler.run_once(now).await.confirmed, 0);
    assert!(matches!(
        scheduler.force_claim(&m.condition_id).await.unwrap(),
        ClaimOutcome::AlreadyConfirmed
    ));

    // a late duplicate resolution queues nothing
    let again = desk.store.resolve(&m.condition_id, Outcome::Up, now).await.unwrap();
    assert_eq!(again, Settlement::NoPosition);

    // nor does a restart
    let reopened = Arc::new(LedgerStore::open(desk.dir.path()).await.unwrap());
    assert!(reopened.is_claim_confirmed(&m.condition_id).await);
    let restarted = ClaimScheduler::new(desk.gateway.clone(), reopened.clone(), config);
    assert_eq!(restarted.run_once(now).await.submitted, 0);

    assert_eq!(desk.gateway.claims_submitted(), 1);
    assert_eq!(reopened.cash().await, dec!(1000.2));
}
