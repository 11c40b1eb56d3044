//! Market discovery against a mocked Gamma API

use chrono::{TimeZone, Utc};
use poly_snipe::config::SymbolConfig;
use poly_snipe::market::{
    GammaClient, GammaConfig, MarketError, MarketRegistry, MarketSource, MarketState, Outcome,
    Symbol,
};
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SLUG: &str = "btc-updown-15m-1767638700";

fn gamma(server: &MockServer) -> GammaClient {
    GammaClient::with_config(GammaConfig {
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn listing(closed: bool, prices: &str) -> serde_json::Value {
    json!({
        "slug": SLUG,
        "conditionId": "0xbtc1767638700",
        "outcomes": "[\"Up\", \"Down\"]",
        "clobTokenIds": "[\"1111\", \"2222\"]",
        "outcomePrices": prices,
        "endDate": "2026-01-05T19:00:00Z",
        "closed": closed,
    })
}

#[tokio::test]
async fn test_find_by_slug() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/markets/slug/{SLUG}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(listing(false, "[\"0.52\", \"0.48\"]")),
        )
        .mount(&server)
        .await;

    let found = gamma(&server).find_by_slug(SLUG).await.unwrap().unwrap();
    assert_eq!(found.condition_id.as_deref(), Some("0xbtc1767638700"));
    assert_eq!(found.up_token_id.as_deref(), Some("1111"));
    assert_eq!(found.down_token_id.as_deref(), Some("2222"));
    assert_eq!(found.outcome_prices, Some((dec!(0.52), dec!(0.48))));
    assert_eq!(
        found.end_time,
        Some(Utc.with_ymd_and_hms(2026, 1, 5, 19, 0, 0).unwrap())
    );
    assert_eq!(found.winner(), None);
}

#[tokio::test]
async fn test_unlisted_slug_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/slug/eth-updown-15m-1767638700"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let found = gamma(&server)
        .find_by_slug("eth-updown-15m-1767638700")
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/markets/slug/{SLUG}")))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = gamma(&server).find_by_slug(SLUG).await.unwrap_err();
    assert!(matches!(err, MarketError::Api { status: 503, .. }));
}

#[tokio::test]
async fn test_resolution_by_condition_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets"))
        .and(query_param("condition_ids", "0xbtc1767638700"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([listing(true, "[\"0\", \"1\"]")])),
        )
        .mount(&server)
        .await;

    let found = gamma(&server)
        .find_by_condition("0xbtc1767638700")
        .await
        .unwrap()
        .unwrap();
    assert!(found.closed);
    assert_eq!(found.winner(), Some(Outcome::Down));
}

#[tokio::test]
async fn test_registry_discovers_and_resolves_through_gamma() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/markets/slug/{SLUG}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(listing(false, "[\"0.5\", \"0.5\"]")),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/markets"))
        .and(query_param("condition_ids", "0xbtc1767638700"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([listing(true, "[\"1\", \"0\"]")])),
        )
        .mount(&server)
        .await;

    let registry = MarketRegistry::new(
        Arc::new(gamma(&server)),
        vec![SymbolConfig::new(Symbol::Btc), SymbolConfig::new(Symbol::Eth)],
    );
    // mid-window: the slug is the window's start
    let now = Utc.timestamp_opt(1_767_638_700 + 420, 0).unwrap();

    let activated = registry.refresh(now).await;
    assert_eq!(activated.len(), 1);
    let market = &activated[0];
    assert_eq!(market.symbol, Symbol::Btc);
    assert_eq!(market.state, MarketState::Active);
    assert_eq!(market.resolution_time.timestamp(), 1_767_639_600);
    assert_eq!(
        registry.route("2222").await,
        Some((market.condition_id.clone(), Outcome::Down))
    );
    assert!(registry.refresh(now).await.is_empty());

    let after = Utc.timestamp_opt(1_767_639_600 + 5, 0).unwrap();
    assert_eq!(registry.retire_expired(after).await, vec![market.condition_id.clone()]);
    assert_eq!(
        registry.poll_resolutions().await,
        vec![(market.condition_id.clone(), Outcome::Up)]
    );
}
