//! Live gateway against mocked CLOB and signer endpoints

use poly_snipe::gateway::{
    AckStatus, ApiCredentials, ClaimRequest, ClaimStatus, ClobGateway, ExchangeGateway,
    GatewayError, OrderRequest, Side, TimeInForce,
};
use poly_snipe::market::Outcome;
use rust_decimal_macros::dec;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn clob(server: &MockServer) -> ClobGateway {
    let credentials = ApiCredentials {
        api_key: "key".into(),
        secret: "c2VjcmV0".into(),
        passphrase: "pass".into(),
        address: "0xfunder".into(),
    };
    ClobGateway::new(
        server.uri(),
        "ws://127.0.0.1:9",
        server.uri(),
        credentials,
        Duration::from_secs(5),
    )
    .unwrap()
}

fn buy() -> OrderRequest {
    OrderRequest {
        condition_id: "0xbtc".into(),
        token_id: "1111".into(),
        outcome: Outcome::Up,
        side: Side::Buy,
        price: dec!(0.98),
        size: dec!(10),
        time_in_force: TimeInForce::Gtc,
    }
}

async fn mount_signer(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/orders/sign"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "salt": 1 })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_balance_is_scaled_from_base_units() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/balance-allowance"))
        .and(query_param("asset_type", "COLLATERAL"))
        .and(header_exists("POLY_SIGNATURE"))
        .and(header_exists("POLY_API_KEY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "balance": "12500000" })))
        .mount(&server)
        .await;

    let balance = clob(&server).balance().await.unwrap();
    assert_eq!(balance.available, dec!(12.5));
}

#[tokio::test]
async fn test_matched_order_is_filled() {
    let server = MockServer::start().await;
    mount_signer(&server).await;
    Mock::given(method("POST"))
        .and(path("/order"))
        .and(header_exists("POLY_SIGNATURE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "orderID": "ex-1",
            "status": "matched",
            "makingAmount": "9.8",
            "takingAmount": "10",
        })))
        .mount(&server)
        .await;

    let ack = clob(&server).place_order(&buy()).await.unwrap();
    assert_eq!(ack.exchange_id, "ex-1");
    assert_eq!(ack.status, AckStatus::Filled);
    assert_eq!(ack.avg_price, Some(dec!(0.98)));
}

#[tokio::test]
async fn test_rate_limit_carries_reset_hint() {
    let server = MockServer::start().await;
    mount_signer(&server).await;
    Mock::given(method("POST"))
        .and(path("/order"))
        .respond_with(
            ResponseTemplate::new(429).set_body_string("rate limit exceeded, resets in 30 seconds"),
        )
        .mount(&server)
        .await;

    let err = clob(&server).place_order(&buy()).await.unwrap_err();
    match err {
        GatewayError::RateLimited { retry_after } => {
            assert_eq!(retry_after, Some(Duration::from_secs(30)))
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_auth_failure_is_not_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/order/ex-1"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let err = clob(&server).order_status("ex-1").await.unwrap_err();
    assert!(matches!(err, GatewayError::Auth(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_resting_order_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/order/ex-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ex-2",
            "status": "LIVE",
            "original_size": "10",
            "size_matched": "4",
            "price": "0.98",
        })))
        .mount(&server)
        .await;

    let ack = clob(&server).order_status("ex-2").await.unwrap();
    assert_eq!(ack.status, AckStatus::PartiallyFilled);
    assert_eq!(ack.filled_size, dec!(4));
    assert_eq!(ack.avg_price, Some(dec!(0.98)));
}

#[tokio::test]
async fn test_claim_submission_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/redeem"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "tx_id": "0xtx", "status": "pending" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/redeem/0xtx"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "tx_id": "0xtx", "status": "confirmed" })),
        )
        .mount(&server)
        .await;

    let gateway = clob(&server);
    let result = gateway
        .submit_claim(&ClaimRequest {
            condition_id: "0xbtc".into(),
            outcome: Outcome::Up,
            token_id: "1111".into(),
            size: dec!(10),
        })
        .await
        .unwrap();
    assert_eq!(result.tx_id, "0xtx");
    assert_eq!(result.status, ClaimStatus::Pending);
    assert_eq!(
        gateway.claim_status("0xtx").await.unwrap(),
        ClaimStatus::Confirmed
    );
}
