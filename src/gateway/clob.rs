//! Live CLOB gateway
//!
//! REST calls carry L2 HMAC headers. Order structs and on-chain redemptions
//! need the wallet key, so they are signed by a sidecar at `signer_url`.

use super::{
    subscribe_market, AckStatus, ApiCredentials, Balance, ClaimRequest, ClaimResult, ClaimStatus,
    ExchangeGateway, GatewayError, OrderAck, OrderRequest, PriceTick, Side, TimeInForce,
};
use async_trait::async_trait;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;

/// USDC has 6 decimals on-chain
const USDC_SCALE: u32 = 6;

/// Authenticated CLOB client
pub struct ClobGateway {
    http: Client,
    clob_url: String,
    ws_url: String,
    signer_url: String,
    credentials: ApiCredentials,
}

impl ClobGateway {
    pub fn new(
        clob_url: impl Into<String>,
        ws_url: impl Into<String>,
        signer_url: impl Into<String>,
        credentials: ApiCredentials,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self {
            http,
            clob_url: clob_url.into().trim_end_matches('/').to_string(),
            ws_url: ws_url.into(),
            signer_url: signer_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Signed request against the CLOB; `path` excludes the query string
    async fn clob_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<String>,
    ) -> Result<T, GatewayError> {
        let body = body.unwrap_or_default();
        let headers = self.credentials.headers(method.as_str(), path, &body)?;
        let mut request = self
            .http
            .request(method, format!("{}{}", self.clob_url, path))
            .query(query);
        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }
        send(headers.apply(request)).await
    }

    async fn signer_request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, GatewayError> {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.signer_url, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        send(request).await
    }
}

async fn send<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, GatewayError> {
    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(GatewayError::from_status(status.as_u16(), text));
    }
    serde_json::from_str(&text).map_err(|e| GatewayError::Parse(format!("{e}: {text}")))
}

#[derive(Debug, Serialize)]
struct SignOrderRequest<'a> {
    token_id: &'a str,
    side: Side,
    price: Decimal,
    size: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostOrder<'a> {
    order: serde_json::Value,
    owner: &'a str,
    order_type: TimeInForce,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error_msg: String,
    #[serde(rename = "orderID", default)]
    order_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    making_amount: Option<String>,
    #[serde(default)]
    taking_amount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenOrderResponse {
    id: String,
    status: String,
    original_size: String,
    size_matched: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: String,
}

#[derive(Debug, Deserialize)]
struct RedeemResponse {
    #[serde(alias = "tx_hash")]
    tx_id: String,
    status: String,
    #[serde(default)]
    error: Option<String>,
}

fn dec(s: &str) -> Result<Decimal, GatewayError> {
    Decimal::from_str(s).map_err(|e| GatewayError::Parse(format!("{e}: {s}")))
}

/// Interpret an order post response
fn post_response_to_ack(
    request: &OrderRequest,
    resp: PostOrderResponse,
) -> Result<OrderAck, GatewayError> {
    if !resp.success {
        let msg = resp.error_msg;
        return Err(if msg.to_ascii_lowercase().contains("balance") {
            GatewayError::InsufficientBalance(msg)
        } else {
            GatewayError::Rejected(msg)
        });
    }

    let making = resp.making_amount.as_deref().map(dec).transpose()?;
    let taking = resp.taking_amount.as_deref().map(dec).transpose()?;
    // Buys give USDC and take shares; sells the reverse
    let (shares, usdc) = match request.side {
        Side::Buy => (taking, making),
        Side::Sell => (making, taking),
    };
    let filled_size = shares.unwrap_or_default();
    let avg_price = match (shares, usdc) {
        (Some(s), Some(u)) if !s.is_zero() => Some((u / s).round_dp(4)),
        _ => None,
    };

    let status = match resp.status.as_str() {
        "matched" if filled_size >= request.size => AckStatus::Filled,
        "matched" => AckStatus::PartiallyFilled,
        "live" | "delayed" if filled_size.is_zero() => AckStatus::Open,
        "live" | "delayed" => AckStatus::PartiallyFilled,
        _ => AckStatus::Cancelled,
    };
    // Immediate-or-cancel orders report the matched part and drop the rest
    let status = match (status, request.time_in_force) {
        (AckStatus::PartiallyFilled, TimeInForce::Fok | TimeInForce::Fak) => AckStatus::Cancelled,
        (s, _) => s,
    };

    Ok(OrderAck {
        exchange_id: resp.order_id,
        status,
        filled_size,
        avg_price,
        fees: Decimal::ZERO,
    })
}

fn open_order_to_ack(resp: OpenOrderResponse) -> Result<OrderAck, GatewayError> {
    let original = dec(&resp.original_size)?;
    let matched = dec(&resp.size_matched)?;
    let status = match resp.status.to_ascii_uppercase().as_str() {
        "MATCHED" => AckStatus::Filled,
        "LIVE" if matched.is_zero() => AckStatus::Open,
        "LIVE" if matched >= original => AckStatus::Filled,
        "LIVE" => AckStatus::PartiallyFilled,
        _ => AckStatus::Cancelled,
    };
    Ok(OrderAck {
        exchange_id: resp.id,
        status,
        filled_size: matched,
        avg_price: (!matched.is_zero()).then(|| dec(&resp.price)).transpose()?,
        fees: Decimal::ZERO,
    })
}

fn redeem_to_result(resp: RedeemResponse) -> ClaimResult {
    let status = match resp.status.to_ascii_lowercase().as_str() {
        "confirmed" | "success" => ClaimStatus::Confirmed,
        "failed" | "reverted" => ClaimStatus::Failed(resp.error.unwrap_or_else(|| resp.status.clone())),
        _ => ClaimStatus::Pending,
    };
    ClaimResult {
        tx_id: resp.tx_id,
        status,
    }
}

#[async_trait]
impl ExchangeGateway for ClobGateway {
    async fn subscribe(
        &self,
        token_ids: Vec<String>,
    ) -> Result<mpsc::Receiver<PriceTick>, GatewayError> {
        subscribe_market(&self.ws_url, token_ids).map_err(|e| GatewayError::Network(e.to_string()))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let signed: serde_json::Value = self
            .signer_request(
                Method::POST,
                "/orders/sign",
                Some(&SignOrderRequest {
                    token_id: &request.token_id,
                    side: request.side,
                    price: request.price,
                    size: request.size,
                }),
            )
            .await?;

        let body = serde_json::to_string(&PostOrder {
            order: signed,
            owner: &self.credentials.api_key,
            order_type: request.time_in_force,
        })
        .map_err(|e| GatewayError::Parse(e.to_string()))?;

        let resp: PostOrderResponse = self
            .clob_request(Method::POST, "/order", &[], Some(body))
            .await?;
        post_response_to_ack(request, resp)
    }

    async fn cancel_order(&self, exchange_id: &str) -> Result<(), GatewayError> {
        let body = serde_json::json!({ "orderID": exchange_id }).to_string();
        let _: serde_json::Value = self
            .clob_request(Method::DELETE, "/order", &[], Some(body))
            .await?;
        Ok(())
    }

    async fn order_status(&self, exchange_id: &str) -> Result<OrderAck, GatewayError> {
        let path = format!("/data/order/{exchange_id}");
        let resp: OpenOrderResponse = self.clob_request(Method::GET, &path, &[], None).await?;
        open_order_to_ack(resp)
    }

    async fn balance(&self) -> Result<Balance, GatewayError> {
        let resp: BalanceResponse = self
            .clob_request(
                Method::GET,
                "/balance-allowance",
                &[("asset_type", "COLLATERAL")],
                None,
            )
            .await?;
        let raw = dec(&resp.balance)?;
        Ok(Balance {
            available: raw / Decimal::from(10u64.pow(USDC_SCALE)),
        })
    }

    async fn submit_claim(&self, request: &ClaimRequest) -> Result<ClaimResult, GatewayError> {
        let resp: RedeemResponse = self
            .signer_request(Method::POST, "/redeem", Some(request))
            .await?;
        Ok(redeem_to_result(resp))
    }

    async fn claim_status(&self, tx_id: &str) -> Result<ClaimStatus, GatewayError> {
        let resp: RedeemResponse = self
            .signer_request::<_, ()>(Method::GET, &format!("/redeem/{tx_id}"), None)
            .await?;
        Ok(redeem_to_result(resp).status)
    }
}
