//! Exchange gateway module
//!
//! Authenticated CLOB access (orders, balances, claims) and the market-data
//! stream, behind one trait so the engine runs unchanged against the live
//! exchange or the paper simulator.

mod auth;
mod book;
mod clob;
mod paper;
mod stream;
mod types;

pub use auth::{sign_request, ApiCredentials, L2Headers};
pub use book::{BookCache, BookUpdate};
pub use clob::ClobGateway;
pub use paper::PaperGateway;
pub use stream::{parse_market_message, subscribe_market, POLYMARKET_WS_URL};
pub use types::{
    parse_reset_hint, AckStatus, Balance, ClaimRequest, ClaimResult, ClaimStatus, GatewayError,
    OrderAck, OrderRequest, PriceTick, Side, TimeInForce,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for exchange access
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Stream best bid/ask updates for the given outcome tokens
    async fn subscribe(
        &self,
        token_ids: Vec<String>,
    ) -> Result<mpsc::Receiver<PriceTick>, GatewayError>;

    /// Place an order
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError>;

    /// Cancel an order by exchange id
    async fn cancel_order(&self, exchange_id: &str) -> Result<(), GatewayError>;

    /// Current state of an order
    async fn order_status(&self, exchange_id: &str) -> Result<OrderAck, GatewayError>;

    /// Spendable balance
    async fn balance(&self) -> Result<Balance, GatewayError>;

    /// Redeem winning shares of a resolved market
    async fn submit_claim(&self, request: &ClaimRequest) -> Result<ClaimResult, GatewayError>;

    /// Current state of a submitted claim
    async fn claim_status(&self, tx_id: &str) -> Result<ClaimStatus, GatewayError>;
}
