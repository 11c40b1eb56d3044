//! Gateway request/response types and error taxonomy

use crate::market::Outcome;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Rests on the book until filled or cancelled
    Gtc,
    /// Fill completely or cancel
    Fok,
    /// Fill what is available, cancel the rest
    Fak,
}

/// Best bid/ask update for one outcome token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Token identifier
    pub token_id: String,
    /// Highest bid
    pub best_bid: Option<Decimal>,
    /// Lowest ask
    pub best_ask: Option<Decimal>,
    /// Exchange timestamp
    pub timestamp: DateTime<Utc>,
}

/// An order to be placed on the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Market condition id
    pub condition_id: String,
    /// Outcome token traded
    pub token_id: String,
    /// Outcome the token represents
    pub outcome: Outcome,
    /// Trade side
    pub side: Side,
    /// Limit price
    pub price: Decimal,
    /// Shares
    pub size: Decimal,
    /// Time in force
    pub time_in_force: TimeInForce,
}

/// Exchange-side order state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    /// Resting, nothing filled yet
    Open,
    /// Resting with a partial fill
    PartiallyFilled,
    /// Completely filled
    Filled,
    /// Cancelled or killed; `filled_size` holds whatever matched before
    Cancelled,
}

impl AckStatus {
    /// No further fills can arrive
    pub fn is_terminal(&self) -> bool {
        matches!(self, AckStatus::Filled | AckStatus::Cancelled)
    }
}

/// Exchange acknowledgement of an order, also returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    /// Exchange order id
    pub exchange_id: String,
    /// Current state
    pub status: AckStatus,
    /// Cumulative shares filled
    pub filled_size: Decimal,
    /// Volume-weighted fill price
    pub avg_price: Option<Decimal>,
    /// Cumulative fees
    pub fees: Decimal,
}

/// Account balance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Spendable USDC
    pub available: Decimal,
}

/// Redemption of winning shares after resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub condition_id: String,
    pub outcome: Outcome,
    pub token_id: String,
    /// Winning shares to redeem
    pub size: Decimal,
}

/// Exchange-side claim state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    Pending,
    Confirmed,
    Failed(String),
}

/// Result of a claim submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResult {
    /// Transaction id
    pub tx_id: String,
    pub status: ClaimStatus,
}

/// Gateway errors, classified for retry decisions
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Order rejected: {0}")]
    Rejected(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Malformed response: {0}")]
    Parse(String),
}

impl GatewayError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_)
                | GatewayError::Timeout
                | GatewayError::RateLimited { .. }
                | GatewayError::Server { .. }
        )
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => GatewayError::Auth(body),
            404 => GatewayError::NotFound(body),
            408 => GatewayError::Timeout,
            429 => GatewayError::RateLimited {
                retry_after: parse_reset_hint(&body),
            },
            500..=599 => GatewayError::Server { status, body },
            _ if body.to_ascii_lowercase().contains("not enough balance")
                || body.to_ascii_lowercase().contains("insufficient") =>
            {
                GatewayError::InsufficientBalance(body)
            }
            _ => GatewayError::Rejected(body),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Parse(e.to_string())
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

/// Extract N from "... resets in N seconds ..."
pub fn parse_reset_hint(body: &str) -> Option<Duration> {
    let lower = body.to_ascii_lowercase();
    let rest = &lower[lower.find("resets in")? + "resets in".len()..];
    let secs: u64 = rest
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()?;
    Some(Duration::from_secs(secs))
}
