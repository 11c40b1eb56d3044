//! Market discovery module
//!
//! Finds the current 15-minute up/down market for each configured symbol via
//! the Gamma API, tracks its lifecycle and learns its resolution.

mod gamma;
mod registry;
mod window;

pub use gamma::{GammaClient, GammaConfig, GAMMA_API_URL};
pub use registry::MarketRegistry;
pub use window::{parse_slug, window_slug, window_start, WINDOW_SECS};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Underlying asset of a 15-minute up/down market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Symbol {
    Btc,
    Eth,
    Sol,
    Xrp,
}

impl Symbol {
    pub const ALL: [Symbol; 4] = [Symbol::Btc, Symbol::Eth, Symbol::Sol, Symbol::Xrp];

    /// Lowercase slug prefix, e.g. `btc`
    pub fn slug_prefix(&self) -> &'static str {
        match self {
            Symbol::Btc => "btc",
            Symbol::Eth => "eth",
            Symbol::Sol => "sol",
            Symbol::Xrp => "xrp",
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.slug_prefix().to_uppercase())
    }
}

impl FromStr for Symbol {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "btc" => Ok(Symbol::Btc),
            "eth" => Ok(Symbol::Eth),
            "sol" => Ok(Symbol::Sol),
            "xrp" => Ok(Symbol::Xrp),
            other => Err(MarketError::Parse(format!("unknown symbol {other}"))),
        }
    }
}

/// One of the two outcome tokens of a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// YES: price ends above the window open
    Up,
    /// NO: price ends below the window open
    Down,
}

impl Outcome {
    pub const BOTH: [Outcome; 2] = [Outcome::Up, Outcome::Down];
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Up => f.pad("Up"),
            Outcome::Down => f.pad("Down"),
        }
    }
}

/// Lifecycle of a tracked market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketState {
    Discovered,
    Active,
    Resolving,
    Resolved,
}

/// A Polymarket 15-minute binary market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Unique condition identifier
    pub condition_id: String,
    /// Underlying asset
    pub symbol: Symbol,
    /// Event slug, e.g. `btc-updown-15m-1767638700`
    pub slug: String,
    /// Up (YES) token identifier
    pub up_token_id: String,
    /// Down (NO) token identifier
    pub down_token_id: String,
    /// Window open
    pub window_start: DateTime<Utc>,
    /// Window close / settlement time
    pub resolution_time: DateTime<Utc>,
    /// Exchange minimum order size (shares)
    pub min_order_size: Decimal,
    /// Configured cap on order size (shares)
    pub max_order_size: Option<Decimal>,
    /// Lifecycle state
    pub state: MarketState,
    /// Winning outcome once resolved
    #[serde(default)]
    pub winner: Option<Outcome>,
    /// Restored from a persisted position; exits only, never new entries
    #[serde(default)]
    pub legacy: bool,
}

impl Market {
    /// Token id for an outcome
    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Up => &self.up_token_id,
            Outcome::Down => &self.down_token_id,
        }
    }

    /// Which outcome a token belongs to
    pub fn outcome_for_token(&self, token_id: &str) -> Option<Outcome> {
        if token_id == self.up_token_id {
            Some(Outcome::Up)
        } else if token_id == self.down_token_id {
            Some(Outcome::Down)
        } else {
            None
        }
    }

    /// Seconds until settlement (negative once passed)
    pub fn seconds_to_resolution(&self, now: DateTime<Utc>) -> i64 {
        (self.resolution_time - now).num_seconds()
    }

    /// True when both markets trade the same symbol over intersecting windows
    pub fn overlaps(&self, other: &Market) -> bool {
        self.symbol == other.symbol
            && self.window_start < other.resolution_time
            && other.window_start < self.resolution_time
    }
}

/// Best bid/ask for one outcome token
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
}

/// Market as listed by the discovery source, before validation
#[derive(Debug, Clone, Default)]
pub struct MarketListing {
    pub slug: String,
    pub condition_id: Option<String>,
    pub up_token_id: Option<String>,
    pub down_token_id: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub closed: bool,
    /// Settled prices for (Up, Down) when the market is closed
    pub outcome_prices: Option<(Decimal, Decimal)>,
}

impl MarketListing {
    /// Winning outcome of a closed market, if prices have settled to 1/0
    pub fn winner(&self) -> Option<Outcome> {
        if !self.closed {
            return None;
        }
        match self.outcome_prices {
            Some((up, down)) if up == Decimal::ONE && down.is_zero() => Some(Outcome::Up),
            Some((up, down)) if down == Decimal::ONE && up.is_zero() => Some(Outcome::Down),
            _ => None,
        }
    }
}

/// Market discovery errors
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("{symbol} already has an active market overlapping {slug}")]
    Overlap { symbol: Symbol, slug: String },
}

/// Source of market listings and resolutions
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Look a market up by its event slug; `None` when not listed yet
    async fn find_by_slug(&self, slug: &str) -> Result<Option<MarketListing>, MarketError>;

    /// Read a market back by condition id
    async fn find_by_condition(
        &self,
        condition_id: &str,
    ) -> Result<Option<MarketListing>, MarketError>;
}
