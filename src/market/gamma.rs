//! Gamma API client for market discovery
//!
//! Each symbol's 15-minute up/down market is listed under a deterministic
//! slug (`{symbol}-updown-15m-{window_start}`), so discovery is a direct
//! slug lookup rather than a search. The same client reads markets back by
//! condition id to learn their resolution.

use super::{MarketError, MarketListing, MarketSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Gamma API base URL
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// Configuration for the Gamma client
#[derive(Debug, Clone)]
pub struct GammaConfig {
    /// Base URL for the Gamma API
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            base_url: GAMMA_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Client for Polymarket's Gamma API
pub struct GammaClient {
    config: GammaConfig,
    client: Client,
}

impl GammaClient {
    /// Create a new client with custom configuration
    pub fn with_config(config: GammaConfig) -> Result<Self, MarketError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MarketError::Http(e.to_string()))?;

        Ok(Self { config, client })
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Option<String>, MarketError> {
        tracing::debug!(url = %url, "Gamma request");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| MarketError::Http(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .text()
            .await
            .map_err(|e| MarketError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(MarketError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Some(body))
    }
}

#[async_trait]
impl MarketSource for GammaClient {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<MarketListing>, MarketError> {
        let url = format!("{}/markets/slug/{}", self.config.base_url, slug);
        let Some(body) = self.get(&url, &[]).await? else {
            tracing::debug!(slug, "Market not listed yet");
            return Ok(None);
        };

        let market: GammaMarket =
            serde_json::from_str(&body).map_err(|e| MarketError::Parse(e.to_string()))?;
        Ok(Some(market.into_listing()?))
    }

    async fn find_by_condition(
        &self,
        condition_id: &str,
    ) -> Result<Option<MarketListing>, MarketError> {
        let url = format!("{}/markets", self.config.base_url);
        let Some(body) = self.get(&url, &[("condition_ids", condition_id)]).await? else {
            return Ok(None);
        };

        let markets: Vec<GammaMarket> =
            serde_json::from_str(&body).map_err(|e| MarketError::Parse(e.to_string()))?;
        markets
            .into_iter()
            .next()
            .map(GammaMarket::into_listing)
            .transpose()
    }
}

/// Raw market response from Gamma API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    #[serde(default)]
    slug: String,
    /// Missing or empty on some freshly created listings
    #[serde(default)]
    condition_id: Option<String>,
    /// JSON-encoded string array, e.g. `"[\"Up\", \"Down\"]"`
    outcomes: Option<String>,
    /// JSON-encoded string array of token ids, same order as `outcomes`
    clob_token_ids: Option<String>,
    /// JSON-encoded string array of prices, same order as `outcomes`
    outcome_prices: Option<String>,
    end_date: Option<String>,
    #[serde(default)]
    closed: bool,
}

impl GammaMarket {
    fn into_listing(self) -> Result<MarketListing, MarketError> {
        let outcomes = self
            .outcomes
            .as_deref()
            .map(parse_string_array)
            .transpose()?;
        // Listings without outcome labels keep Up first
        let up_index = outcomes
            .as_ref()
            .and_then(|o| o.iter().position(|s| s.eq_ignore_ascii_case("up")))
            .filter(|&i| i < 2)
            .unwrap_or(0);
        let down_index = 1 - up_index;

        let tokens = self
            .clob_token_ids
            .as_deref()
            .map(parse_string_array)
            .transpose()?;
        let (up_token_id, down_token_id) = match tokens {
            Some(t) if t.len() == 2 => (Some(t[up_index].clone()), Some(t[down_index].clone())),
            _ => (None, None),
        };

        let outcome_prices = match self.outcome_prices.as_deref().map(parse_string_array) {
            Some(Ok(p)) if p.len() == 2 => {
                let up = Decimal::from_str(&p[up_index]).ok();
                let down = Decimal::from_str(&p[down_index]).ok();
                up.zip(down)
            }
            _ => None,
        };

        let end_time = self
            .end_date
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(MarketListing {
            slug: self.slug,
            condition_id: self.condition_id.filter(|c| !c.is_empty()),
            up_token_id,
            down_token_id,
            end_time,
            closed: self.closed,
            outcome_prices,
        })
    }
}

/// Parse Gamma's JSON-in-a-string arrays
fn parse_string_array(s: &str) -> Result<Vec<String>, MarketError> {
    serde_json::from_str(s).map_err(|e| MarketError::Parse(format!("{e}: {s}")))
}
