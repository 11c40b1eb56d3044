//! Market registry
//!
//! Owns the set of tracked markets and their lifecycle:
//! DISCOVERED -> ACTIVE -> RESOLVING -> RESOLVED, then archived.

use super::{
    window_slug, window_start, Market, MarketError, MarketSource, MarketState, Outcome, WINDOW_SECS,
};
use crate::config::SymbolConfig;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    markets: HashMap<String, Market>,
    /// token id -> (condition id, outcome)
    tokens: HashMap<String, (String, Outcome)>,
}

/// Tracks markets per symbol with periodic discovery
pub struct MarketRegistry {
    source: Arc<dyn MarketSource>,
    symbols: Vec<SymbolConfig>,
    inner: RwLock<Inner>,
}

impl MarketRegistry {
    /// Create a new registry over the configured symbols
    pub fn new(source: Arc<dyn MarketSource>, symbols: Vec<SymbolConfig>) -> Self {
        Self {
            source,
            symbols,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Look up the current window's market for every symbol
    ///
    /// Returns only markets the registry does not know yet, in DISCOVERED
    /// state. Unlisted markets and listings without a condition id are
    /// skipped until a later poll.
    pub async fn discover(&self, now: DateTime<Utc>) -> Vec<Market> {
        let start = window_start(now);
        let mut found = Vec::new();

        for cfg in &self.symbols {
            let slug = window_slug(cfg.symbol, start);
            let listing = match self.source.find_by_slug(&slug).await {
                Ok(Some(listing)) => listing,
                Ok(None) => {
                    tracing::debug!(slug = %slug, "Market not listed yet");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(slug = %slug, error = %e, "Market discovery failed");
                    continue;
                }
            };

            let Some(condition_id) = listing.condition_id.clone() else {
                tracing::warn!(slug = %slug, "Listing has no condition id, skipping");
                continue;
            };
            let (Some(up), Some(down)) = (listing.up_token_id, listing.down_token_id) else {
                tracing::warn!(slug = %slug, "Listing has no token ids, skipping");
                continue;
            };

            if self.inner.read().await.markets.contains_key(&condition_id) {
                continue;
            }

            found.push(Market {
                condition_id,
                symbol: cfg.symbol,
                slug,
                up_token_id: up,
                down_token_id: down,
                window_start: start,
                resolution_time: listing
                    .end_time
                    .unwrap_or(start + Duration::seconds(WINDOW_SECS)),
                min_order_size: cfg.min_order_size,
                max_order_size: cfg.max_order_size,
                state: MarketState::Discovered,
                winner: None,
                legacy: false,
            });
        }

        found
    }

    /// Move a market to ACTIVE
    ///
    /// `Ok(false)` when the condition id is already tracked. Rejected when the
    /// symbol already has an ACTIVE market with an overlapping window.
    pub async fn activate(&self, mut market: Market) -> Result<bool, MarketError> {
        let mut inner = self.inner.write().await;
        if inner.markets.contains_key(&market.condition_id) {
            return Ok(false);
        }
        if inner
            .markets
            .values()
            .any(|m| m.state == MarketState::Active && !m.legacy && m.overlaps(&market))
        {
            return Err(MarketError::Overlap {
                symbol: market.symbol,
                slug: market.slug,
            });
        }

        market.state = MarketState::Active;
        inner.tokens.insert(
            market.up_token_id.clone(),
            (market.condition_id.clone(), Outcome::Up),
        );
        inner.tokens.insert(
            market.down_token_id.clone(),
            (market.condition_id.clone(), Outcome::Down),
        );
        tracing::info!(
            condition_id = %market.condition_id,
            slug = %market.slug,
            resolution_time = %market.resolution_time,
            "Market activated"
        );
        inner.markets.insert(market.condition_id.clone(), market);
        Ok(true)
    }

    /// Discover and activate; returns the newly active markets
    pub async fn refresh(&self, now: DateTime<Utc>) -> Vec<Market> {
        let mut activated = Vec::new();
        for market in self.discover(now).await {
            match self.activate(market.clone()).await {
                Ok(true) => {
                    if let Some(m) = self.get(&market.condition_id).await {
                        activated.push(m);
                    }
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "Market not activated"),
            }
        }
        activated
    }

    /// Re-register a market restored from a persisted position
    ///
    /// Restored markets only manage exits. State follows the clock.
    pub async fn restore(&self, mut market: Market, now: DateTime<Utc>) -> Market {
        market.legacy = true;
        if market.state != MarketState::Resolved {
            market.state = if now >= market.resolution_time {
                MarketState::Resolving
            } else {
                MarketState::Active
            };
        }

        let mut inner = self.inner.write().await;
        inner.tokens.insert(
            market.up_token_id.clone(),
            (market.condition_id.clone(), Outcome::Up),
        );
        inner.tokens.insert(
            market.down_token_id.clone(),
            (market.condition_id.clone(), Outcome::Down),
        );
        inner
            .markets
            .entry(market.condition_id.clone())
            .or_insert(market)
            .clone()
    }

    /// ACTIVE -> RESOLVING for a single market
    pub async fn retire(&self, condition_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.markets.get_mut(condition_id) {
            Some(m) if m.state == MarketState::Active => {
                m.state = MarketState::Resolving;
                tracing::info!(condition_id, "Market retired, awaiting resolution");
                true
            }
            _ => false,
        }
    }

    /// Retire every ACTIVE market past its resolution time
    pub async fn retire_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .markets
                .values()
                .filter(|m| m.state == MarketState::Active && now >= m.resolution_time)
                .map(|m| m.condition_id.clone())
                .collect()
        };

        let mut retired = Vec::new();
        for id in expired {
            if self.retire(&id).await {
                retired.push(id);
            }
        }
        retired
    }

    /// Ask the source whether RESOLVING markets have settled
    pub async fn poll_resolutions(&self) -> Vec<(String, Outcome)> {
        let pending = self.in_state(MarketState::Resolving).await;
        let mut resolved = Vec::new();

        for market in pending {
            match self.source.find_by_condition(&market.condition_id).await {
                Ok(Some(listing)) => {
                    if let Some(winner) = listing.winner() {
                        if self.mark_resolved(&market.condition_id, winner).await {
                            resolved.push((market.condition_id, winner));
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(condition_id = %market.condition_id, error = %e, "Resolution lookup failed")
                }
            }
        }
        resolved
    }

    /// RESOLVING -> RESOLVED
    pub async fn mark_resolved(&self, condition_id: &str, winner: Outcome) -> bool {
        let mut inner = self.inner.write().await;
        match inner.markets.get_mut(condition_id) {
            Some(m) if m.state != MarketState::Resolved => {
                m.state = MarketState::Resolved;
                m.winner = Some(winner);
                tracing::info!(condition_id, %winner, "Market resolved");
                true
            }
            _ => false,
        }
    }

    /// Drop a RESOLVED market and its token routes
    pub async fn archive(&self, condition_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.markets.get(condition_id) {
            Some(m) if m.state == MarketState::Resolved => {
                let (up, down) = (m.up_token_id.clone(), m.down_token_id.clone());
                inner.tokens.remove(&up);
                inner.tokens.remove(&down);
                inner.markets.remove(condition_id);
                true
            }
            _ => false,
        }
    }

    /// Tag a token id with its market and outcome
    pub async fn route(&self, token_id: &str) -> Option<(String, Outcome)> {
        self.inner.read().await.tokens.get(token_id).cloned()
    }

    pub async fn get(&self, condition_id: &str) -> Option<Market> {
        self.inner.read().await.markets.get(condition_id).cloned()
    }

    pub async fn in_state(&self, state: MarketState) -> Vec<Market> {
        self.inner
            .read()
            .await
            .markets
            .values()
            .filter(|m| m.state == state)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.markets.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
