//! CLOB market-channel WebSocket stream
//!
//! Subscribes to `book` and `price_change` events for a set of outcome tokens
//! and reduces them to best bid/ask ticks.

use super::{BookCache, BookUpdate, PriceTick, Side};
use crate::ws::{WsClient, WsConfig, WsMessage};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::mpsc;

/// Polymarket CLOB WebSocket URL for market data
pub const POLYMARKET_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Subscription message for the market channel
#[derive(Debug, Serialize)]
struct SubscriptionMessage<'a> {
    assets_ids: &'a [String],
    #[serde(rename = "type")]
    msg_type: &'static str,
}

/// Open a market-channel subscription and stream ticks
///
/// The subscription is replayed on every reconnect. The background task stops
/// when the returned receiver is dropped.
pub fn subscribe_market(
    ws_url: &str,
    token_ids: Vec<String>,
) -> anyhow::Result<mpsc::Receiver<PriceTick>> {
    let (tx, rx) = mpsc::channel(1024);
    if token_ids.is_empty() {
        tracing::warn!("No token ids provided, returning idle stream");
        return Ok(rx);
    }

    let frame = serde_json::to_string(&SubscriptionMessage {
        assets_ids: &token_ids,
        msg_type: "market",
    })?;
    let client = WsClient::new(WsConfig::new(ws_url).send_on_connect(frame));
    let (mut ws_rx, _ws_tx) = client.connect();
    let token_count = token_ids.len();

    tokio::spawn(async move {
        // Keep the sender alive so the socket stays open
        let _ws_tx = _ws_tx;
        let mut cache = BookCache::new();

        loop {
            let msg = tokio::select! {
                msg = ws_rx.recv() => msg,
                _ = tx.closed() => {
                    tracing::debug!("Tick receiver dropped, closing market stream");
                    return;
                }
            };
            let Some(msg) = msg else { return };
            match msg {
                WsMessage::Connected => {
                    tracing::info!(tokens = token_count, "Market stream subscribed");
                }
                WsMessage::Text(text) => {
                    for update in parse_market_message(&text) {
                        if let Some(tick) = cache.apply(update) {
                            if tx.send(tick).await.is_err() {
                                tracing::debug!("Tick receiver dropped, closing market stream");
                                return;
                            }
                        }
                    }
                }
                WsMessage::Reconnecting { attempt } => {
                    tracing::info!(attempt, "Market stream reconnecting");
                }
                WsMessage::Disconnected => {
                    tracing::warn!("Market stream disconnected");
                    return;
                }
            }
        }
    });

    Ok(rx)
}

#[derive(Debug, Deserialize)]
struct Level {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct BookEvent {
    asset_id: String,
    #[serde(default, alias = "buys")]
    bids: Vec<Level>,
    #[serde(default, alias = "sells")]
    asks: Vec<Level>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceChangeEvent {
    #[serde(default)]
    price_changes: Vec<PriceChange>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceChange {
    asset_id: String,
    price: String,
    size: String,
    side: String,
    #[serde(default)]
    best_bid: Option<String>,
    #[serde(default)]
    best_ask: Option<String>,
}

/// Parse one WebSocket text frame (single event or array of events)
pub fn parse_market_message(text: &str) -> Vec<BookUpdate> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring non-JSON market frame");
            return Vec::new();
        }
    };

    let events = match value {
        serde_json::Value::Array(events) => events,
        other => vec![other],
    };

    let mut updates = Vec::new();
    for event in events {
        match parse_event(event) {
            Ok(mut parsed) => updates.append(&mut parsed),
            Err(e) => tracing::debug!(error = %e, "Failed to parse market event"),
        }
    }
    updates
}

fn parse_event(event: serde_json::Value) -> anyhow::Result<Vec<BookUpdate>> {
    let event_type = event
        .get("event_type")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let is_book = event_type == "book"
        || (event_type.is_empty() && event.get("asset_id").is_some() && event.get("bids").is_some());
    let is_change = event_type == "price_change"
        || (event_type.is_empty() && event.get("price_changes").is_some());

    if is_book {
        let book: BookEvent = serde_json::from_value(event)?;
        return Ok(vec![BookUpdate::Snapshot {
            token_id: book.asset_id,
            bids: parse_levels(&book.bids),
            asks: parse_levels(&book.asks),
            timestamp: parse_timestamp(book.timestamp.as_deref()),
        }]);
    }

    if is_change {
        let msg: PriceChangeEvent = serde_json::from_value(event)?;
        let timestamp = parse_timestamp(msg.timestamp.as_deref());
        return Ok(msg
            .price_changes
            .into_iter()
            .filter_map(|c| {
                let side = match c.side.as_str() {
                    "BUY" => Side::Buy,
                    "SELL" => Side::Sell,
                    _ => return None,
                };
                Some(BookUpdate::Level {
                    token_id: c.asset_id,
                    side,
                    price: Decimal::from_str(&c.price).ok()?,
                    size: Decimal::from_str(&c.size).ok()?,
                    best_bid: c.best_bid.as_deref().and_then(|p| Decimal::from_str(p).ok()),
                    best_ask: c.best_ask.as_deref().and_then(|p| Decimal::from_str(p).ok()),
                    timestamp,
                })
            })
            .collect());
    }

    // last_trade_price, tick_size_change and unknown events
    Ok(Vec::new())
}

fn parse_levels(levels: &[Level]) -> Vec<(Decimal, Decimal)> {
    levels
        .iter()
        .filter_map(|l| Some((Decimal::from_str(&l.price).ok()?, Decimal::from_str(&l.size).ok()?)))
        .collect()
}

/// Millisecond epoch string; falls back to now
fn parse_timestamp(ts: Option<&str>) -> DateTime<Utc> {
    ts.and_then(|s| s.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}
