//! Per-token order book cache reduced to best bid/ask ticks

use super::{PriceTick, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// One parsed market-channel update
#[derive(Debug, Clone, PartialEq)]
pub enum BookUpdate {
    /// Full book replacement
    Snapshot {
        token_id: String,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
        timestamp: DateTime<Utc>,
    },
    /// One level changed; size 0 removes it. The exchange may also report
    /// the resulting best prices directly.
    Level {
        token_id: String,
        side: Side,
        price: Decimal,
        size: Decimal,
        best_bid: Option<Decimal>,
        best_ask: Option<Decimal>,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Default)]
struct TokenBook {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last: Option<(Option<Decimal>, Option<Decimal>)>,
}

impl TokenBook {
    fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    fn set_level(&mut self, side: Side, price: Decimal, size: Decimal) {
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if size.is_zero() {
            levels.remove(&price);
        } else {
            levels.insert(price, size);
        }
    }
}

/// Tracks books for many tokens and emits a tick when a top of book moves
#[derive(Debug, Default)]
pub struct BookCache {
    books: HashMap<String, TokenBook>,
}

impl BookCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update; returns a tick if best bid or ask changed
    pub fn apply(&mut self, update: BookUpdate) -> Option<PriceTick> {
        let (token_id, timestamp, reported) = match update {
            BookUpdate::Snapshot {
                token_id,
                bids,
                asks,
                timestamp,
            } => {
                let book = self.books.entry(token_id.clone()).or_default();
                book.bids = bids.into_iter().filter(|(_, s)| !s.is_zero()).collect();
                book.asks = asks.into_iter().filter(|(_, s)| !s.is_zero()).collect();
                (token_id, timestamp, None)
            }
            BookUpdate::Level {
                token_id,
                side,
                price,
                size,
                best_bid,
                best_ask,
                timestamp,
            } => {
                let book = self.books.entry(token_id.clone()).or_default();
                book.set_level(side, price, size);
                let reported = (best_bid.is_some() || best_ask.is_some()).then_some((best_bid, best_ask));
                (token_id, timestamp, reported)
            }
        };

        let book = self.books.get_mut(&token_id)?;
        let top = reported.unwrap_or((book.best_bid(), book.best_ask()));
        if book.last == Some(top) {
            return None;
        }
        book.last = Some(top);

        Some(PriceTick {
            token_id,
            best_bid: top.0,
            best_ask: top.1,
            timestamp,
        })
    }

    /// Current best bid/ask for a token
    pub fn top(&self, token_id: &str) -> Option<(Option<Decimal>, Option<Decimal>)> {
        self.books
            .get(token_id)
            .map(|b| (b.best_bid(), b.best_ask()))
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}
