//! Rolling per-outcome price history and the indicators computed over it

use crate::market::Outcome;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;

/// Bounded history of ask prices for both outcomes of one market
#[derive(Debug, Clone)]
pub struct PriceHistory {
    capacity: usize,
    up: VecDeque<(DateTime<Utc>, Decimal)>,
    down: VecDeque<(DateTime<Utc>, Decimal)>,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            up: VecDeque::with_capacity(capacity),
            down: VecDeque::with_capacity(capacity),
        }
    }

    fn series(&self, outcome: Outcome) -> &VecDeque<(DateTime<Utc>, Decimal)> {
        match outcome {
            Outcome::Up => &self.up,
            Outcome::Down => &self.down,
        }
    }

    /// Add an observation, evicting the oldest beyond capacity
    pub fn push(&mut self, outcome: Outcome, timestamp: DateTime<Utc>, price: Decimal) {
        let capacity = self.capacity;
        let series = match outcome {
            Outcome::Up => &mut self.up,
            Outcome::Down => &mut self.down,
        };
        series.push_back((timestamp, price));
        while series.len() > capacity {
            series.pop_front();
        }
    }

    pub fn len(&self, outcome: Outcome) -> usize {
        self.series(outcome).len()
    }

    pub fn latest(&self, outcome: Outcome) -> Option<Decimal> {
        self.series(outcome).back().map(|(_, p)| *p)
    }

    /// Prices oldest first
    pub fn prices(&self, outcome: Outcome) -> impl Iterator<Item = Decimal> + '_ {
        self.series(outcome).iter().map(|(_, p)| *p)
    }

    /// Fractional change over the last `lookback` observations
    pub fn rate_of_change(&self, outcome: Outcome, lookback: usize) -> Option<Decimal> {
        let series = self.series(outcome);
        if lookback == 0 || series.len() <= lookback {
            return None;
        }
        let (_, past) = series[series.len() - 1 - lookback];
        let (_, last) = *series.back()?;
        if past.is_zero() {
            return None;
        }
        Some((last - past) / past)
    }

    /// Simple moving average of the last `period` observations
    pub fn sma(&self, outcome: Outcome, period: usize) -> Option<Decimal> {
        let series = self.series(outcome);
        if period == 0 || series.len() < period {
            return None;
        }
        let sum: Decimal = series.iter().rev().take(period).map(|(_, p)| *p).sum();
        Some(sum / Decimal::from(period))
    }

    /// Relative strength index over `period` price changes, 0..=100
    pub fn rsi(&self, outcome: Outcome, period: usize) -> Option<Decimal> {
        let series = self.series(outcome);
        if period == 0 || series.len() < period + 1 {
            return None;
        }

        let start = series.len() - period - 1;
        let (mut gains, mut losses) = (Decimal::ZERO, Decimal::ZERO);
        for i in start..series.len() - 1 {
            let change = series[i + 1].1 - series[i].1;
            if change > Decimal::ZERO {
                gains += change;
            } else {
                losses -= change;
            }
        }

        if losses.is_zero() {
            return Some(if gains.is_zero() { dec!(50) } else { dec!(100) });
        }
        let rs = gains / losses;
        Some(dec!(100) - dec!(100) / (Decimal::ONE + rs))
    }
}

impl Default for PriceHistory {
    fn default() -> Self {
        Self::new(64)
    }
}
