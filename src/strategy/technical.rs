//! Technical: RSI and moving-average crossover on the Up token
//!
//! Each indicator votes for an outcome; the majority side is bought.

use super::{order_size, target_exit, Decision, DecisionStrategy, MarketView, PriceHistory};
use crate::config::TechnicalConfig;
use crate::market::Outcome;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub struct Technical {
    config: TechnicalConfig,
}

impl Technical {
    pub fn new(config: TechnicalConfig) -> Self {
        Self { config }
    }

    fn signal(&self, history: &PriceHistory) -> Option<Outcome> {
        let mut up_votes = 0i32;
        let oversold = dec!(100) - self.config.rsi_overbought;

        if let Some(rsi) = history.rsi(Outcome::Up, self.config.rsi_period) {
            if rsi < oversold {
                up_votes += 1;
            } else if rsi > self.config.rsi_overbought {
                up_votes -= 1;
            }
        }

        let fast = history.sma(Outcome::Up, self.config.fast_ma);
        let slow = history.sma(Outcome::Up, self.config.slow_ma);
        if let (Some(fast), Some(slow)) = (fast, slow) {
            match fast.cmp(&slow) {
                std::cmp::Ordering::Greater => up_votes += 1,
                std::cmp::Ordering::Less => up_votes -= 1,
                std::cmp::Ordering::Equal => {}
            }
        }

        match up_votes.signum() {
            1 => Some(Outcome::Up),
            -1 => Some(Outcome::Down),
            _ => None,
        }
    }
}

impl DecisionStrategy for Technical {
    fn name(&self) -> &'static str {
        "technical"
    }

    fn decide(&mut self, view: &MarketView<'_>, history: &PriceHistory) -> Decision {
        if view.holding.is_some() {
            return target_exit(view, self.config.target_price);
        }
        if !view.in_final_window(self.config.max_time_before_resolution_secs) {
            return Decision::Hold;
        }

        let Some(outcome) = self.signal(history) else {
            return Decision::Hold;
        };
        let ask = match view.quote(outcome).best_ask {
            Some(ask) if ask > Decimal::ZERO && ask <= self.config.max_price => ask,
            _ => return Decision::Hold,
        };
        match order_size(view.market, self.config.order_size) {
            Some(size) => Decision::Buy {
                outcome,
                price: ask,
                size,
            },
            None => Decision::Hold,
        }
    }
}
