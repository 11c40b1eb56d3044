//! Momentum: buy the outcome whose ask is climbing fastest

use super::{order_size, target_exit, Decision, DecisionStrategy, MarketView, PriceHistory};
use crate::config::MomentumConfig;
use crate::market::Outcome;

pub struct Momentum {
    config: MomentumConfig,
}

impl Momentum {
    pub fn new(config: MomentumConfig) -> Self {
        Self { config }
    }
}

impl DecisionStrategy for Momentum {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn decide(&mut self, view: &MarketView<'_>, history: &PriceHistory) -> Decision {
        if view.holding.is_some() {
            return target_exit(view, self.config.target_price);
        }
        if !view.in_final_window(self.config.max_time_before_resolution_secs) {
            return Decision::Hold;
        }

        let best = Outcome::BOTH
            .into_iter()
            .filter_map(|outcome| {
                let ask = view.quote(outcome).best_ask?;
                let roc = history.rate_of_change(outcome, self.config.lookback_ticks)?;
                (roc >= self.config.min_rate_of_change && ask <= self.config.max_price)
                    .then_some((outcome, ask, roc))
            })
            .max_by(|a, b| a.2.cmp(&b.2));

        match (best, order_size(view.market, self.config.order_size)) {
            (Some((outcome, price, _)), Some(size)) => Decision::Buy {
                outcome,
                price,
                size,
            },
            _ => Decision::Hold,
        }
    }
}
