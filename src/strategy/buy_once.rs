//! Buy-once sniping: buy late in the window when an outcome trades just under 1

use super::{order_size, target_exit, Decision, DecisionStrategy, MarketView, PriceHistory, MAX_LIMIT_PRICE};
use crate::config::BuyOnceConfig;
use crate::market::Outcome;
use crate::store::ExitReason;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Buys one outcome once its ask sits inside `[min_price, max_price]` close
/// to resolution, then holds to resolution or the target price
pub struct BuyOnce {
    config: BuyOnceConfig,
    /// When each outcome's ask entered the band (Up, Down)
    in_band_since: [Option<DateTime<Utc>>; 2],
}

impl BuyOnce {
    pub fn new(config: BuyOnceConfig) -> Self {
        Self {
            config,
            in_band_since: [None; 2],
        }
    }

    fn limit_price(&self, ask: Decimal) -> Decimal {
        if !self.config.aggressive_pricing {
            return ask;
        }
        (ask * (Decimal::ONE + self.config.aggressive_premium))
            .min(MAX_LIMIT_PRICE)
            .round_dp(3)
            .max(ask.min(MAX_LIMIT_PRICE))
    }

    fn in_band(&self, ask: Decimal) -> bool {
        ask >= self.config.min_price && ask <= self.config.max_price
    }

    fn exit(&self, view: &MarketView<'_>) -> Decision {
        if let Some(holding) = view.holding {
            let remaining = view.seconds_to_resolution();
            let bid = view.quote(holding.outcome).best_bid;
            if self.config.pre_resolution_exit
                && remaining > 0
                && remaining <= self.config.pre_resolution_secs as i64
            {
                if let Some(bid) = bid.filter(|b| *b >= self.config.pre_resolution_min_price) {
                    return Decision::Sell {
                        reason: ExitReason::PreResolution,
                        price: bid,
                    };
                }
            }
        }
        target_exit(view, self.config.target_price)
    }
}

fn slot(outcome: Outcome) -> usize {
    match outcome {
        Outcome::Up => 0,
        Outcome::Down => 1,
    }
}

impl DecisionStrategy for BuyOnce {
    fn name(&self) -> &'static str {
        "buy_once"
    }

    fn decide(&mut self, view: &MarketView<'_>, _history: &PriceHistory) -> Decision {
        if view.holding.is_some() {
            return self.exit(view);
        }

        if !view.in_final_window(self.config.max_time_before_resolution_secs) {
            self.in_band_since = [None; 2];
            return Decision::Hold;
        }

        for outcome in Outcome::BOTH {
            let i = slot(outcome);
            let Some(ask) = view.quote(outcome).best_ask.filter(|a| self.in_band(*a)) else {
                self.in_band_since[i] = None;
                continue;
            };

            let since = *self.in_band_since[i].get_or_insert(view.now);
            if (view.now - since).num_seconds() < self.config.stability_secs as i64 {
                continue;
            }

            let Some(size) = order_size(view.market, self.config.order_size) else {
                tracing::debug!(
                    condition_id = %view.market.condition_id,
                    min = %view.market.min_order_size,
                    "Order size below market minimum"
                );
                return Decision::Hold;
            };

            return Decision::Buy {
                outcome,
                price: self.limit_price(ask),
                size,
            };
        }

        Decision::Hold
    }
}
