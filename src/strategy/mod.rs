//! Strategy module
//!
//! Decision functions that look at one market's quotes and price history and
//! say buy, sell or hold. Monitors own one strategy instance per market; risk
//! checks, execution and state handling are shared by every strategy.

mod buy_once;
mod history;
mod momentum;
mod technical;

pub use buy_once::BuyOnce;
pub use history::PriceHistory;
pub use momentum::Momentum;
pub use technical::Technical;

use crate::config::{StrategyConfig, StrategyKind};
use crate::market::{Market, Outcome, Quote};
use crate::store::ExitReason;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Highest price any buy is submitted at
pub const MAX_LIMIT_PRICE: Decimal = dec!(0.99);

/// Per-market trading phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Watching,
    BuyPending,
    Holding,
    SellPending,
    Sold,
    ResolvedWin,
    ResolvedLoss,
    /// Buy never filled before resolution
    Abandoned,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Sold | Phase::ResolvedWin | Phase::ResolvedLoss | Phase::Abandoned
        )
    }
}

/// Shares held in a market, as seen by a strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Holding {
    pub outcome: Outcome,
    pub entry_price: Decimal,
    pub size: Decimal,
}

/// Everything a strategy may look at for one decision
#[derive(Debug, Clone)]
pub struct MarketView<'a> {
    pub market: &'a Market,
    pub up: Quote,
    pub down: Quote,
    pub holding: Option<Holding>,
    pub now: DateTime<Utc>,
}

impl MarketView<'_> {
    pub fn quote(&self, outcome: Outcome) -> Quote {
        match outcome {
            Outcome::Up => self.up,
            Outcome::Down => self.down,
        }
    }

    pub fn seconds_to_resolution(&self) -> i64 {
        self.market.seconds_to_resolution(self.now)
    }

    /// Strictly before resolution and no more than `max_secs` ahead of it
    pub fn in_final_window(&self, max_secs: u64) -> bool {
        let remaining = self.seconds_to_resolution();
        remaining > 0 && remaining <= max_secs as i64
    }
}

/// What a strategy wants done
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Hold,
    Buy {
        outcome: Outcome,
        price: Decimal,
        size: Decimal,
    },
    Sell {
        reason: ExitReason,
        price: Decimal,
    },
}

/// A pluggable buy/sell/hold decision function
pub trait DecisionStrategy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Decide on the latest view; `history` already includes the current tick
    fn decide(&mut self, view: &MarketView<'_>, history: &PriceHistory) -> Decision;
}

/// Build a fresh strategy instance for one market
pub fn build_strategy(config: &StrategyConfig) -> Box<dyn DecisionStrategy> {
    match config.kind {
        StrategyKind::BuyOnce => Box::new(BuyOnce::new(config.buy_once.clone())),
        StrategyKind::Momentum => Box::new(Momentum::new(config.momentum.clone())),
        StrategyKind::Technical => Box::new(Technical::new(config.technical.clone())),
    }
}

/// History depth a strategy needs
pub fn history_capacity(config: &StrategyConfig) -> usize {
    match config.kind {
        StrategyKind::BuyOnce => 16,
        StrategyKind::Momentum => config.momentum.lookback_ticks + 1,
        StrategyKind::Technical => {
            (config.technical.rsi_period + 1).max(config.technical.slow_ma) * 2
        }
    }
}

/// Order size for a market: its configured cap, else the strategy default
///
/// `None` when the size is under the market's minimum.
pub fn order_size(market: &Market, default_size: Decimal) -> Option<Decimal> {
    let size = market.max_order_size.unwrap_or(default_size);
    (size >= market.min_order_size && size > Decimal::ZERO).then_some(size)
}

/// Sell a holding once its ask reaches the target, at the current bid
pub(crate) fn target_exit(view: &MarketView<'_>, target: Decimal) -> Decision {
    let Some(holding) = view.holding else {
        return Decision::Hold;
    };
    let quote = view.quote(holding.outcome);
    match (quote.best_ask, quote.best_bid) {
        (Some(ask), bid) if ask >= target => Decision::Sell {
            reason: ExitReason::StrategyTarget,
            price: bid.unwrap_or(target),
        },
        _ => Decision::Hold,
    }
}
