//! Stop-loss and trailing-stop rules

use super::RiskDecision;
use crate::config::RiskConfig;
use crate::store::{ExitReason, Position};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

/// Exit rules evaluated on every tick for a held position
#[derive(Debug, Clone)]
pub struct StopRules {
    pub trailing_distance: Decimal,
    /// Trailing rule only arms once the high-water mark reaches this price
    pub trailing_activation: Option<Decimal>,
    pub grace: Duration,
}

impl From<&RiskConfig> for StopRules {
    fn from(config: &RiskConfig) -> Self {
        Self {
            trailing_distance: config.trailing_stop_distance,
            trailing_activation: config.trailing_stop_activation_price,
            grace: Duration::seconds(config.stop_grace_secs as i64),
        }
    }
}

impl StopRules {
    /// Evaluate a position against the current best bid
    ///
    /// Stop-loss is checked before the trailing stop. The position's own
    /// `stop_loss` and `high_water` are used, so callers should ratchet the
    /// high-water mark before evaluating.
    pub fn evaluate(&self, position: &Position, bid: Decimal, now: DateTime<Utc>) -> RiskDecision {
        if now - position.opened_at < self.grace {
            return RiskDecision::Hold;
        }

        if bid <= position.stop_loss {
            return RiskDecision::ForceSell(ExitReason::StopLoss);
        }

        if self.trailing_armed(position.high_water)
            && bid <= position.high_water - self.trailing_distance
        {
            return RiskDecision::ForceSell(ExitReason::TrailingStop);
        }

        RiskDecision::Hold
    }

    fn trailing_armed(&self, high_water: Decimal) -> bool {
        self.trailing_distance > Decimal::ZERO
            && self
                .trailing_activation
                .map_or(true, |activation| high_water >= activation)
    }
}
