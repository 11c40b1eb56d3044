//! Risk management module
//!
//! Stop-loss and trailing-stop exits for held positions, plus portfolio
//! exposure, leverage and daily loss limits for new entries. Forced exits
//! from here take priority over strategy exits.

mod limits;
mod stops;
mod types;

pub use limits::{check_entry, ExposureSnapshot, HaltReason, PortfolioLimits};
pub use stops::StopRules;
pub use types::{RiskDecision, RiskError};

use crate::config::RiskConfig;
use crate::store::{Position, PositionState};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Applies the configured risk rules
#[derive(Debug, Clone)]
pub struct RiskManager {
    stops: StopRules,
    limits: PortfolioLimits,
    stop_loss_price: Decimal,
}

impl RiskManager {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            stops: StopRules::from(config),
            limits: PortfolioLimits::from(config),
            stop_loss_price: config.stop_loss_price,
        }
    }

    /// Stop-loss price assigned to new positions
    pub fn stop_loss_price(&self) -> Decimal {
        self.stop_loss_price
    }

    /// Entry limits checked by the store when reserving capital
    pub fn limits(&self) -> &PortfolioLimits {
        &self.limits
    }

    /// Decide whether a held position must be sold at the current bid
    pub fn evaluate(
        &self,
        position: &Position,
        bid: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        match (position.state, bid) {
            (PositionState::Open, Some(bid)) => self.stops.evaluate(position, bid, now),
            _ => RiskDecision::Hold,
        }
    }

    /// Pre-trade check of a new entry
    pub fn check_entry(&self, notional: Decimal, snapshot: &ExposureSnapshot) -> Result<(), RiskError> {
        check_entry(notional, snapshot, &self.limits)
    }
}
