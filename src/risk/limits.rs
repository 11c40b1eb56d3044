//! Portfolio limits and daily loss halt

use super::RiskError;
use crate::config::RiskConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Portfolio-wide entry limits
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioLimits {
    /// Maximum committed exposure as a fraction of equity
    pub max_position_size: Decimal,
    /// Maximum committed exposure as a multiple of equity
    pub max_leverage: Decimal,
    /// Realized loss for the UTC day that halts new entries
    pub max_daily_loss: Option<Decimal>,
}

impl From<&RiskConfig> for PortfolioLimits {
    fn from(config: &RiskConfig) -> Self {
        Self {
            max_position_size: config.max_position_size,
            max_leverage: config.max_leverage,
            max_daily_loss: config.max_daily_loss,
        }
    }
}

/// Reason for trading halt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HaltReason {
    /// Realized loss for the day reached the limit
    MaxDailyLossReached(Decimal),
}

/// Point-in-time view of capital and exposure, taken under the store lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureSnapshot {
    /// Cash balance, including cash reserved for pending entries
    pub cash: Decimal,
    /// Notional reserved for entries not yet filled
    pub reserved: Decimal,
    /// Cost basis of shares still held
    pub open_notional: Decimal,
    /// Realized P&L of trades closed today (UTC)
    pub daily_realized_pnl: Decimal,
    /// Positions in any non-closed state
    pub open_positions: usize,
}

impl ExposureSnapshot {
    /// Cash plus cost basis of held shares
    pub fn equity(&self) -> Decimal {
        self.cash + self.open_notional
    }

    /// Exposure already spoken for
    pub fn committed(&self) -> Decimal {
        self.open_notional + self.reserved
    }

    /// Cash not yet reserved
    pub fn available(&self) -> Decimal {
        (self.cash - self.reserved).max(Decimal::ZERO)
    }

    /// Daily loss halt, if tripped
    pub fn should_halt(&self, limits: &PortfolioLimits) -> Option<HaltReason> {
        let max_loss = limits.max_daily_loss?;
        (self.daily_realized_pnl <= -max_loss)
            .then_some(HaltReason::MaxDailyLossReached(self.daily_realized_pnl))
    }
}

/// Check whether a new entry of `notional` fits the portfolio limits
pub fn check_entry(
    notional: Decimal,
    snapshot: &ExposureSnapshot,
    limits: &PortfolioLimits,
) -> Result<(), RiskError> {
    if let Some(reason) = snapshot.should_halt(limits) {
        return Err(RiskError::TradingHalted(reason));
    }

    let available = snapshot.available();
    if notional > available {
        return Err(RiskError::InsufficientCash {
            needed: notional,
            available,
        });
    }

    let equity = snapshot.equity();
    let committed = snapshot.committed() + notional;

    let cap = limits.max_position_size * equity;
    if committed > cap {
        return Err(RiskError::PositionTooLarge { committed, cap });
    }

    let cap = limits.max_leverage * equity;
    if committed > cap {
        return Err(RiskError::LeverageExceeded { committed, cap });
    }

    Ok(())
}
