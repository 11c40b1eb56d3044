//! Risk management types

use super::HaltReason;
use crate::store::ExitReason;
use rust_decimal::Decimal;
use thiserror::Error;

/// Risk management errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    /// Committed exposure would exceed the per-portfolio position cap
    #[error("Position too large: {committed} committed, cap {cap}")]
    PositionTooLarge { committed: Decimal, cap: Decimal },
    /// Committed exposure would exceed the leverage cap
    #[error("Leverage exceeded: {committed} committed, cap {cap}")]
    LeverageExceeded { committed: Decimal, cap: Decimal },
    /// Not enough unreserved cash for the order
    #[error("Insufficient cash: need {needed}, available {available}")]
    InsufficientCash { needed: Decimal, available: Decimal },
    /// Trading has been halted
    #[error("Trading halted: {0:?}")]
    TradingHalted(HaltReason),
}

/// Outcome of evaluating an open position against a new price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDecision {
    Hold,
    ForceSell(ExitReason),
}
