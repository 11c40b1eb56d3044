//! Executor types

use crate::store::{FillEffect, OrderPurpose, OrderStatus, StoreError};
use thiserror::Error;
use uuid::Uuid;

/// Order execution errors
#[derive(Debug, Error)]
pub enum ExecError {
    /// Another order for this market is in flight
    #[error("Order slot busy for market {0}")]
    SlotBusy(String),
    /// Order submission halted after an authentication failure
    #[error("Order submission halted")]
    Halted,
    #[error("Order rejected: {0}")]
    Rejected(String),
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a submission
#[derive(Debug, Clone, PartialEq)]
pub struct OrderHandle {
    pub order_id: Uuid,
    pub exchange_id: String,
    pub status: OrderStatus,
    pub effect: FillEffect,
}

impl OrderHandle {
    /// Still resting on the book
    pub fn is_working(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Asynchronous order outcome found by a sweep, routed to the owning market
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub condition_id: String,
    pub order_id: Uuid,
    pub purpose: OrderPurpose,
    pub status: OrderStatus,
    pub effect: FillEffect,
}
