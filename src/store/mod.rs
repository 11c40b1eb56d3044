//! Position and ledger store
//!
//! Sole owner of positions, orders, trades and claims. State lives in
//! `state.json` (rewritten atomically on every mutation) and closed trades in
//! the append-only `trades.jsonl`.

mod ledger;
mod persist;
mod types;

pub use ledger::LedgerStore;
pub use persist::{PersistedState, STATE_FILE, TRADES_FILE};
pub use types::{
    Attribution, ClaimState, ClaimableItem, ExitReason, FillEffect, OrderPurpose, OrderRecord,
    OrderStatus, PnlSummary, Position, PositionState, Settlement, StoreError, TradeRecord,
};

#[cfg(test)]
pub(crate) use types::{test_market, test_position};
