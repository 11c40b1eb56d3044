//! Ledger record types

use crate::gateway::Side;
use crate::market::{Market, Outcome, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Position lifecycle; a market with no record has no position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    PendingEntry,
    Open,
    PendingExit,
    Closed,
}

/// Why a position was exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StrategyTarget,
    StopLoss,
    TrailingStop,
    PreResolution,
    Resolution,
    Manual,
}

impl ExitReason {
    /// Component credited with the exit
    pub fn attribution(&self) -> Attribution {
        match self {
            ExitReason::StrategyTarget | ExitReason::PreResolution => Attribution::Strategy,
            ExitReason::StopLoss | ExitReason::TrailingStop => Attribution::Risk,
            ExitReason::Resolution => Attribution::Resolution,
            ExitReason::Manual => Attribution::Manual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribution {
    Strategy,
    Risk,
    Resolution,
    Manual,
}

/// A long position in one outcome token of one market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    /// Market summary, enough to re-monitor after restart
    pub market: Market,
    pub outcome: Outcome,
    pub state: PositionState,
    /// Average entry fill price (limit price until the first fill)
    pub entry_price: Decimal,
    /// Shares bought
    pub size: Decimal,
    /// Notional held back for the unfilled part of the entry
    pub reserved: Decimal,
    pub opened_at: DateTime<Utc>,
    pub stop_loss: Decimal,
    /// Highest bid seen since entry
    pub high_water: Decimal,
    pub last_mark: Option<Decimal>,
    /// Entry and exit fees
    pub fees: Decimal,
    /// Shares sold so far
    pub exit_filled: Decimal,
    /// Gross proceeds of shares sold so far
    pub exit_proceeds: Decimal,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    pub fn condition_id(&self) -> &str {
        &self.market.condition_id
    }

    pub fn token_id(&self) -> &str {
        self.market.token_id(self.outcome)
    }

    /// Shares still held
    pub fn remaining(&self) -> Decimal {
        (self.size - self.exit_filled).max(Decimal::ZERO)
    }

    /// Cost basis of the shares still held
    pub fn open_notional(&self) -> Decimal {
        self.entry_price * self.remaining()
    }

    /// Unrealized P&L at the last mark
    pub fn unrealized_pnl(&self) -> Option<Decimal> {
        self.last_mark
            .map(|mark| (mark - self.entry_price) * self.remaining())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPurpose {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Written ahead of the gateway call, or resting with nothing filled
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    /// Cancelled by the sweep after sitting unfilled too long
    Stale,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Stale
        )
    }
}

/// Local record of an order, persisted before it is sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub exchange_id: Option<String>,
    pub condition_id: String,
    pub token_id: String,
    pub purpose: OrderPurpose,
    pub side: Side,
    pub outcome: Outcome,
    /// Limit price
    pub price: Decimal,
    pub size: Decimal,
    pub filled: Decimal,
    pub avg_price: Option<Decimal>,
    pub fees: Decimal,
    pub submitted_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub retries: u32,
    pub last_error: Option<String>,
}

impl OrderRecord {
    /// Notional of what has filled so far
    pub fn filled_notional(&self) -> Decimal {
        self.avg_price.unwrap_or(self.price) * self.filled
    }
}

/// Immutable record of a closed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub condition_id: String,
    pub symbol: Symbol,
    pub outcome: Outcome,
    pub entry_price: Decimal,
    /// Average exit price; 1 or 0 for a resolution payout
    pub exit_price: Decimal,
    pub size: Decimal,
    pub fees: Decimal,
    pub realized_pnl: Decimal,
    pub exit_reason: ExitReason,
    pub attribution: Attribution,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimState {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

/// Winning shares waiting to be redeemed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimableItem {
    pub id: Uuid,
    pub condition_id: String,
    pub symbol: Symbol,
    pub outcome: Outcome,
    pub token_id: String,
    pub size: Decimal,
    pub expected_payout: Decimal,
    pub status: ClaimState,
    pub tx_id: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What applying an order update did to the owning position
#[derive(Debug, Clone, PartialEq)]
pub enum FillEffect {
    /// Order still working
    Pending,
    /// Entry order finished with shares bought
    EntryOpened(Position),
    /// Entry order finished without a fill; position dropped
    EntryVoid,
    /// Exit order finished with shares still held
    ExitRemaining(Decimal),
    /// Every share sold
    Closed(TradeRecord),
    /// Order no longer has a position to apply to
    Orphan,
}

/// What resolving a market did to its position
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    NoPosition,
    Won {
        trade: TradeRecord,
        claim: Option<ClaimableItem>,
    },
    Lost(TradeRecord),
}

/// Realized results since the last P&L reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PnlSummary {
    pub realized_pnl: Decimal,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub fees: Decimal,
    pub reset_at: Option<DateTime<Utc>>,
}

impl PnlSummary {
    /// Wins as a fraction of closed trades
    pub fn win_rate(&self) -> Option<Decimal> {
        (self.trades > 0).then(|| Decimal::from(self.wins) / Decimal::from(self.trades))
    }
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Market {0} already has a position")]
    PositionExists(String),
    #[error("Market {0} was already traded this window")]
    AlreadyTraded(String),
    #[error("No position for market {0}")]
    NoPosition(String),
    #[error("Position in {condition_id} is {actual:?}, expected {expected:?}")]
    InvalidTransition {
        condition_id: String,
        expected: PositionState,
        actual: PositionState,
    },
    #[error("Unknown order {0}")]
    UnknownOrder(Uuid),
    #[error("No claim for market {0}")]
    NoClaim(String),
    #[error(transparent)]
    Risk(#[from] crate::risk::RiskError),
}

#[cfg(test)]
pub(crate) fn test_market(symbol: Symbol, start: i64) -> Market {
    use crate::market::{window_slug, MarketState, WINDOW_SECS};
    use chrono::TimeZone;

    let window_start = Utc.timestamp_opt(start, 0).unwrap();
    let prefix = symbol.slug_prefix();
    Market {
        condition_id: format!("0x{prefix}{start}"),
        symbol,
        slug: window_slug(symbol, window_start),
        up_token_id: format!("{prefix}-{start}-up"),
        down_token_id: format!("{prefix}-{start}-down"),
        window_start,
        resolution_time: window_start + chrono::Duration::seconds(WINDOW_SECS),
        min_order_size: Decimal::from(5),
        max_order_size: None,
        state: MarketState::Active,
        winner: None,
        legacy: false,
    }
}

#[cfg(test)]
pub(crate) fn test_position(entry_price: Decimal, size: Decimal) -> Position {
    let market = test_market(Symbol::Btc, 1_767_638_700);
    Position {
        id: Uuid::new_v4(),
        opened_at: market.resolution_time - chrono::Duration::seconds(120),
        market,
        outcome: Outcome::Up,
        state: PositionState::Open,
        entry_price,
        size,
        reserved: Decimal::ZERO,
        stop_loss: Decimal::new(92, 2),
        high_water: entry_price,
        last_mark: None,
        fees: Decimal::ZERO,
        exit_filled: Decimal::ZERO,
        exit_proceeds: Decimal::ZERO,
        exit_reason: None,
    }
}
