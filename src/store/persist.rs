//! On-disk layout: `state.json` snapshot plus `trades.jsonl` ledger

use super::{ClaimableItem, OrderRecord, Position, StoreError, TradeRecord};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub const STATE_FILE: &str = "state.json";
pub const TRADES_FILE: &str = "trades.jsonl";

/// Everything except the trade ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Non-closed positions by condition id
    #[serde(default)]
    pub positions: HashMap<String, Position>,
    #[serde(default)]
    pub orders: HashMap<Uuid, OrderRecord>,
    #[serde(default)]
    pub claims: Vec<ClaimableItem>,
    #[serde(default)]
    pub confirmed_claims: BTreeSet<String>,
    /// Markets already entered this window; never entered again
    #[serde(default)]
    pub traded_markets: BTreeSet<String>,
    /// Last known cash balance
    #[serde(default)]
    pub cash: Decimal,
    #[serde(default)]
    pub pnl_reset_at: Option<DateTime<Utc>>,
    /// Closed trades saved here before they reach `trades.jsonl`
    #[serde(default)]
    pub unlogged_trades: Vec<TradeRecord>,
}

pub fn state_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE)
}

pub fn trades_path(dir: &Path) -> PathBuf {
    dir.join(TRADES_FILE)
}

/// Load the snapshot; a missing file is an empty ledger
pub async fn load_state(path: &Path) -> Result<Option<PersistedState>, StoreError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&text)?))
}

/// Write the snapshot through a temp file and rename
pub async fn save_state(path: &Path, state: &PersistedState) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(state)?;
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read every trade; a torn final line from a crash is skipped
pub async fn load_trades(path: &Path) -> Result<Vec<TradeRecord>, StoreError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut trades = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(trade) => trades.push(trade),
            Err(e) => tracing::warn!(line = n + 1, error = %e, "Skipping unreadable trade record"),
        }
    }
    Ok(trades)
}

/// Append one trade to the ledger
pub async fn append_trade(path: &Path, trade: &TradeRecord) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_vec(trade)?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.sync_data().await?;
    Ok(())
}
