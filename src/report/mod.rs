//! Read-only views of the ledger for the CLI and dashboard
//!
//! Open positions with unrealized P&L at the last mark, closed trades, and
//! aggregate results since the last P&L reset.

use crate::market::{Outcome, Symbol};
use crate::risk::ExposureSnapshot;
use crate::store::{ClaimableItem, LedgerStore, PnlSummary, PositionState, TradeRecord};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt::Write;

/// One open position as shown to operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionView {
    pub condition_id: String,
    pub symbol: Symbol,
    pub slug: String,
    pub outcome: Outcome,
    pub state: PositionState,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub last_mark: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub resolution_time: DateTime<Utc>,
}

/// Snapshot of the whole ledger
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub exposure: ExposureSnapshot,
    pub positions: Vec<PositionView>,
    pub summary: PnlSummary,
    pub pending_claims: Vec<ClaimableItem>,
}

impl Report {
    pub async fn build(store: &LedgerStore, now: DateTime<Utc>) -> Self {
        let positions = store
            .positions()
            .await
            .into_iter()
            .map(|p| PositionView {
                condition_id: p.condition_id().to_string(),
                symbol: p.market.symbol,
                slug: p.market.slug.clone(),
                outcome: p.outcome,
                state: p.state,
                size: p.remaining(),
                entry_price: p.entry_price,
                last_mark: p.last_mark,
                unrealized_pnl: p.unrealized_pnl(),
                resolution_time: p.market.resolution_time,
            })
            .collect();

        Self {
            generated_at: now,
            exposure: store.exposure(now).await,
            positions,
            summary: store.summary().await,
            pending_claims: store.claims().await,
        }
    }

    /// Total unrealized P&L over positions with a mark
    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.iter().filter_map(|p| p.unrealized_pnl).sum()
    }

    pub fn format_table(&self) -> String {
        let s = &self.summary;
        let win_rate = s
            .win_rate()
            .map(|r| format!("{:.1}%", r * dec!(100)))
            .unwrap_or_else(|| "-".to_string());
        let since = s
            .reset_at
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "start".to_string());

        let mut out = format!(
            r#"
══════════════════════════════════════════════════════
               POLY-SNIPE STATUS
══════════════════════════════════════════════════════

CAPITAL
───────────────────────────────────────────────────────
Cash:             {:.2}
Reserved:         {:.2}
Open Notional:    {:.2}
Unrealized P&L:   {:+.2}

RESULTS (since {})
───────────────────────────────────────────────────────
Realized P&L:     {:+.2}
Trades:           {} ({} won / {} lost)
Win Rate:         {}
Fees:             {:.2}
"#,
            self.exposure.cash,
            self.exposure.reserved,
            self.exposure.open_notional,
            self.unrealized_pnl(),
            since,
            s.realized_pnl,
            s.trades,
            s.wins,
            s.losses,
            win_rate,
            s.fees,
        );

        out.push_str("\nPOSITIONS\n───────────────────────────────────────────────────────\n");
        if self.positions.is_empty() {
            out.push_str("(none)\n");
        }
        for p in &self.positions {
            let _ = writeln!(
                out,
                "{:<28} {:<4} {:<13} {:>8} @ {:<6} mark {:<6} pnl {}",
                p.slug,
                p.outcome,
                format!("{:?}", p.state),
                p.size,
                p.entry_price,
                p.last_mark.map_or("-".to_string(), |m| m.to_string()),
                p.unrealized_pnl
                    .map_or("-".to_string(), |u| format!("{:+.2}", u)),
            );
        }

        if !self.pending_claims.is_empty() {
            out.push_str("\nCLAIMS\n───────────────────────────────────────────────────────\n");
            for c in &self.pending_claims {
                let _ = writeln!(
                    out,
                    "{:<20} {:<4} {:>8} payout {:.2} {:?} attempts {}",
                    short_id(&c.condition_id),
                    c.symbol,
                    c.size,
                    c.expected_payout,
                    c.status,
                    c.attempts,
                );
            }
        }
        out.push_str("══════════════════════════════════════════════════════\n");
        out
    }
}

/// Closed trades, newest first, as a text table
pub fn format_trades(trades: &[TradeRecord], limit: usize) -> String {
    let mut out = String::from(
        "CLOSED                SYM  OUT   SIZE     ENTRY  EXIT   P&L      REASON\n",
    );
    for t in trades.iter().rev().take(limit) {
        let _ = writeln!(
            out,
            "{:<21} {:<4} {:<5} {:<8} {:<6} {:<6} {:<+8.2} {:?}/{:?}",
            t.closed_at.format("%m-%d %H:%M:%S"),
            t.symbol,
            t.outcome,
            t.size,
            t.entry_price,
            t.exit_price.round_dp(3),
            t.realized_pnl,
            t.exit_reason,
            t.attribution,
        );
    }
    if trades.is_empty() {
        out.push_str("(no trades)\n");
    }
    out
}

fn short_id(id: &str) -> String {
    if id.len() > 18 {
        format!("{}…{}", &id[..10], &id[id.len() - 6..])
    } else {
        id.to_string()
    }
}
