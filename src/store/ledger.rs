//! Transactional ledger of positions, orders, trades and claims

use super::persist::{self, PersistedState};
use super::{
    ClaimState, ClaimableItem, ExitReason, FillEffect, OrderPurpose, OrderRecord, OrderStatus,
    PnlSummary, Position, PositionState, Settlement, StoreError, TradeRecord,
};
use crate::gateway::{AckStatus, OrderAck};
use crate::market::{Market, Outcome};
use crate::risk::{check_entry, ExposureSnapshot, PortfolioLimits};
use crate::telemetry::{set_gauge, GaugeMetric};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Ledger {
    state: PersistedState,
    trades: Vec<TradeRecord>,
}

impl Ledger {
    fn exposure(&self, now: DateTime<Utc>) -> ExposureSnapshot {
        let today = now.date_naive();
        let mut snapshot = ExposureSnapshot {
            cash: self.state.cash,
            daily_realized_pnl: self
                .trades
                .iter()
                .filter(|t| t.closed_at.date_naive() == today)
                .map(|t| t.realized_pnl)
                .sum(),
            ..Default::default()
        };
        for position in self.state.positions.values() {
            snapshot.reserved += position.reserved;
            snapshot.open_notional += position.open_notional();
            snapshot.open_positions += 1;
        }
        snapshot
    }

    fn summary(&self) -> PnlSummary {
        let reset_at = self.state.pnl_reset_at;
        let mut summary = PnlSummary {
            reset_at,
            ..Default::default()
        };
        for trade in self
            .trades
            .iter()
            .filter(|t| reset_at.map_or(true, |r| t.closed_at > r))
        {
            summary.trades += 1;
            summary.realized_pnl += trade.realized_pnl;
            summary.fees += trade.fees;
            if trade.is_win() {
                summary.wins += 1;
            } else {
                summary.losses += 1;
            }
        }
        summary
    }

    fn position_mut(&mut self, condition_id: &str) -> Result<&mut Position, StoreError> {
        self.state
            .positions
            .get_mut(condition_id)
            .ok_or_else(|| StoreError::NoPosition(condition_id.to_string()))
    }

    /// Close a position into a trade and drop its finished orders
    fn close(
        &mut self,
        position: Position,
        gross_proceeds: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> TradeRecord {
        let cost = position.entry_price * position.size;
        let exit_price = if position.size.is_zero() {
            Decimal::ZERO
        } else {
            gross_proceeds / position.size
        };

        let trade = TradeRecord {
            id: Uuid::new_v4(),
            condition_id: position.market.condition_id.clone(),
            symbol: position.market.symbol,
            outcome: position.outcome,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            fees: position.fees,
            realized_pnl: gross_proceeds - cost - position.fees,
            exit_reason: reason,
            attribution: reason.attribution(),
            opened_at: position.opened_at,
            closed_at: now,
        };

        let condition_id = position.market.condition_id;
        self.state.positions.remove(&condition_id);
        self.state
            .orders
            .retain(|_, o| o.condition_id != condition_id || !o.status.is_terminal());
        self.trades.push(trade.clone());
        trade
    }

    fn publish(&self, now: DateTime<Utc>) {
        let snapshot = self.exposure(now);
        let summary = self.summary();
        set_gauge(GaugeMetric::Balance, to_f64(snapshot.cash));
        set_gauge(GaugeMetric::OpenPositions, snapshot.open_positions as f64);
        set_gauge(GaugeMetric::TotalExposure, to_f64(snapshot.committed()));
        set_gauge(GaugeMetric::RealizedPnl, to_f64(summary.realized_pnl));
        set_gauge(GaugeMetric::PendingClaims, self.state.claims.len() as f64);
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn order_status(ack: &OrderAck) -> OrderStatus {
    match ack.status {
        AckStatus::Open => OrderStatus::Pending,
        AckStatus::PartiallyFilled => OrderStatus::PartiallyFilled,
        AckStatus::Filled => OrderStatus::Filled,
        AckStatus::Cancelled => OrderStatus::Cancelled,
    }
}

/// Durable ledger shared by every monitor, the executor and the claim scheduler
///
/// All mutations take the single write lock and are written to disk before
/// the lock is released. Position transitions are compare-and-swap on
/// [`PositionState`], so two callers racing for the same transition get
/// exactly one success.
pub struct LedgerStore {
    dir: PathBuf,
    inner: RwLock<Ledger>,
}

impl LedgerStore {
    /// Open (or create) the ledger in `dir`
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut state = persist::load_state(&persist::state_path(&dir))
            .await?
            .unwrap_or_default();
        let trades_path = persist::trades_path(&dir);
        let mut trades = persist::load_trades(&trades_path).await?;
        for trade in std::mem::take(&mut state.unlogged_trades) {
            if trades.iter().any(|t| t.id == trade.id) {
                continue;
            }
            tracing::warn!(trade_id = %trade.id, condition_id = %trade.condition_id, "Appending trade missing from the ledger");
            persist::append_trade(&trades_path, &trade).await?;
            trades.push(trade);
        }

        tracing::info!(
            dir = %dir.display(),
            positions = state.positions.len(),
            orders = state.orders.len(),
            claims = state.claims.len(),
            trades = trades.len(),
            "Ledger loaded"
        );

        Ok(Self {
            dir,
            inner: RwLock::new(Ledger { state, trades }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn save(&self, ledger: &Ledger) -> Result<(), StoreError> {
        persist::save_state(&persist::state_path(&self.dir), &ledger.state).await?;
        ledger.publish(Utc::now());
        Ok(())
    }

    /// Save state with the trade staged in it, then append the trade
    ///
    /// `open` appends a staged trade that never reached `trades.jsonl`,
    /// matching on trade id.
    async fn save_with_trade(&self, ledger: &mut Ledger, trade: &TradeRecord) -> Result<(), StoreError> {
        ledger.state.unlogged_trades.push(trade.clone());
        self.save(ledger).await?;
        persist::append_trade(&persist::trades_path(&self.dir), trade).await?;
        ledger.state.unlogged_trades.retain(|t| t.id != trade.id);
        Ok(())
    }

    /// Write the current state to disk
    pub async fn flush(&self) -> Result<(), StoreError> {
        let ledger = self.inner.read().await;
        self.save(&ledger).await
    }

    // ---- positions ----

    /// Reserve capital and open a pending entry, atomically with the risk check
    ///
    /// Fails when the market already has a position, was already traded,
    /// or the entry breaks a portfolio limit.
    #[allow(clippy::too_many_arguments)]
    pub async fn begin_entry(
        &self,
        market: &Market,
        outcome: Outcome,
        price: Decimal,
        size: Decimal,
        stop_loss: Decimal,
        limits: &PortfolioLimits,
        now: DateTime<Utc>,
    ) -> Result<Position, StoreError> {
        let mut ledger = self.inner.write().await;
        let condition_id = &market.condition_id;

        if ledger.state.positions.contains_key(condition_id) {
            return Err(StoreError::PositionExists(condition_id.clone()));
        }
        if ledger.state.traded_markets.contains(condition_id) {
            return Err(StoreError::AlreadyTraded(condition_id.clone()));
        }

        let notional = price * size;
        check_entry(notional, &ledger.exposure(now), limits)?;

        let position = Position {
            id: Uuid::new_v4(),
            market: market.clone(),
            outcome,
            state: PositionState::PendingEntry,
            entry_price: price,
            size: Decimal::ZERO,
            reserved: notional,
            opened_at: now,
            stop_loss,
            high_water: price,
            last_mark: None,
            fees: Decimal::ZERO,
            exit_filled: Decimal::ZERO,
            exit_proceeds: Decimal::ZERO,
            exit_reason: None,
        };
        ledger
            .state
            .positions
            .insert(condition_id.clone(), position.clone());
        ledger.state.traded_markets.insert(condition_id.clone());
        self.save(&ledger).await?;

        tracing::info!(condition_id = %condition_id, %outcome, %price, %size, "Entry reserved");
        Ok(position)
    }

    /// Give up on a pending entry
    ///
    /// With nothing filled the position is dropped and the market may be
    /// entered again; a partial fill becomes an open position.
    pub async fn abort_entry(&self, condition_id: &str) -> Result<Option<Position>, StoreError> {
        let mut ledger = self.inner.write().await;
        let position = ledger.position_mut(condition_id)?;
        if position.state != PositionState::PendingEntry {
            return Err(StoreError::InvalidTransition {
                condition_id: condition_id.to_string(),
                expected: PositionState::PendingEntry,
                actual: position.state,
            });
        }

        let opened = if position.size.is_zero() {
            ledger.state.positions.remove(condition_id);
            ledger.state.traded_markets.remove(condition_id);
            None
        } else {
            position.state = PositionState::Open;
            position.reserved = Decimal::ZERO;
            position.high_water = position.entry_price;
            Some(position.clone())
        };
        self.save(&ledger).await?;
        Ok(opened)
    }

    /// Open -> PendingExit; fails if an exit is already underway
    pub async fn begin_exit(
        &self,
        condition_id: &str,
        reason: ExitReason,
    ) -> Result<Position, StoreError> {
        let mut ledger = self.inner.write().await;
        let position = ledger.position_mut(condition_id)?;
        if position.state != PositionState::Open {
            return Err(StoreError::InvalidTransition {
                condition_id: condition_id.to_string(),
                expected: PositionState::Open,
                actual: position.state,
            });
        }
        position.state = PositionState::PendingExit;
        position.exit_reason = Some(reason);
        let position = position.clone();
        self.save(&ledger).await?;
        Ok(position)
    }

    /// PendingExit -> Open after an exit could not complete
    pub async fn abort_exit(&self, condition_id: &str) -> Result<Position, StoreError> {
        let mut ledger = self.inner.write().await;
        let position = ledger.position_mut(condition_id)?;
        if position.state != PositionState::PendingExit {
            return Err(StoreError::InvalidTransition {
                condition_id: condition_id.to_string(),
                expected: PositionState::PendingExit,
                actual: position.state,
            });
        }
        position.state = PositionState::Open;
        position.exit_reason = None;
        let position = position.clone();
        self.save(&ledger).await?;
        Ok(position)
    }

    /// Record the latest bid and ratchet the high-water mark
    ///
    /// Only persisted when the high-water mark moves.
    pub async fn mark(&self, condition_id: &str, bid: Decimal) -> Result<Position, StoreError> {
        let mut ledger = self.inner.write().await;
        let position = ledger.position_mut(condition_id)?;
        position.last_mark = Some(bid);

        let raised = matches!(
            position.state,
            PositionState::Open | PositionState::PendingExit
        ) && bid > position.high_water;
        if raised {
            position.high_water = bid;
        }
        let position = position.clone();
        if raised {
            self.save(&ledger).await?;
        }
        Ok(position)
    }

    /// Settle a position at resolution: winners pay 1 per share, losers 0
    ///
    /// A winning position with shares left queues a claim, unless that
    /// market's claim was already confirmed.
    pub async fn resolve(
        &self,
        condition_id: &str,
        winner: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Settlement, StoreError> {
        let mut ledger = self.inner.write().await;
        ledger.state.traded_markets.remove(condition_id);

        let Some(position) = ledger.state.positions.get(condition_id).cloned() else {
            self.save(&ledger).await?;
            return Ok(Settlement::NoPosition);
        };
        if position.size.is_zero() {
            ledger.state.positions.remove(condition_id);
            ledger
                .state
                .orders
                .retain(|_, o| o.condition_id != condition_id);
            self.save(&ledger).await?;
            return Ok(Settlement::NoPosition);
        }

        let won = position.outcome == winner;
        let remaining = position.remaining();
        let payout = if won { remaining } else { Decimal::ZERO };
        let gross = position.exit_proceeds + payout;

        let claim = (won
            && remaining > Decimal::ZERO
            && !ledger.state.confirmed_claims.contains(condition_id)
            && !ledger
                .state
                .claims
                .iter()
                .any(|c| c.condition_id == condition_id))
        .then(|| ClaimableItem {
            id: Uuid::new_v4(),
            condition_id: condition_id.to_string(),
            symbol: position.market.symbol,
            outcome: position.outcome,
            token_id: position.token_id().to_string(),
            size: remaining,
            expected_payout: remaining,
            status: ClaimState::Pending,
            tx_id: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        });
        if let Some(item) = &claim {
            ledger.state.claims.push(item.clone());
        }

        let trade = ledger.close(position, gross, ExitReason::Resolution, now);
        ledger
            .state
            .orders
            .retain(|_, o| o.condition_id != condition_id);
        self.save_with_trade(&mut ledger, &trade).await?;

        tracing::info!(
            condition_id,
            %winner,
            pnl = %trade.realized_pnl,
            claim = claim.is_some(),
            "Position settled at resolution"
        );
        Ok(if won {
            Settlement::Won { trade, claim }
        } else {
            Settlement::Lost(trade)
        })
    }

    pub async fn position(&self, condition_id: &str) -> Option<Position> {
        self.inner
            .read()
            .await
            .state
            .positions
            .get(condition_id)
            .cloned()
    }

    /// Every non-closed position
    pub async fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<_> = self
            .inner
            .read()
            .await
            .state
            .positions
            .values()
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.opened_at);
        positions
    }

    // ---- orders ----

    /// Write an order ahead of sending it
    pub async fn record_order(&self, order: OrderRecord) -> Result<(), StoreError> {
        let mut ledger = self.inner.write().await;
        ledger.state.orders.insert(order.id, order);
        self.save(&ledger).await
    }

    /// Apply an in-place change to an order record
    pub async fn update_order<F>(&self, id: Uuid, f: F) -> Result<OrderRecord, StoreError>
    where
        F: FnOnce(&mut OrderRecord),
    {
        let mut ledger = self.inner.write().await;
        let order = ledger
            .state
            .orders
            .get_mut(&id)
            .ok_or(StoreError::UnknownOrder(id))?;
        f(order);
        let order = order.clone();
        self.save(&ledger).await?;
        Ok(order)
    }

    /// Apply an exchange acknowledgement or status to an order and its position
    ///
    /// Fill quantities are cumulative; only the increase since the last
    /// update moves position, cash and exposure.
    pub async fn record_fill(
        &self,
        id: Uuid,
        ack: &OrderAck,
        now: DateTime<Utc>,
    ) -> Result<FillEffect, StoreError> {
        let mut ledger = self.inner.write().await;
        let ledger = &mut *ledger;

        let order = ledger
            .state
            .orders
            .get_mut(&id)
            .ok_or(StoreError::UnknownOrder(id))?;
        order.exchange_id = Some(ack.exchange_id.clone());

        let prev_filled = order.filled;
        let prev_notional = order.filled_notional();
        let prev_fees = order.fees;
        if ack.filled_size >= order.filled {
            order.filled = ack.filled_size;
            order.avg_price = ack.avg_price.or(order.avg_price);
            order.fees = ack.fees.max(order.fees);
        }
        if order.status != OrderStatus::Stale {
            order.status = order_status(ack);
        }

        let delta_shares = order.filled - prev_filled;
        let delta_notional = order.filled_notional() - prev_notional;
        let delta_fees = order.fees - prev_fees;
        let terminal = order.status.is_terminal();
        let purpose = order.purpose;
        let condition_id = order.condition_id.clone();

        let effect = match ledger.state.positions.get_mut(&condition_id) {
            None => FillEffect::Orphan,
            Some(position) => match purpose {
                OrderPurpose::Entry => {
                    if delta_shares > Decimal::ZERO {
                        let size = position.size + delta_shares;
                        position.entry_price =
                            (position.entry_price * position.size + delta_notional) / size;
                        position.size = size;
                        position.fees += delta_fees;
                        position.reserved = (position.reserved - delta_notional).max(Decimal::ZERO);
                        ledger.state.cash -= delta_notional + delta_fees;
                    }
                    if !terminal {
                        FillEffect::Pending
                    } else if position.size > Decimal::ZERO {
                        position.state = PositionState::Open;
                        position.reserved = Decimal::ZERO;
                        position.high_water = position.entry_price;
                        position.opened_at = now;
                        FillEffect::EntryOpened(position.clone())
                    } else {
                        ledger.state.positions.remove(&condition_id);
                        ledger.state.traded_markets.remove(&condition_id);
                        FillEffect::EntryVoid
                    }
                }
                OrderPurpose::Exit => {
                    position.exit_filled += delta_shares;
                    position.exit_proceeds += delta_notional;
                    position.fees += delta_fees;
                    ledger.state.cash += delta_notional - delta_fees;

                    if position.remaining().is_zero() {
                        let position = position.clone();
                        let reason = position.exit_reason.unwrap_or(ExitReason::Manual);
                        let gross = position.exit_proceeds;
                        FillEffect::Closed(ledger.close(position, gross, reason, now))
                    } else if terminal {
                        FillEffect::ExitRemaining(position.remaining())
                    } else {
                        FillEffect::Pending
                    }
                }
            },
        };

        match &effect {
            FillEffect::Closed(trade) => self.save_with_trade(ledger, trade).await?,
            _ => self.save(ledger).await?,
        }
        Ok(effect)
    }

    pub async fn order(&self, id: Uuid) -> Option<OrderRecord> {
        self.inner.read().await.state.orders.get(&id).cloned()
    }

    /// Orders that may still fill
    pub async fn open_orders(&self) -> Vec<OrderRecord> {
        let mut orders: Vec<_> = self
            .inner
            .read()
            .await
            .state
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.submitted_at);
        orders
    }

    // ---- claims ----

    /// Claims not yet confirmed
    pub async fn claims(&self) -> Vec<ClaimableItem> {
        self.inner.read().await.state.claims.clone()
    }

    pub async fn claim(&self, condition_id: &str) -> Option<ClaimableItem> {
        self.inner
            .read()
            .await
            .state
            .claims
            .iter()
            .find(|c| c.condition_id == condition_id)
            .cloned()
    }

    pub async fn is_claim_confirmed(&self, condition_id: &str) -> bool {
        self.inner
            .read()
            .await
            .state
            .confirmed_claims
            .contains(condition_id)
    }

    async fn update_claim<F>(&self, condition_id: &str, f: F) -> Result<ClaimableItem, StoreError>
    where
        F: FnOnce(&mut ClaimableItem),
    {
        let mut ledger = self.inner.write().await;
        let item = ledger
            .state
            .claims
            .iter_mut()
            .find(|c| c.condition_id == condition_id)
            .ok_or_else(|| StoreError::NoClaim(condition_id.to_string()))?;
        f(item);
        let item = item.clone();
        self.save(&ledger).await?;
        Ok(item)
    }

    /// Claim transaction sent, awaiting confirmation
    pub async fn claim_submitted(
        &self,
        condition_id: &str,
        tx_id: String,
        now: DateTime<Utc>,
    ) -> Result<ClaimableItem, StoreError> {
        self.update_claim(condition_id, |item| {
            item.status = ClaimState::Submitted;
            item.tx_id = Some(tx_id);
            item.attempts += 1;
            item.last_error = None;
            item.updated_at = now;
        })
        .await
    }

    /// Claim attempt failed; retried on a later sweep
    pub async fn claim_failed(
        &self,
        condition_id: &str,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<ClaimableItem, StoreError> {
        self.update_claim(condition_id, |item| {
            if item.status != ClaimState::Submitted {
                item.attempts += 1;
            }
            item.status = ClaimState::Failed;
            item.tx_id = None;
            item.last_error = Some(error);
            item.updated_at = now;
        })
        .await
    }

    /// Remove a claim from the queue and credit its payout
    ///
    /// Returns `None` if the market's claim was already confirmed.
    pub async fn confirm_claim(
        &self,
        condition_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimableItem>, StoreError> {
        let mut ledger = self.inner.write().await;
        if ledger.state.confirmed_claims.contains(condition_id) {
            ledger.state.claims.retain(|c| c.condition_id != condition_id);
            self.save(&ledger).await?;
            return Ok(None);
        }

        let index = ledger
            .state
            .claims
            .iter()
            .position(|c| c.condition_id == condition_id)
            .ok_or_else(|| StoreError::NoClaim(condition_id.to_string()))?;
        let mut item = ledger.state.claims.remove(index);
        item.status = ClaimState::Confirmed;
        item.updated_at = now;

        ledger.state.cash += item.expected_payout;
        ledger
            .state
            .confirmed_claims
            .insert(condition_id.to_string());
        self.save(&ledger).await?;

        tracing::info!(condition_id, payout = %item.expected_payout, "Claim confirmed");
        Ok(Some(item))
    }

    // ---- balance and reporting ----

    /// Replace the cached cash balance with the exchange's figure
    pub async fn sync_balance(&self, available: Decimal) -> Result<Decimal, StoreError> {
        let mut ledger = self.inner.write().await;
        let previous = std::mem::replace(&mut ledger.state.cash, available);
        if previous != available {
            tracing::debug!(%previous, %available, "Balance synced");
        }
        self.save(&ledger).await?;
        Ok(previous)
    }

    pub async fn cash(&self) -> Decimal {
        self.inner.read().await.state.cash
    }

    pub async fn exposure(&self, now: DateTime<Utc>) -> ExposureSnapshot {
        self.inner.read().await.exposure(now)
    }

    /// Start a fresh P&L and win-rate period
    pub async fn reset_pnl(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut ledger = self.inner.write().await;
        ledger.state.pnl_reset_at = Some(now);
        self.save(&ledger).await?;
        tracing::info!(reset_at = %now, "P&L reset");
        Ok(())
    }

    pub async fn summary(&self) -> PnlSummary {
        self.inner.read().await.summary()
    }

    /// Closed trades, oldest first
    pub async fn trades(&self) -> Vec<TradeRecord> {
        self.inner.read().await.trades.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Side;
    use crate::market::Symbol;
    use crate::store::test_market;
    use rust_decimal_macros::dec;

    fn limits() -> PortfolioLimits {
        PortfolioLimits {
            max_position_size: dec!(0.5),
            max_leverage: dec!(1),
            max_daily_loss: None,
        }
    }

    async fn store_with_cash(dir: &Path, cash: Decimal) -> LedgerStore {
        let store = LedgerStore::open(dir).await.unwrap();
        store.sync_balance(cash).await.unwrap();
        store
    }

    fn order_for(position: &Position, purpose: OrderPurpose, price: Decimal, size: Decimal) -> OrderRecord {
        OrderRecord {
            id: Uuid::new_v4(),
            exchange_id: None,
            condition_id: position.condition_id().to_string(),
            token_id: position.token_id().to_string(),
            purpose,
            side: match purpose {
                OrderPurpose::Entry => Side::Buy,
                OrderPurpose::Exit => Side::Sell,
            },
            outcome: position.outcome,
            price,
            size,
            filled: Decimal::ZERO,
            avg_price: None,
            fees: Decimal::ZERO,
            submitted_at: Utc::now(),
            status: OrderStatus::Pending,
            retries: 0,
            last_error: None,
        }
    }

    fn ack(status: AckStatus, filled: Decimal, price: Decimal) -> OrderAck {
        OrderAck {
            exchange_id: "ex-1".into(),
            status,
            filled_size: filled,
            avg_price: Some(price),
            fees: Decimal::ZERO,
        }
    }

    async fn open_position(store: &LedgerStore, price: Decimal, size: Decimal) -> Position {
        let market = test_market(Symbol::Btc, 1_767_638_700);
        let now = market.resolution_time - chrono::Duration::seconds(100);
        let position = store
            .begin_entry(&market, Outcome::Up, price, size, dec!(0.92), &limits(), now)
            .await
            .unwrap();
        let order = order_for(&position, OrderPurpose::Entry, price, size);
        let id = order.id;
        store.record_order(order).await.unwrap();
        match store
            .record_fill(id, &ack(AckStatus::Filled, size, price), now)
            .await
            .unwrap()
        {
            FillEffect::EntryOpened(p) => p,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_entry_reserves_and_fills() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_cash(dir.path(), dec!(1000)).await;

        let position = open_position(&store, dec!(0.98), dec!(80)).await;
        assert_eq!(position.state, PositionState::Open);
        assert_eq!(position.size, dec!(80));
        assert_eq!(position.high_water, dec!(0.98));

        let snapshot = store.exposure(Utc::now()).await;
        assert_eq!(snapshot.cash, dec!(921.6));
        assert_eq!(snapshot.reserved, dec!(0));
        assert_eq!(snapshot.open_notional, dec!(78.4));
    }

    #[tokio::test]
    async fn test_one_position_per_market() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_cash(dir.path(), dec!(1000)).await;
        let market = test_market(Symbol::Btc, 1_767_638_700);
        let now = Utc::now();

        store
            .begin_entry(&market, Outcome::Up, dec!(0.98), dec!(10), dec!(0.92), &limits(), now)
            .await
            .unwrap();
        let second = store
            .begin_entry(&market, Outcome::Down, dec!(0.98), dec!(10), dec!(0.92), &limits(), now)
            .await;
        assert!(matches!(second, Err(StoreError::PositionExists(_))));
    }

    #[tokio::test]
    async fn test_aborted_entry_releases_reservation_and_market() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_cash(dir.path(), dec!(1000)).await;
        let market = test_market(Symbol::Eth, 1_767_638_700);
        let now = Utc::now();

        store
            .begin_entry(&market, Outcome::Up, dec!(0.98), dec!(10), dec!(0.92), &limits(), now)
            .await
            .unwrap();
        assert_eq!(store.exposure(now).await.reserved, dec!(9.8));

        assert!(store.abort_entry(&market.condition_id).await.unwrap().is_none());
        assert_eq!(store.exposure(now).await.reserved, dec!(0));
        assert!(store
            .begin_entry(&market, Outcome::Up, dec!(0.98), dec!(10), dec!(0.92), &limits(), now)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_exit_cas_allows_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_cash(dir.path(), dec!(1000)).await;
        let position = open_position(&store, dec!(0.98), dec!(10)).await;
        let cid = position.condition_id();

        store.begin_exit(cid, ExitReason::StopLoss).await.unwrap();
        let second = store.begin_exit(cid, ExitReason::StrategyTarget).await;
        assert!(matches!(second, Err(StoreError::InvalidTransition { .. })));
        assert_eq!(
            store.position(cid).await.unwrap().exit_reason,
            Some(ExitReason::StopLoss)
        );
    }

    #[tokio::test]
    async fn test_partial_exits_close_with_exact_pnl() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_cash(dir.path(), dec!(1000)).await;
        let position = open_position(&store, dec!(0.98), dec!(10)).await;
        let cid = position.condition_id().to_string();
        store.begin_exit(&cid, ExitReason::StrategyTarget).await.unwrap();

        let first = order_for(&position, OrderPurpose::Exit, dec!(0.999), dec!(10));
        let first_id = first.id;
        store.record_order(first).await.unwrap();
        let mut partial = ack(AckStatus::Cancelled, dec!(6), dec!(0.999));
        partial.fees = dec!(0.01);
        let effect = store.record_fill(first_id, &partial, Utc::now()).await.unwrap();
        assert_eq!(effect, FillEffect::ExitRemaining(dec!(4)));

        let second = order_for(&position, OrderPurpose::Exit, dec!(0.949), dec!(4));
        let second_id = second.id;
        store.record_order(second).await.unwrap();
        let effect = store
            .record_fill(second_id, &ack(AckStatus::Filled, dec!(4), dec!(0.95)), Utc::now())
            .await
            .unwrap();

        let FillEffect::Closed(trade) = effect else {
            panic!("expected close, got {effect:?}");
        };
        // 6 * 0.999 + 4 * 0.95 - 10 * 0.98 - 0.01
        assert_eq!(trade.realized_pnl, dec!(-0.016));
        assert_eq!(trade.exit_price, dec!(0.9794));
        assert_eq!(trade.attribution, crate::store::Attribution::Strategy);
        assert!(store.position(&cid).await.is_none());
        assert!(store.open_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_resolution_win_queues_claim_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_cash(dir.path(), dec!(1000)).await;
        let position = open_position(&store, dec!(0.98), dec!(10)).await;
        let cid = position.condition_id().to_string();

        let settlement = store.resolve(&cid, Outcome::Up, Utc::now()).await.unwrap();
        let Settlement::Won { trade, claim } = settlement else {
            panic!("expected win");
        };
        assert_eq!(trade.exit_price, dec!(1));
        assert_eq!(trade.realized_pnl, dec!(0.2));
        assert_eq!(claim.unwrap().expected_payout, dec!(10));

        let confirmed = store.confirm_claim(&cid, Utc::now()).await.unwrap();
        assert!(confirmed.is_some());
        assert_eq!(store.cash().await, dec!(1000.2));

        // a second confirmation is a no-op
        assert!(store.confirm_claim(&cid, Utc::now()).await.unwrap().is_none());
        assert_eq!(store.cash().await, dec!(1000.2));
    }

    #[tokio::test]
    async fn test_resolution_loss() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_cash(dir.path(), dec!(1000)).await;
        let position = open_position(&store, dec!(0.98), dec!(10)).await;

        let settlement = store
            .resolve(position.condition_id(), Outcome::Down, Utc::now())
            .await
            .unwrap();
        let Settlement::Lost(trade) = settlement else {
            panic!("expected loss");
        };
        assert_eq!(trade.exit_price, dec!(0));
        assert_eq!(trade.realized_pnl, dec!(-9.8));
        assert!(store.claims().await.is_empty());
    }

    #[tokio::test]
    async fn test_high_water_only_rises() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_cash(dir.path(), dec!(1000)).await;
        let position = open_position(&store, dec!(0.98), dec!(10)).await;
        let cid = position.condition_id();

        assert_eq!(store.mark(cid, dec!(0.99)).await.unwrap().high_water, dec!(0.99));
        let marked = store.mark(cid, dec!(0.95)).await.unwrap();
        assert_eq!(marked.high_water, dec!(0.99));
        assert_eq!(marked.last_mark, Some(dec!(0.95)));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cid = {
            let store = store_with_cash(dir.path(), dec!(1000)).await;
            let position = open_position(&store, dec!(0.98), dec!(10)).await;
            let cid = position.condition_id().to_string();
            store.resolve(&cid, Outcome::Up, Utc::now()).await.unwrap();
            cid
        };

        let store = LedgerStore::open(dir.path()).await.unwrap();
        let trades = store.trades().await;
        assert_eq!(trades.len(), 1);
        assert_eq!(
            trades[0].realized_pnl,
            (trades[0].exit_price - trades[0].entry_price) * trades[0].size - trades[0].fees
        );
        assert_eq!(store.claims().await.len(), 1);
        assert_eq!(store.claims().await[0].condition_id, cid);
        assert_eq!(store.cash().await, dec!(990.2));
    }

    #[tokio::test]
    async fn test_trade_lost_before_append_is_restored_once() {
        let dir = tempfile::tempdir().unwrap();
        let trade = {
            let store = store_with_cash(dir.path(), dec!(1000)).await;
            let position = open_position(&store, dec!(0.98), dec!(10)).await;
            let cid = position.condition_id().to_string();
            match store.resolve(&cid, Outcome::Up, Utc::now()).await.unwrap() {
                Settlement::Won { trade, .. } => trade,
                other => panic!("unexpected {other:?}"),
            }
        };

        // state.json was written but the append never happened
        tokio::fs::remove_file(persist::trades_path(dir.path())).await.unwrap();

        for _ in 0..2 {
            let store = LedgerStore::open(dir.path()).await.unwrap();
            assert_eq!(store.trades().await, vec![trade.clone()]);
            assert!(store.position(&trade.condition_id).await.is_none());
        }
        let on_disk = persist::load_trades(&persist::trades_path(dir.path())).await.unwrap();
        assert_eq!(on_disk.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_pnl_starts_new_period() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_cash(dir.path(), dec!(1000)).await;
        let position = open_position(&store, dec!(0.98), dec!(10)).await;
        store
            .resolve(position.condition_id(), Outcome::Up, Utc::now())
            .await
            .unwrap();
        assert_eq!(store.summary().await.wins, 1);

        store.reset_pnl(Utc::now()).await.unwrap();
        let summary = store.summary().await;
        assert_eq!(summary.trades, 0);
        assert_eq!(summary.realized_pnl, dec!(0));
        assert_eq!(store.trades().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_order_fill_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_cash(dir.path(), dec!(1000)).await;
        let result = store
            .record_fill(Uuid::new_v4(), &ack(AckStatus::Filled, dec!(1), dec!(0.5)), Utc::now())
            .await;
        assert!(matches!(result, Err(StoreError::UnknownOrder(_))));
    }
}
