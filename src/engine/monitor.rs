//! Per-market monitor: the trading state machine for one market

use crate::executor::{ExecError, OrderEvent, OrderExecutor};
use crate::market::{Market, Outcome, Quote};
use crate::risk::{RiskDecision, RiskManager};
use crate::store::{ExitReason, FillEffect, LedgerStore, Position, PositionState, Settlement, StoreError};
use crate::strategy::{Decision, DecisionStrategy, Holding, MarketView, Phase, PriceHistory};
use crate::telemetry::{incr_counter, record_latency, CounterMetric, LatencyMetric};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;

/// Input to a market monitor, processed in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Tick { outcome: Outcome, quote: Quote },
    Order(OrderEvent),
    Resolved(Outcome),
    /// Resolution time reached
    Deadline,
}

pub struct MarketMonitor {
    market: Market,
    phase: Phase,
    resolved: bool,
    up: Quote,
    down: Quote,
    history: PriceHistory,
    strategy: Box<dyn DecisionStrategy>,
    store: Arc<LedgerStore>,
    executor: Arc<OrderExecutor>,
    risk: Arc<RiskManager>,
}

impl MarketMonitor {
    pub fn new(
        market: Market,
        strategy: Box<dyn DecisionStrategy>,
        history: PriceHistory,
        store: Arc<LedgerStore>,
        executor: Arc<OrderExecutor>,
        risk: Arc<RiskManager>,
    ) -> Self {
        Self {
            market,
            phase: Phase::Watching,
            resolved: false,
            up: Quote::default(),
            down: Quote::default(),
            history,
            strategy,
            store,
            executor,
            risk,
        }
    }

    /// Pick up where a persisted position left off
    pub fn resume(mut self, position: Option<&Position>) -> Self {
        self.phase = position.map_or(Phase::Watching, |p| phase_for(p.state));
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    /// Nothing left to do for this market
    pub fn is_finished(&self) -> bool {
        self.resolved
    }

    pub async fn handle_event(&mut self, event: MarketEvent, now: DateTime<Utc>) {
        if self.resolved {
            return;
        }
        match event {
            MarketEvent::Tick { outcome, quote } => {
                let started = Instant::now();
                self.on_tick(outcome, quote, now).await;
                record_latency(LatencyMetric::TickDecision, started.elapsed());
            }
            MarketEvent::Order(event) => self.on_order(&event, now),
            MarketEvent::Deadline => self.on_deadline(now).await,
            MarketEvent::Resolved(winner) => self.on_resolved(winner, now).await,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::info!(
                condition_id = %self.market.condition_id,
                from = ?self.phase,
                to = ?phase,
                "Phase change"
            );
            self.phase = phase;
        }
    }

    async fn on_tick(&mut self, outcome: Outcome, quote: Quote, now: DateTime<Utc>) {
        match outcome {
            Outcome::Up => self.up = quote,
            Outcome::Down => self.down = quote,
        }
        if let Some(price) = quote.best_ask.or(quote.best_bid) {
            self.history.push(outcome, now, price);
        }

        match self.phase {
            Phase::Watching if !self.market.legacy => self.watch(now).await,
            Phase::Holding => self.hold(now).await,
            Phase::SellPending => {
                self.mark().await;
            }
            _ => {}
        }
    }

    fn decide(&mut self, holding: Option<Holding>, now: DateTime<Utc>) -> Decision {
        let view = MarketView {
            market: &self.market,
            up: self.up,
            down: self.down,
            holding,
            now,
        };
        self.strategy.decide(&view, &self.history)
    }

    async fn watch(&mut self, now: DateTime<Utc>) {
        let decision = self.decide(None, now);
        let Decision::Buy {
            outcome,
            price,
            size,
        } = decision
        else {
            return;
        };

        tracing::info!(
            condition_id = %self.market.condition_id,
            strategy = self.strategy.name(),
            %outcome,
            %price,
            %size,
            secs_left = self.market.seconds_to_resolution(now),
            "Buy signal"
        );
        let exposure = self.store.exposure(now).await;
        if let Err(e) = self.risk.check_entry(price * size, &exposure) {
            incr_counter(CounterMetric::EntriesBlocked);
            tracing::info!(condition_id = %self.market.condition_id, reason = %e, "Entry blocked by risk limits");
            return;
        }
        match self
            .executor
            .enter(&self.market, outcome, price, size, &self.risk, now)
            .await
        {
            Ok(handle) => self.apply_effect(&handle.effect),
            Err(ExecError::SlotBusy(_)) => {}
            Err(ExecError::Store(StoreError::Risk(e))) => {
                tracing::info!(condition_id = %self.market.condition_id, reason = %e, "Entry blocked by risk limits");
            }
            Err(ExecError::Store(StoreError::AlreadyTraded(_))) => {
                tracing::debug!(condition_id = %self.market.condition_id, "Market already traded");
                self.set_phase(Phase::Sold);
            }
            Err(ExecError::Store(StoreError::PositionExists(_))) => {
                if let Some(p) = self.store.position(&self.market.condition_id).await {
                    self.set_phase(phase_for(p.state));
                }
            }
            Err(e) => {
                tracing::warn!(condition_id = %self.market.condition_id, error = %e, "Entry failed, still watching");
            }
        }
    }

    /// Record the held outcome's bid against the position
    async fn mark(&self) -> Option<(Position, Option<Decimal>)> {
        let position = self.store.position(&self.market.condition_id).await?;
        let bid = match position.outcome {
            Outcome::Up => self.up.best_bid,
            Outcome::Down => self.down.best_bid,
        };
        let position = match bid {
            Some(bid) => match self.store.mark(&self.market.condition_id, bid).await {
                Ok(marked) => marked,
                Err(e) => {
                    tracing::warn!(condition_id = %self.market.condition_id, error = %e, "Mark failed");
                    position
                }
            },
            None => position,
        };
        Some((position, bid))
    }

    async fn hold(&mut self, now: DateTime<Utc>) {
        let Some((position, bid)) = self.mark().await else {
            return;
        };
        if position.state != PositionState::Open {
            self.set_phase(phase_for(position.state));
            return;
        }

        // forced exits first
        if let RiskDecision::ForceSell(reason) = self.risk.evaluate(&position, bid, now) {
            incr_counter(CounterMetric::RiskExits);
            tracing::warn!(
                condition_id = %self.market.condition_id,
                ?reason,
                bid = ?bid,
                stop_loss = %position.stop_loss,
                high_water = %position.high_water,
                "Risk exit"
            );
            let price = bid.unwrap_or(position.stop_loss);
            self.exit(reason, price, now).await;
            return;
        }

        let holding = Holding {
            outcome: position.outcome,
            entry_price: position.entry_price,
            size: position.remaining(),
        };
        let decision = self.decide(Some(holding), now);
        if let Decision::Sell { reason, price } = decision {
            tracing::info!(condition_id = %self.market.condition_id, ?reason, %price, "Sell signal");
            self.exit(reason, price, now).await;
        }
    }

    async fn exit(&mut self, reason: ExitReason, price: Decimal, now: DateTime<Utc>) {
        self.set_phase(Phase::SellPending);
        match self
            .executor
            .exit(&self.market.condition_id, reason, price, now)
            .await
        {
            Ok(handle) => self.apply_effect(&handle.effect),
            Err(ExecError::SlotBusy(_)) => self.set_phase(Phase::Holding),
            Err(e) => {
                tracing::warn!(condition_id = %self.market.condition_id, error = %e, "Exit failed, position stays open");
                let state = self
                    .store
                    .position(&self.market.condition_id)
                    .await
                    .map(|p| p.state);
                self.set_phase(state.map(phase_for).unwrap_or(Phase::Holding));
            }
        }
    }

    fn apply_effect(&mut self, effect: &FillEffect) {
        match effect {
            FillEffect::Pending => {
                if self.phase == Phase::Watching {
                    self.set_phase(Phase::BuyPending);
                }
            }
            FillEffect::EntryOpened(position) => {
                tracing::info!(
                    condition_id = %self.market.condition_id,
                    outcome = %position.outcome,
                    entry_price = %position.entry_price,
                    size = %position.size,
                    "Position opened"
                );
                self.set_phase(Phase::Holding);
            }
            FillEffect::EntryVoid => self.set_phase(Phase::Watching),
            FillEffect::ExitRemaining(_) => self.set_phase(Phase::Holding),
            FillEffect::Closed(trade) => {
                tracing::info!(
                    condition_id = %self.market.condition_id,
                    exit_price = %trade.exit_price,
                    pnl = %trade.realized_pnl,
                    attribution = ?trade.attribution,
                    "Position sold"
                );
                self.set_phase(Phase::Sold);
            }
            FillEffect::Orphan => {}
        }
    }

    fn on_order(&mut self, event: &OrderEvent, now: DateTime<Utc>) {
        let past_deadline = now >= self.market.resolution_time;
        match (&event.effect, self.phase) {
            (FillEffect::EntryVoid, Phase::BuyPending) if past_deadline => {
                self.set_phase(Phase::Abandoned)
            }
            (effect, _) => self.apply_effect(effect),
        }
    }

    async fn on_deadline(&mut self, now: DateTime<Utc>) {
        if self.phase != Phase::BuyPending {
            return;
        }
        tracing::info!(condition_id = %self.market.condition_id, "Buy unfilled at resolution, cancelling");
        for event in self
            .executor
            .cancel_market(&self.market.condition_id, now)
            .await
        {
            self.on_order(&event, now);
        }
        if self.phase == Phase::BuyPending {
            let state = self.store.position(&self.market.condition_id).await.map(|p| p.state);
            if state.is_none() {
                self.set_phase(Phase::Abandoned);
            }
        }
    }

    async fn on_resolved(&mut self, winner: Outcome, now: DateTime<Utc>) {
        self.on_deadline(now).await;
        for event in self
            .executor
            .cancel_market(&self.market.condition_id, now)
            .await
        {
            self.on_order(&event, now);
        }

        match self
            .store
            .resolve(&self.market.condition_id, winner, now)
            .await
        {
            Ok(Settlement::Won { trade, claim }) => {
                tracing::info!(
                    condition_id = %self.market.condition_id,
                    pnl = %trade.realized_pnl,
                    claim = claim.is_some(),
                    "Resolved in our favor"
                );
                self.set_phase(Phase::ResolvedWin);
            }
            Ok(Settlement::Lost(trade)) => {
                tracing::info!(condition_id = %self.market.condition_id, pnl = %trade.realized_pnl, "Resolved against us");
                self.set_phase(Phase::ResolvedLoss);
            }
            Ok(Settlement::NoPosition) => {
                if self.phase == Phase::BuyPending {
                    self.set_phase(Phase::Abandoned);
                }
            }
            Err(e) => {
                tracing::error!(condition_id = %self.market.condition_id, error = %e, "Settlement failed");
                return;
            }
        }
        self.resolved = true;
    }
}

fn phase_for(state: PositionState) -> Phase {
    match state {
        PositionState::PendingEntry => Phase::BuyPending,
        PositionState::Open => Phase::Holding,
        PositionState::PendingExit => Phase::SellPending,
        PositionState::Closed => Phase::Sold,
    }
}
