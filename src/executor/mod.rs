//! Order executor
//!
//! Submits orders for the per-market monitors: one slot per market, orders
//! written to the ledger before they are sent, transient failures retried
//! with backoff, exits stepped down in price until they fill. Fills are
//! applied to the ledger here and nowhere else.

mod backoff;
mod slots;
mod sweep;
mod types;

pub use backoff::Backoff;
pub use types::{ExecError, OrderEvent, OrderHandle};

use crate::config::ExecutorConfig;
use crate::gateway::{ExchangeGateway, GatewayError, OrderAck, OrderRequest, Side, TimeInForce};
use crate::market::{Market, Outcome};
use crate::risk::RiskManager;
use crate::store::{
    ExitReason, FillEffect, LedgerStore, OrderPurpose, OrderRecord, OrderStatus, Position,
    StoreError,
};
use crate::telemetry::{incr_counter, record_latency, CounterMetric, LatencyMetric};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use slots::Slots;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct OrderExecutor {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<LedgerStore>,
    config: ExecutorConfig,
    backoff: Backoff,
    slots: Slots,
    halted: AtomicBool,
}

impl OrderExecutor {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<LedgerStore>,
        config: ExecutorConfig,
    ) -> Self {
        let backoff = Backoff::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        );
        Self {
            gateway,
            store,
            config,
            backoff,
            slots: Slots::default(),
            halted: AtomicBool::new(false),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn halt(&self, reason: &str) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            tracing::error!(reason, "Authentication failed, halting order submission");
        }
    }

    /// True while a submission or resting order holds the market's slot
    pub fn slot_busy(&self, condition_id: &str) -> bool {
        self.slots.is_held(condition_id)
    }

    /// Reserve capital and buy
    ///
    /// On any failure before a fill the reservation is released and the
    /// market may be entered again.
    pub async fn enter(
        &self,
        market: &Market,
        outcome: Outcome,
        price: Decimal,
        size: Decimal,
        risk: &RiskManager,
        now: DateTime<Utc>,
    ) -> Result<OrderHandle, ExecError> {
        if self.is_halted() {
            return Err(ExecError::Halted);
        }
        let cid = &market.condition_id;
        let slot = self
            .slots
            .try_acquire(cid)
            .ok_or_else(|| ExecError::SlotBusy(cid.clone()))?;

        self.store
            .begin_entry(
                market,
                outcome,
                price,
                size,
                risk.stop_loss_price(),
                risk.limits(),
                now,
            )
            .await?;

        let request = OrderRequest {
            condition_id: cid.clone(),
            token_id: market.token_id(outcome).to_string(),
            outcome,
            side: Side::Buy,
            price,
            size,
            time_in_force: TimeInForce::Gtc,
        };

        match self.submit(&request, OrderPurpose::Entry, now).await {
            Ok(handle) => {
                if handle.is_working() {
                    slot.keep_for(handle.order_id);
                }
                Ok(handle)
            }
            Err(e) => {
                if let Err(abort) = self.store.abort_entry(cid).await {
                    tracing::warn!(condition_id = %cid, error = %abort, "Failed to roll back entry");
                }
                Err(e)
            }
        }
    }

    /// Sell a held position, stepping the price down until it fills
    ///
    /// The Open -> PendingExit transition is compare-and-swap, so only one
    /// caller can start an exit. If the exit cannot complete the position
    /// goes back to Open.
    pub async fn exit(
        &self,
        condition_id: &str,
        reason: ExitReason,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<OrderHandle, ExecError> {
        if self.is_halted() {
            return Err(ExecError::Halted);
        }
        let slot = self
            .slots
            .try_acquire(condition_id)
            .ok_or_else(|| ExecError::SlotBusy(condition_id.to_string()))?;

        let position = self.store.begin_exit(condition_id, reason).await?;
        tracing::info!(
            condition_id,
            ?reason,
            %price,
            size = %position.remaining(),
            "Exiting position"
        );

        match self.sell_down(&position, price, now).await {
            Ok(handle) => {
                if handle.is_working() {
                    slot.keep_for(handle.order_id);
                }
                Ok(handle)
            }
            Err(e) => {
                if let Err(abort) = self.store.abort_exit(condition_id).await {
                    tracing::warn!(condition_id, error = %abort, "Failed to reopen position");
                }
                Err(e)
            }
        }
    }

    async fn sell_down(
        &self,
        position: &Position,
        start_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<OrderHandle, ExecError> {
        let floor = self.config.exit_floor_price;
        let mut price = start_price.max(floor);
        let mut remaining = position.remaining();
        let mut last_error = String::from("no attempts");

        for round in 1..=self.config.max_exit_attempts.max(1) {
            let request = OrderRequest {
                condition_id: position.condition_id().to_string(),
                token_id: position.token_id().to_string(),
                outcome: position.outcome,
                side: Side::Sell,
                price,
                size: remaining,
                time_in_force: TimeInForce::Fak,
            };

            match self.submit(&request, OrderPurpose::Exit, now).await {
                Ok(handle) => match &handle.effect {
                    FillEffect::ExitRemaining(left) => {
                        remaining = *left;
                        last_error = format!("{left} shares unfilled at {price}");
                    }
                    _ => return Ok(handle),
                },
                Err(ExecError::Rejected(reason)) => last_error = reason,
                Err(e) => return Err(e),
            }

            let next = (price - self.config.exit_price_step).max(floor);
            tracing::warn!(
                condition_id = %position.condition_id(),
                round,
                %price,
                next_price = %next,
                %remaining,
                "Exit incomplete, stepping price down"
            );
            price = next;
        }

        Err(ExecError::RetriesExhausted {
            attempts: self.config.max_exit_attempts,
            last_error,
        })
    }

    /// Write an order ahead, place it with retries and apply the ack
    ///
    /// The caller holds the market's slot.
    async fn submit(
        &self,
        request: &OrderRequest,
        purpose: OrderPurpose,
        now: DateTime<Utc>,
    ) -> Result<OrderHandle, ExecError> {
        let record = OrderRecord {
            id: Uuid::new_v4(),
            exchange_id: None,
            condition_id: request.condition_id.clone(),
            token_id: request.token_id.clone(),
            purpose,
            side: request.side,
            outcome: request.outcome,
            price: request.price,
            size: request.size,
            filled: Decimal::ZERO,
            avg_price: None,
            fees: Decimal::ZERO,
            submitted_at: now,
            status: OrderStatus::Pending,
            retries: 0,
            last_error: None,
        };
        let order_id = record.id;
        self.store.record_order(record).await?;

        let ack = match self.place_with_retry(order_id, request).await {
            Ok(ack) => ack,
            Err(e) => {
                incr_counter(CounterMetric::OrdersRejected);
                let message = e.to_string();
                self.store
                    .update_order(order_id, |o| {
                        o.status = OrderStatus::Cancelled;
                        o.last_error = Some(message);
                    })
                    .await?;
                tracing::warn!(
                    condition_id = %request.condition_id,
                    side = ?request.side,
                    price = %request.price,
                    error = %e,
                    "Order failed"
                );
                return Err(e);
            }
        };

        let mut effect = self.apply(order_id, &ack, now).await?;
        let mut status = self
            .store
            .order(order_id)
            .await
            .map(|o| o.status)
            .unwrap_or(OrderStatus::Cancelled);

        // shutdown began while this order was on its way
        if self.is_halted() && !status.is_terminal() {
            if let Some(order) = self.store.order(order_id).await {
                tracing::warn!(
                    condition_id = %request.condition_id,
                    exchange_id = %ack.exchange_id,
                    "Order acknowledged after halt, cancelling"
                );
                let event = self.cancel_and_settle(&order, &ack.exchange_id, now).await?;
                effect = event.effect;
                status = event.status;
            }
        }

        tracing::info!(
            condition_id = %request.condition_id,
            exchange_id = %ack.exchange_id,
            side = ?request.side,
            price = %request.price,
            filled = %ack.filled_size,
            ?status,
            "Order acknowledged"
        );

        Ok(OrderHandle {
            order_id,
            exchange_id: ack.exchange_id,
            status,
            effect,
        })
    }

    async fn place_with_retry(
        &self,
        order_id: Uuid,
        request: &OrderRequest,
    ) -> Result<OrderAck, ExecError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let error = match self.gateway.place_order(request).await {
                Ok(ack) => {
                    record_latency(LatencyMetric::OrderSubmission, started.elapsed());
                    incr_counter(CounterMetric::OrdersSubmitted);
                    return Ok(ack);
                }
                Err(e) => e,
            };

            match error {
                GatewayError::Auth(reason) => {
                    self.halt(&reason);
                    return Err(ExecError::Halted);
                }
                GatewayError::InsufficientBalance(reason) => {
                    return Err(ExecError::InsufficientBalance(reason))
                }
                e if e.is_transient() && attempt < max_attempts => {
                    let hint = match &e {
                        GatewayError::RateLimited { retry_after } => *retry_after,
                        _ => None,
                    };
                    let delay = self.backoff.delay(attempt, hint);
                    incr_counter(CounterMetric::OrderRetries);
                    tracing::warn!(
                        condition_id = %request.condition_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient order failure, retrying"
                    );
                    let message = e.to_string();
                    self.store
                        .update_order(order_id, |o| {
                            o.retries = attempt;
                            o.last_error = Some(message);
                        })
                        .await?;
                    tokio::time::sleep(delay).await;
                }
                e if e.is_transient() => {
                    return Err(ExecError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    })
                }
                e => return Err(ExecError::Rejected(e.to_string())),
            }
        }
    }

    /// Apply an ack to the ledger, reconciling if it no longer matches
    async fn apply(
        &self,
        order_id: Uuid,
        ack: &OrderAck,
        now: DateTime<Utc>,
    ) -> Result<FillEffect, ExecError> {
        match self.store.record_fill(order_id, ack, now).await {
            Ok(FillEffect::Orphan) => {
                tracing::warn!(%order_id, exchange_id = %ack.exchange_id, "Fill for order without a position");
                self.reconcile_balance().await;
                Ok(FillEffect::Orphan)
            }
            Ok(effect) => {
                if matches!(effect, FillEffect::EntryOpened(_) | FillEffect::Closed(_)) {
                    incr_counter(CounterMetric::OrdersFilled);
                }
                Ok(effect)
            }
            Err(StoreError::UnknownOrder(id)) => {
                tracing::warn!(order_id = %id, exchange_id = %ack.exchange_id, "Fill for unknown order");
                self.reconcile_balance().await;
                Ok(FillEffect::Orphan)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reconcile_balance(&self) {
        incr_counter(CounterMetric::ReconciliationWarnings);
        if let Err(e) = self.sync_balance().await {
            tracing::warn!(error = %e, "Balance re-sync failed");
        }
    }

    /// Replace the ledger's cash with the exchange balance
    pub async fn sync_balance(&self) -> anyhow::Result<Decimal> {
        let balance = self.gateway.balance().await?;
        self.store.sync_balance(balance.available).await?;
        Ok(balance.available)
    }
}
