//! Order sweeps: status polling, stale cancellation, shutdown and recovery

use super::{ExecError, OrderEvent, OrderExecutor};
use crate::gateway::{AckStatus, GatewayError, OrderAck};
use crate::store::{FillEffect, OrderPurpose, OrderRecord, OrderStatus, PositionState};
use crate::telemetry::{incr_counter, CounterMetric};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

const DRAIN_POLL: Duration = Duration::from_millis(20);

impl OrderExecutor {
    /// Poll every open order, apply fills and cancel the stale ones
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<OrderEvent> {
        let stale_after = chrono::Duration::seconds(self.config.stale_order_secs as i64);
        let mut events = Vec::new();

        for order in self.store.open_orders().await {
            if self.slots.is_submitting(&order.condition_id) {
                continue;
            }
            let stale = now - order.submitted_at >= stale_after;
            let result = match &order.exchange_id {
                Some(exchange_id) => self.poll(&order, exchange_id, stale, now).await,
                None if stale => self.abandon_unsent(&order).await.map(Some),
                None => Ok(None),
            };
            match result {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(order_id = %order.id, condition_id = %order.condition_id, error = %e, "Order sweep failed")
                }
            }
        }
        events
    }

    async fn poll(
        &self,
        order: &OrderRecord,
        exchange_id: &str,
        stale: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<OrderEvent>, ExecError> {
        let ack = match self.gateway.order_status(exchange_id).await {
            Ok(ack) => ack,
            Err(GatewayError::NotFound(_)) => {
                tracing::warn!(exchange_id, "Order unknown to the exchange, treating as cancelled");
                incr_counter(CounterMetric::ReconciliationWarnings);
                last_known(order, exchange_id)
            }
            Err(e) => {
                tracing::debug!(exchange_id, error = %e, "Order status query failed");
                return Ok(None);
            }
        };

        let ack = if stale && !ack.status.is_terminal() {
            self.cancel_stale(order, exchange_id, ack).await?
        } else {
            ack
        };
        if !ack.status.is_terminal() && ack.filled_size == order.filled {
            return Ok(None);
        }
        self.settle(order, &ack, now).await.map(Some)
    }

    async fn cancel_stale(
        &self,
        order: &OrderRecord,
        exchange_id: &str,
        ack: OrderAck,
    ) -> Result<OrderAck, ExecError> {
        if let Err(e) = self.gateway.cancel_order(exchange_id).await {
            tracing::warn!(exchange_id, error = %e, "Stale order cancel failed");
            return Ok(ack);
        }
        let ack = match self.gateway.order_status(exchange_id).await {
            Ok(latest) => latest,
            Err(_) => OrderAck {
                status: AckStatus::Cancelled,
                ..ack
            },
        };
        if ack.status != AckStatus::Filled {
            self.store
                .update_order(order.id, |o| o.status = OrderStatus::Stale)
                .await?;
            incr_counter(CounterMetric::OrdersStale);
            tracing::info!(
                condition_id = %order.condition_id,
                exchange_id,
                filled = %ack.filled_size,
                "Stale order cancelled"
            );
        }
        Ok(ack)
    }

    /// Apply a status to the ledger and free the slot once it is final
    async fn settle(
        &self,
        order: &OrderRecord,
        ack: &OrderAck,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent, ExecError> {
        let effect = self.apply(order.id, ack, now).await?;
        let status = self
            .store
            .order(order.id)
            .await
            .map(|o| o.status)
            .unwrap_or(OrderStatus::Cancelled);

        if let FillEffect::ExitRemaining(_) = effect {
            self.store.abort_exit(&order.condition_id).await?;
        }
        if status.is_terminal() {
            self.slots.release(&order.condition_id);
        }
        Ok(OrderEvent {
            condition_id: order.condition_id.clone(),
            order_id: order.id,
            purpose: order.purpose,
            status,
            effect,
        })
    }

    /// An order written ahead but never acknowledged
    async fn abandon_unsent(&self, order: &OrderRecord) -> Result<OrderEvent, ExecError> {
        self.store
            .update_order(order.id, |o| {
                o.status = OrderStatus::Cancelled;
                o.last_error = Some("never acknowledged".into());
            })
            .await?;
        tracing::warn!(order_id = %order.id, condition_id = %order.condition_id, "Dropping unacknowledged order");

        let effect = self.reopen(&order.condition_id, order.purpose).await?;
        self.slots.release(&order.condition_id);
        Ok(OrderEvent {
            condition_id: order.condition_id.clone(),
            order_id: order.id,
            purpose: order.purpose,
            status: OrderStatus::Cancelled,
            effect,
        })
    }

    /// Roll back a pending transition that no longer has a working order
    async fn reopen(
        &self,
        condition_id: &str,
        purpose: OrderPurpose,
    ) -> Result<FillEffect, ExecError> {
        let Some(position) = self.store.position(condition_id).await else {
            return Ok(FillEffect::Orphan);
        };
        Ok(match (purpose, position.state) {
            (OrderPurpose::Entry, PositionState::PendingEntry) => {
                match self.store.abort_entry(condition_id).await? {
                    Some(opened) => FillEffect::EntryOpened(opened),
                    None => FillEffect::EntryVoid,
                }
            }
            (OrderPurpose::Exit, PositionState::PendingExit) => {
                let reopened = self.store.abort_exit(condition_id).await?;
                FillEffect::ExitRemaining(reopened.remaining())
            }
            _ => FillEffect::Pending,
        })
    }

    /// Cancel whatever is working for one market
    pub async fn cancel_market(&self, condition_id: &str, now: DateTime<Utc>) -> Vec<OrderEvent> {
        let mut events = Vec::new();
        for order in self
            .store
            .open_orders()
            .await
            .into_iter()
            .filter(|o| o.condition_id == condition_id)
        {
            let result = match order.exchange_id.clone() {
                Some(exchange_id) => self.cancel_and_settle(&order, &exchange_id, now).await,
                // the submitter cancels it once acknowledged
                None if self.slots.is_submitting(condition_id) => {
                    tracing::warn!(order_id = %order.id, condition_id, "Order still being sent, leaving it to its submitter");
                    continue;
                }
                None => self.abandon_unsent(&order).await,
            };
            match result {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(condition_id, error = %e, "Cancel failed"),
            }
        }
        events
    }

    pub(super) async fn cancel_and_settle(
        &self,
        order: &OrderRecord,
        exchange_id: &str,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent, ExecError> {
        match self.gateway.cancel_order(exchange_id).await {
            Ok(()) | Err(GatewayError::NotFound(_)) => {}
            Err(e) => tracing::warn!(exchange_id, error = %e, "Cancel request failed"),
        }
        let ack = match self.gateway.order_status(exchange_id).await {
            Ok(ack) if ack.status.is_terminal() => ack,
            Ok(ack) => OrderAck {
                status: AckStatus::Cancelled,
                ..ack
            },
            Err(_) => last_known(order, exchange_id),
        };
        self.settle(order, &ack, now).await
    }

    /// Stop accepting orders, cancel every open one and reconcile
    ///
    /// Submissions already in flight get `shutdown_drain_secs` to be
    /// acknowledged first; any still out after that cancel themselves once
    /// the exchange answers.
    pub async fn shutdown(&self, now: DateTime<Utc>) -> Vec<OrderEvent> {
        self.halted.store(true, std::sync::atomic::Ordering::SeqCst);
        self.drain_submissions().await;

        let markets: HashSet<String> = self
            .store
            .open_orders()
            .await
            .into_iter()
            .map(|o| o.condition_id)
            .collect();
        let mut events = Vec::new();
        for condition_id in markets {
            events.extend(self.cancel_market(&condition_id, now).await);
        }
        if let Err(e) = self.sync_balance().await {
            tracing::warn!(error = %e, "Balance sync at shutdown failed");
        }
        tracing::info!(cancelled = events.len(), "Executor stopped");
        events
    }

    async fn drain_submissions(&self) {
        let deadline = Instant::now() + Duration::from_secs(self.config.shutdown_drain_secs);
        loop {
            let in_flight = self.slots.submitting();
            if in_flight.is_empty() {
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(markets = ?in_flight, "Submissions still in flight at shutdown");
                return;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    /// Rebuild slots from persisted orders and settle anything left dangling
    pub async fn recover(&self, now: DateTime<Utc>) -> Vec<OrderEvent> {
        let open = self.store.open_orders().await;
        for order in open.iter().filter(|o| o.exchange_id.is_some()) {
            self.slots.hold(&order.condition_id, order.id);
        }
        let mut events = self.sweep(now).await;

        let working: HashSet<String> = self
            .store
            .open_orders()
            .await
            .into_iter()
            .map(|o| o.condition_id)
            .collect();
        for position in self.store.positions().await {
            let condition_id = position.condition_id().to_string();
            if working.contains(&condition_id) {
                continue;
            }
            let purpose = match position.state {
                PositionState::PendingEntry => OrderPurpose::Entry,
                PositionState::PendingExit => OrderPurpose::Exit,
                _ => continue,
            };
            match self.reopen(&condition_id, purpose).await {
                Ok(effect) => {
                    tracing::warn!(condition_id = %condition_id, ?effect, "Recovered dangling position");
                    events.push(OrderEvent {
                        condition_id,
                        order_id: position.id,
                        purpose,
                        status: OrderStatus::Cancelled,
                        effect,
                    });
                }
                Err(e) => tracing::warn!(condition_id = %condition_id, error = %e, "Recovery failed"),
            }
        }

        if let Err(e) = self.sync_balance().await {
            tracing::warn!(error = %e, "Balance sync at recovery failed");
        }
        tracing::info!(events = events.len(), "Executor recovered");
        events
    }
}

/// The order's own record, as a cancelled ack
fn last_known(order: &OrderRecord, exchange_id: &str) -> OrderAck {
    OrderAck {
        exchange_id: exchange_id.to_string(),
        status: AckStatus::Cancelled,
        filled_size: order.filled,
        avg_price: order.avg_price,
        fees: order.fees,
    }
}
