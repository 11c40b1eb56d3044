//! Auto-claim scheduler
//!
//! Periodically redeems winning shares of resolved markets. Claims queued
//! by the ledger at resolution are submitted, then polled until the
//! exchange confirms them. A confirmed market is never submitted twice.

use crate::config::ClaimConfig;
use crate::gateway::{ClaimRequest, ClaimStatus, ExchangeGateway, GatewayError};
use crate::store::{ClaimState, ClaimableItem, LedgerStore, StoreError};
use crate::telemetry::{incr_counter, record_latency, CounterMetric, LatencyMetric};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};

/// Extra wait past a rate-limit reset
const RESET_MARGIN_SECS: i64 = 60;
/// Most cycles skipped after repeated rate limits without a reset hint
const MAX_SKIP_CYCLES: u32 = 8;

/// What happened to one claim
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// Already redeemed earlier; nothing sent
    AlreadyConfirmed,
    Confirmed(ClaimableItem),
    /// Awaiting confirmation
    Submitted(String),
    /// Still waiting on a submitted transaction
    Waiting,
    Failed(String),
    RateLimited,
}

/// Counts from one pass over the claim queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSweep {
    pub submitted: usize,
    pub confirmed: usize,
    pub failed: usize,
    /// Sweep skipped while rate limited
    pub throttled: bool,
}

#[derive(Debug, Default)]
struct Throttle {
    paused_until: Option<DateTime<Utc>>,
    skip_cycles: u32,
    consecutive: u32,
}

impl Throttle {
    fn blocked(&mut self, now: DateTime<Utc>) -> bool {
        if let Some(until) = self.paused_until {
            if now < until {
                return true;
            }
            self.paused_until = None;
        }
        if self.skip_cycles > 0 {
            self.skip_cycles -= 1;
            return true;
        }
        false
    }

    fn limited(&mut self, retry_after: Option<Duration>, now: DateTime<Utc>) {
        self.consecutive += 1;
        match retry_after.and_then(|d| chrono::Duration::from_std(d).ok()) {
            Some(wait) => {
                self.paused_until = Some(now + wait + chrono::Duration::seconds(RESET_MARGIN_SECS));
            }
            None => {
                let shift = self.consecutive.saturating_sub(1).min(3);
                self.skip_cycles = (1u32 << shift).min(MAX_SKIP_CYCLES);
            }
        }
    }
}

pub struct ClaimScheduler {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<LedgerStore>,
    config: ClaimConfig,
    throttle: Mutex<Throttle>,
}

impl ClaimScheduler {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, store: Arc<LedgerStore>, config: ClaimConfig) -> Self {
        Self {
            gateway,
            store,
            config,
            throttle: Mutex::new(Throttle::default()),
        }
    }

    /// Sweep the queue on the configured interval until shutdown
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Auto-claim disabled");
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(self.config.initial_delay_secs)) => {}
            _ = shutdown.recv() => return,
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sweep = self.run_once(Utc::now()).await;
                    if sweep != ClaimSweep::default() {
                        tracing::info!(
                            submitted = sweep.submitted,
                            confirmed = sweep.confirmed,
                            failed = sweep.failed,
                            throttled = sweep.throttled,
                            "Claim sweep finished"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Claim scheduler stopped");
                    return;
                }
            }
        }
    }

    /// One pass over every queued claim
    pub async fn run_once(&self, now: DateTime<Utc>) -> ClaimSweep {
        let mut sweep = ClaimSweep::default();
        if self.throttle.lock().await.blocked(now) {
            sweep.throttled = true;
            return sweep;
        }

        let mut sent_any = false;
        for item in self.store.claims().await {
            let resubmit = matches!(item.status, ClaimState::Pending | ClaimState::Failed);
            if resubmit && sent_any && self.config.spacing_secs > 0 {
                tokio::time::sleep(Duration::from_secs(self.config.spacing_secs)).await;
            }

            let outcome = match self.process(&item, now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(condition_id = %item.condition_id, error = %e, "Claim bookkeeping failed");
                    continue;
                }
            };
            sent_any |= resubmit;

            match outcome {
                ClaimOutcome::Confirmed(_) => sweep.confirmed += 1,
                ClaimOutcome::Submitted(_) => sweep.submitted += 1,
                ClaimOutcome::Failed(_) => sweep.failed += 1,
                ClaimOutcome::RateLimited => {
                    sweep.throttled = true;
                    return sweep;
                }
                ClaimOutcome::AlreadyConfirmed | ClaimOutcome::Waiting => {}
            }
        }

        self.throttle.lock().await.consecutive = 0;
        sweep
    }

    /// Claim one market now, outside the schedule
    pub async fn force_claim(&self, condition_id: &str) -> Result<ClaimOutcome, StoreError> {
        let now = Utc::now();
        if self.store.is_claim_confirmed(condition_id).await {
            if let Err(e) = self.store.confirm_claim(condition_id, now).await {
                tracing::warn!(condition_id, error = %e, "Failed to mark claim confirmed");
            }
            return Ok(ClaimOutcome::AlreadyConfirmed);
        }
        let item = self
            .store
            .claim(condition_id)
            .await
            .ok_or_else(|| StoreError::NoClaim(condition_id.to_string()))?;
        tracing::info!(condition_id, status = ?item.status, "Forcing claim");
        self.process(&item, now).await
    }

    async fn process(&self, item: &ClaimableItem, now: DateTime<Utc>) -> Result<ClaimOutcome, StoreError> {
        if self.store.is_claim_confirmed(&item.condition_id).await {
            self.store.confirm_claim(&item.condition_id, now).await?;
            return Ok(ClaimOutcome::AlreadyConfirmed);
        }
        match (item.status, &item.tx_id) {
            (ClaimState::Submitted, Some(tx_id)) => self.check(item, tx_id, now).await,
            (ClaimState::Confirmed, _) => Ok(ClaimOutcome::AlreadyConfirmed),
            _ => self.submit(item, now).await,
        }
    }

    async fn submit(&self, item: &ClaimableItem, now: DateTime<Utc>) -> Result<ClaimOutcome, StoreError> {
        let request = ClaimRequest {
            condition_id: item.condition_id.clone(),
            outcome: item.outcome,
            token_id: item.token_id.clone(),
            size: item.size,
        };

        let started = Instant::now();
        let result = self.gateway.submit_claim(&request).await;
        record_latency(LatencyMetric::ClaimSubmission, started.elapsed());

        match result {
            Ok(result) => {
                self.store
                    .claim_submitted(&item.condition_id, result.tx_id.clone(), now)
                    .await?;
                tracing::info!(
                    condition_id = %item.condition_id,
                    tx_id = %result.tx_id,
                    payout = %item.expected_payout,
                    "Claim submitted"
                );
                self.apply_status(item, result.tx_id, result.status, now).await
            }
            Err(e) => self.failed(item, e, now).await,
        }
    }

    async fn check(&self, item: &ClaimableItem, tx_id: &str, now: DateTime<Utc>) -> Result<ClaimOutcome, StoreError> {
        match self.gateway.claim_status(tx_id).await {
            Ok(ClaimStatus::Pending) => Ok(ClaimOutcome::Waiting),
            Ok(status) => self.apply_status(item, tx_id.to_string(), status, now).await,
            Err(GatewayError::NotFound(_)) => {
                self.failed(item, GatewayError::NotFound(format!("claim tx {tx_id}")), now)
                    .await
            }
            Err(e @ GatewayError::RateLimited { .. }) => self.failed(item, e, now).await,
            Err(e) => {
                tracing::debug!(tx_id, error = %e, "Claim status query failed");
                Ok(ClaimOutcome::Waiting)
            }
        }
    }

    async fn apply_status(
        &self,
        item: &ClaimableItem,
        tx_id: String,
        status: ClaimStatus,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        match status {
            ClaimStatus::Pending => Ok(ClaimOutcome::Submitted(tx_id)),
            ClaimStatus::Confirmed => match self.store.confirm_claim(&item.condition_id, now).await? {
                Some(confirmed) => {
                    incr_counter(CounterMetric::ClaimsConfirmed);
                    Ok(ClaimOutcome::Confirmed(confirmed))
                }
                None => Ok(ClaimOutcome::AlreadyConfirmed),
            },
            ClaimStatus::Failed(reason) => {
                incr_counter(CounterMetric::ClaimsFailed);
                self.store
                    .claim_failed(&item.condition_id, reason.clone(), now)
                    .await?;
                tracing::warn!(condition_id = %item.condition_id, %tx_id, %reason, "Claim transaction failed");
                Ok(ClaimOutcome::Failed(reason))
            }
        }
    }

    async fn failed(&self, item: &ClaimableItem, error: GatewayError, now: DateTime<Utc>) -> Result<ClaimOutcome, StoreError> {
        let message = error.to_string();
        if let GatewayError::RateLimited { retry_after } = error {
            self.throttle.lock().await.limited(retry_after, now);
            tracing::warn!(condition_id = %item.condition_id, ?retry_after, "Claims rate limited");
            // rate limits do not count as attempts
            return Ok(ClaimOutcome::RateLimited);
        }

        incr_counter(CounterMetric::ClaimsFailed);
        self.store
            .claim_failed(&item.condition_id, message.clone(), now)
            .await?;
        tracing::warn!(condition_id = %item.condition_id, error = %message, attempts = item.attempts + 1, "Claim failed, will retry");
        Ok(ClaimOutcome::Failed(message))
    }
}
