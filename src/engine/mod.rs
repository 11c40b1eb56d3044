//! Trading engine
//!
//! Wires the registry, ledger, executor and claim scheduler together. The
//! `run()` loop uses `tokio::select!` to:
//!   - discover and activate each window's markets, spawning a monitor per market
//!   - retire expired markets and deliver resolutions
//!   - sweep outstanding orders and route their outcomes to monitors
//!   - re-sync the cash balance with the exchange
//!
//! One market data subscription covers every monitored market and is replaced
//! whenever that token set changes. Ticks are tagged by the registry and
//! forwarded to the owning monitor's channel.

mod monitor;

pub use monitor::{MarketEvent, MarketMonitor};

use crate::claim::ClaimScheduler;
use crate::config::Config;
use crate::executor::{OrderEvent, OrderExecutor};
use crate::gateway::ExchangeGateway;
use crate::market::{Market, MarketRegistry, MarketSource, MarketState, Outcome, Quote};
use crate::risk::RiskManager;
use crate::store::{LedgerStore, Position};
use crate::strategy::{build_strategy, history_capacity, PriceHistory};
use crate::telemetry::{set_gauge, GaugeMetric};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

const MONITOR_QUEUE: usize = 1024;

type Monitors = Arc<RwLock<HashMap<String, mpsc::Sender<MarketEvent>>>>;

/// The live market data subscription and the task routing its ticks
#[derive(Default)]
struct Subscription {
    tokens: BTreeSet<String>,
    router: Option<JoinHandle<()>>,
}

impl Subscription {
    fn stop(&mut self) {
        if let Some(router) = self.router.take() {
            router.abort();
        }
        self.tokens.clear();
    }
}

pub struct Engine {
    config: Config,
    gateway: Arc<dyn ExchangeGateway>,
    registry: Arc<MarketRegistry>,
    store: Arc<LedgerStore>,
    executor: Arc<OrderExecutor>,
    claims: Arc<ClaimScheduler>,
    risk: Arc<RiskManager>,
    monitors: Monitors,
    subscription: Mutex<Subscription>,
}

impl Engine {
    pub fn new(
        config: Config,
        gateway: Arc<dyn ExchangeGateway>,
        source: Arc<dyn MarketSource>,
        store: Arc<LedgerStore>,
    ) -> Self {
        let registry = Arc::new(MarketRegistry::new(source, config.markets.symbols.clone()));
        let executor = Arc::new(OrderExecutor::new(
            gateway.clone(),
            store.clone(),
            config.executor.clone(),
        ));
        let claims = Arc::new(ClaimScheduler::new(
            gateway.clone(),
            store.clone(),
            config.claim.clone(),
        ));
        let risk = Arc::new(RiskManager::new(&config.risk));
        Self {
            config,
            gateway,
            registry,
            store,
            executor,
            claims,
            risk,
            monitors: Arc::new(RwLock::new(HashMap::new())),
            subscription: Mutex::new(Subscription::default()),
        }
    }

    pub fn registry(&self) -> &Arc<MarketRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<OrderExecutor> {
        &self.executor
    }

    pub fn claims(&self) -> &Arc<ClaimScheduler> {
        &self.claims
    }

    /// Markets with a live monitor
    pub async fn monitored(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.monitors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run until the shutdown signal, then cancel open orders and flush the ledger
    pub async fn run(self: Arc<Self>, shutdown: broadcast::Sender<()>) -> anyhow::Result<()> {
        tracing::info!(
            strategy = ?self.config.strategy.kind,
            mode = ?self.config.gateway.mode,
            symbols = self.config.markets.symbols.len(),
            "Engine starting"
        );

        if let Err(e) = self.executor.sync_balance().await {
            tracing::warn!(error = %e, "Initial balance sync failed, using ledger cash");
        }
        self.restore().await;
        let recovered = self.executor.recover(Utc::now()).await;
        self.route_orders(recovered).await;
        self.refresh().await;

        let claims = self.claims.clone();
        let claim_shutdown = shutdown.subscribe();
        let claim_task = tokio::spawn(async move { claims.run(claim_shutdown).await });

        let mut stop = shutdown.subscribe();
        let mut refresh = interval_secs(self.config.markets.refresh_interval_secs);
        let mut resolutions = interval_secs(self.config.markets.resolution_poll_secs);
        let mut sweep = interval_secs(self.config.executor.sweep_interval_secs);
        let mut balance = interval_secs(self.config.executor.balance_sync_secs);

        loop {
            tokio::select! {
                _ = refresh.tick() => self.refresh().await,
                _ = resolutions.tick() => self.poll_resolutions().await,
                _ = sweep.tick() => {
                    let events = self.executor.sweep(Utc::now()).await;
                    self.route_orders(events).await;
                }
                _ = balance.tick() => {
                    if let Err(e) = self.executor.sync_balance().await {
                        tracing::warn!(error = %e, "Balance sync failed");
                    }
                }
                _ = stop.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await?;
        claim_task.await.ok();
        Ok(())
    }

    /// Cancel everything working on the exchange and persist the ledger
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let events = self.executor.shutdown(Utc::now()).await;
        self.route_orders(events).await;
        self.monitors.write().await.clear();
        self.subscription.lock().await.stop();
        self.store.flush().await?;
        tracing::info!("Engine stopped");
        Ok(())
    }

    /// Re-register markets that still hold positions from a previous run
    pub async fn restore(&self) {
        let now = Utc::now();
        for position in self.store.positions().await {
            let market = self.registry.restore(position.market.clone(), now).await;
            tracing::info!(
                condition_id = %market.condition_id,
                state = ?position.state,
                "Restored market from ledger"
            );
            self.spawn_monitor(market, Some(&position)).await;
        }
        self.resubscribe().await;
    }

    /// Discover the current window and start monitoring new markets
    pub async fn refresh(&self) {
        let activated = self.registry.refresh(Utc::now()).await;
        for market in &activated {
            let position = self.store.position(&market.condition_id).await;
            self.spawn_monitor(market.clone(), position.as_ref()).await;
        }
        if !activated.is_empty() {
            self.resubscribe().await;
        }
        set_gauge(
            GaugeMetric::ActiveMarkets,
            self.registry.in_state(MarketState::Active).await.len() as f64,
        );
    }

    /// Retire expired markets and settle resolved ones
    ///
    /// A resolved market stays registered until the ledger holds no position
    /// for it, so a failed settlement is retried on the next poll.
    pub async fn poll_resolutions(&self) {
        let now = Utc::now();
        for condition_id in self.registry.retire_expired(now).await {
            self.send(&condition_id, MarketEvent::Deadline).await;
        }

        let newly = self.registry.poll_resolutions().await;
        if !newly.is_empty() {
            tracing::debug!(markets = newly.len(), "Resolutions received");
        }

        let mut archived = false;
        for market in self.registry.in_state(MarketState::Resolved).await {
            let Some(winner) = market.winner else {
                continue;
            };
            archived |= self.settle(&market.condition_id, winner, now).await;
        }
        if archived {
            self.resubscribe().await;
        }
    }

    /// Hand a resolution to the market's monitor, or settle it here when the
    /// monitor is gone; true once the market is archived
    async fn settle(&self, condition_id: &str, winner: Outcome, now: DateTime<Utc>) -> bool {
        if self.store.position(condition_id).await.is_some() {
            let tx = self.monitors.read().await.get(condition_id).cloned();
            if let Some(tx) = tx {
                if tx.send(MarketEvent::Resolved(winner)).await.is_ok() {
                    return false;
                }
            }
        }

        // nothing left for a monitor to do; settling an already settled
        // market is a no-op that clears its traded mark
        self.executor.cancel_market(condition_id, now).await;
        match self.store.resolve(condition_id, winner, now).await {
            Ok(settlement) => {
                tracing::debug!(condition_id, ?settlement, "Market settled");
                self.monitors.write().await.remove(condition_id);
                self.registry.archive(condition_id).await
            }
            Err(e) => {
                tracing::warn!(condition_id, error = %e, "Settlement failed, retrying on next poll");
                false
            }
        }
    }

    async fn spawn_monitor(&self, market: Market, position: Option<&Position>) {
        let condition_id = market.condition_id.clone();
        let mut monitors = self.monitors.write().await;
        if monitors.contains_key(&condition_id) {
            return;
        }

        let strategy = build_strategy(&self.config.strategy);
        let history = PriceHistory::new(history_capacity(&self.config.strategy));
        let resolution_time = market.resolution_time;
        let mut monitor = MarketMonitor::new(
            market,
            strategy,
            history,
            self.store.clone(),
            self.executor.clone(),
            self.risk.clone(),
        )
        .resume(position);

        let (tx, mut rx) = mpsc::channel(MONITOR_QUEUE);
        monitors.insert(condition_id.clone(), tx.clone());

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                monitor.handle_event(event, Utc::now()).await;
                if monitor.is_finished() {
                    break;
                }
            }
            tracing::debug!(condition_id = %monitor.market().condition_id, phase = ?monitor.phase(), "Monitor stopped");
        });

        // deadline timer
        let wait = (resolution_time - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            tx.send(MarketEvent::Deadline).await.ok();
        });
        tracing::info!(condition_id = %condition_id, "Monitor started");
    }

    /// Point the market data subscription at every monitored market's tokens
    async fn resubscribe(&self) {
        let mut tokens = BTreeSet::new();
        let monitored: Vec<String> = self.monitors.read().await.keys().cloned().collect();
        for condition_id in monitored {
            if let Some(market) = self.registry.get(&condition_id).await {
                tokens.insert(market.up_token_id);
                tokens.insert(market.down_token_id);
            }
        }

        let mut subscription = self.subscription.lock().await;
        if subscription.tokens == tokens && subscription.router.is_some() {
            return;
        }
        if tokens.is_empty() {
            subscription.stop();
            tracing::info!("Market data unsubscribed");
            return;
        }

        let mut ticks = match self.gateway.subscribe(tokens.iter().cloned().collect()).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(error = %e, "Market data subscription failed");
                return;
            }
        };
        let registry = self.registry.clone();
        let monitors = self.monitors.clone();
        let router = tokio::spawn(async move {
            while let Some(tick) = ticks.recv().await {
                let Some((condition_id, outcome)) = registry.route(&tick.token_id).await else {
                    continue;
                };
                let tx = monitors.read().await.get(&condition_id).cloned();
                let Some(tx) = tx else {
                    continue;
                };
                let event = MarketEvent::Tick {
                    outcome,
                    quote: Quote {
                        best_bid: tick.best_bid,
                        best_ask: tick.best_ask,
                    },
                };
                tx.send(event).await.ok();
            }
        });

        // the old stream closes once its router is gone
        subscription.stop();
        tracing::info!(tokens = tokens.len(), "Market data subscribed");
        subscription.tokens = tokens;
        subscription.router = Some(router);
    }

    async fn send(&self, condition_id: &str, event: MarketEvent) {
        let tx = self.monitors.read().await.get(condition_id).cloned();
        if let Some(tx) = tx {
            tx.send(event).await.ok();
        }
    }

    async fn route_orders(&self, events: Vec<OrderEvent>) {
        for event in events {
            let condition_id = event.condition_id.clone();
            let tx = self.monitors.read().await.get(&condition_id).cloned();
            match tx {
                Some(tx) => {
                    tx.send(MarketEvent::Order(event)).await.ok();
                }
                None => {
                    tracing::debug!(condition_id = %condition_id, effect = ?event.effect, "Order event without a monitor")
                }
            }
        }
    }
}

fn interval_secs(secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}
