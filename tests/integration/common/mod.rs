//! Shared fixtures for integration tests

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use poly_snipe::config::{BuyOnceConfig, ExecutorConfig, RiskConfig};
use poly_snipe::engine::{MarketEvent, MarketMonitor};
use poly_snipe::executor::OrderExecutor;
use poly_snipe::gateway::{
    AckStatus, Balance, ClaimRequest, ClaimResult, ClaimStatus, ExchangeGateway, GatewayError,
    OrderAck, OrderRequest, PaperGateway, PriceTick, Side,
};
use poly_snipe::market::{
    window_slug, Market, MarketError, MarketListing, MarketSource, MarketState, Outcome, Quote,
    Symbol,
};
use poly_snipe::risk::RiskManager;
use poly_snipe::store::LedgerStore;
use poly_snipe::strategy::{BuyOnce, PriceHistory};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};

pub const WINDOW: i64 = 1_767_638_700;

pub fn market(symbol: Symbol, start: i64) -> Market {
    let window_start = Utc.timestamp_opt(start, 0).unwrap();
    let prefix = symbol.slug_prefix();
    Market {
        condition_id: format!("0x{prefix}{start}"),
        symbol,
        slug: window_slug(symbol, window_start),
        up_token_id: format!("{prefix}-{start}-up"),
        down_token_id: format!("{prefix}-{start}-down"),
        window_start,
        resolution_time: window_start + Duration::seconds(900),
        min_order_size: dec!(5),
        max_order_size: None,
        state: MarketState::Active,
        winner: None,
        legacy: false,
    }
}

/// Paper exchange that counts what reaches it and can hold orders at the door
pub struct RecordingGateway {
    pub paper: PaperGateway,
    gate: Option<Semaphore>,
    placed: AtomicUsize,
    claims: AtomicUsize,
    /// condition id -> shares bought
    bought: Mutex<HashMap<String, Decimal>>,
}

impl RecordingGateway {
    pub fn new(balance: Decimal) -> Self {
        Self {
            paper: PaperGateway::new(balance, dec!(0)),
            gate: None,
            placed: AtomicUsize::new(0),
            claims: AtomicUsize::new(0),
            bought: Mutex::new(HashMap::new()),
        }
    }

    /// Hold every order until [`RecordingGateway::release`]
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn release(&self, orders: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(orders);
        }
    }

    pub fn orders_placed(&self) -> usize {
        self.placed.load(Ordering::SeqCst)
    }

    pub fn claims_submitted(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    pub fn bought(&self, condition_id: &str) -> Decimal {
        self.bought
            .lock()
            .unwrap()
            .get(condition_id)
            .copied()
            .unwrap_or_default()
    }

    pub async fn paper_balance(&self) -> Decimal {
        self.paper.balance().await.unwrap().available
    }

    pub fn tick(&self, token_id: &str, bid: Decimal, ask: Decimal) {
        self.paper.push_tick(PriceTick {
            token_id: token_id.to_string(),
            best_bid: Some(bid),
            best_ask: Some(ask),
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl ExchangeGateway for RecordingGateway {
    async fn subscribe(
        &self,
        token_ids: Vec<String>,
    ) -> Result<mpsc::Receiver<PriceTick>, GatewayError> {
        self.paper.subscribe(token_ids).await
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| GatewayError::Network(e.to_string()))?
                .forget();
        }
        self.placed.fetch_add(1, Ordering::SeqCst);
        let ack = self.paper.place_order(request).await?;
        if request.side == Side::Buy && ack.status == AckStatus::Filled {
            *self
                .bought
                .lock()
                .unwrap()
                .entry(request.condition_id.clone())
                .or_default() += ack.filled_size;
        }
        Ok(ack)
    }

    async fn cancel_order(&self, exchange_id: &str) -> Result<(), GatewayError> {
        self.paper.cancel_order(exchange_id).await
    }

    async fn order_status(&self, exchange_id: &str) -> Result<OrderAck, GatewayError> {
        self.paper.order_status(exchange_id).await
    }

    async fn balance(&self) -> Result<Balance, GatewayError> {
        self.paper.balance().await
    }

    async fn submit_claim(&self, request: &ClaimRequest) -> Result<ClaimResult, GatewayError> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        self.paper.submit_claim(request).await
    }

    async fn claim_status(&self, tx_id: &str) -> Result<ClaimStatus, GatewayError> {
        self.paper.claim_status(tx_id).await
    }
}

/// In-memory Gamma stand-in keyed by slug
#[derive(Default)]
pub struct StaticSource {
    listings: Mutex<HashMap<String, MarketListing>>,
}

impl StaticSource {
    pub fn list(&self, market: &Market, winner: Option<Outcome>) {
        let outcome_prices = winner.map(|w| match w {
            Outcome::Up => (Decimal::ONE, Decimal::ZERO),
            Outcome::Down => (Decimal::ZERO, Decimal::ONE),
        });
        self.listings.lock().unwrap().insert(
            market.slug.clone(),
            MarketListing {
                slug: market.slug.clone(),
                condition_id: Some(market.condition_id.clone()),
                up_token_id: Some(market.up_token_id.clone()),
                down_token_id: Some(market.down_token_id.clone()),
                end_time: Some(market.resolution_time),
                closed: winner.is_some(),
                outcome_prices,
            },
        );
    }
}

#[async_trait]
impl MarketSource for StaticSource {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<MarketListing>, MarketError> {
        Ok(self.listings.lock().unwrap().get(slug).cloned())
    }

    async fn find_by_condition(
        &self,
        condition_id: &str,
    ) -> Result<Option<MarketListing>, MarketError> {
        Ok(self
            .listings
            .lock()
            .unwrap()
            .values()
            .find(|l| l.condition_id.as_deref() == Some(condition_id))
            .cloned())
    }
}

pub fn risk() -> Arc<RiskManager> {
    Arc::new(RiskManager::new(&RiskConfig {
        stop_grace_secs: 0,
        ..Default::default()
    }))
}

pub fn buy_once() -> BuyOnce {
    BuyOnce::new(BuyOnceConfig {
        stability_secs: 0,
        aggressive_pricing: false,
        order_size: dec!(10),
        ..Default::default()
    })
}

/// Ledger, executor and gateway over a temporary directory
pub struct Desk {
    pub dir: tempfile::TempDir,
    pub gateway: Arc<RecordingGateway>,
    pub store: Arc<LedgerStore>,
    pub executor: Arc<OrderExecutor>,
    pub risk: Arc<RiskManager>,
}

impl Desk {
    pub async fn new() -> Self {
        Self::with_gateway(RecordingGateway::new(dec!(1000))).await
    }

    pub async fn with_gateway(gateway: RecordingGateway) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(gateway);
        let store = Arc::new(LedgerStore::open(dir.path()).await.unwrap());
        store.sync_balance(dec!(1000)).await.unwrap();
        let executor = Arc::new(OrderExecutor::new(
            gateway.clone(),
            store.clone(),
            ExecutorConfig::default(),
        ));
        Self {
            dir,
            gateway,
            store,
            executor,
            risk: risk(),
        }
    }

    pub fn monitor(&self, market: Market) -> MarketMonitor {
        MarketMonitor::new(
            market,
            Box::new(buy_once()),
            PriceHistory::new(16),
            self.store.clone(),
            self.executor.clone(),
            self.risk.clone(),
        )
    }

    /// Quote one outcome on the simulated book and show it to the monitor
    pub async fn tick(
        &self,
        monitor: &mut MarketMonitor,
        outcome: Outcome,
        bid: Decimal,
        ask: Decimal,
        secs_left: i64,
    ) {
        let token_id = monitor.market().token_id(outcome).to_string();
        self.gateway.tick(&token_id, bid, ask);
        let quote = Quote {
            best_bid: Some(bid),
            best_ask: Some(ask),
        };
        monitor
            .handle_event(
                MarketEvent::Tick { outcome, quote },
                at(monitor.market(), secs_left),
            )
            .await;
    }
}

/// Instant `secs_left` seconds before the market resolves
pub fn at(market: &Market, secs_left: i64) -> DateTime<Utc> {
    market.resolution_time - Duration::seconds(secs_left)
}
