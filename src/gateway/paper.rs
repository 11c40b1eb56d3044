//! Paper trading gateway with simulated fills
//!
//! Market data comes from the live market channel when a WebSocket URL is
//! configured, and from [`PaperGateway::push_tick`] otherwise. Orders fill
//! against the last seen quote for their token, or at their limit price when
//! no quote is known yet.

use super::{
    subscribe_market, AckStatus, Balance, ClaimRequest, ClaimResult, ClaimStatus, ExchangeGateway,
    GatewayError, OrderAck, OrderRequest, PriceTick, Side, TimeInForce,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

#[derive(Debug, Default)]
struct PaperBook {
    balance: Decimal,
    fee_rate: Decimal,
    /// token id -> shares held
    holdings: HashMap<String, Decimal>,
    /// token id -> last (bid, ask)
    quotes: HashMap<String, (Option<Decimal>, Option<Decimal>)>,
    orders: HashMap<String, OrderAck>,
    /// exchange id -> resting GTC order
    resting: HashMap<String, OrderRequest>,
    claims: HashMap<String, ClaimStatus>,
}

impl PaperBook {
    /// Price this order would trade at against the last quote
    fn marketable(&self, request: &OrderRequest) -> Option<Decimal> {
        let quote = self.quotes.get(&request.token_id).copied();
        match (request.side, quote) {
            (_, None) => Some(request.price),
            (Side::Buy, Some((_, Some(ask)))) if ask <= request.price => Some(ask),
            (Side::Sell, Some((Some(bid), _))) if bid >= request.price => Some(bid),
            _ => None,
        }
    }

    /// Move cash and shares for a full fill; returns the fees charged
    fn execute(&mut self, request: &OrderRequest, price: Decimal) -> Result<Decimal, GatewayError> {
        let notional = price * request.size;
        let fees = notional * self.fee_rate;
        match request.side {
            Side::Buy => {
                if self.balance < notional + fees {
                    return Err(GatewayError::InsufficientBalance(format!(
                        "need {} have {}",
                        notional + fees,
                        self.balance
                    )));
                }
                self.balance -= notional + fees;
                *self.holdings.entry(request.token_id.clone()).or_default() += request.size;
            }
            Side::Sell => {
                let held = self.holdings.entry(request.token_id.clone()).or_default();
                if *held < request.size {
                    return Err(GatewayError::Rejected(format!(
                        "sell {} exceeds holdings {}",
                        request.size, held
                    )));
                }
                *held -= request.size;
                self.balance += notional - fees;
            }
        }
        Ok(fees)
    }

    /// Store a quote and fill any resting orders it crosses
    fn record_quote(&mut self, tick: &PriceTick) {
        self.quotes
            .insert(tick.token_id.clone(), (tick.best_bid, tick.best_ask));

        let crossed: Vec<(String, Decimal)> = self
            .resting
            .iter()
            .filter(|(_, r)| r.token_id == tick.token_id)
            .filter_map(|(id, r)| self.marketable(r).map(|price| (id.clone(), price)))
            .collect();

        for (exchange_id, price) in crossed {
            let Some(request) = self.resting.remove(&exchange_id) else {
                continue;
            };
            match self.execute(&request, price) {
                Ok(fees) => {
                    if let Some(ack) = self.orders.get_mut(&exchange_id) {
                        ack.status = AckStatus::Filled;
                        ack.filled_size = request.size;
                        ack.avg_price = Some(price);
                        ack.fees = fees;
                    }
                    tracing::info!(%exchange_id, %price, size = %request.size, "Paper resting order filled");
                }
                Err(e) => {
                    self.resting.insert(exchange_id, request);
                    tracing::debug!(error = %e, "Paper resting order cannot fill yet");
                }
            }
        }
    }
}

/// Simulated exchange
pub struct PaperGateway {
    ws_url: Option<String>,
    state: Arc<Mutex<PaperBook>>,
    ticks: broadcast::Sender<PriceTick>,
}

impl PaperGateway {
    /// Create a paper gateway with a starting USDC balance
    pub fn new(balance: Decimal, fee_rate: Decimal) -> Self {
        let (ticks, _) = broadcast::channel(4096);
        Self {
            ws_url: None,
            state: Arc::new(Mutex::new(PaperBook {
                balance,
                fee_rate,
                ..Default::default()
            })),
            ticks,
        }
    }

    /// Stream real market data from the CLOB market channel
    pub fn with_market_data(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    /// Feed a tick to subscribers and to the fill simulator
    pub fn push_tick(&self, tick: PriceTick) {
        record_quote(&self.state, &tick);
        let _ = self.ticks.send(tick);
    }

    /// Live market data subscriptions fed by [`PaperGateway::push_tick`]
    pub fn tick_subscribers(&self) -> usize {
        self.ticks.receiver_count()
    }

    /// Shares of a token held
    pub fn holdings(&self, token_id: &str) -> Decimal {
        self.lock()
            .map(|s| s.holdings.get(token_id).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PaperBook>, GatewayError> {
        self.state
            .lock()
            .map_err(|_| GatewayError::Network("paper state poisoned".into()))
    }
}

fn record_quote(state: &Mutex<PaperBook>, tick: &PriceTick) {
    if let Ok(mut book) = state.lock() {
        book.record_quote(tick);
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn subscribe(
        &self,
        token_ids: Vec<String>,
    ) -> Result<mpsc::Receiver<PriceTick>, GatewayError> {
        let (tx, rx) = mpsc::channel(1024);

        let mut injected = self.ticks.subscribe();
        let wanted = token_ids.clone();
        let inject_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    received = injected.recv() => received,
                    _ = inject_tx.closed() => return,
                };
                match received {
                    Ok(tick) if wanted.contains(&tick.token_id) => {
                        if inject_tx.send(tick).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Paper tick subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        if let Some(url) = &self.ws_url {
            let mut live = subscribe_market(url, token_ids)
                .map_err(|e| GatewayError::Network(e.to_string()))?;
            let state = self.state.clone();
            tokio::spawn(async move {
                loop {
                    let tick = tokio::select! {
                        tick = live.recv() => tick,
                        _ = tx.closed() => return,
                    };
                    let Some(tick) = tick else { return };
                    record_quote(&state, &tick);
                    if tx.send(tick).await.is_err() {
                        return;
                    }
                }
            });
        }

        Ok(rx)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let mut book = self.lock()?;
        let exchange_id = format!("paper-{}", Uuid::new_v4());

        let Some(price) = book.marketable(request) else {
            let status = match request.time_in_force {
                TimeInForce::Gtc => AckStatus::Open,
                TimeInForce::Fok | TimeInForce::Fak => AckStatus::Cancelled,
            };
            let ack = OrderAck {
                exchange_id: exchange_id.clone(),
                status,
                filled_size: Decimal::ZERO,
                avg_price: None,
                fees: Decimal::ZERO,
            };
            if status == AckStatus::Open {
                book.resting.insert(exchange_id.clone(), request.clone());
            }
            book.orders.insert(exchange_id, ack.clone());
            tracing::info!(token_id = %request.token_id, price = %request.price, ?status, "Paper order not marketable");
            return Ok(ack);
        };

        let fees = book.execute(request, price)?;
        let ack = OrderAck {
            exchange_id: exchange_id.clone(),
            status: AckStatus::Filled,
            filled_size: request.size,
            avg_price: Some(price),
            fees,
        };
        book.orders.insert(exchange_id, ack.clone());
        tracing::info!(token_id = %request.token_id, side = ?request.side, %price, size = %request.size, "Paper order filled");
        Ok(ack)
    }

    async fn cancel_order(&self, exchange_id: &str) -> Result<(), GatewayError> {
        let mut book = self.lock()?;
        let ack = book
            .orders
            .get_mut(exchange_id)
            .ok_or_else(|| GatewayError::NotFound(exchange_id.to_string()))?;
        if !ack.status.is_terminal() {
            ack.status = AckStatus::Cancelled;
        }
        book.resting.remove(exchange_id);
        tracing::info!(exchange_id, "Paper order cancelled");
        Ok(())
    }

    async fn order_status(&self, exchange_id: &str) -> Result<OrderAck, GatewayError> {
        self.lock()?
            .orders
            .get(exchange_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(exchange_id.to_string()))
    }

    async fn balance(&self) -> Result<Balance, GatewayError> {
        Ok(Balance {
            available: self.lock()?.balance,
        })
    }

    async fn submit_claim(&self, request: &ClaimRequest) -> Result<ClaimResult, GatewayError> {
        let mut book = self.lock()?;
        let held = book
            .holdings
            .remove(&request.token_id)
            .unwrap_or_default();
        book.balance += held;

        let tx_id = format!("paper-claim-{}", Uuid::new_v4());
        book.claims.insert(tx_id.clone(), ClaimStatus::Confirmed);
        tracing::info!(condition_id = %request.condition_id, payout = %held, "Paper claim redeemed");
        Ok(ClaimResult {
            tx_id,
            status: ClaimStatus::Confirmed,
        })
    }

    async fn claim_status(&self, tx_id: &str) -> Result<ClaimStatus, GatewayError> {
        self.lock()?
            .claims
            .get(tx_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(tx_id.to_string()))
    }
}
