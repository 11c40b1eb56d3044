//! Configuration types for poly-snipe

use crate::market::Symbol;
use crate::telemetry::LogFormat;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub markets: MarketsConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub claim: ClaimConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Execution mode: paper trading or live
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Paper,
    Live,
}

/// Exchange gateway configuration
///
/// API credentials are never read from this file; see
/// [`crate::gateway::ApiCredentials::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Paper or live trading
    #[serde(default)]
    pub mode: ExecutionMode,

    /// CLOB REST base URL
    #[serde(default = "default_clob_url")]
    pub clob_url: String,

    /// CLOB market-channel WebSocket URL
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Gamma API base URL (market discovery and resolution)
    #[serde(default = "default_gamma_url")]
    pub gamma_url: String,

    /// Signing sidecar for order structs and redemptions (live mode only)
    #[serde(default)]
    pub signer_url: Option<String>,

    /// HTTP request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Simulated fee rate applied to paper fills
    #[serde(default)]
    pub fee_rate: Decimal,

    /// Starting USDC balance in paper mode
    #[serde(default = "default_paper_balance")]
    pub paper_balance: Decimal,
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}
fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}
fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}
fn default_request_timeout() -> u64 {
    10
}
fn default_paper_balance() -> Decimal {
    Decimal::new(1000, 0)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            clob_url: default_clob_url(),
            ws_url: default_ws_url(),
            gamma_url: default_gamma_url(),
            signer_url: None,
            request_timeout_secs: default_request_timeout(),
            fee_rate: Decimal::ZERO,
            paper_balance: default_paper_balance(),
        }
    }
}

/// Per-symbol market settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: Symbol,

    /// Exchange minimum order size (shares)
    #[serde(default = "default_min_order_size")]
    pub min_order_size: Decimal,

    /// Cap on order size for this symbol (shares)
    #[serde(default)]
    pub max_order_size: Option<Decimal>,
}

fn default_min_order_size() -> Decimal {
    Decimal::new(5, 0)
}

impl SymbolConfig {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            min_order_size: default_min_order_size(),
            max_order_size: None,
        }
    }
}

/// Market discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketsConfig {
    /// Symbols to trade
    #[serde(default = "default_symbols")]
    pub symbols: Vec<SymbolConfig>,

    /// How often to look for the current window's markets (seconds)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// How often to poll expired markets for their resolution (seconds)
    #[serde(default = "default_resolution_poll")]
    pub resolution_poll_secs: u64,
}

fn default_symbols() -> Vec<SymbolConfig> {
    Symbol::ALL.iter().copied().map(SymbolConfig::new).collect()
}
fn default_refresh_interval() -> u64 {
    60
}
fn default_resolution_poll() -> u64 {
    15
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            refresh_interval_secs: default_refresh_interval(),
            resolution_poll_secs: default_resolution_poll(),
        }
    }
}

/// Which decision function drives the per-market state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    BuyOnce,
    Momentum,
    Technical,
}

/// Strategy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub kind: StrategyKind,
    #[serde(default)]
    pub buy_once: BuyOnceConfig,
    #[serde(default)]
    pub momentum: MomentumConfig,
    #[serde(default)]
    pub technical: TechnicalConfig,
}

/// Buy-once sniping parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyOnceConfig {
    /// Lower edge of the entry band
    #[serde(default = "default_min_price")]
    pub min_price: Decimal,

    /// Upper edge of the entry band
    #[serde(default = "default_max_price")]
    pub max_price: Decimal,

    /// Sell when the ask reaches this price
    #[serde(default = "default_target_price")]
    pub target_price: Decimal,

    /// Shares per entry
    #[serde(default = "default_order_size")]
    pub order_size: Decimal,

    /// Only buy within this many seconds of resolution
    #[serde(default = "default_max_time_before_resolution")]
    pub max_time_before_resolution_secs: u64,

    /// Price must stay in band this long before buying (seconds, 0 = immediate)
    #[serde(default = "default_stability_secs")]
    pub stability_secs: u64,

    /// Bid above the ask by `aggressive_premium` to improve fill odds
    #[serde(default = "default_true")]
    pub aggressive_pricing: bool,

    #[serde(default = "default_aggressive_premium")]
    pub aggressive_premium: Decimal,

    /// Sell ahead of resolution when the bid is already near 1
    #[serde(default)]
    pub pre_resolution_exit: bool,

    #[serde(default = "default_pre_resolution_secs")]
    pub pre_resolution_secs: u64,

    #[serde(default = "default_pre_resolution_min_price")]
    pub pre_resolution_min_price: Decimal,
}

fn default_true() -> bool {
    true
}
fn default_min_price() -> Decimal {
    Decimal::new(98, 2)
}
fn default_max_price() -> Decimal {
    Decimal::new(99, 2)
}
fn default_target_price() -> Decimal {
    Decimal::new(999, 3)
}
fn default_order_size() -> Decimal {
    Decimal::new(80, 0)
}
fn default_max_time_before_resolution() -> u64 {
    180
}
fn default_stability_secs() -> u64 {
    1
}
fn default_aggressive_premium() -> Decimal {
    Decimal::new(5, 3) // 0.5%
}
fn default_pre_resolution_secs() -> u64 {
    120
}
fn default_pre_resolution_min_price() -> Decimal {
    Decimal::new(999, 3)
}

impl Default for BuyOnceConfig {
    fn default() -> Self {
        Self {
            min_price: default_min_price(),
            max_price: default_max_price(),
            target_price: default_target_price(),
            order_size: default_order_size(),
            max_time_before_resolution_secs: default_max_time_before_resolution(),
            stability_secs: default_stability_secs(),
            aggressive_pricing: true,
            aggressive_premium: default_aggressive_premium(),
            pre_resolution_exit: false,
            pre_resolution_secs: default_pre_resolution_secs(),
            pre_resolution_min_price: default_pre_resolution_min_price(),
        }
    }
}

/// Rate-of-change entry parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumConfig {
    /// Ticks between the two prices compared
    #[serde(default = "default_lookback_ticks")]
    pub lookback_ticks: usize,

    /// Minimum relative rise of the ask over the lookback
    #[serde(default = "default_min_rate_of_change")]
    pub min_rate_of_change: Decimal,

    /// Never buy above this ask
    #[serde(default = "default_momentum_max_price")]
    pub max_price: Decimal,

    #[serde(default = "default_momentum_order_size")]
    pub order_size: Decimal,

    #[serde(default = "default_momentum_target")]
    pub target_price: Decimal,

    #[serde(default = "default_momentum_window")]
    pub max_time_before_resolution_secs: u64,
}

fn default_lookback_ticks() -> usize {
    10
}
fn default_min_rate_of_change() -> Decimal {
    Decimal::new(2, 2) // 2%
}
fn default_momentum_max_price() -> Decimal {
    Decimal::new(95, 2)
}
fn default_momentum_order_size() -> Decimal {
    Decimal::new(10, 0)
}
fn default_momentum_target() -> Decimal {
    Decimal::new(99, 2)
}
fn default_momentum_window() -> u64 {
    600
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            lookback_ticks: default_lookback_ticks(),
            min_rate_of_change: default_min_rate_of_change(),
            max_price: default_momentum_max_price(),
            order_size: default_momentum_order_size(),
            target_price: default_momentum_target(),
            max_time_before_resolution_secs: default_momentum_window(),
        }
    }
}

/// RSI + moving-average crossover parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalConfig {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    /// RSI above this votes Down, below `100 - rsi_overbought` votes Up
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: Decimal,

    #[serde(default = "default_fast_ma")]
    pub fast_ma: usize,

    #[serde(default = "default_slow_ma")]
    pub slow_ma: usize,

    #[serde(default = "default_momentum_max_price")]
    pub max_price: Decimal,

    #[serde(default = "default_momentum_order_size")]
    pub order_size: Decimal,

    #[serde(default = "default_momentum_target")]
    pub target_price: Decimal,

    #[serde(default = "default_momentum_window")]
    pub max_time_before_resolution_secs: u64,
}

fn default_rsi_period() -> usize {
    14
}
fn default_rsi_overbought() -> Decimal {
    Decimal::new(70, 0)
}
fn default_fast_ma() -> usize {
    5
}
fn default_slow_ma() -> usize {
    20
}

impl Default for TechnicalConfig {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            rsi_overbought: default_rsi_overbought(),
            fast_ma: default_fast_ma(),
            slow_ma: default_slow_ma(),
            max_price: default_momentum_max_price(),
            order_size: default_momentum_order_size(),
            target_price: default_momentum_target(),
            max_time_before_resolution_secs: default_momentum_window(),
        }
    }
}

/// Risk management configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Force sell when the bid falls to this price
    #[serde(default = "default_stop_loss_price")]
    pub stop_loss_price: Decimal,

    /// Force sell when the bid falls this far below the high-water mark
    #[serde(default = "default_trailing_distance")]
    pub trailing_stop_distance: Decimal,

    /// Arm the trailing stop only once the high-water mark reaches this price
    #[serde(default)]
    pub trailing_stop_activation_price: Option<Decimal>,

    /// Skip stop evaluation for this long after entry (seconds)
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Max committed exposure as a fraction of equity
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,

    /// Max committed exposure relative to equity
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Decimal,

    /// Halt new entries after this much realized loss in a UTC day (USDC)
    #[serde(default)]
    pub max_daily_loss: Option<Decimal>,
}

fn default_stop_loss_price() -> Decimal {
    Decimal::new(92, 2)
}
fn default_trailing_distance() -> Decimal {
    Decimal::new(2, 2)
}
fn default_stop_grace() -> u64 {
    2
}
fn default_max_position_size() -> Decimal {
    Decimal::new(50, 2)
}
fn default_max_leverage() -> Decimal {
    Decimal::ONE
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_price: default_stop_loss_price(),
            trailing_stop_distance: default_trailing_distance(),
            trailing_stop_activation_price: None,
            stop_grace_secs: default_stop_grace(),
            max_position_size: default_max_position_size(),
            max_leverage: default_max_leverage(),
            max_daily_loss: None,
        }
    }
}

/// Order executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Attempts per order before reporting a fatal failure
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Unfilled orders older than this are cancelled by the sweep
    #[serde(default = "default_stale_order")]
    pub stale_order_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Price concession per failed exit round
    #[serde(default = "default_exit_price_step")]
    pub exit_price_step: Decimal,

    /// Exits are never priced below this
    #[serde(default = "default_exit_floor")]
    pub exit_floor_price: Decimal,

    #[serde(default = "default_max_exit_attempts")]
    pub max_exit_attempts: u32,

    /// Balance re-sync against the exchange (seconds)
    #[serde(default = "default_balance_sync")]
    pub balance_sync_secs: u64,

    /// How long shutdown waits for in-flight submissions to be acknowledged
    #[serde(default = "default_shutdown_drain")]
    pub shutdown_drain_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    1_000
}
fn default_max_backoff() -> u64 {
    60_000
}
fn default_stale_order() -> u64 {
    30
}
fn default_sweep_interval() -> u64 {
    5
}
fn default_exit_price_step() -> Decimal {
    Decimal::new(5, 2)
}
fn default_exit_floor() -> Decimal {
    Decimal::new(1, 2)
}
fn default_max_exit_attempts() -> u32 {
    15
}
fn default_balance_sync() -> u64 {
    60
}
fn default_shutdown_drain() -> u64 {
    10
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            stale_order_secs: default_stale_order(),
            sweep_interval_secs: default_sweep_interval(),
            exit_price_step: default_exit_price_step(),
            exit_floor_price: default_exit_floor(),
            max_exit_attempts: default_max_exit_attempts(),
            balance_sync_secs: default_balance_sync(),
            shutdown_drain_secs: default_shutdown_drain(),
        }
    }
}

/// Auto-claim configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_claim_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_claim_initial_delay")]
    pub initial_delay_secs: u64,

    /// Pause between two claim submissions in one sweep (seconds)
    #[serde(default = "default_claim_spacing")]
    pub spacing_secs: u64,
}

fn default_claim_interval() -> u64 {
    900
}
fn default_claim_initial_delay() -> u64 {
    60
}
fn default_claim_spacing() -> u64 {
    20
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_claim_interval(),
            initial_delay_secs: default_claim_initial_delay(),
            spacing_secs: default_claim_spacing(),
        }
    }
}

/// Ledger persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this port when set
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the engine misbehave silently
    pub fn validate(&self) -> anyhow::Result<()> {
        let b = &self.strategy.buy_once;
        if b.min_price > b.max_price {
            anyhow::bail!(
                "strategy.buy_once: min_price {} above max_price {}",
                b.min_price,
                b.max_price
            );
        }
        if self.risk.stop_loss_price >= b.min_price {
            anyhow::bail!(
                "risk.stop_loss_price {} must sit below the entry band",
                self.risk.stop_loss_price
            );
        }
        if self.executor.max_attempts == 0 {
            anyhow::bail!("executor.max_attempts must be at least 1");
        }
        if self.markets.symbols.is_empty() {
            anyhow::bail!("markets.symbols is empty");
        }
        Ok(())
    }
}
