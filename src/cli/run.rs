//! Run command implementation

use crate::config::{Config, ExecutionMode, GatewayConfig};
use crate::engine::Engine;
use crate::gateway::{ApiCredentials, ClobGateway, ExchangeGateway, PaperGateway};
use crate::market::{GammaClient, GammaConfig};
use crate::store::LedgerStore;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Force paper trading regardless of the configured mode
    #[arg(long)]
    pub paper: bool,
}

impl RunArgs {
    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        if self.paper {
            config.gateway.mode = ExecutionMode::Paper;
        }

        let store = Arc::new(LedgerStore::open(&config.store.data_dir).await?);
        let gateway = build_gateway(&config.gateway)?;
        let source = Arc::new(GammaClient::with_config(GammaConfig {
            base_url: config.gateway.gamma_url.clone(),
            timeout: Duration::from_secs(config.gateway.request_timeout_secs),
        })?);

        let (shutdown, _) = broadcast::channel(4);
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, shutting down");
                signal.send(()).ok();
            }
        });

        let engine = Arc::new(Engine::new(config, gateway, source, store));
        engine.run(shutdown).await
    }
}

/// Paper or live gateway per the configured mode
pub fn build_gateway(config: &GatewayConfig) -> anyhow::Result<Arc<dyn ExchangeGateway>> {
    match config.mode {
        ExecutionMode::Paper => {
            tracing::info!(balance = %config.paper_balance, "Paper trading");
            Ok(Arc::new(
                PaperGateway::new(config.paper_balance, config.fee_rate)
                    .with_market_data(config.ws_url.clone()),
            ))
        }
        ExecutionMode::Live => {
            let signer = config
                .signer_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("gateway.signer_url is required in live mode"))?;
            let credentials = ApiCredentials::from_env()?;
            tracing::warn!(clob_url = %config.clob_url, "LIVE trading");
            Ok(Arc::new(ClobGateway::new(
                config.clob_url.clone(),
                config.ws_url.clone(),
                signer,
                credentials,
                Duration::from_secs(config.request_timeout_secs),
            )?))
        }
    }
}
