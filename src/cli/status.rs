//! Status and trades commands

use crate::config::Config;
use crate::report::{format_trades, Report};
use crate::store::LedgerStore;
use chrono::Utc;
use clap::Args;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = LedgerStore::open(&config.store.data_dir).await?;
        let report = Report::build(&store, Utc::now()).await;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print!("{}", report.format_table());
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct TradesArgs {
    /// Most recent trades to show
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: usize,

    /// Print JSON lines instead of a table
    #[arg(long)]
    pub json: bool,
}

impl TradesArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = LedgerStore::open(&config.store.data_dir).await?;
        let trades = store.trades().await;
        if self.json {
            for trade in trades.iter().rev().take(self.limit) {
                println!("{}", serde_json::to_string(trade)?);
            }
        } else {
            print!("{}", format_trades(&trades, self.limit));
        }
        Ok(())
    }
}
