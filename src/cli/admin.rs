//! Administrative commands: forced claim and P&L reset

use super::build_gateway;
use crate::claim::{ClaimOutcome, ClaimScheduler};
use crate::config::Config;
use crate::store::LedgerStore;
use chrono::Utc;
use clap::Args;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct ClaimArgs {
    /// Condition id of the resolved market
    pub condition_id: String,
}

impl ClaimArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = Arc::new(LedgerStore::open(&config.store.data_dir).await?);
        let gateway = build_gateway(&config.gateway)?;
        let scheduler = ClaimScheduler::new(gateway, store, config.claim.clone());

        match scheduler.force_claim(&self.condition_id).await? {
            ClaimOutcome::AlreadyConfirmed => println!("{} was already claimed", self.condition_id),
            ClaimOutcome::Confirmed(item) => {
                println!("Claimed {}: payout {}", self.condition_id, item.expected_payout)
            }
            ClaimOutcome::Submitted(tx) => println!("Claim submitted, tx {tx}"),
            ClaimOutcome::Waiting => println!("Claim still awaiting confirmation"),
            ClaimOutcome::Failed(reason) => anyhow::bail!("claim failed: {reason}"),
            ClaimOutcome::RateLimited => anyhow::bail!("claim rate limited, try again later"),
        }
        Ok(())
    }
}

pub async fn reset_pnl(config: &Config) -> anyhow::Result<()> {
    let store = LedgerStore::open(&config.store.data_dir).await?;
    let now = Utc::now();
    store.reset_pnl(now).await?;
    println!("P&L reset at {now}");
    Ok(())
}
