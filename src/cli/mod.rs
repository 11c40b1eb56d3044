//! CLI interface for poly-snipe
//!
//! Provides subcommands for:
//! - `run`: Start the trading engine (paper or live)
//! - `status`: Show cash, open positions, P&L and pending claims
//! - `trades`: Show closed trades
//! - `claim`: Redeem one resolved market now
//! - `reset-pnl`: Start a fresh P&L period
//! - `config`: Show the effective configuration

mod admin;
mod run;
mod status;

pub use admin::{reset_pnl, ClaimArgs};
pub use run::{build_gateway, RunArgs};
pub use status::{StatusArgs, TradesArgs};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "poly-snipe")]
#[command(about = "Buy-once sniping bot for Polymarket 15-minute crypto up/down markets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the trading engine
    Run(RunArgs),
    /// Show current state
    Status(StatusArgs),
    /// Show closed trades
    Trades(TradesArgs),
    /// Claim a resolved market immediately
    Claim(ClaimArgs),
    /// Reset aggregate P&L and win rate
    ResetPnl,
    /// Show configuration
    Config,
}
