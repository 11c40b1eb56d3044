//! poly-snipe: buy-once sniping bot for Polymarket 15-minute crypto up/down markets
//!
//! This library provides the core components for:
//! - Exchange gateway (CLOB REST + market WebSocket, or paper simulation)
//! - Market discovery and lifecycle via the Gamma API
//! - Durable position, order, trade and claim ledger
//! - Per-market strategy state machine with pluggable decision functions
//! - Stop-loss, trailing stop and portfolio exposure limits
//! - Order execution with per-market slots, retries and stale-order sweeps
//! - Auto-claim of resolved winnings
//! - Structured logging and Prometheus metrics

pub mod claim;
pub mod cli;
pub mod config;
pub mod engine;
pub mod executor;
pub mod gateway;
pub mod market;
pub mod report;
pub mod risk;
pub mod store;
pub mod strategy;
pub mod telemetry;
pub mod ws;
