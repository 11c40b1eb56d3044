//! Integration tests for poly-snipe

mod claim_test;
mod common;
mod engine_test;
mod gateway_test;
mod ledger_test;
mod market_test;
mod trading_test;
