//! WebSocket client library
//!
//! Reconnecting WebSocket client with ping/pong keepalive and
//! subscription replay on reconnect.

mod client;
mod types;

pub use client::WsClient;
pub use types::{WsConfig, WsError, WsMessage};
