//! WebSocket types and configuration

use rand::Rng;
use std::time::Duration;
use thiserror::Error;

/// Connection settings for one streaming socket
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Give up after this many consecutive failed connects (0 = never)
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub ping_interval: Duration,
    /// Connection is considered dead if no pong arrives within this window
    pub pong_timeout: Duration,
    /// Reconnect when no data frame arrives for this long
    pub stale_after: Duration,
    /// Frames replayed after every (re)connect, e.g. channel subscriptions
    pub on_connect: Vec<String>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            ping_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(90),
            on_connect: Vec::new(),
        }
    }
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn send_on_connect(mut self, frame: impl Into<String>) -> Self {
        self.on_connect.push(frame.into());
        self
    }

    /// Exponential delay before reconnect `attempt` (1-based), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_reconnect_delay
            .saturating_mul(factor)
            .min(self.max_reconnect_delay)
    }

    /// [`WsConfig::backoff`] plus up to 25% random jitter
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let spread = base.as_millis() as u64 / 4;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// Events delivered to the socket's consumer
#[derive(Debug, Clone)]
pub enum WsMessage {
    Text(String),
    /// Connected and subscription frames sent
    Connected,
    /// Closed for good
    Disconnected,
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Maximum reconnection attempts exceeded")]
    MaxReconnectsExceeded,
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("No pong within {0:?}")]
    PongTimeout(Duration),
    #[error("No data for {0:?}")]
    Stale(Duration),
}
