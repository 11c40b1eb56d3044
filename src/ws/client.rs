//! Reconnecting WebSocket client
//!
//! A background task owns the socket, replays the subscription frames after
//! every connect, answers pings, and reconnects when the server goes quiet.

use super::types::{WsConfig, WsError, WsMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub struct WsClient {
    config: WsConfig,
}

impl WsClient {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Start the socket task; it stops once the receiver is dropped
    pub fn connect(&self) -> (mpsc::Receiver<WsMessage>, mpsc::Sender<String>) {
        let (msg_tx, msg_rx) = mpsc::channel(1024);
        let (send_tx, send_rx) = mpsc::channel(256);
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) = run_connection_loop(config, msg_tx, send_rx).await {
                tracing::error!(error = %e, "WebSocket connection loop failed");
            }
        });

        (msg_rx, send_tx)
    }
}

async fn run_connection_loop(
    config: WsConfig,
    tx: mpsc::Sender<WsMessage>,
    mut send_rx: mpsc::Receiver<String>,
) -> Result<(), WsError> {
    let mut attempts = 0u32;

    loop {
        match connect_and_stream(&config, &tx, &mut send_rx, &mut attempts).await {
            Ok(()) => {
                tracing::info!(url = %config.url, "WebSocket connection closed cleanly");
                let _ = tx.send(WsMessage::Disconnected).await;
                return Ok(());
            }
            Err(e) => {
                attempts += 1;
                tracing::warn!(url = %config.url, error = %e, attempt = attempts, "WebSocket error, reconnecting");

                if config.max_reconnect_attempts > 0 && attempts >= config.max_reconnect_attempts {
                    let _ = tx.send(WsMessage::Disconnected).await;
                    return Err(WsError::MaxReconnectsExceeded);
                }
                if tx.is_closed() {
                    return Ok(());
                }

                let _ = tx.send(WsMessage::Reconnecting { attempt: attempts }).await;
                sleep(config.jittered_backoff(attempts)).await;
            }
        }
    }
}

async fn connect_and_stream(
    config: &WsConfig,
    tx: &mpsc::Sender<WsMessage>,
    send_rx: &mut mpsc::Receiver<String>,
    attempts: &mut u32,
) -> Result<(), WsError> {
    tracing::info!(url = %config.url, "Connecting to WebSocket");

    let (ws_stream, _response) = connect_async(&config.url)
        .await
        .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    for frame in &config.on_connect {
        write
            .send(Message::Text(frame.clone()))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))?;
    }
    *attempts = 0;

    if tx.send(WsMessage::Connected).await.is_err() {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(config.ping_interval);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut ping_sent_at: Option<Instant> = None;
    let mut last_data = Instant::now();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_data = Instant::now();
                        if tx.send(WsMessage::Text(text)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await
                            .map_err(|e| WsError::SendFailed(e.to_string()))?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        ping_sent_at = None;
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Err(WsError::ConnectionFailed("Server closed connection".into()));
                    }
                    Some(Err(e)) => {
                        return Err(WsError::ConnectionFailed(e.to_string()));
                    }
                    None => {
                        return Err(WsError::ConnectionFailed("Stream ended unexpectedly".into()));
                    }
                    _ => {}
                }
            }

            outgoing = send_rx.recv() => {
                match outgoing {
                    Some(text) => {
                        write.send(Message::Text(text)).await
                            .map_err(|e| WsError::SendFailed(e.to_string()))?;
                    }
                    None => return Ok(()),
                }
            }

            _ = ping_interval.tick() => {
                if last_data.elapsed() > config.stale_after {
                    return Err(WsError::Stale(config.stale_after));
                }
                if let Some(sent) = ping_sent_at {
                    if sent.elapsed() > config.pong_timeout {
                        return Err(WsError::PongTimeout(config.pong_timeout));
                    }
                    continue;
                }
                write.send(Message::Ping(vec![])).await
                    .map_err(|e| WsError::SendFailed(e.to_string()))?;
                ping_sent_at = Some(Instant::now());
            }
        }
    }
}
