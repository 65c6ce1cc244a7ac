//! Monitoring channel
//!
//! The `/monitor` endpoint carries monitoring subscriptions over a second
//! bidirectional stream. The gateway only routes: a subscriber handshakes
//! with a target host, publishers push frames for that target, and the hub
//! fans them out. Collection on the remote hosts is not the gateway's job.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use termgate_protocol::{decode, encode, ErrorCode, MessageType, MonitorHandshake};

use crate::Gateway;

/// Broadcast capacity per target; slow subscribers lag and drop.
const CHANNEL_CAPACITY: usize = 256;

/// Fan-out hub keyed by target host.
pub struct MonitorHub {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl MonitorHub {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a target's feed, creating the channel on first use.
    pub fn subscribe(&self, target: &str) -> broadcast::Receiver<Vec<u8>> {
        let mut channels = self.channels.lock().unwrap();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(target.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Push a frame to everyone watching the target.
    pub fn publish(&self, target: &str, frame: Vec<u8>) -> usize {
        let channels = self.channels.lock().unwrap();
        channels
            .get(target)
            .map_or(0, |tx| tx.send(frame).unwrap_or(0))
    }

    pub fn target_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }
}

impl Default for MonitorHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-stream loop for `/monitor`: handshake names the target, inbound data
/// frames are published, subscription frames fan back out.
pub async fn handle(
    ws: WebSocketStream<TcpStream>,
    gateway: &Gateway,
    principal_id: i64,
) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = ws.split();

    // First frame must be the subscription handshake.
    let target = loop {
        let Some(msg) = ws_rx.next().await else {
            return Ok(());
        };
        match msg? {
            Message::Binary(data) => {
                let frame = decode(&data)?;
                if frame.msg_type != MessageType::Handshake {
                    let err = encode(
                        MessageType::Error,
                        &json!({
                            "errorCode": ErrorCode::InvalidMessageType,
                            "errorMessage": "expected monitor handshake",
                        }),
                        &[],
                    );
                    ws_tx.send(Message::Binary(err)).await?;
                    continue;
                }
                let handshake: MonitorHandshake = serde_json::from_value(frame.header)?;
                break handshake.target_host;
            }
            Message::Close(_) => return Ok(()),
            _ => {}
        }
    };

    tracing::info!(principal_id, target = %target, "monitor subscription");
    let mut feed = gateway.monitor.subscribe(&target);
    let ack = encode(
        MessageType::Success,
        &json!({ "targetHost": target, "message": "subscribed" }),
        &[],
    );
    ws_tx.send(Message::Binary(ack)).await?;

    loop {
        tokio::select! {
            update = feed.recv() => {
                match update {
                    Ok(bytes) => {
                        if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Dropped monitoring snapshots are fine; newer ones follow.
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let Ok(frame) = decode(&data) else { continue };
                        match frame.msg_type {
                            MessageType::Heartbeat => {
                                let echo = encode(
                                    MessageType::Heartbeat,
                                    &json!({ "targetHost": target }),
                                    &[],
                                );
                                if ws_tx.send(Message::Binary(echo)).await.is_err() {
                                    break;
                                }
                            }
                            MessageType::Disconnect => break,
                            // Monitoring payloads pass through to subscribers.
                            _ => {
                                gateway.monitor.publish(&target, data);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    tracing::info!(principal_id, target = %target, "monitor stream closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let hub = MonitorHub::new();
        assert_eq!(hub.publish("web-1", vec![1, 2, 3]), 0);
    }

    #[tokio::test]
    async fn test_subscribe_then_publish() {
        let hub = MonitorHub::new();
        let mut rx = hub.subscribe("web-1");
        assert_eq!(hub.publish("web-1", vec![9]), 1);
        assert_eq!(rx.recv().await.unwrap(), vec![9]);
        // Other targets do not leak across
        assert_eq!(hub.publish("web-2", vec![8]), 0);
    }

    #[test]
    fn test_stale_channels_pruned() {
        let hub = MonitorHub::new();
        drop(hub.subscribe("gone"));
        let _live = hub.subscribe("kept");
        assert_eq!(hub.target_count(), 1);
    }
}
