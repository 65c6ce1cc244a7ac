//! Bidirectional stream gateway
//!
//! Accepts WebSocket connections on the configured port, validates the
//! bearer at upgrade time, and hands each stream to its endpoint handler.
//!
//! ## Module Structure
//! - `protocol`: upgrade-path and bearer parsing
//! - `connection`: per-stream handshake, frame dispatch, session lifecycle

pub mod connection;
pub mod protocol;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;

use crate::Gateway;

pub use protocol::Endpoint;

/// Main gateway accept loop. One task per client stream.
pub async fn serve(gateway: Arc<Gateway>, port: u16) -> Result<()> {
    let addr = format!("{}:{port}", gateway.config.server.bind);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "stream gateway listening");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    if let Err(e) = connection::handle_connection(stream, gateway).await {
                        tracing::warn!(peer = %peer, error = %e, "connection error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
            }
        }
    }
}
