//! Per-stream connection handling
//!
//! Validates the bearer during the WebSocket handshake, then runs the
//! per-stream frame loop: reads are sequential, all writes funnel through a
//! single writer task so frame order and atomicity hold, and SFTP requests
//! fan out as their own tasks.

use std::ops::ControlFlow;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{
    handshake::server::{Request, Response},
    Message,
};
use tokio_tungstenite::WebSocketStream;

use serde_json::json;
use termgate_protocol::{decode, DecodeError, ErrorCode, Frame, MessageType};

use crate::session::{Outbound, Session, SessionEvent};
use crate::sftp;
use crate::tokens::AuthRejection;
use crate::Gateway;

use super::protocol::{classify_path, parse_bearer_header, parse_token_from_uri, Endpoint};

/// WebSocket close code for failed upgrade authentication.
const CLOSE_AUTH_FAILED: u16 = 4001;

/// Connection metadata extracted during the WebSocket handshake.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub uri: String,
    pub bearer: Option<String>,
}

/// Handle a single client stream from upgrade to teardown.
pub async fn handle_connection(stream: TcpStream, gateway: Arc<Gateway>) -> Result<()> {
    let conn_info = Arc::new(std::sync::Mutex::new(ConnectionInfo::default()));
    let conn_info_clone = conn_info.clone();

    let callback = move |req: &Request,
                         response: Response|
          -> std::result::Result<Response, http::Response<Option<String>>> {
        let mut info = conn_info_clone.lock().unwrap();
        info.uri = req.uri().to_string();
        info.bearer = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_header);
        Ok(response)
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let info = conn_info.lock().unwrap().clone();

    let Some(endpoint) = classify_path(&info.uri) else {
        close_with(ws, CloseCode::Policy, "unknown endpoint").await;
        anyhow::bail!("unknown endpoint: {}", info.uri);
    };

    let token = info
        .bearer
        .clone()
        .or_else(|| parse_token_from_uri(&info.uri));
    let principal_id = match token.as_deref().map(|t| gateway.tokens.verify(t)) {
        Some(Ok(principal_id)) => principal_id,
        Some(Err(AuthRejection::RemoteLogout)) => {
            close_with(
                ws,
                CloseCode::Library(CLOSE_AUTH_FAILED),
                ErrorCode::TokenRemoteLogout.as_str(),
            )
            .await;
            anyhow::bail!("upgrade rejected: remote logout");
        }
        _ => {
            close_with(
                ws,
                CloseCode::Library(CLOSE_AUTH_FAILED),
                ErrorCode::TokenInvalid.as_str(),
            )
            .await;
            anyhow::bail!("upgrade rejected: invalid token");
        }
    };

    match endpoint {
        Endpoint::Monitor => crate::monitor::handle(ws, &gateway, principal_id).await,
        Endpoint::Shell => shell_stream(ws, gateway, principal_id).await,
    }
}

async fn close_with(ws: WebSocketStream<TcpStream>, code: CloseCode, reason: &str) {
    let (mut tx, _rx) = ws.split();
    let _ = tx
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

/// The `/ssh` endpoint: one session per stream.
async fn shell_stream(
    ws: WebSocketStream<TcpStream>,
    gateway: Arc<Gateway>,
    principal_id: i64,
) -> Result<()> {
    let (ws_tx, mut ws_rx) = ws.split();
    let (writer_tx, writer_rx) = mpsc::channel::<Outbound>(256);
    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(16);

    let session = Session::new(
        principal_id,
        gateway.config.clone(),
        gateway.vault.clone(),
        writer_tx,
        events_tx,
    );
    gateway.sessions.insert(session.clone());
    tracing::info!(session_id = %session.id, principal_id, "session stream opened");

    let writer_task = tokio::spawn(run_writer(ws_tx, writer_rx, session.clone()));
    tokio::spawn(run_broker(session.clone(), events_rx));
    tokio::spawn(run_keepalive(session.clone()));

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                if dispatch_frame(&gateway, &session, &data).await.is_break() {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {}
        }
    }

    session.close().await;
    gateway.sessions.remove(&session.id);
    writer_task.abort();
    tracing::info!(session_id = %session.id, "session stream closed");
    Ok(())
}

/// Single writer: serializes all outbound frames and drops frames addressed
/// to cancelled operations.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    session: Arc<Session>,
) {
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Frame {
                operation_id,
                bytes,
            } => {
                if let Some(op) = &operation_id {
                    if session.transfers.is_cancelled(op) {
                        continue;
                    }
                }
                if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                    break;
                }
            }
            Outbound::Close => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Broker task: reacts to events raised by the shell pump.
async fn run_broker(session: Arc<Session>, mut events: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::TransportLost => session.handle_transport_lost().await,
            SessionEvent::ClientSlow => {
                session
                    .fail(ErrorCode::ClientSlow, "client stream cannot keep up")
                    .await;
            }
        }
    }
}

/// Unsolicited heartbeat ticker.
async fn run_keepalive(session: Arc<Session>) {
    let cancelled = session.cancel_token();
    let mut interval = tokio::time::interval(session.config.keepalive_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = cancelled.cancelled() => break,
            _ = interval.tick() => session.heartbeat_tick().await,
        }
    }
}

/// Route one inbound frame. `Break` ends the stream loop.
async fn dispatch_frame(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    data: &[u8],
) -> ControlFlow<()> {
    session.counters.add_in(data.len() as u64);
    let frame = match decode(data) {
        Ok(frame) => frame,
        Err(e) => {
            let code = match e {
                DecodeError::BadMagic(_) => ErrorCode::BadMagic,
                DecodeError::BadVersion(_) => ErrorCode::BadVersion,
                DecodeError::UnknownType(_) => ErrorCode::InvalidMessageType,
                DecodeError::ShortFrame(_) | DecodeError::BadHeader(_) => ErrorCode::BadFrame,
            };
            session.send_error(None, code, &e.to_string()).await;
            return ControlFlow::Continue(());
        }
    };

    match frame.msg_type {
        MessageType::Handshake => handle_handshake(gateway, session, &frame).await,
        MessageType::Heartbeat => {
            let request_id = frame.header["requestId"].as_str();
            session.handle_client_heartbeat(request_id).await;
        }
        MessageType::SshData => {
            if let Err(code) = session.shell_data(frame.payload).await {
                session.send_error(None, code, "shell is not available").await;
            }
        }
        MessageType::SshResize => {
            match serde_json::from_value::<termgate_protocol::Resize>(frame.header) {
                Ok(resize) => {
                    if let Err(code) = session.resize(resize.cols, resize.rows).await {
                        session.send_error(None, code, "shell is not available").await;
                    }
                }
                Err(e) => {
                    session
                        .send_error(None, ErrorCode::BadFrame, &format!("bad resize: {e}"))
                        .await;
                }
            }
        }
        MessageType::SshCommand => {
            match serde_json::from_value::<termgate_protocol::ShellCommand>(frame.header) {
                Ok(cmd) => {
                    if let Err(code) = session.shell_command(cmd.command).await {
                        session.send_error(None, code, "shell is not available").await;
                    }
                }
                Err(e) => {
                    session
                        .send_error(None, ErrorCode::BadFrame, &format!("bad command: {e}"))
                        .await;
                }
            }
        }
        MessageType::SshDataAck => {
            // Liveness credit from the client; feeds the slow-client watchdog.
            session.touch();
        }
        MessageType::Disconnect => {
            tracing::info!(session_id = %session.id, "client requested disconnect");
            return ControlFlow::Break(());
        }
        t if t.is_sftp_request() => {
            tokio::spawn(sftp::handle_frame(session.clone(), frame));
        }
        other => {
            session
                .send_error(
                    None,
                    ErrorCode::InvalidMessageType,
                    &format!("{other:?} is not a client request"),
                )
                .await;
        }
    }
    ControlFlow::Continue(())
}

/// First frame on the stream: materialize the pending descriptor and bring
/// up the SSH transport.
async fn handle_handshake(gateway: &Arc<Gateway>, session: &Arc<Session>, frame: &Frame) {
    let handshake =
        match serde_json::from_value::<termgate_protocol::ShellHandshake>(frame.header.clone()) {
            Ok(h) => h,
            Err(e) => {
                session
                    .send_error(None, ErrorCode::BadFrame, &format!("bad handshake: {e}"))
                    .await;
                return;
            }
        };

    let Some(descriptor) = gateway.pending.claim(&handshake.connection_id) else {
        session
            .send_error(
                None,
                ErrorCode::SessionNotFound,
                "pending connection unknown or expired",
            )
            .await;
        return;
    };
    if descriptor.owner_id != session.principal_id {
        session
            .send_error(None, ErrorCode::SessionNotFound, "connection not owned by caller")
            .await;
        return;
    }

    // Acknowledge the handshake immediately with the allocated session id;
    // the CONNECTED frame follows once SSH is up.
    let header = json!({ "sessionId": session.id, "status": "connecting" });
    session
        .send_frame(None, MessageType::Handshake, &header, &[])
        .await;

    let session = session.clone();
    let gateway = gateway.clone();
    tokio::spawn(async move {
        if session.establish(descriptor.clone()).await {
            if let Err(e) = gateway.store.append_history(
                session.principal_id,
                &descriptor.host,
                descriptor.port,
                &descriptor.username,
            ) {
                tracing::warn!(session_id = %session.id, error = %e, "history append failed");
            }
        }
    });
}
