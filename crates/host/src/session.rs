//! Session broker
//!
//! One [`Session`] binds an authenticated client stream to one SSH
//! connection. The broker owns the connection lifecycle (connect,
//! authenticate, shell, keep-alive, reconnect with backoff, teardown) and
//! serializes every outbound frame through a single writer channel so frame
//! order and atomicity are preserved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use termgate_protocol::{encode, ErrorCode, MessageType};
use termgate_ssh::{AuthMethod, SshConnection, SshError, SshTarget};

use crate::config::Config;
use crate::metrics::{monotonic_ms, LatencySampler, SessionCounters};
use crate::sftp::registry::TransferRegistry;
use crate::sftp::upload::Reassembly;
use crate::shell::{spawn_pump, PumpHandle, PumpInput};
use crate::store::ConnectionDescriptor;
use crate::vault::Vault;

/// Unique session identifier
pub type SessionId = String;

/// Generate a new unique session ID using UUID v4
pub fn generate_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}

/// Outstanding keep-alive pings older than this are purged.
const PING_EXPIRY: Duration = Duration::from_secs(10);

/// Inbound shell bytes buffered while SSH is still being established.
const PREBUFFER_CAP: usize = 256;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
    Closed,
    Errored,
}

/// Message to the per-session writer task.
#[derive(Debug)]
pub enum Outbound {
    Frame {
        /// Set for SFTP traffic so the writer can drop frames for cancelled
        /// operations.
        operation_id: Option<String>,
        bytes: Vec<u8>,
    },
    Close,
}

/// Events raised by the shell pump and handled by the broker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    TransportLost,
    ClientSlow,
}

/// Per-session state. Shared across the read loop, writer task, broker task,
/// keep-alive task, shell pump thread and SFTP operation tasks.
pub struct Session {
    pub id: SessionId,
    pub principal_id: i64,
    pub config: Config,
    vault: Vault,
    descriptor: Mutex<Option<ConnectionDescriptor>>,
    conn: Mutex<Option<Arc<SshConnection>>>,
    state: Mutex<SessionState>,
    retry_count: AtomicU32,
    writer: mpsc::Sender<Outbound>,
    events: mpsc::Sender<SessionEvent>,
    pump: Mutex<Option<PumpHandle>>,
    prebuffer: Mutex<Vec<Vec<u8>>>,
    pending_pings: Mutex<HashMap<String, Instant>>,
    remote_latency_ms: AtomicU64,
    pub latency: LatencySampler,
    pub counters: Arc<SessionCounters>,
    pub transfers: TransferRegistry,
    pub reassembly: Mutex<HashMap<String, Reassembly>>,
    cancel: CancellationToken,
    origin: Instant,
    pub created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl Session {
    pub fn new(
        principal_id: i64,
        config: Config,
        vault: Vault,
        writer: mpsc::Sender<Outbound>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            id: generate_session_id(),
            principal_id,
            config,
            vault,
            descriptor: Mutex::new(None),
            conn: Mutex::new(None),
            state: Mutex::new(SessionState::Connecting),
            retry_count: AtomicU32::new(0),
            writer,
            events,
            pump: Mutex::new(None),
            prebuffer: Mutex::new(Vec::new()),
            pending_pings: Mutex::new(HashMap::new()),
            remote_latency_ms: AtomicU64::new(0),
            latency: LatencySampler::default(),
            counters: Arc::new(SessionCounters::default()),
            transfers: TransferRegistry::new(),
            reassembly: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            origin: now,
            created_at: now,
            last_activity: Mutex::new(now),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            tracing::debug!(session_id = %self.id, from = ?*state, to = ?next, "state change");
            *state = next;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn conn(&self) -> Option<Arc<SshConnection>> {
        self.conn.lock().unwrap().clone()
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Milliseconds since the session started; the monotonic timestamp used
    /// in heartbeat frames.
    pub fn now_ms(&self) -> u64 {
        monotonic_ms(self.origin)
    }

    // === outbound ===

    /// Enqueue a frame on the session writer. Returns false when the writer
    /// is gone (stream closed).
    pub async fn send_frame(
        &self,
        operation_id: Option<&str>,
        msg_type: MessageType,
        header: &Value,
        payload: &[u8],
    ) -> bool {
        let bytes = encode(msg_type, header, payload);
        self.counters.add_out(bytes.len() as u64);
        self.writer
            .send(Outbound::Frame {
                operation_id: operation_id.map(ToString::to_string),
                bytes,
            })
            .await
            .is_ok()
    }

    /// Emit an `ERROR` frame.
    pub async fn send_error(
        &self,
        operation_id: Option<&str>,
        code: ErrorCode,
        message: &str,
    ) -> bool {
        let header = json!({
            "errorCode": code,
            "errorMessage": message,
            "sessionId": self.id,
            "operationId": operation_id,
        });
        self.send_frame(operation_id, MessageType::Error, &header, &[])
            .await
    }

    /// Terminal `SUCCESS`/data frame for an SFTP operation: sent only if no
    /// terminal was delivered yet and the operation is not cancelled.
    pub async fn send_terminal(
        &self,
        operation_id: &str,
        msg_type: MessageType,
        header: &Value,
        payload: &[u8],
    ) -> bool {
        if !self.transfers.try_finish(operation_id) {
            return false;
        }
        self.send_frame(Some(operation_id), msg_type, header, payload)
            .await
    }

    /// Terminal `ERROR` for an SFTP operation, same exactly-once discipline.
    pub async fn send_terminal_error(
        &self,
        operation_id: &str,
        code: ErrorCode,
        message: &str,
    ) -> bool {
        if !self.transfers.try_finish(operation_id) {
            return false;
        }
        self.send_error(Some(operation_id), code, message).await
    }

    /// Ask the writer to close the client stream.
    pub async fn request_close(&self) {
        let _ = self.writer.send(Outbound::Close).await;
    }

    // === connect / reconnect ===

    /// Establish the SSH connection for a freshly handed-out descriptor,
    /// open the shell and start pumping. Emits `CONNECTED` on success or a
    /// transport-mapped `ERROR` on failure.
    pub async fn establish(self: &Arc<Self>, descriptor: ConnectionDescriptor) -> bool {
        *self.descriptor.lock().unwrap() = Some(descriptor.clone());
        match self.open_transport(&descriptor).await {
            Ok(()) => {
                self.set_state(SessionState::Connected);
                self.retry_count.store(0, Ordering::Relaxed);
                let header = json!({
                    "sessionId": self.id,
                    "status": "connected",
                    "host": descriptor.host,
                    "port": descriptor.port,
                });
                self.send_frame(None, MessageType::Connected, &header, &[])
                    .await;
                true
            }
            Err((code, message)) => {
                self.set_state(SessionState::Errored);
                self.send_error(None, code, &message).await;
                self.request_close().await;
                false
            }
        }
    }

    /// Decrypt credentials, dial, authenticate and open the shell channel.
    /// Credentials live only inside this call.
    async fn open_transport(
        self: &Arc<Self>,
        descriptor: &ConnectionDescriptor,
    ) -> Result<(), (ErrorCode, String)> {
        self.set_state(SessionState::Authenticating);

        let auth = self.resolve_auth(descriptor)?;
        let target = SshTarget {
            host: descriptor.host.clone(),
            port: descriptor.port,
            username: descriptor.username.clone(),
        };
        let timeout = self.config.connect_timeout();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = SshConnection::connect(target, &auth, timeout)?;
            conn.open_shell(80, 24)?;
            Ok::<_, SshError>(Arc::new(conn))
        })
        .await
        .map_err(|e| (ErrorCode::OperationFailed, e.to_string()))?
        .map_err(|e| (map_ssh_error(&e), e.to_string()))?;

        *self.conn.lock().unwrap() = Some(conn.clone());

        // Replace any previous pump and flush bytes that arrived early.
        let handle = spawn_pump(
            self.id.clone(),
            conn,
            self.writer.clone(),
            self.events.clone(),
            self.counters.clone(),
        );
        let buffered: Vec<Vec<u8>> = std::mem::take(&mut *self.prebuffer.lock().unwrap());
        for data in buffered {
            let _ = handle.input.send(PumpInput::Data(data)).await;
        }
        if let Some(old) = self.pump.lock().unwrap().replace(handle) {
            old.stop();
        }
        Ok(())
    }

    /// Build the auth method from the descriptor. Key auth wins when a key
    /// is present; `authType = key` without a usable key fails distinctly
    /// rather than silently retrying password.
    fn resolve_auth(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<AuthMethod, (ErrorCode, String)> {
        let decrypt = |field: &Option<String>| -> Result<Option<SecretString>, (ErrorCode, String)> {
            match field {
                Some(opaque) => self
                    .vault
                    .decrypt_secret(opaque)
                    .map(Some)
                    .map_err(|e| (ErrorCode::AuthFailed, format!("credential decrypt: {e}"))),
                None => Ok(None),
            }
        };

        if let Some(private_key) = decrypt(&descriptor.private_key_enc)? {
            return Ok(AuthMethod::Key {
                private_key,
                passphrase: decrypt(&descriptor.passphrase_enc)?,
            });
        }
        if descriptor.auth_type == "key" {
            return Err((
                ErrorCode::AuthFailed,
                "auth type is key but no private key is stored".into(),
            ));
        }
        match decrypt(&descriptor.password_enc)? {
            Some(password) => Ok(AuthMethod::Password(password)),
            None => Err((ErrorCode::AuthFailed, "no credentials stored".into())),
        }
    }

    /// Transport loss while connected: retry with exponential backoff using
    /// the still-cached descriptor. The shell is a fresh PTY; no scrollback
    /// is replayed.
    pub async fn handle_transport_lost(self: &Arc<Self>) {
        if self.state() != SessionState::Connected {
            return;
        }
        self.set_state(SessionState::Reconnecting);
        self.teardown_transport().await;

        let descriptor = self.descriptor.lock().unwrap().clone();
        let Some(descriptor) = descriptor else {
            self.fail(ErrorCode::SessionNotFound, "no descriptor cached")
                .await;
            return;
        };

        while self.retry_count.load(Ordering::Relaxed) < self.config.ssh.max_retry {
            let attempt = self.retry_count.fetch_add(1, Ordering::Relaxed);
            let delay =
                Duration::from_millis(self.config.ssh.reconnect_delay_ms << attempt);
            tracing::info!(
                session_id = %self.id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            match self.open_transport(&descriptor).await {
                Ok(()) => {
                    self.set_state(SessionState::Connected);
                    self.retry_count.store(0, Ordering::Relaxed);
                    let header = json!({
                        "sessionId": self.id,
                        "status": "connected",
                        "reconnected": true,
                    });
                    self.send_frame(None, MessageType::Connected, &header, &[])
                        .await;
                    return;
                }
                Err((code, message)) => {
                    tracing::warn!(session_id = %self.id, %message, "reconnect attempt failed");
                    // Credential and protocol failures will not heal with
                    // another attempt.
                    if !matches!(
                        code,
                        ErrorCode::ConnectTimeout
                            | ErrorCode::ConnectRefused
                            | ErrorCode::HostUnreachable
                    ) {
                        self.fail(code, &message).await;
                        return;
                    }
                }
            }
        }
        self.fail(ErrorCode::ConnectTimeout, "reconnect budget exhausted")
            .await;
    }

    /// Error out the session: emit the error frame, mark `Errored`, close.
    pub async fn fail(&self, code: ErrorCode, message: &str) {
        self.set_state(SessionState::Errored);
        self.send_error(None, code, message).await;
        self.request_close().await;
    }

    // === shell ===

    /// Route client shell bytes: to the pump when connected, to the bounded
    /// prebuffer while the transport is still coming up.
    pub async fn shell_data(&self, data: Vec<u8>) -> Result<(), ErrorCode> {
        self.touch();
        match self.state() {
            SessionState::Connected => {
                let input = self.pump.lock().unwrap().as_ref().map(|p| p.input.clone());
                if let Some(input) = input {
                    let _ = input.send(PumpInput::Data(data)).await;
                }
                Ok(())
            }
            SessionState::Connecting
            | SessionState::Authenticating
            | SessionState::Reconnecting => {
                let mut buf = self.prebuffer.lock().unwrap();
                if buf.len() < PREBUFFER_CAP {
                    buf.push(data);
                } else {
                    tracing::warn!(session_id = %self.id, "prebuffer full, dropping shell data");
                }
                Ok(())
            }
            SessionState::Closed | SessionState::Errored => Err(ErrorCode::SessionNotFound),
        }
    }

    pub async fn resize(&self, cols: u32, rows: u32) -> Result<(), ErrorCode> {
        let input = self.pump.lock().unwrap().as_ref().map(|p| p.input.clone());
        match input {
            Some(input) => {
                let _ = input.send(PumpInput::Resize { cols, rows }).await;
                Ok(())
            }
            None => Err(ErrorCode::SessionNotFound),
        }
    }

    pub async fn shell_command(&self, command: String) -> Result<(), ErrorCode> {
        let input = self.pump.lock().unwrap().as_ref().map(|p| p.input.clone());
        match input {
            Some(input) => {
                let _ = input.send(PumpInput::Command(command)).await;
                Ok(())
            }
            None => Err(ErrorCode::SessionNotFound),
        }
    }

    // === keep-alive / latency ===

    /// One keep-alive tick: purge stale pings, sample SSH-side latency, send
    /// an unsolicited heartbeat.
    pub async fn heartbeat_tick(&self) {
        if self.state() != SessionState::Connected {
            return;
        }
        {
            let mut pings = self.pending_pings.lock().unwrap();
            pings.retain(|_, sent| sent.elapsed() < PING_EXPIRY);
        }

        if let Some(conn) = self.conn() {
            let sampled = tokio::task::spawn_blocking(move || conn.ping()).await;
            if let Ok(Ok(rtt)) = sampled {
                self.remote_latency_ms
                    .store(u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX), Ordering::Relaxed);
            }
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        self.pending_pings
            .lock()
            .unwrap()
            .insert(request_id.clone(), Instant::now());
        let header = json!({
            "sessionId": self.id,
            "requestId": request_id,
            "timestamp": self.now_ms(),
        });
        self.send_frame(None, MessageType::Heartbeat, &header, &[])
            .await;
    }

    /// Client heartbeat: a reply to one of our pings yields a latency sample
    /// and a `NETWORK_LATENCY` frame; anything else gets an echo.
    pub async fn handle_client_heartbeat(&self, request_id: Option<&str>) {
        self.touch();
        let matched = request_id.and_then(|id| self.pending_pings.lock().unwrap().remove(id));
        if let Some(sent) = matched {
            let local_ms = u64::try_from(sent.elapsed().as_millis()).unwrap_or(u64::MAX);
            let remote_ms = self.remote_latency_ms.load(Ordering::Relaxed);
            let sample = self.latency.record(remote_ms, local_ms);
            let header = json!({
                "sessionId": self.id,
                "remoteLatency": sample.remote_ms,
                "localLatency": sample.local_ms,
                "totalLatency": sample.total_ms,
            });
            self.send_frame(None, MessageType::NetworkLatency, &header, &[])
                .await;
        } else {
            let header = json!({
                "sessionId": self.id,
                "timestamp": self.now_ms(),
            });
            self.send_frame(None, MessageType::Heartbeat, &header, &[])
                .await;
        }
    }

    // === teardown ===

    async fn teardown_transport(&self) {
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.stop();
        }
        let conn = self.conn.lock().unwrap().take();
        if let Some(conn) = conn {
            let _ = tokio::task::spawn_blocking(move || conn.disconnect()).await;
        }
    }

    /// Full session teardown: transfers, keep-alive, pump, SSH connection.
    /// Idempotent; called when the client stream closes or the session errs.
    pub async fn close(&self) {
        if self.state() == SessionState::Closed {
            return;
        }
        if self.state() != SessionState::Errored {
            self.set_state(SessionState::Closed);
        }
        self.cancel.cancel();
        self.transfers.abort_all();
        self.reassembly.lock().unwrap().clear();
        self.teardown_transport().await;
        tracing::info!(
            session_id = %self.id,
            bytes_in = self.counters.bytes_in(),
            bytes_out = self.counters.bytes_out(),
            "session closed"
        );
    }
}

/// Map transport-layer failures onto the wire taxonomy.
pub fn map_ssh_error(err: &SshError) -> ErrorCode {
    match err {
        SshError::ConnectTimeout | SshError::Timeout => ErrorCode::ConnectTimeout,
        SshError::ConnectRefused(_) => ErrorCode::ConnectRefused,
        SshError::HostUnreachable(_) | SshError::Io(_) | SshError::Disconnected => {
            ErrorCode::HostUnreachable
        }
        SshError::Handshake(_) => ErrorCode::ConnectRefused,
        SshError::AuthFailed(_) | SshError::KeyUnusable(_) => ErrorCode::AuthFailed,
        SshError::ChannelOpenFailed(_) => ErrorCode::ChannelOpenFailed,
        SshError::Sftp(_) => ErrorCode::DataProcessingError,
    }
}

/// All live sessions, keyed by session id. The only cross-session shared
/// state in the gateway besides the token cache.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> (Arc<Session>, mpsc::Receiver<Outbound>) {
        let (writer, writer_rx) = mpsc::channel(64);
        let (events, _events_rx) = mpsc::channel(8);
        let session = Session::new(1, Config::default(), Vault::new("test"), writer, events);
        (session, writer_rx)
    }

    #[tokio::test]
    async fn test_initial_state_and_ids() {
        let (session, _rx) = test_session();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.id.is_empty());
        let (other, _rx2) = test_session();
        assert_ne!(session.id, other.id);
    }

    #[tokio::test]
    async fn test_shell_data_prebuffers_until_connected() {
        let (session, _rx) = test_session();
        session.shell_data(b"ls\n".to_vec()).await.unwrap();
        assert_eq!(session.prebuffer.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shell_data_rejected_after_close() {
        let (session, _rx) = test_session();
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            session.shell_data(b"x".to_vec()).await,
            Err(ErrorCode::SessionNotFound)
        );
    }

    #[tokio::test]
    async fn test_client_heartbeat_echo() {
        let (session, mut rx) = test_session();
        session.handle_client_heartbeat(None).await;
        match rx.recv().await.unwrap() {
            Outbound::Frame { bytes, .. } => {
                let frame = termgate_protocol::decode(&bytes).unwrap();
                assert_eq!(frame.msg_type, MessageType::Heartbeat);
                assert!(frame.header["timestamp"].as_u64().is_some());
            }
            Outbound::Close => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn test_ping_reply_emits_latency_frame() {
        let (session, mut rx) = test_session();
        session
            .pending_pings
            .lock()
            .unwrap()
            .insert("ping-1".into(), Instant::now());
        session.handle_client_heartbeat(Some("ping-1")).await;
        match rx.recv().await.unwrap() {
            Outbound::Frame { bytes, .. } => {
                let frame = termgate_protocol::decode(&bytes).unwrap();
                assert_eq!(frame.msg_type, MessageType::NetworkLatency);
                let total = frame.header["totalLatency"].as_u64().unwrap();
                let parts = frame.header["remoteLatency"].as_u64().unwrap()
                    + frame.header["localLatency"].as_u64().unwrap();
                assert_eq!(total, parts);
            }
            Outbound::Close => panic!("unexpected close"),
        }
        assert_eq!(session.latency.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_fails_distinctly() {
        let (session, _rx) = test_session();
        let descriptor = ConnectionDescriptor {
            id: 1,
            owner_id: 1,
            name: "x".into(),
            host: "example.org".into(),
            port: 22,
            username: "u".into(),
            auth_type: "key".into(),
            password_enc: None,
            private_key_enc: None,
            passphrase_enc: None,
            remember_password: false,
            description: None,
            group: None,
            config_json: None,
            sort_order: 0,
            created_at: 0,
            updated_at: 0,
        };
        let err = session.resolve_auth(&descriptor).unwrap_err();
        assert_eq!(err.0, ErrorCode::AuthFailed);
        assert!(err.1.contains("no private key"));
    }

    #[tokio::test]
    async fn test_decrypt_failure_aborts_without_retry() {
        let (session, _rx) = test_session();
        let descriptor = ConnectionDescriptor {
            id: 1,
            owner_id: 1,
            name: "x".into(),
            host: "example.org".into(),
            port: 22,
            username: "u".into(),
            auth_type: "password".into(),
            // Encrypted under a different vault key
            password_enc: Some(Vault::new("other").encrypt(b"pw")),
            private_key_enc: None,
            passphrase_enc: None,
            remember_password: false,
            description: None,
            group: None,
            config_json: None,
            sort_order: 0,
            created_at: 0,
            updated_at: 0,
        };
        let err = session.resolve_auth(&descriptor).unwrap_err();
        assert_eq!(err.0, ErrorCode::AuthFailed);
        assert!(err.1.contains("decrypt"));
    }

    #[test]
    fn test_registry_insert_get_remove() {
        let registry = SessionRegistry::new();
        let (session, _rx) = {
            let (writer, rx) = mpsc::channel(8);
            let (events, _erx) = mpsc::channel(8);
            (
                Session::new(1, Config::default(), Vault::new("t"), writer, events),
                rx,
            )
        };
        let id = session.id.clone();
        registry.insert(session);
        assert_eq!(registry.count(), 1);
        assert!(registry.get(&id).is_some());
        assert!(registry.remove(&id).is_some());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_ssh_error_mapping() {
        assert_eq!(
            map_ssh_error(&SshError::ConnectTimeout),
            ErrorCode::ConnectTimeout
        );
        assert_eq!(
            map_ssh_error(&SshError::KeyUnusable("bad".into())),
            ErrorCode::AuthFailed
        );
        assert_eq!(
            map_ssh_error(&SshError::ChannelOpenFailed("no".into())),
            ErrorCode::ChannelOpenFailed
        );
    }
}
