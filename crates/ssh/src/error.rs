//! Error type for the SSH client layer.

use thiserror::Error;

/// Failures surfaced by [`crate::SshConnection`].
///
/// The connect-path variants are kept distinct so the gateway can map them
/// onto its transport error codes without string matching.
#[derive(Debug, Error)]
pub enum SshError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("connection refused by {0}")]
    ConnectRefused(String),
    #[error("host unreachable: {0}")]
    HostUnreachable(String),
    #[error("SSH handshake failed: {0}")]
    Handshake(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("private key unusable: {0}")]
    KeyUnusable(String),
    #[error("channel open failed: {0}")]
    ChannelOpenFailed(String),
    #[error("SFTP error: {0}")]
    Sftp(String),
    #[error("connection lost")]
    Disconnected,
    #[error("operation timed out")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SshError {
    /// True when the failure indicates a dead transport that reconnection
    /// might heal (as opposed to a credential or protocol problem).
    pub fn is_transport_loss(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Io(_) | Self::Timeout)
    }
}
