//! Stable error codes carried in `ERROR` frames and HTTP bodies.

use serde::{Deserialize, Serialize};

/// Error taxonomy shared by the gateway and its clients.
///
/// Serialized as the SCREAMING_SNAKE_CASE string; the set is append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Auth
    InvalidCredentials,
    MfaRequired,
    MfaInvalid,
    AccountDisabled,
    TokenInvalid,
    TokenRemoteLogout,

    // Protocol
    BadMagic,
    BadVersion,
    BadFrame,
    InvalidMessageType,
    InvalidSessionId,
    SessionNotFound,

    // SSH transport
    ConnectTimeout,
    ConnectRefused,
    HostUnreachable,
    AuthFailed,
    ChannelOpenFailed,
    ClientSlow,

    // SFTP
    FileStatError,
    InvalidFileType,
    InvalidFolderType,
    UploadError,
    DownloadError,
    ChecksumMismatch,
    FolderTooLarge,
    ZipProcessingError,
    ZipCompressionError,
    DataProcessingError,
    OperationCancelled,
    CancelError,
    MessageProcessingError,

    // Catch-all used by the session supervisor
    OperationFailed,
}

impl ErrorCode {
    /// Wire string for this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::MfaRequired => "MFA_REQUIRED",
            Self::MfaInvalid => "MFA_INVALID",
            Self::AccountDisabled => "ACCOUNT_DISABLED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::TokenRemoteLogout => "TOKEN_REMOTE_LOGOUT",
            Self::BadMagic => "BAD_MAGIC",
            Self::BadVersion => "BAD_VERSION",
            Self::BadFrame => "BAD_FRAME",
            Self::InvalidMessageType => "INVALID_MESSAGE_TYPE",
            Self::InvalidSessionId => "INVALID_SESSION_ID",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::ConnectTimeout => "CONNECT_TIMEOUT",
            Self::ConnectRefused => "CONNECT_REFUSED",
            Self::HostUnreachable => "HOST_UNREACHABLE",
            Self::AuthFailed => "AUTH_FAILED",
            Self::ChannelOpenFailed => "CHANNEL_OPEN_FAILED",
            Self::ClientSlow => "CLIENT_SLOW",
            Self::FileStatError => "FILE_STAT_ERROR",
            Self::InvalidFileType => "INVALID_FILE_TYPE",
            Self::InvalidFolderType => "INVALID_FOLDER_TYPE",
            Self::UploadError => "UPLOAD_ERROR",
            Self::DownloadError => "DOWNLOAD_ERROR",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::FolderTooLarge => "FOLDER_TOO_LARGE",
            Self::ZipProcessingError => "ZIP_PROCESSING_ERROR",
            Self::ZipCompressionError => "ZIP_COMPRESSION_ERROR",
            Self::DataProcessingError => "DATA_PROCESSING_ERROR",
            Self::OperationCancelled => "OPERATION_CANCELLED",
            Self::CancelError => "CANCEL_ERROR",
            Self::MessageProcessingError => "MESSAGE_PROCESSING_ERROR",
            Self::OperationFailed => "OPERATION_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_matches_as_str() {
        for code in [
            ErrorCode::InvalidCredentials,
            ErrorCode::TokenRemoteLogout,
            ErrorCode::ChecksumMismatch,
            ErrorCode::FolderTooLarge,
            ErrorCode::OperationCancelled,
        ] {
            let s = serde_json::to_string(&code).unwrap();
            assert_eq!(s, format!("\"{}\"", code.as_str()));
            let back: ErrorCode = serde_json::from_str(&s).unwrap();
            assert_eq!(back, code);
        }
    }
}
