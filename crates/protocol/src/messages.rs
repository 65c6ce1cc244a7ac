//! Typed JSON headers for request frames.
//!
//! Inbound headers are deserialized into these structs; outbound headers are
//! mostly built ad hoc with `serde_json::json!` at the emit site, matching
//! the loose shape the browser client expects. Field names are camelCase on
//! the wire.

use serde::{Deserialize, Serialize};

/// First frame on the `/ssh` endpoint. `connectionId` is the key handed out
/// by the HTTP layer's pending-connection endpoint; credentials never travel
/// in the upgrade URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellHandshake {
    #[serde(default)]
    pub session_id: Option<String>,
    pub connection_id: String,
}

/// Subscription frame on the `/monitor` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorHandshake {
    pub target_host: String,
}

/// Heartbeat, both directions. The gateway stamps `timestamp` with its
/// monotonic clock in milliseconds; client replies echo `requestId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub timestamp: u64,
}

/// `SSH_RESIZE` header.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Resize {
    pub cols: u32,
    pub rows: u32,
}

/// `SSH_COMMAND` header: a command line to run in the interactive shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellCommand {
    pub command: String,
}

/// `SFTP_LIST` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpList {
    pub operation_id: String,
    pub path: String,
}

/// `SFTP_UPLOAD` request. The frame payload carries the chunk bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpUpload {
    pub operation_id: String,
    pub filename: String,
    pub remote_path: String,
    pub file_size: u64,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Hex SHA-256 of the whole file, verified after reassembly.
    #[serde(default)]
    pub checksum: Option<String>,
}

/// `SFTP_DOWNLOAD` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpDownload {
    pub operation_id: String,
    pub remote_path: String,
}

/// `SFTP_MKDIR` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpMkdir {
    pub operation_id: String,
    pub path: String,
}

/// `SFTP_DELETE` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpDelete {
    pub operation_id: String,
    pub path: String,
    #[serde(default)]
    pub is_directory: bool,
}

/// `SFTP_RENAME` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpRename {
    pub operation_id: String,
    pub old_path: String,
    pub new_path: String,
}

/// `SFTP_CHMOD` request. `permissions` is the POSIX mode bits, e.g. `0o644`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpChmod {
    pub operation_id: String,
    pub path: String,
    pub permissions: u32,
}

/// `SFTP_DOWNLOAD_FOLDER` request. `format` forces the ZIP fallback when set
/// to `"zip"`; the default prefers remote tar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpDownloadFolder {
    pub operation_id: String,
    pub remote_path: String,
    #[serde(default)]
    pub format: Option<String>,
}

/// `SFTP_CANCEL` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpCancel {
    pub operation_id: String,
}

/// One directory entry in a `SFTP_LIST` success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    /// `file`, `dir`, `symlink` or `other`.
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
    /// Unix seconds, 0 when the server does not report one.
    pub mtime: u64,
    /// POSIX mode bits.
    pub permissions: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_header_wire_shape() {
        let json = r#"{
            "operationId": "op-1",
            "filename": "x.bin",
            "remotePath": "/tmp/x.bin",
            "fileSize": 3145728,
            "chunkIndex": 2,
            "totalChunks": 3,
            "checksum": "ab"
        }"#;
        let req: SftpUpload = serde_json::from_str(json).unwrap();
        assert_eq!(req.chunk_index, 2);
        assert_eq!(req.total_chunks, 3);
        assert_eq!(req.checksum.as_deref(), Some("ab"));
    }

    #[test]
    fn test_handshake_requires_connection_id() {
        let ok: ShellHandshake =
            serde_json::from_str(r#"{"connectionId": "c1"}"#).unwrap();
        assert_eq!(ok.connection_id, "c1");
        assert!(serde_json::from_str::<ShellHandshake>("{}").is_err());
    }

    #[test]
    fn test_dir_entry_kind_field_name() {
        let entry = DirEntry {
            name: "src".into(),
            kind: "dir".into(),
            size: 0,
            mtime: 0,
            permissions: 0o755,
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["type"], "dir");
    }
}
