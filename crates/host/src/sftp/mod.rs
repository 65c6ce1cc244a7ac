//! SFTP engine
//!
//! Owns one SFTP subsystem handle per session (opened lazily on the first
//! `SFTP_*` frame), dispatches the request family, and guarantees exactly one
//! terminal frame per operation id. Long-running transfers run as their own
//! tasks with per-operation timeouts and cancellation tokens.

pub mod download;
pub mod folder;
pub mod registry;
pub mod upload;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use termgate_protocol::{DirEntry, ErrorCode, Frame, MessageType};
use termgate_ssh::{RemoteFile, SshConnection, SshError};

use crate::session::{map_ssh_error, Session};
use self::registry::{CancelOutcome, TransferKind};

/// Metadata operations (list, mkdir, delete, rename, chmod) time out here.
const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Single-file downloads time out here.
pub(crate) const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Per-chunk (and per-file, in the folder walk) read deadline.
pub(crate) const READ_DEADLINE: Duration = Duration::from_secs(30);

/// Poll interval while a non-blocking read has no data.
const POLL_SLEEP: Duration = Duration::from_millis(5);

/// Dispatch one SFTP request frame. Called as its own task per frame so a
/// slow transfer never blocks the session read loop.
pub async fn handle_frame(session: Arc<Session>, frame: Frame) {
    let op_id = frame.header["operationId"].as_str().map(ToString::to_string);
    let result = dispatch(&session, frame).await;
    if let Err((code, message)) = result {
        match op_id {
            Some(op) => {
                session.send_terminal_error(&op, code, &message).await;
            }
            None => {
                session.send_error(None, code, &message).await;
            }
        }
    }
}

type OpResult = Result<(), (ErrorCode, String)>;

async fn dispatch(session: &Arc<Session>, frame: Frame) -> OpResult {
    match frame.msg_type {
        MessageType::SftpInit => handle_init(session).await,
        MessageType::SftpList => {
            let req: termgate_protocol::SftpList = parse(&frame.header)?;
            handle_list(session, req).await
        }
        MessageType::SftpMkdir => {
            let req: termgate_protocol::SftpMkdir = parse(&frame.header)?;
            let path = req.path.clone();
            run_metadata(session, req.operation_id, move |conn| {
                conn.sftp_mkdir(&path)?;
                Ok(json!({ "message": "directory created", "path": path }))
            })
            .await
        }
        MessageType::SftpDelete => {
            let req: termgate_protocol::SftpDelete = parse(&frame.header)?;
            let path = req.path.clone();
            run_metadata(session, req.operation_id, move |conn| {
                conn.sftp_delete(&path, req.is_directory)?;
                Ok(json!({ "message": "deleted", "path": path }))
            })
            .await
        }
        MessageType::SftpRename => {
            let req: termgate_protocol::SftpRename = parse(&frame.header)?;
            run_metadata(session, req.operation_id, move |conn| {
                conn.sftp_rename(&req.old_path, &req.new_path)?;
                Ok(json!({
                    "message": "renamed",
                    "oldPath": req.old_path,
                    "newPath": req.new_path,
                }))
            })
            .await
        }
        MessageType::SftpChmod => {
            let req: termgate_protocol::SftpChmod = parse(&frame.header)?;
            run_metadata(session, req.operation_id, move |conn| {
                conn.sftp_chmod(&req.path, req.permissions)?;
                Ok(json!({ "message": "permissions changed", "path": req.path }))
            })
            .await
        }
        MessageType::SftpUpload => {
            let req: termgate_protocol::SftpUpload = parse(&frame.header)?;
            upload::handle_upload(session, req, frame.payload).await
        }
        MessageType::SftpDownload => {
            let req: termgate_protocol::SftpDownload = parse(&frame.header)?;
            download::handle_download(session, req).await
        }
        MessageType::SftpDownloadFolder => {
            let req: termgate_protocol::SftpDownloadFolder = parse(&frame.header)?;
            folder::handle_folder_download(session, req).await
        }
        MessageType::SftpCancel => {
            let req: termgate_protocol::SftpCancel = parse(&frame.header)?;
            handle_cancel(session, &req.operation_id).await
        }
        MessageType::SftpClose => handle_close(session).await,
        other => Err((
            ErrorCode::InvalidMessageType,
            format!("{other:?} is not an SFTP request"),
        )),
    }
}

fn parse<T: serde::de::DeserializeOwned>(header: &Value) -> Result<T, (ErrorCode, String)> {
    serde_json::from_value(header.clone())
        .map_err(|e| (ErrorCode::MessageProcessingError, format!("bad header: {e}")))
}

/// The session's SSH connection, or a session-level failure.
pub(crate) fn require_conn(session: &Session) -> Result<Arc<SshConnection>, (ErrorCode, String)> {
    session
        .conn()
        .ok_or_else(|| (ErrorCode::SessionNotFound, "SSH not connected".into()))
}

async fn handle_init(session: &Arc<Session>) -> OpResult {
    let conn = require_conn(session)?;
    tokio::task::spawn_blocking(move || conn.sftp_init())
        .await
        .map_err(|e| (ErrorCode::OperationFailed, e.to_string()))?
        .map_err(|e| (map_ssh_error(&e), e.to_string()))?;
    let header = json!({ "sessionId": session.id, "message": "sftp ready" });
    session
        .send_frame(None, MessageType::Success, &header, &[])
        .await;
    Ok(())
}

async fn handle_close(session: &Arc<Session>) -> OpResult {
    session.transfers.abort_all();
    session.reassembly.lock().unwrap().clear();
    let header = json!({ "sessionId": session.id, "message": "sftp closed" });
    session
        .send_frame(None, MessageType::Success, &header, &[])
        .await;
    Ok(())
}

/// `SFTP_CANCEL`: atomically mark, tear down, acknowledge. Also aborts a
/// pending reassembly buffer that never opened a stream.
async fn handle_cancel(session: &Arc<Session>, operation_id: &str) -> OpResult {
    let had_reassembly = session
        .reassembly
        .lock()
        .unwrap()
        .remove(operation_id)
        .is_some();
    match session.transfers.cancel(operation_id, had_reassembly) {
        CancelOutcome::Cancelled => {
            tracing::info!(session_id = %session.id, operation_id, "transfer cancelled");
            let header = json!({
                "sessionId": session.id,
                "operationId": operation_id,
                "message": "cancelled",
            });
            // Sent without the operation tag so the writer's cancellation
            // filter lets the acknowledgement through.
            session
                .send_frame(None, MessageType::Success, &header, &[])
                .await;
            Ok(())
        }
        CancelOutcome::NotFound => Err((
            ErrorCode::CancelError,
            format!("no active operation {operation_id}"),
        )),
    }
}

async fn handle_list(session: &Arc<Session>, req: termgate_protocol::SftpList) -> OpResult {
    let path = req.path.clone();
    run_metadata(session, req.operation_id, move |conn| {
        let mut entries: Vec<DirEntry> = conn
            .sftp_list(&path)?
            .into_iter()
            .map(|(name, st)| DirEntry {
                name,
                kind: st.kind().to_string(),
                size: st.size,
                mtime: st.mtime,
                permissions: st.permissions,
            })
            .collect();
        entries.sort_by(|a, b| {
            (a.kind != "dir")
                .cmp(&(b.kind != "dir"))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(json!({
            "path": path,
            "files": entries,
        }))
    })
    .await
}

/// Run a short metadata operation with registration, timeout and the
/// exactly-one-terminal discipline.
async fn run_metadata<F>(session: &Arc<Session>, operation_id: String, op: F) -> OpResult
where
    F: FnOnce(Arc<SshConnection>) -> Result<Value, SshError> + Send + 'static,
{
    let conn = require_conn(session)?;
    let Some(token) = session
        .transfers
        .register(&operation_id, TransferKind::Metadata)
    else {
        // A duplicate id must not claim the live operation's terminal frame.
        session
            .send_error(
                Some(&operation_id),
                ErrorCode::MessageProcessingError,
                "operation id already in use",
            )
            .await;
        return Ok(());
    };

    let work = tokio::task::spawn_blocking(move || op(conn));
    let result = tokio::select! {
        () = token.cancelled() => return Ok(()),
        res = tokio::time::timeout(METADATA_TIMEOUT, work) => res,
    };

    match result {
        Ok(Ok(Ok(mut body))) => {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("sessionId".into(), json!(session.id));
                obj.insert("operationId".into(), json!(operation_id));
            }
            session
                .send_terminal(&operation_id, MessageType::Success, &body, &[])
                .await;
            Ok(())
        }
        Ok(Ok(Err(e))) => {
            let code = match &e {
                SshError::Sftp(_) => ErrorCode::FileStatError,
                other => map_ssh_error(other),
            };
            session
                .send_terminal_error(&operation_id, code, &e.to_string())
                .await;
            Ok(())
        }
        Ok(Err(join_err)) => {
            session
                .send_terminal_error(
                    &operation_id,
                    ErrorCode::OperationFailed,
                    &join_err.to_string(),
                )
                .await;
            Ok(())
        }
        Err(_elapsed) => {
            session
                .send_terminal_error(
                    &operation_id,
                    ErrorCode::OperationFailed,
                    "operation timed out",
                )
                .await;
            Ok(())
        }
    }
}

// === shared helpers ===

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// MIME from the file extension, `application/octet-stream` when unknown.
pub(crate) fn mime_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Quote a path for `sh -c`.
pub(crate) fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

/// Transfer speed in whole bytes per second.
pub(crate) fn transfer_speed(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        bytes
    } else {
        (bytes as f64 / secs) as u64
    }
}

/// Read one chunk from an open remote file, polling in non-blocking mode.
/// Returns an empty vec at EOF; errors out when the per-chunk deadline
/// passes without progress.
pub(crate) fn read_file_chunk(
    conn: &SshConnection,
    file: &mut RemoteFile,
    max: usize,
) -> Result<Vec<u8>, SshError> {
    let mut buf = vec![0u8; max];
    let deadline = Instant::now() + READ_DEADLINE;
    loop {
        match conn.file_read(file, &mut buf)? {
            Some(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            None => {
                if Instant::now() >= deadline {
                    return Err(SshError::Timeout);
                }
                std::thread::sleep(POLL_SLEEP);
            }
        }
    }
}

/// Emit a `PROGRESS` frame for an operation.
pub(crate) async fn send_progress(
    session: &Session,
    operation_id: &str,
    transferred: u64,
    total: u64,
    percent: f64,
) {
    let header = json!({
        "sessionId": session.id,
        "operationId": operation_id,
        "bytesTransferred": transferred,
        "totalBytes": total,
        "progress": percent.clamp(0.0, 100.0).round(),
    });
    session
        .send_frame(Some(operation_id), MessageType::Progress, &header, &[])
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_for("a.txt"), "text/plain");
        assert_eq!(mime_for("a.png"), "image/png");
        assert_eq!(mime_for("a.tar.gz"), "application/gzip");
        assert_eq!(mime_for("a.unknown-ext"), "application/octet-stream");
    }

    #[test]
    fn test_shell_quote_escapes() {
        assert_eq!(shell_quote("/tmp/plain"), "'/tmp/plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_transfer_speed() {
        assert_eq!(transfer_speed(1000, Duration::from_secs(2)), 500);
        // Instantaneous transfers report the byte count itself
        assert_eq!(transfer_speed(1000, Duration::ZERO), 1000);
    }
}
