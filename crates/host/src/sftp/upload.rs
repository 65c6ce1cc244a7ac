//! Chunked, checksum-verified upload
//!
//! Chunks may arrive in any order; a per-operation reassembly buffer stitches
//! them back together by `chunkIndex`. The final assembly is length- and
//! checksum-checked, capped at `MAX_UPLOAD_SIZE`, and written over SFTP
//! (empty files take the whole-buffer path, everything else streams).

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use termgate_protocol::{ErrorCode, MessageType, SftpUpload};
use termgate_ssh::client::STREAM_CHUNK;
use termgate_ssh::SshError;

use super::registry::TransferKind;
use super::{require_conn, send_progress, sha256_hex, transfer_speed};
use crate::session::{map_ssh_error, Session};

/// Per-upload server-side state stitching chunks back into the original
/// byte sequence.
pub struct Reassembly {
    chunks: Vec<Option<Vec<u8>>>,
    received: u32,
    total: u32,
    file_size: u64,
    bytes_buffered: u64,
    checksum: Option<String>,
    filename: String,
    remote_path: String,
    started: Instant,
}

impl Reassembly {
    fn new(req: &SftpUpload) -> Self {
        Self {
            chunks: vec![None; req.total_chunks as usize],
            received: 0,
            total: req.total_chunks,
            file_size: req.file_size,
            bytes_buffered: 0,
            checksum: req.checksum.clone(),
            filename: req.filename.clone(),
            remote_path: req.remote_path.clone(),
            started: Instant::now(),
        }
    }

    /// Insert a chunk; duplicates overwrite without double counting.
    fn insert(&mut self, index: u32, data: Vec<u8>) {
        let slot = &mut self.chunks[index as usize];
        if let Some(old) = slot.take() {
            self.bytes_buffered -= old.len() as u64;
            self.received -= 1;
        }
        self.bytes_buffered += data.len() as u64;
        *slot = Some(data);
        self.received += 1;
    }

    fn is_complete(&self) -> bool {
        self.received == self.total
    }

    /// Concatenate in `chunkIndex` order.
    fn assemble(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes_buffered as usize);
        for chunk in self.chunks.into_iter().flatten() {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

pub async fn handle_upload(
    session: &Arc<Session>,
    req: SftpUpload,
    payload: Vec<u8>,
) -> Result<(), (ErrorCode, String)> {
    if req.total_chunks == 0 || req.chunk_index >= req.total_chunks {
        return Err((
            ErrorCode::UploadError,
            format!(
                "invalid chunk {}/{} for {}",
                req.chunk_index, req.total_chunks, req.operation_id
            ),
        ));
    }
    if session.transfers.is_cancelled(&req.operation_id) {
        // Late chunk for a cancelled upload; the cancel already answered.
        return Ok(());
    }

    let op_id = req.operation_id.clone();
    let max_upload = session.config.sftp.max_upload_size;

    // Buffer the chunk; first chunk of an operation registers the transfer.
    // The locking/bookkeeping is fully synchronous so the mutex guard never
    // has to be carried across an `.await` point.
    enum ChunkOutcome {
        Complete(Reassembly),
        Pending { received: u32, total: u32 },
    }
    let outcome = {
        let mut map = session.reassembly.lock().unwrap();
        let transfer_timeout = session.config.transfer_timeout();
        map.retain(|_, r| r.started.elapsed() < transfer_timeout);

        let entry = map
            .entry(op_id.clone())
            .or_insert_with(|| Reassembly::new(&req));
        if entry.total != req.total_chunks || entry.file_size != req.file_size {
            map.remove(&op_id);
            return Err((
                ErrorCode::UploadError,
                "chunk metadata does not match the first chunk".into(),
            ));
        }
        entry.insert(req.chunk_index, payload);
        if entry.bytes_buffered > max_upload {
            map.remove(&op_id);
            return Err((
                ErrorCode::UploadError,
                format!("upload exceeds the {max_upload}-byte limit"),
            ));
        }
        if entry.is_complete() {
            map.remove(&op_id).map(ChunkOutcome::Complete)
        } else {
            let (received, total) = (entry.received, entry.total);
            Some(ChunkOutcome::Pending { received, total })
        }
    };
    let reassembly = match outcome {
        Some(ChunkOutcome::Complete(reassembly)) => reassembly,
        Some(ChunkOutcome::Pending { received, total }) => {
            let percent = f64::from(received) / f64::from(total) * 100.0;
            send_progress(session, &op_id, u64::from(received), u64::from(total), percent).await;
            return Ok(());
        }
        None => return Ok(()),
    };

    let Some(token) = session.transfers.register(&op_id, TransferKind::Upload) else {
        return Ok(());
    };
    send_progress(session, &op_id, u64::from(reassembly.total), u64::from(reassembly.total), 100.0)
        .await;

    commit(session, reassembly, &op_id, token).await
}

/// Verify and write the assembled file, then emit the terminal frame.
async fn commit(
    session: &Arc<Session>,
    reassembly: Reassembly,
    op_id: &str,
    token: tokio_util::sync::CancellationToken,
) -> Result<(), (ErrorCode, String)> {
    let started = reassembly.started;
    let filename = reassembly.filename.clone();
    let remote_path = reassembly.remote_path.clone();
    let expected_checksum = reassembly.checksum.clone();
    let file_size = reassembly.file_size;
    let data = reassembly.assemble();

    if data.len() as u64 != file_size {
        return Err((
            ErrorCode::UploadError,
            format!("assembled {} bytes, expected {file_size}", data.len()),
        ));
    }
    let checksum = sha256_hex(&data);
    if let Some(expected) = &expected_checksum {
        if !checksum.eq_ignore_ascii_case(expected) {
            return Err((
                ErrorCode::ChecksumMismatch,
                format!("expected {expected}, got {checksum}"),
            ));
        }
    }
    let conn = require_conn(session)?;
    let total = data.len() as u64;

    let write_result: Result<(), SshError> = if data.is_empty() {
        let path = remote_path.clone();
        tokio::task::spawn_blocking(move || conn.sftp_write_all(&path, &[]))
            .await
            .map_err(|e| (ErrorCode::OperationFailed, e.to_string()))?
    } else {
        let path = remote_path.clone();
        let cancel = token.clone();
        tokio::task::spawn_blocking(move || {
            let mut file = conn.sftp_open_write(&path)?;
            for chunk in data.chunks(STREAM_CHUNK) {
                if cancel.is_cancelled() {
                    conn.file_close(file);
                    return Err(SshError::Disconnected);
                }
                conn.file_write(&mut file, chunk)?;
            }
            conn.file_close(file);
            Ok(())
        })
        .await
        .map_err(|e| (ErrorCode::OperationFailed, e.to_string()))?
    };

    if token.is_cancelled() {
        return Ok(());
    }
    if let Err(e) = write_result {
        session
            .send_terminal_error(op_id, map_upload_error(&e), &e.to_string())
            .await;
        return Ok(());
    }

    let elapsed = started.elapsed();
    let header = json!({
        "sessionId": session.id,
        "operationId": op_id,
        "filename": filename,
        "remotePath": remote_path,
        "totalSize": total,
        "checksum": checksum,
        "uploadDuration": elapsed.as_millis() as u64,
        "transferSpeed": transfer_speed(total, elapsed),
    });
    session
        .send_terminal(op_id, MessageType::Success, &header, &[])
        .await;
    tracing::info!(
        session_id = %session.id,
        operation_id = %op_id,
        bytes = total,
        "upload complete"
    );
    Ok(())
}

fn map_upload_error(e: &SshError) -> ErrorCode {
    match e {
        SshError::Sftp(_) | SshError::Io(_) => ErrorCode::UploadError,
        other => map_ssh_error(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(op: &str, index: u32, total: u32, size: u64) -> SftpUpload {
        SftpUpload {
            operation_id: op.into(),
            filename: "x.bin".into(),
            remote_path: "/tmp/x.bin".into(),
            file_size: size,
            chunk_index: index,
            total_chunks: total,
            checksum: None,
        }
    }

    #[test]
    fn test_reassembly_out_of_order() {
        let mut r = Reassembly::new(&req("op", 0, 3, 6));
        r.insert(2, vec![5, 6]);
        r.insert(0, vec![1, 2]);
        assert!(!r.is_complete());
        r.insert(1, vec![3, 4]);
        assert!(r.is_complete());
        assert_eq!(r.assemble(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_reassembly_duplicate_chunk_not_double_counted() {
        let mut r = Reassembly::new(&req("op", 0, 2, 4));
        r.insert(0, vec![1, 2]);
        r.insert(0, vec![9, 9]);
        assert_eq!(r.received, 1);
        assert_eq!(r.bytes_buffered, 2);
        r.insert(1, vec![3, 4]);
        assert_eq!(r.assemble(), vec![9, 9, 3, 4]);
    }

    #[test]
    fn test_single_chunk_completes_immediately() {
        let mut r = Reassembly::new(&req("op", 0, 1, 2));
        r.insert(0, vec![7, 8]);
        assert!(r.is_complete());
        assert_eq!(r.assemble(), vec![7, 8]);
    }
}
