//! Streamed single-file download with progress
//!
//! The file is read in chunks off the SFTP stream, progress frames report the
//! size-based fraction, and the complete payload ships in one
//! `SFTP_FILE_DATA` frame with checksum, MIME type and timing metadata.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use termgate_protocol::{ErrorCode, MessageType, SftpDownload};
use termgate_ssh::SshError;

use super::registry::TransferKind;
use super::{
    mime_for, read_file_chunk, require_conn, send_progress, sha256_hex, transfer_speed,
    DOWNLOAD_TIMEOUT,
};
use crate::session::Session;

pub async fn handle_download(
    session: &Arc<Session>,
    req: SftpDownload,
) -> Result<(), (ErrorCode, String)> {
    let conn = require_conn(session)?;
    let op_id = req.operation_id.clone();
    let Some(token) = session
        .transfers
        .register(&op_id, TransferKind::FileDownload)
    else {
        // A duplicate id must not claim the live operation's terminal frame.
        session
            .send_error(
                Some(&op_id),
                ErrorCode::MessageProcessingError,
                "operation id already in use",
            )
            .await;
        return Ok(());
    };

    let work = run_download(session, conn, &req, token.clone());
    let result = tokio::select! {
        () = token.cancelled() => return Ok(()),
        res = tokio::time::timeout(DOWNLOAD_TIMEOUT, work) => res,
    };
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err((code, message))) => {
            session.send_terminal_error(&op_id, code, &message).await;
            Ok(())
        }
        Err(_elapsed) => {
            token.cancel();
            session
                .send_terminal_error(&op_id, ErrorCode::DownloadError, "download timed out")
                .await;
            Ok(())
        }
    }
}

async fn run_download(
    session: &Arc<Session>,
    conn: Arc<termgate_ssh::SshConnection>,
    req: &SftpDownload,
    token: tokio_util::sync::CancellationToken,
) -> Result<(), (ErrorCode, String)> {
    let op_id = req.operation_id.clone();
    let remote_path = req.remote_path.clone();
    let started = Instant::now();

    let stat = {
        let conn = conn.clone();
        let path = remote_path.clone();
        tokio::task::spawn_blocking(move || conn.sftp_stat(&path))
            .await
            .map_err(|e| (ErrorCode::OperationFailed, e.to_string()))?
            .map_err(|e| (ErrorCode::FileStatError, e.to_string()))?
    };
    if stat.is_dir {
        return Err((
            ErrorCode::InvalidFileType,
            format!("{remote_path} is a directory"),
        ));
    }
    let total = stat.size;

    let mut file = {
        let conn = conn.clone();
        let path = remote_path.clone();
        tokio::task::spawn_blocking(move || conn.sftp_open_read(&path))
            .await
            .map_err(|e| (ErrorCode::OperationFailed, e.to_string()))?
            .map_err(|e| (ErrorCode::DownloadError, e.to_string()))?
    };

    let chunk_size = session.config.sftp.chunk_size.max(4096);
    let mut data: Vec<u8> = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
    loop {
        if token.is_cancelled() {
            let conn = conn.clone();
            tokio::task::spawn_blocking(move || conn.file_close(file)).await.ok();
            return Ok(());
        }
        let chunk = {
            let conn = conn.clone();
            let (chunk, back) = tokio::task::spawn_blocking(move || {
                let res = read_file_chunk(&conn, &mut file, chunk_size);
                (res, file)
            })
            .await
            .map_err(|e| (ErrorCode::OperationFailed, e.to_string()))?;
            file = back;
            chunk.map_err(|e| (map_download_error(&e), e.to_string()))?
        };
        if chunk.is_empty() {
            break;
        }
        data.extend_from_slice(&chunk);
        let percent = if total == 0 {
            100.0
        } else {
            data.len() as f64 / total as f64 * 100.0
        };
        send_progress(session, &op_id, data.len() as u64, total, percent).await;
    }
    {
        let conn = conn.clone();
        tokio::task::spawn_blocking(move || conn.file_close(file)).await.ok();
    }

    let elapsed = started.elapsed();
    let size = data.len() as u64;
    let filename = remote_path
        .rsplit('/')
        .next()
        .unwrap_or(&remote_path)
        .to_string();
    let header = json!({
        "sessionId": session.id,
        "operationId": op_id,
        "filename": filename,
        "mimeType": mime_for(&filename),
        "size": size,
        "checksum": sha256_hex(&data),
        "downloadDuration": elapsed.as_millis() as u64,
        "transferSpeed": transfer_speed(size, elapsed),
    });
    session
        .send_terminal(&op_id, MessageType::SftpFileData, &header, &data)
        .await;
    tracing::info!(
        session_id = %session.id,
        operation_id = %op_id,
        bytes = size,
        "download complete"
    );
    Ok(())
}

fn map_download_error(e: &SshError) -> ErrorCode {
    match e {
        SshError::Timeout => ErrorCode::DownloadError,
        SshError::Sftp(_) | SshError::Io(_) => ErrorCode::DownloadError,
        other => crate::session::map_ssh_error(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_path() {
        let name = "/var/log/syslog".rsplit('/').next().unwrap();
        assert_eq!(name, "syslog");
        let bare = "file.txt".rsplit('/').next().unwrap();
        assert_eq!(bare, "file.txt");
    }

    #[test]
    fn test_download_error_mapping() {
        assert_eq!(
            map_download_error(&SshError::Timeout),
            ErrorCode::DownloadError
        );
        assert_eq!(
            map_download_error(&SshError::Sftp("fail".into())),
            ErrorCode::DownloadError
        );
    }
}
