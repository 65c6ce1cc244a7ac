//! Folder download
//!
//! Preferred path: run `tar | gzip` on the remote host and stream the archive
//! back, with progress reported against an estimated compressed size so the
//! bar never runs past 100%. Fallback (tar missing, both tar attempts failed,
//! or the client asked for ZIP): walk the tree over SFTP and build a DEFLATE
//! ZIP in the gateway, applying the skip rules and per-file read timeouts.

use std::io::{Cursor, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use termgate_protocol::{ErrorCode, MessageType, SftpDownloadFolder};
use termgate_ssh::client::STREAM_CHUNK;
use termgate_ssh::{ExecStream, SshConnection, SshError};

use super::registry::TransferKind;
use super::{
    read_file_chunk, require_conn, send_progress, sha256_hex, shell_quote, READ_DEADLINE,
};
use crate::session::Session;

/// Assumed tar+gzip compression ratio; only smooths progress, never gates.
const TAR_RATIO: f64 = 0.3;

/// Assumed ZIP compression ratio for the fallback's progress estimate.
const ZIP_RATIO: f64 = 0.4;

/// Directory names excluded by the ZIP fallback.
const SKIP_NAMES: &[&str] = &[
    "node_modules",
    ".git",
    ".vscode",
    ".idea",
    "dist",
    "build",
    "coverage",
    ".nyc_output",
];

pub async fn handle_folder_download(
    session: &Arc<Session>,
    req: SftpDownloadFolder,
) -> Result<(), (ErrorCode, String)> {
    let conn = require_conn(session)?;
    let op_id = req.operation_id.clone();
    let Some(token) = session
        .transfers
        .register(&op_id, TransferKind::FolderDownload)
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

    let work = run_folder(session, conn, &req, token.clone());
    let result = tokio::select! {
        () = token.cancelled() => return Ok(()),
        res = tokio::time::timeout(session.config.transfer_timeout(), work) => res,
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
                .send_terminal_error(
                    &op_id,
                    ErrorCode::DownloadError,
                    "folder download timed out",
                )
                .await;
            Ok(())
        }
    }
}

struct Preflight {
    tar_ok: bool,
    is_dir: bool,
    bytes: u64,
    file_count: u64,
}

async fn run_folder(
    session: &Arc<Session>,
    conn: Arc<SshConnection>,
    req: &SftpDownloadFolder,
    token: CancellationToken,
) -> Result<(), (ErrorCode, String)> {
    let op_id = req.operation_id.clone();
    let remote_path = req.remote_path.trim_end_matches('/').to_string();
    let basename = remote_path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("folder")
        .to_string();

    let pre = preflight(&conn, &remote_path).await?;
    if !pre.is_dir {
        return Err((
            ErrorCode::InvalidFolderType,
            format!("{remote_path} is not a directory"),
        ));
    }
    if pre.bytes > session.config.sftp.max_folder_size {
        return Err((
            ErrorCode::FolderTooLarge,
            format!(
                "folder is {} bytes, limit is {}",
                pre.bytes, session.config.sftp.max_folder_size
            ),
        ));
    }

    let want_zip = req.format.as_deref() == Some("zip");
    if !want_zip && pre.tar_ok {
        let quoted = shell_quote(&remote_path);
        let attempts = [
            format!("cd {quoted} && tar --numeric-owner -p --acls --xattrs -czf - ."),
            format!("cd {quoted} && tar -p -czf - ."),
        ];
        for cmd in &attempts {
            match stream_tar(session, &conn, &op_id, cmd, pre.bytes, &token).await {
                TarOutcome::Archive(data) => {
                    let header = folder_header(
                        session,
                        &op_id,
                        &format!("{basename}.tar.gz"),
                        "application/gzip",
                        &data,
                        pre.file_count,
                        &[],
                        &[],
                        json!({
                            "totalFiles": pre.file_count,
                            "includedFiles": pre.file_count,
                            "skippedCount": 0,
                            "errorCount": 0,
                        }),
                    );
                    session
                        .send_terminal(&op_id, MessageType::SftpFolderData, &header, &data)
                        .await;
                    return Ok(());
                }
                TarOutcome::Cancelled => return Ok(()),
                TarOutcome::Failed(reason) => {
                    tracing::warn!(
                        session_id = %session.id,
                        operation_id = %op_id,
                        %reason,
                        "tar attempt failed, trying next strategy"
                    );
                }
            }
        }
    }

    zip_fallback(session, conn, &op_id, &remote_path, &basename, &token).await
}

/// Remote preflight: tar availability, directory check, size and file count
/// estimates in one round trip.
async fn preflight(
    conn: &Arc<SshConnection>,
    remote_path: &str,
) -> Result<Preflight, (ErrorCode, String)> {
    let quoted = shell_quote(remote_path);
    let cmd = format!(
        "P={quoted}; command -v tar >/dev/null 2>&1 && echo TAR_OK || echo TAR_MISSING; \
         [ -d \"$P\" ] && echo IS_DIR || echo NOT_DIR; \
         du -sb \"$P\" 2>/dev/null | cut -f1; \
         find \"$P\" -type f 2>/dev/null | wc -l"
    );
    let conn = conn.clone();
    let (stdout, _stderr, status) = tokio::task::spawn_blocking(move || conn.exec_capture(&cmd))
        .await
        .map_err(|e| (ErrorCode::OperationFailed, e.to_string()))?
        .map_err(|e| (ErrorCode::DataProcessingError, format!("preflight: {e}")))?;
    if status != 0 && stdout.is_empty() {
        return Err((
            ErrorCode::DataProcessingError,
            format!("preflight exited with {status}"),
        ));
    }
    let mut lines = stdout.lines();
    let tar_ok = lines.next().is_some_and(|l| l.trim() == "TAR_OK");
    let is_dir = lines.next().is_some_and(|l| l.trim() == "IS_DIR");
    let bytes = lines
        .next()
        .and_then(|l| l.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let file_count = lines
        .next()
        .and_then(|l| l.trim().parse::<u64>().ok())
        .unwrap_or(0);
    Ok(Preflight {
        tar_ok,
        is_dir,
        bytes,
        file_count,
    })
}

enum TarOutcome {
    Archive(Vec<u8>),
    Cancelled,
    Failed(String),
}

/// Stream one tar attempt. Progress runs against `TAR_RATIO` of the
/// uncompressed estimate and the estimate grows if reality overtakes it.
async fn stream_tar(
    session: &Arc<Session>,
    conn: &Arc<SshConnection>,
    op_id: &str,
    cmd: &str,
    uncompressed: u64,
    token: &CancellationToken,
) -> TarOutcome {
    let stream = {
        let conn = conn.clone();
        let cmd = cmd.to_string();
        match tokio::task::spawn_blocking(move || conn.exec_stream(&cmd)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return TarOutcome::Failed(e.to_string()),
            Err(e) => return TarOutcome::Failed(e.to_string()),
        }
    };

    let mut stream = stream;
    let mut data: Vec<u8> = Vec::new();
    let mut estimate = ((uncompressed as f64 * TAR_RATIO) as u64).max(1);

    loop {
        if token.is_cancelled() {
            let conn = conn.clone();
            tokio::task::spawn_blocking(move || conn.exec_abort(stream)).await.ok();
            return TarOutcome::Cancelled;
        }
        let chunk = {
            let conn_blocking = conn.clone();
            let res = tokio::task::spawn_blocking(move || {
                let chunk = read_exec_chunk(&conn_blocking, &mut stream, STREAM_CHUNK);
                (chunk, stream)
            })
            .await;
            match res {
                Ok((chunk, back)) => {
                    stream = back;
                    match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            let conn = conn.clone();
                            tokio::task::spawn_blocking(move || conn.exec_abort(stream))
                                .await
                                .ok();
                            return TarOutcome::Failed(e.to_string());
                        }
                    }
                }
                Err(e) => return TarOutcome::Failed(e.to_string()),
            }
        };
        if chunk.is_empty() {
            break;
        }
        data.extend_from_slice(&chunk);
        if data.len() as u64 > estimate {
            estimate = (data.len() as u64).saturating_mul(11) / 10;
        }
        let percent = (data.len() as f64 / estimate as f64 * 100.0).min(99.0);
        send_progress(session, op_id, data.len() as u64, estimate, percent).await;
    }

    let status = {
        let conn = conn.clone();
        match tokio::task::spawn_blocking(move || conn.exec_finish(stream)).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return TarOutcome::Failed(e.to_string()),
            Err(e) => return TarOutcome::Failed(e.to_string()),
        }
    };
    if status != 0 {
        return TarOutcome::Failed(format!("tar exited with {status}"));
    }
    if data.is_empty() {
        return TarOutcome::Failed("tar produced no output".into());
    }
    send_progress(session, op_id, data.len() as u64, data.len() as u64, 100.0).await;
    TarOutcome::Archive(data)
}

/// Poll a non-blocking exec stream for one chunk; empty vec means EOF.
fn read_exec_chunk(
    conn: &SshConnection,
    stream: &mut ExecStream,
    max: usize,
) -> Result<Vec<u8>, SshError> {
    let mut buf = vec![0u8; max];
    let deadline = Instant::now() + READ_DEADLINE;
    loop {
        match conn.exec_read(stream, &mut buf)? {
            Some(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            None => {
                if Instant::now() >= deadline {
                    return Err(SshError::Timeout);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

// === ZIP fallback ===

/// Skip category for a directory or file name, before size and type checks.
pub(crate) fn skip_category(name: &str) -> Option<&'static str> {
    if name.starts_with('.') && name != "." && name != ".." {
        return Some("auto_skip");
    }
    if SKIP_NAMES.contains(&name) {
        return Some("auto_skip");
    }
    if name.ends_with(".tmp") || name.ends_with(".temp") {
        return Some("auto_skip");
    }
    None
}

struct WalkOutcome {
    /// (relative path, absolute path, size) per included file.
    files: Vec<(String, String, u64)>,
    /// Relative directory paths for empty-dir entries.
    dirs: Vec<String>,
    skipped: Vec<Value>,
    total_files: u64,
    included_size: u64,
}

fn walk_remote(conn: &SshConnection, root: &str) -> Result<WalkOutcome, SshError> {
    let mut out = WalkOutcome {
        files: Vec::new(),
        dirs: Vec::new(),
        skipped: Vec::new(),
        total_files: 0,
        included_size: 0,
    };
    let mut queue: Vec<(String, String)> = vec![(root.to_string(), String::new())];
    while let Some((abs_dir, rel_dir)) = queue.pop() {
        for (name, stat) in conn.sftp_list(&abs_dir)? {
            let rel = if rel_dir.is_empty() {
                name.clone()
            } else {
                format!("{rel_dir}/{name}")
            };
            let abs = format!("{abs_dir}/{name}");
            if stat.is_file {
                out.total_files += 1;
            }
            if let Some(category) = skip_category(&name) {
                out.skipped.push(json!({ "path": rel, "category": category }));
                continue;
            }
            if stat.is_symlink || (!stat.is_file && !stat.is_dir) {
                out.skipped
                    .push(json!({ "path": rel, "category": "special_file" }));
                continue;
            }
            if stat.is_dir {
                out.dirs.push(rel.clone());
                queue.push((abs, rel));
            } else {
                out.files.push((rel, abs, stat.size));
                out.included_size += stat.size;
            }
        }
    }
    Ok(out)
}

enum ZipOutcome {
    Archive {
        data: Vec<u8>,
        included: u64,
        errors: Vec<Value>,
    },
    Cancelled,
}

/// A cursor that exposes how many bytes the archive has grown to, so the
/// async side can report on-the-fly progress while the blocking build runs.
struct CountingCursor {
    inner: Cursor<Vec<u8>>,
    written: Arc<AtomicU64>,
}

impl Write for CountingCursor {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written
            .store(self.inner.get_ref().len() as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for CountingCursor {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

#[allow(clippy::too_many_arguments)]
async fn zip_fallback(
    session: &Arc<Session>,
    conn: Arc<SshConnection>,
    op_id: &str,
    remote_path: &str,
    basename: &str,
    token: &CancellationToken,
) -> Result<(), (ErrorCode, String)> {
    let walk = {
        let conn = conn.clone();
        let root = remote_path.to_string();
        tokio::task::spawn_blocking(move || walk_remote(&conn, &root))
            .await
            .map_err(|e| (ErrorCode::OperationFailed, e.to_string()))?
            .map_err(|e| (ErrorCode::ZipProcessingError, format!("walk: {e}")))?
    };

    // Large files drop out before size accounting.
    let max_file = session.config.sftp.max_file_size;
    let mut skipped = walk.skipped;
    let mut files = Vec::with_capacity(walk.files.len());
    let mut included_size = 0u64;
    for (rel, abs, size) in walk.files {
        if size > max_file {
            skipped.push(json!({ "path": rel, "category": "large_file" }));
        } else {
            included_size += size;
            files.push((rel, abs, size));
        }
    }
    if included_size > session.config.sftp.max_folder_size {
        return Err((
            ErrorCode::FolderTooLarge,
            format!(
                "folder is {included_size} bytes, limit is {}",
                session.config.sftp.max_folder_size
            ),
        ));
    }

    let estimate = ((included_size as f64 * ZIP_RATIO) as u64).max(1);
    let written = Arc::new(AtomicU64::new(0));

    let mut build = {
        let conn = conn.clone();
        let token = token.clone();
        let written = written.clone();
        let dirs = walk.dirs;
        let level = session.config.sftp.compression_level;
        tokio::task::spawn_blocking(move || build_zip(&conn, &dirs, &files, level, &written, &token))
    };

    // Report progress off the shared byte counter while the build runs.
    let outcome = loop {
        tokio::select! {
            res = &mut build => {
                break res
                    .map_err(|e| (ErrorCode::OperationFailed, e.to_string()))?
                    .map_err(|e| (ErrorCode::ZipCompressionError, e.to_string()))?;
            }
            () = tokio::time::sleep(Duration::from_millis(250)) => {
                let so_far = written.load(Ordering::Relaxed);
                if so_far > 0 {
                    let percent = (so_far as f64 / estimate as f64 * 100.0).min(99.0);
                    send_progress(session, op_id, so_far, estimate, percent).await;
                }
            }
        }
    };

    let (data, included, errors) = match outcome {
        ZipOutcome::Cancelled => return Ok(()),
        ZipOutcome::Archive {
            data,
            included,
            errors,
        } => (data, included, errors),
    };

    send_progress(session, op_id, data.len() as u64, data.len() as u64, 100.0).await;

    let summary = json!({
        "totalFiles": walk.total_files,
        "includedFiles": included,
        "skippedCount": skipped.len(),
        "errorCount": errors.len(),
    });
    let header = folder_header(
        session,
        op_id,
        &format!("{basename}.zip"),
        "application/zip",
        &data,
        included,
        &skipped,
        &errors,
        summary,
    );
    session
        .send_terminal(op_id, MessageType::SftpFolderData, &header, &data)
        .await;
    Ok(())
}

fn build_zip(
    conn: &SshConnection,
    dirs: &[String],
    files: &[(String, String, u64)],
    level: u32,
    written: &Arc<AtomicU64>,
    token: &CancellationToken,
) -> Result<ZipOutcome, String> {
    let cursor = CountingCursor {
        inner: Cursor::new(Vec::new()),
        written: written.clone(),
    };
    let mut writer = zip::ZipWriter::new(cursor);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(i64::from(level)));

    for dir in dirs {
        writer
            .add_directory(format!("{dir}/"), options)
            .map_err(|e| e.to_string())?;
    }

    let mut included = 0u64;
    let mut errors: Vec<Value> = Vec::new();
    for (rel, abs, _size) in files {
        if token.is_cancelled() {
            return Ok(ZipOutcome::Cancelled);
        }
        match read_remote_file(conn, abs) {
            Ok(data) => {
                writer
                    .start_file(rel.clone(), options)
                    .map_err(|e| e.to_string())?;
                writer.write_all(&data).map_err(|e| e.to_string())?;
                included += 1;
            }
            Err(e) => {
                errors.push(json!({ "path": rel, "error": e.to_string() }));
            }
        }
    }

    let cursor = writer.finish().map_err(|e| e.to_string())?;
    Ok(ZipOutcome::Archive {
        data: cursor.inner.into_inner(),
        included,
        errors,
    })
}

/// Read one remote file fully, bounded by the per-file read deadline.
fn read_remote_file(conn: &SshConnection, path: &str) -> Result<Vec<u8>, SshError> {
    let deadline = Instant::now() + READ_DEADLINE;
    let mut file = conn.sftp_open_read(path)?;
    let mut data = Vec::new();
    loop {
        if Instant::now() >= deadline {
            conn.file_close(file);
            return Err(SshError::Timeout);
        }
        let chunk = match read_file_chunk(conn, &mut file, STREAM_CHUNK) {
            Ok(chunk) => chunk,
            Err(e) => {
                conn.file_close(file);
                return Err(e);
            }
        };
        if chunk.is_empty() {
            break;
        }
        data.extend_from_slice(&chunk);
    }
    conn.file_close(file);
    Ok(data)
}

#[allow(clippy::too_many_arguments)]
fn folder_header(
    session: &Session,
    op_id: &str,
    filename: &str,
    mime_type: &str,
    data: &[u8],
    file_count: u64,
    skipped: &[Value],
    errors: &[Value],
    summary: Value,
) -> Value {
    json!({
        "sessionId": session.id,
        "operationId": op_id,
        "filename": filename,
        "mimeType": mime_type,
        "size": data.len() as u64,
        "checksum": sha256_hex(data),
        "fileCount": file_count,
        "skippedFiles": skipped,
        "errorFiles": errors,
        "summary": summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_rules() {
        assert_eq!(skip_category("node_modules"), Some("auto_skip"));
        assert_eq!(skip_category(".git"), Some("auto_skip"));
        assert_eq!(skip_category(".env"), Some("auto_skip"));
        assert_eq!(skip_category("scratch.tmp"), Some("auto_skip"));
        assert_eq!(skip_category("cache.temp"), Some("auto_skip"));
        assert_eq!(skip_category("src"), None);
        assert_eq!(skip_category("readme.md"), None);
    }

    #[test]
    fn test_tar_estimate_growth() {
        let uncompressed = 1000u64;
        let mut estimate = ((uncompressed as f64 * TAR_RATIO) as u64).max(1);
        assert_eq!(estimate, 300);
        // Observed bytes overtake the estimate: it grows, progress stays <100
        let observed = 400u64;
        if observed > estimate {
            estimate = observed.saturating_mul(11) / 10;
        }
        assert_eq!(estimate, 440);
        let percent = (observed as f64 / estimate as f64 * 100.0).min(99.0);
        assert!(percent < 100.0);
    }

    #[test]
    fn test_counting_cursor_tracks_length() {
        let written = Arc::new(AtomicU64::new(0));
        let mut cursor = CountingCursor {
            inner: Cursor::new(Vec::new()),
            written: written.clone(),
        };
        cursor.write_all(b"hello").unwrap();
        assert_eq!(written.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_empty_dir_zip_is_valid() {
        let written = Arc::new(AtomicU64::new(0));
        let cursor = CountingCursor {
            inner: Cursor::new(Vec::new()),
            written,
        };
        let writer = zip::ZipWriter::new(cursor);
        let out = writer.finish().unwrap();
        let data = out.inner.into_inner();
        // A zero-entry zip still carries the end-of-central-directory record
        assert!(!data.is_empty());
        let archive = zip::ZipArchive::new(Cursor::new(data)).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
