//! SFTP engine behavior without a live SSH server
//!
//! Exercises the upload reassembly pipeline, cancellation semantics and the
//! exactly-one-terminal guarantee by feeding frames straight into the engine
//! and reading the session writer channel.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use termgate_host::config::Config;
use termgate_host::session::{Outbound, Session};
use termgate_host::sftp;
use termgate_host::vault::Vault;
use termgate_protocol::{decode, encode, Frame, MessageType};

fn test_session() -> (Arc<Session>, mpsc::Receiver<Outbound>) {
    let (writer, writer_rx) = mpsc::channel(64);
    let (events, _events_rx) = mpsc::channel(8);
    let session = Session::new(1, Config::default(), Vault::new("test"), writer, events);
    (session, writer_rx)
}

fn frame(msg_type: MessageType, header: serde_json::Value, payload: &[u8]) -> Frame {
    decode(&encode(msg_type, &header, payload)).expect("frame")
}

fn upload_header(op: &str, index: u32, total: u32, size: u64, checksum: Option<&str>) -> serde_json::Value {
    json!({
        "operationId": op,
        "filename": "x.bin",
        "remotePath": "/tmp/x.bin",
        "fileSize": size,
        "chunkIndex": index,
        "totalChunks": total,
        "checksum": checksum,
    })
}

async fn next_frame(rx: &mut mpsc::Receiver<Outbound>) -> Frame {
    match tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("frame in time")
        .expect("writer open")
    {
        Outbound::Frame { bytes, .. } => decode(&bytes).expect("decodable frame"),
        Outbound::Close => panic!("unexpected close"),
    }
}

async fn assert_no_frame(rx: &mut mpsc::Receiver<Outbound>) {
    let res = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(res.is_err(), "expected silence, got {res:?}");
}

#[tokio::test]
async fn test_out_of_order_chunks_emit_progress_then_checksum_error() {
    let (session, mut rx) = test_session();

    // Chunk 1 of 2 arrives first; count-based progress follows.
    sftp::handle_frame(
        session.clone(),
        frame(MessageType::SftpUpload, upload_header("op-1", 1, 2, 4, Some("00")), b"cd"),
    )
    .await;
    let progress = next_frame(&mut rx).await;
    assert_eq!(progress.msg_type, MessageType::Progress);
    assert_eq!(progress.header["progress"], json!(50.0));

    // Final chunk completes reassembly; the supplied checksum is wrong.
    sftp::handle_frame(
        session.clone(),
        frame(MessageType::SftpUpload, upload_header("op-1", 0, 2, 4, Some("00")), b"ab"),
    )
    .await;
    let progress = next_frame(&mut rx).await;
    assert_eq!(progress.msg_type, MessageType::Progress);
    assert_eq!(progress.header["progress"], json!(100.0));

    let terminal = next_frame(&mut rx).await;
    assert_eq!(terminal.msg_type, MessageType::Error);
    assert_eq!(terminal.header["errorCode"], json!("CHECKSUM_MISMATCH"));
    assert_eq!(terminal.header["operationId"], json!("op-1"));
}

#[tokio::test]
async fn test_size_mismatch_rejected() {
    let (session, mut rx) = test_session();
    // Declared fileSize is 10, actual assembly is 2 bytes.
    sftp::handle_frame(
        session.clone(),
        frame(MessageType::SftpUpload, upload_header("op-2", 0, 1, 10, None), b"ab"),
    )
    .await;
    let progress = next_frame(&mut rx).await;
    assert_eq!(progress.msg_type, MessageType::Progress);
    let terminal = next_frame(&mut rx).await;
    assert_eq!(terminal.msg_type, MessageType::Error);
    assert_eq!(terminal.header["errorCode"], json!("UPLOAD_ERROR"));
}

#[tokio::test]
async fn test_invalid_chunk_indices_rejected() {
    let (session, mut rx) = test_session();
    sftp::handle_frame(
        session.clone(),
        frame(MessageType::SftpUpload, upload_header("op-3", 5, 2, 4, None), b"xx"),
    )
    .await;
    let terminal = next_frame(&mut rx).await;
    assert_eq!(terminal.msg_type, MessageType::Error);
    assert_eq!(terminal.header["errorCode"], json!("UPLOAD_ERROR"));

    sftp::handle_frame(
        session.clone(),
        frame(MessageType::SftpUpload, upload_header("op-4", 0, 0, 0, None), b""),
    )
    .await;
    let terminal = next_frame(&mut rx).await;
    assert_eq!(terminal.header["errorCode"], json!("UPLOAD_ERROR"));
}

#[tokio::test]
async fn test_cancel_aborts_pending_reassembly_and_silences_late_chunks() {
    let (session, mut rx) = test_session();

    sftp::handle_frame(
        session.clone(),
        frame(MessageType::SftpUpload, upload_header("op-5", 0, 2, 4, None), b"ab"),
    )
    .await;
    let progress = next_frame(&mut rx).await;
    assert_eq!(progress.msg_type, MessageType::Progress);

    // Cancel tears down the reassembly buffer and acknowledges.
    sftp::handle_frame(
        session.clone(),
        frame(MessageType::SftpCancel, json!({ "operationId": "op-5" }), b""),
    )
    .await;
    let ack = next_frame(&mut rx).await;
    assert_eq!(ack.msg_type, MessageType::Success);
    assert_eq!(ack.header["message"], json!("cancelled"));

    // The late final chunk produces nothing: no progress, no terminal.
    sftp::handle_frame(
        session.clone(),
        frame(MessageType::SftpUpload, upload_header("op-5", 1, 2, 4, None), b"cd"),
    )
    .await;
    assert_no_frame(&mut rx).await;
    assert!(session.reassembly.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_unknown_operation_is_an_error() {
    let (session, mut rx) = test_session();
    sftp::handle_frame(
        session.clone(),
        frame(MessageType::SftpCancel, json!({ "operationId": "ghost" }), b""),
    )
    .await;
    let reply = next_frame(&mut rx).await;
    assert_eq!(reply.msg_type, MessageType::Error);
    assert_eq!(reply.header["errorCode"], json!("CANCEL_ERROR"));
}

#[tokio::test]
async fn test_terminal_emitted_at_most_once_per_operation() {
    let (session, mut rx) = test_session();
    let run = |idx| {
        let session = session.clone();
        async move {
            sftp::handle_frame(
                session.clone(),
                frame(
                    MessageType::SftpUpload,
                    upload_header("op-6", idx, 2, 4, Some("00")),
                    if idx == 0 { b"ab" } else { b"cd" },
                ),
            )
            .await;
        }
    };
    run(0).await;
    run(1).await;
    // progress x2 then the checksum error terminal
    assert_eq!(next_frame(&mut rx).await.msg_type, MessageType::Progress);
    assert_eq!(next_frame(&mut rx).await.msg_type, MessageType::Progress);
    assert_eq!(next_frame(&mut rx).await.msg_type, MessageType::Error);

    // Replaying the whole upload may emit progress again, but never a second
    // terminal for the same operation id.
    run(0).await;
    run(1).await;
    loop {
        let res = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        match res {
            Ok(Some(Outbound::Frame { bytes, .. })) => {
                let f = decode(&bytes).unwrap();
                assert_eq!(f.msg_type, MessageType::Progress, "no second terminal allowed");
            }
            Ok(Some(Outbound::Close)) => panic!("unexpected close"),
            Ok(None) | Err(_) => break,
        }
    }
}

#[tokio::test]
async fn test_upload_cap_boundary() {
    let (writer, mut rx) = mpsc::channel(64);
    let (events, _events_rx) = mpsc::channel(8);
    let mut config = Config::default();
    config.sftp.max_upload_size = 4;
    let session = Session::new(1, config, Vault::new("test"), writer, events);

    // One byte over the cap is rejected outright.
    sftp::handle_frame(
        session.clone(),
        frame(MessageType::SftpUpload, upload_header("op-big", 0, 1, 5, None), b"abcde"),
    )
    .await;
    let terminal = next_frame(&mut rx).await;
    assert_eq!(terminal.msg_type, MessageType::Error);
    assert_eq!(terminal.header["errorCode"], json!("UPLOAD_ERROR"));

    // Exactly the cap clears the size gate; with no SSH transport attached
    // the commit then fails at the connection lookup instead.
    sftp::handle_frame(
        session.clone(),
        frame(MessageType::SftpUpload, upload_header("op-fit", 0, 1, 4, None), b"abcd"),
    )
    .await;
    let progress = next_frame(&mut rx).await;
    assert_eq!(progress.msg_type, MessageType::Progress);
    let terminal = next_frame(&mut rx).await;
    assert_eq!(terminal.msg_type, MessageType::Error);
    assert_eq!(terminal.header["errorCode"], json!("SESSION_NOT_FOUND"));
}

#[tokio::test]
async fn test_metadata_op_without_ssh_fails_with_session_error() {
    let (session, mut rx) = test_session();
    sftp::handle_frame(
        session.clone(),
        frame(
            MessageType::SftpList,
            json!({ "operationId": "op-7", "path": "/tmp" }),
            b"",
        ),
    )
    .await;
    let terminal = next_frame(&mut rx).await;
    assert_eq!(terminal.msg_type, MessageType::Error);
    assert_eq!(terminal.header["errorCode"], json!("SESSION_NOT_FOUND"));
}

#[tokio::test]
async fn test_non_sftp_frame_rejected_by_engine() {
    let (session, mut rx) = test_session();
    sftp::handle_frame(
        session.clone(),
        frame(MessageType::Heartbeat, json!({ "operationId": "op-8" }), b""),
    )
    .await;
    let terminal = next_frame(&mut rx).await;
    assert_eq!(terminal.msg_type, MessageType::Error);
    assert_eq!(terminal.header["errorCode"], json!("INVALID_MESSAGE_TYPE"));
}
