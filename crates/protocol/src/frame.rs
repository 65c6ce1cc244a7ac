//! Binary frame envelope
//!
//! Every message on the client stream is one binary frame:
//!
//! ```text
//! +-------------------+---------+---------+----------------+---------------+---------+
//! | magic (4B) = ESSH | ver(1B) | type(1B)| hdrLen(4B, BE) | header (JSON) | payload |
//! +-------------------+---------+---------+----------------+---------------+---------+
//! ```
//!
//! The header is a UTF-8 JSON object; the payload is opaque bytes (raw shell
//! output, upload chunk data, archive bytes). The codec never splits or
//! coalesces frames; one WebSocket binary message is one frame.

use serde_json::Value;
use thiserror::Error;

/// Frame magic, ASCII "ESSH".
pub const MAGIC: u32 = 0x4553_5348;

/// Protocol version carried in every frame.
pub const VERSION: u8 = 0x02;

/// Bytes before the JSON header: magic + version + type + header length.
const PREFIX_LEN: usize = 4 + 1 + 1 + 4;

/// Wire message types.
///
/// One byte on the wire. Response frames reuse the generic `Success` /
/// `Progress` types for SFTP results; SFTP failures reuse the control
/// `Error` type. The numbering is fixed for compatibility with deployed
/// clients and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Control
    Handshake = 0x00,
    Heartbeat = 0x01,
    Error = 0x02,
    Connected = 0x03,
    NetworkLatency = 0x04,
    Disconnect = 0x07,

    // Shell
    SshData = 0x10,
    SshResize = 0x11,
    SshCommand = 0x12,
    SshDataAck = 0x87,

    // SFTP requests
    SftpInit = 0x20,
    SftpList = 0x21,
    SftpUpload = 0x22,
    SftpDownload = 0x23,
    SftpMkdir = 0x24,
    SftpDelete = 0x25,
    SftpRename = 0x26,
    SftpChmod = 0x27,
    SftpDownloadFolder = 0x28,
    SftpClose = 0x29,
    SftpCancel = 0x2A,

    // Responses
    Success = 0x80,
    Progress = 0x81,
    SftpFileData = 0x83,
    SftpFolderData = 0x84,
}

impl MessageType {
    /// Map a wire byte back to a message type.
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x00 => Self::Handshake,
            0x01 => Self::Heartbeat,
            0x02 => Self::Error,
            0x03 => Self::Connected,
            0x04 => Self::NetworkLatency,
            0x07 => Self::Disconnect,
            0x10 => Self::SshData,
            0x11 => Self::SshResize,
            0x12 => Self::SshCommand,
            0x87 => Self::SshDataAck,
            0x20 => Self::SftpInit,
            0x21 => Self::SftpList,
            0x22 => Self::SftpUpload,
            0x23 => Self::SftpDownload,
            0x24 => Self::SftpMkdir,
            0x25 => Self::SftpDelete,
            0x26 => Self::SftpRename,
            0x27 => Self::SftpChmod,
            0x28 => Self::SftpDownloadFolder,
            0x29 => Self::SftpClose,
            0x2A => Self::SftpCancel,
            0x80 => Self::Success,
            0x81 => Self::Progress,
            0x83 => Self::SftpFileData,
            0x84 => Self::SftpFolderData,
            _ => return None,
        })
    }

    /// True for the `SFTP_*` request family.
    pub fn is_sftp_request(self) -> bool {
        matches!(
            self,
            Self::SftpInit
                | Self::SftpList
                | Self::SftpUpload
                | Self::SftpDownload
                | Self::SftpMkdir
                | Self::SftpDelete
                | Self::SftpRename
                | Self::SftpChmod
                | Self::SftpDownloadFolder
                | Self::SftpClose
                | Self::SftpCancel
        )
    }
}

/// A decoded frame: type, parsed JSON header, opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub header: Value,
    pub payload: Vec<u8>,
}

/// Decode failures. The decoder consumes no state on failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("bad magic: expected 0x45535348, got {0:#010x}")]
    BadMagic(u32),
    #[error("bad version: expected {VERSION:#04x}, got {0:#04x}")]
    BadVersion(u8),
    #[error("frame too short: {0} bytes")]
    ShortFrame(usize),
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),
    #[error("header is not valid JSON: {0}")]
    BadHeader(String),
}

/// Encode a frame. Pure function; the caller hands the result to the stream
/// writer in a single send.
pub fn encode(msg_type: MessageType, header: &Value, payload: &[u8]) -> Vec<u8> {
    let header_bytes = serde_json::to_vec(header).unwrap_or_else(|_| b"{}".to_vec());
    let mut out = Vec::with_capacity(PREFIX_LEN + header_bytes.len() + payload.len());
    out.extend_from_slice(&MAGIC.to_be_bytes());
    out.push(VERSION);
    out.push(msg_type as u8);
    out.extend_from_slice(&u32::try_from(header_bytes.len()).unwrap_or(0).to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload);
    out
}

/// Decode one frame.
pub fn decode(buf: &[u8]) -> Result<Frame, DecodeError> {
    if buf.len() < PREFIX_LEN {
        return Err(DecodeError::ShortFrame(buf.len()));
    }
    let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    if buf[4] != VERSION {
        return Err(DecodeError::BadVersion(buf[4]));
    }
    let msg_type = MessageType::from_byte(buf[5]).ok_or(DecodeError::UnknownType(buf[5]))?;
    let hdr_len = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
    if buf.len() < PREFIX_LEN + hdr_len {
        return Err(DecodeError::ShortFrame(buf.len()));
    }
    let header_bytes = &buf[PREFIX_LEN..PREFIX_LEN + hdr_len];
    let header: Value = serde_json::from_slice(header_bytes)
        .map_err(|e| DecodeError::BadHeader(e.to_string()))?;
    let payload = buf[PREFIX_LEN + hdr_len..].to_vec();
    Ok(Frame {
        msg_type,
        header,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip() {
        let header = json!({"sessionId": "s1", "operationId": "op-7"});
        let payload = b"echo hi\n";
        let bytes = encode(MessageType::SshData, &header, payload);
        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.msg_type, MessageType::SshData);
        assert_eq!(frame.header, header);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn test_roundtrip_empty_payload() {
        let bytes = encode(MessageType::Heartbeat, &json!({"timestamp": 1}), &[]);
        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.msg_type, MessageType::Heartbeat);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode(MessageType::Heartbeat, &json!({}), &[]);
        bytes[0] = 0x00;
        assert!(matches!(decode(&bytes), Err(DecodeError::BadMagic(_))));
    }

    #[test]
    fn test_bad_version() {
        let mut bytes = encode(MessageType::Heartbeat, &json!({}), &[]);
        bytes[4] = 0x01;
        assert_eq!(decode(&bytes), Err(DecodeError::BadVersion(0x01)));
    }

    #[test]
    fn test_short_frame() {
        assert_eq!(decode(&[0x45, 0x53]), Err(DecodeError::ShortFrame(2)));
        // Valid prefix claiming a longer header than the buffer holds
        let mut bytes = encode(MessageType::Heartbeat, &json!({}), &[]);
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(decode(&bytes), Err(DecodeError::ShortFrame(_))));
    }

    #[test]
    fn test_bad_header() {
        let mut bytes = encode(MessageType::Heartbeat, &json!({"a": 1}), &[]);
        // Corrupt the JSON header in place
        let hdr_start = 10;
        bytes[hdr_start] = b'!';
        assert!(matches!(decode(&bytes), Err(DecodeError::BadHeader(_))));
    }

    #[test]
    fn test_unknown_type() {
        let mut bytes = encode(MessageType::Heartbeat, &json!({}), &[]);
        bytes[5] = 0x7F;
        assert_eq!(decode(&bytes), Err(DecodeError::UnknownType(0x7F)));
    }

    #[test]
    fn test_type_byte_roundtrip() {
        for b in 0x00..=0xFF {
            if let Some(t) = MessageType::from_byte(b) {
                assert_eq!(t as u8, b);
            }
        }
    }
}
