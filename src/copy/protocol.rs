//! Wire messages of the replica copy transport.
//!
//! Every message is one record frame (see [`crate::wal::frame`]) whose
//! ordinal is the sender's message sequence number and whose payload is the
//! MessagePack encoding of a [`CopyRequest`] or [`CopyResponse`].

use crate::block::BlockId;
use crate::error::ToolError;
use crate::wal::frame::{MAX_FRAME_BODY_BYTES, decode_frame, encode_frame};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const KIND_REQUEST: u8 = 0x10;
pub const KIND_RESPONSE: u8 = 0x11;

pub const CHUNK_BYTES: u64 = 1024 * 1024;
pub const COPY_IO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileKind {
    Block(BlockId),
    WalSegment(u64),
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Block(id) => write!(f, "block {id}"),
            FileKind::WalSegment(seq) => write!(f, "wal segment {seq}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub kind: FileKind,
    pub size_bytes: u64,
    pub sha256_hex: String,
}

/// Everything the source will serve for one replica.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CopyManifest {
    pub replica_id: String,
    /// The replica metadata file as stored on the source.
    #[serde(with = "serde_bytes")]
    pub replica_metadata: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub consensus_metadata: Vec<u8>,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CopyRequest {
    BeginSession {
        replica_id: String,
    },
    FetchChunk {
        session_id: String,
        kind: FileKind,
        offset: u64,
        max_len: u64,
    },
    EndSession {
        session_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CopyResponse {
    SessionStarted {
        session_id: String,
        manifest: CopyManifest,
    },
    Chunk {
        offset: u64,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        total_size: u64,
    },
    SessionEnded,
    Error {
        code: String,
        message: String,
    },
}

pub async fn write_message<W, M>(writer: &mut W, seq: u64, kind: u8, message: &M) -> Result<(), ToolError>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let payload = rmp_serde::to_vec_named(message).map_err(|e| ToolError::Encode(e.to_string()))?;
    let frame = encode_frame(seq, 0, kind, &payload)
        .map_err(|e| ToolError::Protocol(format!("cannot frame message {seq}: {e}")))?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one message. Returns `None` if the peer closed the connection
/// cleanly between messages.
pub async fn read_message<R, M>(reader: &mut R, kind: u8) -> Result<Option<(u64, M)>, ToolError>
where
    R: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    let first = reader.read(&mut len_buf[..1]).await?;
    if first == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut len_buf[1..])
        .await
        .map_err(|e| ToolError::Protocol(format!("connection closed mid-message: {e}")))?;
    let body_len = u32::from_be_bytes(len_buf) as usize;
    if body_len > MAX_FRAME_BODY_BYTES {
        return Err(ToolError::Protocol(format!(
            "message of {body_len} bytes exceeds frame limit"
        )));
    }
    let mut bytes = Vec::with_capacity(4 + body_len);
    bytes.extend_from_slice(&len_buf);
    bytes.resize(4 + body_len, 0);
    reader
        .read_exact(&mut bytes[4..])
        .await
        .map_err(|e| ToolError::Protocol(format!("connection closed mid-message: {e}")))?;

    let frame =
        decode_frame(&bytes).map_err(|e| ToolError::Protocol(format!("bad message frame: {e}")))?;
    if frame.kind != kind {
        return Err(ToolError::Protocol(format!(
            "unexpected message kind {:#04x}",
            frame.kind
        )));
    }
    let message = rmp_serde::from_slice(&frame.payload)
        .map_err(|e| ToolError::Protocol(format!("bad message {}: {e}", frame.ordinal)))?;
    Ok(Some((frame.ordinal, message)))
}

#[cfg(test)]
mod tests {
    use super::{CopyResponse, KIND_REQUEST, KIND_RESPONSE, read_message, write_message};
    use crate::error::ToolErrorCode;

    #[tokio::test]
    async fn chunk_survives_the_wire() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let sent = CopyResponse::Chunk {
            offset: 8,
            data: vec![1, 2, 3],
            total_size: 11,
        };
        write_message(&mut a, 4, KIND_RESPONSE, &sent).await.expect("write");
        let (seq, got): (u64, CopyResponse) = read_message(&mut b, KIND_RESPONSE)
            .await
            .expect("read")
            .expect("message");
        assert_eq!(seq, 4);
        assert_eq!(got, sent);
    }

    #[tokio::test]
    async fn wrong_kind_and_clean_close_are_distinguished() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_message(&mut a, 1, KIND_RESPONSE, &CopyResponse::SessionEnded)
            .await
            .expect("write");
        drop(a);
        let err = read_message::<_, CopyResponse>(&mut b, KIND_REQUEST)
            .await
            .expect_err("kind");
        assert_eq!(err.code(), ToolErrorCode::Protocol);
        let next = read_message::<_, CopyResponse>(&mut b, KIND_RESPONSE)
            .await
            .expect("eof");
        assert!(next.is_none());
    }
}
