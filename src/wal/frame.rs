//! Length-prefixed, CRC32C-checked record frames.
//!
//! Shared by WAL segments, block payloads and the copy transport. Layout:
//! `len:u32 | ordinal:u64 | timestamp:u64 | kind:u8 | payload | crc32c:u32`,
//! all big-endian, where `len` covers everything after itself. The checksum
//! covers the length prefix too.

use crc32c::crc32c;
use std::io::{self, Read, Write};
use thiserror::Error;

pub const MAX_FRAME_BODY_BYTES: usize = 64 * 1024 * 1024;
const LEN_BYTES: usize = 4;
const HEADER_BYTES: usize = 8 + 8 + 1;
const CRC_BYTES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ordinal: u64,
    pub timestamp: u64,
    pub kind: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated frame")]
    Truncation,
    #[error("corrupt frame")]
    Corruption,
    #[error("io error: {0}")]
    Io(String),
}

impl From<io::Error> for FrameError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::UnexpectedEof => Self::Truncation,
            _ => Self::Io(value.to_string()),
        }
    }
}

/// Serializes one complete frame, length prefix included.
pub fn encode_frame(
    ordinal: u64,
    timestamp: u64,
    kind: u8,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    let body_len = HEADER_BYTES + payload.len() + CRC_BYTES;
    if body_len > MAX_FRAME_BODY_BYTES {
        return Err(FrameError::Corruption);
    }
    let len = u32::try_from(body_len).map_err(|_| FrameError::Corruption)?;

    let mut buf = Vec::with_capacity(LEN_BYTES + body_len);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&ordinal.to_be_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.push(kind);
    buf.extend_from_slice(payload);
    let crc = crc32c(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    Ok(buf)
}

/// Decodes a frame held entirely in `bytes`. Trailing bytes are corruption.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let (len_bytes, body) = bytes
        .split_first_chunk::<LEN_BYTES>()
        .ok_or(FrameError::Truncation)?;
    let body_len = checked_body_len(*len_bytes)?;
    if body.len() < body_len {
        return Err(FrameError::Truncation);
    }
    if body.len() > body_len {
        return Err(FrameError::Corruption);
    }
    parse_body(len_bytes, body)
}

fn checked_body_len(len_bytes: [u8; LEN_BYTES]) -> Result<usize, FrameError> {
    let body_len = u32::from_be_bytes(len_bytes) as usize;
    if !(HEADER_BYTES + CRC_BYTES..=MAX_FRAME_BODY_BYTES).contains(&body_len) {
        return Err(FrameError::Corruption);
    }
    Ok(body_len)
}

fn parse_body(len_bytes: &[u8; LEN_BYTES], body: &[u8]) -> Result<Frame, FrameError> {
    let (covered, crc_bytes) = body.split_at(body.len() - CRC_BYTES);
    let stored = u32::from_be_bytes(crc_bytes.try_into().map_err(|_| FrameError::Corruption)?);
    let mut hasher_input = Vec::with_capacity(LEN_BYTES + covered.len());
    hasher_input.extend_from_slice(len_bytes);
    hasher_input.extend_from_slice(covered);
    if crc32c(&hasher_input) != stored {
        return Err(FrameError::Corruption);
    }

    let (header, payload) = covered.split_at(HEADER_BYTES);
    let word = |range: std::ops::Range<usize>| -> Result<u64, FrameError> {
        Ok(u64::from_be_bytes(
            header[range].try_into().map_err(|_| FrameError::Corruption)?,
        ))
    };
    Ok(Frame {
        ordinal: word(0..8)?,
        timestamp: word(8..16)?,
        kind: header[16],
        payload: payload.to_vec(),
    })
}

pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn append(
        &mut self,
        ordinal: u64,
        timestamp: u64,
        kind: u8,
        payload: &[u8],
    ) -> Result<(), FrameError> {
        let bytes = encode_frame(ordinal, timestamp, kind, payload)?;
        self.inner.write_all(&bytes)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Streams frames from a reader. A clean end of input between frames is
/// `Ok(None)`; input ending inside a frame is [`FrameError::Truncation`].
pub struct FrameReader<R: Read> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut len_bytes = [0u8; LEN_BYTES];
        if self.inner.read(&mut len_bytes[..1])? == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut len_bytes[1..])?;
        let body_len = checked_body_len(len_bytes)?;

        let mut body = vec![0u8; body_len];
        self.inner.read_exact(&mut body)?;
        parse_body(&len_bytes, &body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameError, FrameReader, FrameWriter, MAX_FRAME_BODY_BYTES, decode_frame, encode_frame};
    use std::io::Cursor;

    fn log_of(n: u64) -> Vec<u8> {
        let mut writer = FrameWriter::new(Vec::new());
        for i in 0..n {
            writer
                .append(i, 500 + i, (i % 3) as u8, &i.to_le_bytes()[..(i % 8) as usize])
                .expect("append");
        }
        writer.into_inner()
    }

    #[test]
    fn stream_yields_frames_then_clean_end() {
        let mut reader = FrameReader::new(Cursor::new(log_of(64)));
        for i in 0..64u64 {
            let frame = reader.next_frame().expect("read").expect("frame");
            assert_eq!((frame.ordinal, frame.timestamp, frame.kind), (i, 500 + i, (i % 3) as u8));
            assert_eq!(frame.payload.len(), (i % 8) as usize);
        }
        assert_eq!(reader.next_frame(), Ok(None));
    }

    #[test]
    fn any_flipped_bit_is_caught() {
        let bytes = encode_frame(9, 10, 2, b"row payload").expect("encode");
        for idx in 4..bytes.len() {
            let mut damaged = bytes.clone();
            damaged[idx] ^= 0x01;
            assert_eq!(decode_frame(&damaged), Err(FrameError::Corruption), "byte {idx}");
        }
    }

    #[test]
    fn every_cut_point_is_truncation() {
        let bytes = log_of(3);
        let first_len = encode_frame(0, 500, 0, b"").expect("encode").len();
        for cut in first_len + 1..bytes.len() {
            let mut reader = FrameReader::new(Cursor::new(&bytes[..cut]));
            reader.next_frame().expect("first").expect("frame");
            let mut result = reader.next_frame();
            while let Ok(Some(_)) = result {
                result = reader.next_frame();
            }
            assert!(
                matches!(result, Ok(None) | Err(FrameError::Truncation)),
                "cut {cut}: {result:?}"
            );
        }
        assert_eq!(decode_frame(&[0, 0]), Err(FrameError::Truncation));
    }

    #[test]
    fn implausible_lengths_are_corruption() {
        let oversized = u32::try_from(MAX_FRAME_BODY_BYTES + 1).expect("fits");
        let mut reader = FrameReader::new(Cursor::new(oversized.to_be_bytes().to_vec()));
        assert_eq!(reader.next_frame(), Err(FrameError::Corruption));

        let mut reader = FrameReader::new(Cursor::new(3u32.to_be_bytes().to_vec()));
        assert_eq!(reader.next_frame(), Err(FrameError::Corruption));

        let mut bytes = encode_frame(1, 1, 1, b"x").expect("encode");
        bytes.push(0);
        assert_eq!(decode_frame(&bytes), Err(FrameError::Corruption));
    }
}
