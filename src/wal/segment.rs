use crate::error::ToolError;
use crate::wal::frame::encode_frame;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SEGMENT_MAGIC: u32 = 0x5254_574C;
pub const SEGMENT_HEADER_SIZE: usize = 64;
pub const SEGMENT_FORMAT_VERSION: u16 = 1;
pub const SEGMENT_FILE_PREFIX: &str = "segment_";
pub const SEGMENT_FILE_SUFFIX: &str = ".rtwal";

pub fn segment_filename(segment_seq: u64) -> String {
    format!("{SEGMENT_FILE_PREFIX}{segment_seq:016}{SEGMENT_FILE_SUFFIX}")
}

pub fn parse_segment_filename(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_FILE_PREFIX)?
        .strip_suffix(SEGMENT_FILE_SUFFIX)?
        .parse::<u64>()
        .ok()
}

/// Operation carried by a log entry, stored in the frame kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEntryType {
    NoOp,
    Write,
    AlterSchema,
    ChangeConfig,
    Commit,
}

impl LogEntryType {
    pub fn to_byte(self) -> u8 {
        match self {
            LogEntryType::NoOp => 1,
            LogEntryType::Write => 2,
            LogEntryType::AlterSchema => 3,
            LogEntryType::ChangeConfig => 4,
            LogEntryType::Commit => 5,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(LogEntryType::NoOp),
            2 => Some(LogEntryType::Write),
            3 => Some(LogEntryType::AlterSchema),
            4 => Some(LogEntryType::ChangeConfig),
            5 => Some(LogEntryType::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for LogEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogEntryType::NoOp => "NO_OP",
            LogEntryType::Write => "WRITE_OP",
            LogEntryType::AlterSchema => "ALTER_SCHEMA_OP",
            LogEntryType::ChangeConfig => "CHANGE_CONFIG_OP",
            LogEntryType::Commit => "COMMIT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub magic: u32,
    pub format_version: u16,
    pub instance_id: u64,
    pub segment_seq: u64,
    pub created_at_micros: u64,
    pub prev_segment_hash: [u8; 32],
}

impl SegmentHeader {
    pub fn new(instance_id: u64, segment_seq: u64, prev_segment_hash: [u8; 32]) -> Self {
        let created_at_micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        Self {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            instance_id,
            segment_seq,
            created_at_micros,
            prev_segment_hash,
        }
    }

    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut out = [0u8; SEGMENT_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_be_bytes());
        out[4..6].copy_from_slice(&self.format_version.to_be_bytes());
        out[8..16].copy_from_slice(&self.instance_id.to_be_bytes());
        out[16..24].copy_from_slice(&self.segment_seq.to_be_bytes());
        out[24..32].copy_from_slice(&self.created_at_micros.to_be_bytes());
        out[32..64].copy_from_slice(&self.prev_segment_hash);
        out
    }

    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE], location: &str) -> Result<Self, ToolError> {
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_be_bytes(buf)
        };
        let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != SEGMENT_MAGIC {
            return Err(ToolError::decode(location, "invalid segment magic"));
        }
        let format_version = u16::from_be_bytes([bytes[4], bytes[5]]);
        if format_version != SEGMENT_FORMAT_VERSION {
            return Err(ToolError::decode(
                location,
                format!("unsupported segment format version {format_version}"),
            ));
        }
        let mut prev_segment_hash = [0u8; 32];
        prev_segment_hash.copy_from_slice(&bytes[32..64]);
        Ok(Self {
            magic,
            format_version,
            instance_id: u64_at(8),
            segment_seq: u64_at(16),
            created_at_micros: u64_at(24),
            prev_segment_hash,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClosedSegment {
    pub path: PathBuf,
    pub segment_seq: u64,
    pub hash: [u8; 32],
    pub size_bytes: u64,
}

/// Appends entries to one new segment file. Used to build log fixtures and
/// to materialize segments received from a copy source.
pub struct SegmentWriter {
    file: File,
    path: PathBuf,
    segment_seq: u64,
    size_bytes: u64,
    hasher: blake3::Hasher,
}

impl SegmentWriter {
    pub fn create(
        dir: &Path,
        instance_id: u64,
        segment_seq: u64,
        prev_segment_hash: [u8; 32],
    ) -> Result<Self, ToolError> {
        fs::create_dir_all(dir).map_err(|e| ToolError::io_at(dir.display().to_string(), e))?;
        let path = dir.join(segment_filename(segment_seq));
        let ctx = path.display().to_string();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| ToolError::io_at(&ctx, e))?;
        let header = SegmentHeader::new(instance_id, segment_seq, prev_segment_hash).to_bytes();
        file.write_all(&header).map_err(|e| ToolError::io_at(&ctx, e))?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&header);
        Ok(Self {
            file,
            path,
            segment_seq,
            size_bytes: SEGMENT_HEADER_SIZE as u64,
            hasher,
        })
    }

    pub fn append(
        &mut self,
        op_index: u64,
        timestamp: u64,
        entry_type: LogEntryType,
        payload: &[u8],
    ) -> Result<(), ToolError> {
        let frame = encode_frame(op_index, timestamp, entry_type.to_byte(), payload)
            .map_err(|e| ToolError::Encode(format!("log entry {op_index}: {e}")))?;
        self.file
            .write_all(&frame)
            .map_err(|e| ToolError::io_at(self.path.display().to_string(), e))?;
        self.hasher.update(&frame);
        self.size_bytes = self.size_bytes.saturating_add(frame.len() as u64);
        Ok(())
    }

    pub fn close(mut self) -> Result<ClosedSegment, ToolError> {
        let ctx = self.path.display().to_string();
        self.file.flush().map_err(|e| ToolError::io_at(&ctx, e))?;
        self.file.sync_all().map_err(|e| ToolError::io_at(&ctx, e))?;
        Ok(ClosedSegment {
            path: self.path,
            segment_seq: self.segment_seq,
            hash: *self.hasher.finalize().as_bytes(),
            size_bytes: self.size_bytes,
        })
    }
}
