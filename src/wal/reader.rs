use crate::error::ToolError;
use crate::layout::FsLayout;
use crate::wal::frame::{FrameError, FrameReader};
use crate::wal::segment::{
    LogEntryType, SEGMENT_HEADER_SIZE, SegmentHeader, parse_segment_filename,
};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// The segments of one replica's log, in sequence order.
#[derive(Debug)]
pub struct LogReader {
    replica_id: String,
    segments: Vec<ReadableLogSegment>,
}

impl LogReader {
    /// Lists and opens every segment. A replica without a log directory has
    /// no segments.
    pub fn open(layout: &FsLayout, replica_id: &str) -> Result<Self, ToolError> {
        let dir = layout.replica_wal_dir(replica_id)?;
        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        match fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry =
                        entry.map_err(|e| ToolError::io_at(dir.display().to_string(), e))?;
                    let name = entry.file_name().to_string_lossy().to_string();
                    if let Some(seq) = parse_segment_filename(&name) {
                        found.push((seq, entry.path()));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ToolError::io_at(dir.display().to_string(), e)),
        }
        found.sort_by_key(|(seq, _)| *seq);

        let mut prev_hash = [0u8; 32];
        let mut segments = Vec::with_capacity(found.len());
        for (_, path) in found {
            let segment = ReadableLogSegment::open(&path, prev_hash)?;
            prev_hash = segment.hash;
            segments.push(segment);
        }
        Ok(Self {
            replica_id: replica_id.to_string(),
            segments,
        })
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn segments(&self) -> &[ReadableLogSegment] {
        &self.segments
    }
}

#[derive(Debug, Clone)]
pub struct ReadableLogSegment {
    path: PathBuf,
    header: SegmentHeader,
    file_size: u64,
    hash: [u8; 32],
    chain_valid: bool,
}

impl ReadableLogSegment {
    /// Reads the header and hashes the file. `expected_prev_hash` is the hash
    /// of the preceding segment, or zeroes for the first one.
    pub fn open(path: &Path, expected_prev_hash: [u8; 32]) -> Result<Self, ToolError> {
        let ctx = path.display().to_string();
        let mut file = File::open(path).map_err(|e| ToolError::io_at(&ctx, e))?;
        let file_size = file.metadata().map_err(|e| ToolError::io_at(&ctx, e))?.len();
        if file_size < SEGMENT_HEADER_SIZE as u64 {
            return Err(ToolError::decode(
                &ctx,
                format!("segment too small ({file_size} bytes)"),
            ));
        }
        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)
            .map_err(|e| ToolError::io_at(&ctx, e))?;
        let header = SegmentHeader::from_bytes(&header_bytes, &ctx)?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&header_bytes);
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buffer).map_err(|e| ToolError::io_at(&ctx, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(Self {
            path: path.to_path_buf(),
            chain_valid: header.prev_segment_hash == expected_prev_hash,
            header,
            file_size,
            hash: *hasher.finalize().as_bytes(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    /// Whether the header's previous-segment hash matches the segment before it.
    pub fn chain_valid(&self) -> bool {
        self.chain_valid
    }

    pub fn entries(&self) -> Result<LogEntryReader, ToolError> {
        let ctx = self.path.display().to_string();
        let mut file = BufReader::new(File::open(&self.path).map_err(|e| ToolError::io_at(&ctx, e))?);
        let mut skip = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut skip)
            .map_err(|e| ToolError::io_at(&ctx, e))?;
        Ok(LogEntryReader {
            location: ctx,
            reader: FrameReader::new(file),
            last_op_index: None,
            truncated_tail: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub op_index: u64,
    pub timestamp: u64,
    pub entry_type: u8,
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn entry_type(&self) -> Option<LogEntryType> {
        LogEntryType::from_byte(self.entry_type)
    }
}

pub struct LogEntryReader {
    location: String,
    reader: FrameReader<BufReader<File>>,
    last_op_index: Option<u64>,
    truncated_tail: bool,
}

impl LogEntryReader {
    /// The next entry. A partially written final entry ends the segment
    /// without an error and is reported by [`LogEntryReader::truncated_tail`].
    pub fn next_entry(&mut self) -> Result<Option<LogEntry>, ToolError> {
        if self.truncated_tail {
            return Ok(None);
        }
        let frame = match self.reader.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(FrameError::Truncation) => {
                self.truncated_tail = true;
                return Ok(None);
            }
            Err(err) => {
                let after = match self.last_op_index {
                    Some(op) => format!(" after op index {op}"),
                    None => " at first entry".to_string(),
                };
                return Err(ToolError::decode(
                    format!("{}{after}", self.location),
                    err,
                ));
            }
        };
        self.last_op_index = Some(frame.ordinal);
        Ok(Some(LogEntry {
            op_index: frame.ordinal,
            timestamp: frame.timestamp,
            entry_type: frame.kind,
            payload: frame.payload,
        }))
    }

    pub fn truncated_tail(&self) -> bool {
        self.truncated_tail
    }
}

#[cfg(test)]
mod tests {
    use super::LogReader;
    use crate::layout::FsLayout;
    use crate::wal::segment::{LogEntryType, SegmentWriter};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn segments_are_ordered_and_chained() {
        let dir = tempdir().expect("temp");
        let (layout, _) = FsLayout::create(dir.path()).expect("layout");
        let wal_dir = layout.replica_wal_dir("r1").expect("wal dir");
        let mut prev = [0u8; 32];
        for seq in [1u64, 2, 3] {
            let mut writer = SegmentWriter::create(&wal_dir, 9, seq, prev).expect("create");
            writer
                .append(seq, seq * 10, LogEntryType::Write, b"row")
                .expect("append");
            prev = writer.close().expect("close").hash;
        }
        let reader = LogReader::open(&layout, "r1").expect("open");
        let seqs: Vec<u64> = reader
            .segments()
            .iter()
            .map(|s| s.header().segment_seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(reader.segments().iter().all(|s| s.chain_valid()));
    }

    #[test]
    fn broken_chain_is_flagged_not_fatal() {
        let dir = tempdir().expect("temp");
        let (layout, _) = FsLayout::create(dir.path()).expect("layout");
        let wal_dir = layout.replica_wal_dir("r1").expect("wal dir");
        SegmentWriter::create(&wal_dir, 9, 1, [0u8; 32])
            .expect("create")
            .close()
            .expect("close");
        SegmentWriter::create(&wal_dir, 9, 2, [7u8; 32])
            .expect("create")
            .close()
            .expect("close");
        let reader = LogReader::open(&layout, "r1").expect("open");
        assert!(reader.segments()[0].chain_valid());
        assert!(!reader.segments()[1].chain_valid());
    }

    #[test]
    fn truncated_final_entry_ends_iteration() {
        let dir = tempdir().expect("temp");
        let (layout, _) = FsLayout::create(dir.path()).expect("layout");
        let wal_dir = layout.replica_wal_dir("r1").expect("wal dir");
        let mut writer = SegmentWriter::create(&wal_dir, 9, 1, [0u8; 32]).expect("create");
        writer.append(1, 1, LogEntryType::Write, b"a").expect("append");
        let closed = writer.close().expect("close");
        let mut file = OpenOptions::new()
            .append(true)
            .open(&closed.path)
            .expect("reopen");
        file.write_all(&[0, 0, 0, 40, 1, 2]).expect("partial");

        let reader = LogReader::open(&layout, "r1").expect("open");
        let mut entries = reader.segments()[0].entries().expect("entries");
        assert_eq!(entries.next_entry().expect("first").map(|e| e.op_index), Some(1));
        assert!(entries.next_entry().expect("tail").is_none());
        assert!(entries.truncated_tail());
    }

    #[test]
    fn replica_without_log_has_no_segments() {
        let dir = tempdir().expect("temp");
        let (layout, _) = FsLayout::create(dir.path()).expect("layout");
        let reader = LogReader::open(&layout, "r9").expect("open");
        assert!(reader.segments().is_empty());
    }
}
