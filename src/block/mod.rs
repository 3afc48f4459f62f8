//! Read access to a replica's stored blocks.
//!
//! Every block file starts with an 8-byte magic and a MessagePack header
//! prefixed by its big-endian u32 length; the remainder is a sequence of
//! frames (see [`crate::wal::frame`]). Headers can be read without touching
//! the frames, which is what metadata-only dumps rely on.

pub mod changelist;
pub mod column;
pub mod delta;
pub mod row_group;

use crate::error::{ResourceType, ToolError};
use crate::layout::FsLayout;
use crate::metadata::atomic::write_file_atomic;
use crate::wal::frame::FrameError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;

pub const BLOCK_MAGIC_LEN: usize = 8;
const MAX_HEADER_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct BlockId(pub u64);

impl BlockId {
    pub fn filename(&self) -> String {
        format!("{self}.blk")
    }

    pub fn parse_filename(name: &str) -> Option<Self> {
        let digits = name.strip_suffix(".blk")?;
        if digits.len() != 16 {
            return None;
        }
        digits.parse::<u64>().ok().map(BlockId)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016}", self.0)
    }
}

pub(crate) fn frame_error(location: &str, err: FrameError) -> ToolError {
    match err {
        FrameError::Truncation => ToolError::decode(location, "truncated record frame"),
        FrameError::Corruption => ToolError::decode(location, "corrupt record frame"),
        FrameError::Io(message) => ToolError::decode(location, message),
    }
}

/// Forward-only cursor over the rows of a block or row group.
///
/// A batch is opened with [`RowCursor::prepare_batch`] and closed with
/// [`RowCursor::finish_batch`], which advances the cursor past it.
pub trait RowCursor {
    fn seek_to_start(&mut self) -> Result<(), ToolError>;

    fn has_next(&self) -> bool;

    /// Prepares up to `requested` rows and returns how many are available.
    fn prepare_batch(&mut self, requested: usize) -> Result<usize, ToolError>;

    fn finish_batch(&mut self) -> Result<(), ToolError>;
}

/// The raw bytes of one block, split into header and frame payload.
#[derive(Debug)]
pub struct ReadableBlock {
    id: BlockId,
    bytes: Vec<u8>,
    header_end: usize,
}

impl ReadableBlock {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn decode_header<H: DeserializeOwned>(&self) -> Result<H, ToolError> {
        rmp_serde::from_slice(&self.bytes[BLOCK_MAGIC_LEN + 4..self.header_end])
            .map_err(|e| ToolError::decode(format!("block {} header", self.id), e))
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.header_end..]
    }
}

#[derive(Debug, Clone)]
pub struct BlockStore {
    dir: PathBuf,
}

impl BlockStore {
    pub fn new(layout: &FsLayout) -> Self {
        Self {
            dir: layout.data_dir(),
        }
    }

    fn path(&self, id: BlockId) -> PathBuf {
        self.dir.join(id.filename())
    }

    pub fn exists(&self, id: BlockId) -> bool {
        self.path(id).exists()
    }

    /// Reads a block and checks its magic and header framing.
    pub fn open(&self, id: BlockId, magic: &[u8; BLOCK_MAGIC_LEN]) -> Result<ReadableBlock, ToolError> {
        let path = self.path(id);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::not_found(ResourceType::Block, id.to_string())
            } else {
                ToolError::io_at(format!("block {id}"), e)
            }
        })?;
        if bytes.len() < BLOCK_MAGIC_LEN + 4 {
            return Err(ToolError::decode(
                format!("block {id}"),
                format!("file too small ({} bytes)", bytes.len()),
            ));
        }
        if &bytes[..BLOCK_MAGIC_LEN] != magic {
            return Err(ToolError::decode(format!("block {id}"), "bad block magic"));
        }
        let header_len = u32::from_be_bytes(
            bytes[BLOCK_MAGIC_LEN..BLOCK_MAGIC_LEN + 4]
                .try_into()
                .map_err(|_| ToolError::decode(format!("block {id}"), "bad header length"))?,
        ) as usize;
        let header_end = BLOCK_MAGIC_LEN + 4 + header_len;
        if header_len > MAX_HEADER_BYTES || header_end > bytes.len() {
            return Err(ToolError::decode(
                format!("block {id}"),
                format!("header length {header_len} exceeds block size"),
            ));
        }
        Ok(ReadableBlock {
            id,
            bytes,
            header_end,
        })
    }

    /// Writes a new block. Existing blocks are never replaced.
    pub fn create<H: Serialize>(
        &self,
        id: BlockId,
        magic: &[u8; BLOCK_MAGIC_LEN],
        header: &H,
        payload: &[u8],
    ) -> Result<(), ToolError> {
        if self.exists(id) {
            return Err(ToolError::PreconditionFailed(format!(
                "block {id} already exists"
            )));
        }
        let header_bytes =
            rmp_serde::to_vec_named(header).map_err(|e| ToolError::Encode(e.to_string()))?;
        let header_len = u32::try_from(header_bytes.len())
            .map_err(|_| ToolError::Encode(format!("block {id} header too large")))?;
        let mut bytes = Vec::with_capacity(BLOCK_MAGIC_LEN + 4 + header_bytes.len() + payload.len());
        bytes.extend_from_slice(magic);
        bytes.extend_from_slice(&header_len.to_be_bytes());
        bytes.extend_from_slice(&header_bytes);
        bytes.extend_from_slice(payload);
        write_file_atomic(&self.path(id), &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockId, BlockStore};
    use crate::error::ToolErrorCode;
    use crate::layout::FsLayout;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Header {
        n: u32,
    }

    #[test]
    fn block_ids_display_zero_padded() {
        assert_eq!(BlockId(7).to_string(), "0000000000000007");
        assert_eq!(BlockId::parse_filename("0000000000000007.blk"), Some(BlockId(7)));
        assert_eq!(BlockId::parse_filename("7.blk"), None);
    }

    #[test]
    fn header_and_payload_are_split() {
        let dir = tempdir().expect("temp");
        let (layout, _) = FsLayout::create(dir.path()).expect("layout");
        let store = BlockStore::new(&layout);
        store
            .create(BlockId(1), b"TESTBLK1", &Header { n: 3 }, b"frames")
            .expect("create");
        let block = store.open(BlockId(1), b"TESTBLK1").expect("open");
        assert_eq!(block.decode_header::<Header>().expect("header"), Header { n: 3 });
        assert_eq!(block.payload(), b"frames");

        let err = store
            .create(BlockId(1), b"TESTBLK1", &Header { n: 4 }, b"")
            .expect_err("exists");
        assert_eq!(err.code(), ToolErrorCode::PreconditionFailed);
    }

    #[test]
    fn wrong_magic_and_missing_blocks_are_reported() {
        let dir = tempdir().expect("temp");
        let (layout, _) = FsLayout::create(dir.path()).expect("layout");
        let store = BlockStore::new(&layout);
        store
            .create(BlockId(2), b"TESTBLK1", &Header { n: 1 }, b"")
            .expect("create");
        let err = store.open(BlockId(2), b"OTHERBLK").expect_err("magic");
        assert_eq!(err.code(), ToolErrorCode::Decode);
        let err = store.open(BlockId(3), b"TESTBLK1").expect_err("missing");
        assert_eq!(err.code(), ToolErrorCode::BlockNotFound);
    }
}
