//! Delta blocks: per-row mutation records sorted by (row, timestamp).
//!
//! UNDO and REDO blocks share one format and one reader. The only difference
//! is which records a snapshot makes relevant, and that is settled once when
//! the iterator is created.

use crate::block::changelist::{RowChangeList, CHANGE_KIND_DELETE, CHANGE_KIND_REINSERT, CHANGE_KIND_UPDATE};
use crate::block::{BlockId, BlockStore, ReadableBlock, frame_error};
use crate::catalog::schema::{ColumnId, TableSchema};
use crate::error::ToolError;
use crate::scratch::{ScratchRegion, ScratchSlice};
use crate::wal::frame::{Frame, FrameReader, FrameWriter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;

pub const DELTA_BLOCK_MAGIC: &[u8; 8] = b"RTDLTBK1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeltaType {
    Undo,
    Redo,
}

impl DeltaType {
    /// Snapshot a dump uses for blocks of this type.
    pub fn dump_snapshot(self) -> MvccSnapshot {
        match self {
            DeltaType::Undo => MvccSnapshot::IncludingNone,
            DeltaType::Redo => MvccSnapshot::IncludingAll,
        }
    }

    /// REDO records matter when committed in the snapshot, UNDO records when
    /// they are not.
    fn relevant_when_committed(self) -> bool {
        matches!(self, DeltaType::Redo)
    }
}

impl fmt::Display for DeltaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaType::Undo => f.write_str("UNDO"),
            DeltaType::Redo => f.write_str("REDO"),
        }
    }
}

/// Which commit timestamps count as applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvccSnapshot {
    IncludingAll,
    IncludingNone,
    /// Everything committed strictly before the timestamp.
    CommittedBefore(u64),
}

impl MvccSnapshot {
    pub fn is_committed(&self, timestamp: u64) -> bool {
        match self {
            MvccSnapshot::IncludingAll => true,
            MvccSnapshot::IncludingNone => false,
            MvccSnapshot::CommittedBefore(bound) => timestamp < *bound,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeltaStats {
    pub num_records: u64,
    pub min_timestamp: u64,
    pub max_timestamp: u64,
    pub delete_count: u64,
    pub reinsert_count: u64,
    pub update_counts: BTreeMap<ColumnId, u64>,
}

impl DeltaStats {
    fn record(&mut self, timestamp: u64, change: &RowChangeList) {
        if self.num_records == 0 {
            self.min_timestamp = timestamp;
            self.max_timestamp = timestamp;
        } else {
            self.min_timestamp = self.min_timestamp.min(timestamp);
            self.max_timestamp = self.max_timestamp.max(timestamp);
        }
        self.num_records += 1;
        match change {
            RowChangeList::Update(cells) => {
                for (col, _) in cells {
                    *self.update_counts.entry(*col).or_insert(0) += 1;
                }
            }
            RowChangeList::Delete => self.delete_count += 1,
            RowChangeList::Reinsert(_) => self.reinsert_count += 1,
        }
    }
}

impl fmt::Display for DeltaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let updates: Vec<String> = self
            .update_counts
            .iter()
            .map(|(col, n)| format!("{col}={n}"))
            .collect();
        write!(
            f,
            "num_records: {} timestamps: [{}, {}] deletes: {} reinserts: {} updates: [{}]",
            self.num_records,
            self.min_timestamp,
            self.max_timestamp,
            self.delete_count,
            self.reinsert_count,
            updates.join(", ")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeltaBlockHeader {
    pub delta_type: DeltaType,
    pub stats: DeltaStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeltaKey {
    pub row_idx: u64,
    pub timestamp: u64,
}

impl fmt::Display for DeltaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(row {} @ ts {})", self.row_idx, self.timestamp)
    }
}

/// One collected record. `cell` lives in the scratch region it was collected
/// into and is only readable until that region is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaKeyAndUpdate {
    pub key: DeltaKey,
    pub cell: ScratchSlice,
}

/// Cursor over delta records, driven in row windows.
pub trait DeltaIterator {
    fn seek_to_ordinal(&mut self, ordinal: u64) -> Result<(), ToolError>;

    /// Selects rows `[current, current + nrows)` for the next collect and
    /// moves the current position past them.
    fn prepare_batch(&mut self, nrows: usize) -> Result<(), ToolError>;

    /// Relevant records of the prepared window, in storage order.
    fn collect_deltas(
        &mut self,
        scratch: &mut ScratchRegion,
    ) -> Result<Vec<DeltaKeyAndUpdate>, ToolError>;
}

#[derive(Debug)]
pub struct DeltaFileReader {
    block: ReadableBlock,
    header: DeltaBlockHeader,
}

impl DeltaFileReader {
    /// Opens a delta block, checking it holds `expected` records.
    pub fn open(store: &BlockStore, id: BlockId, expected: DeltaType) -> Result<Self, ToolError> {
        let block = store.open(id, DELTA_BLOCK_MAGIC)?;
        let header: DeltaBlockHeader = block.decode_header()?;
        if header.delta_type != expected {
            return Err(ToolError::decode(
                format!("delta block {id}"),
                format!("expected {expected} block, found {}", header.delta_type),
            ));
        }
        Ok(Self { block, header })
    }

    pub fn id(&self) -> BlockId {
        self.block.id()
    }

    pub fn delta_type(&self) -> DeltaType {
        self.header.delta_type
    }

    pub fn stats(&self) -> &DeltaStats {
        &self.header.stats
    }

    /// Iterator over the records relevant to `snapshot`, or `None` when the
    /// block statistics show there are none.
    pub fn new_iterator<'a>(
        &'a self,
        schema: &'a TableSchema,
        snapshot: MvccSnapshot,
    ) -> Result<Option<DeltaFileIterator<'a>>, ToolError> {
        let stats = &self.header.stats;
        if stats.num_records == 0 {
            return Ok(None);
        }
        let include_committed = self.header.delta_type.relevant_when_committed();
        let any_relevant = if include_committed {
            snapshot.is_committed(stats.min_timestamp)
        } else {
            !snapshot.is_committed(stats.max_timestamp)
        };
        if !any_relevant {
            return Ok(None);
        }
        Ok(Some(DeltaFileIterator {
            block_id: self.block.id(),
            schema,
            snapshot,
            include_committed,
            payload: self.block.payload(),
            reader: FrameReader::new(Cursor::new(self.block.payload())),
            pending: None,
            last_key: None,
            current: 0,
            window: 0..0,
        }))
    }
}

pub struct DeltaFileIterator<'a> {
    block_id: BlockId,
    schema: &'a TableSchema,
    snapshot: MvccSnapshot,
    include_committed: bool,
    payload: &'a [u8],
    reader: FrameReader<Cursor<&'a [u8]>>,
    pending: Option<Frame>,
    last_key: Option<DeltaKey>,
    current: u64,
    window: std::ops::Range<u64>,
}

impl DeltaFileIterator<'_> {
    fn location(&self, row: u64) -> String {
        format!("delta block {} row {row}", self.block_id)
    }

    /// Next frame in storage order, checked for ordering.
    fn peek(&mut self) -> Result<Option<&Frame>, ToolError> {
        if self.pending.is_none() {
            let location = match self.last_key {
                Some(key) => format!(
                    "delta block {} record after row {}",
                    self.block_id, key.row_idx
                ),
                None => format!("delta block {} first record", self.block_id),
            };
            let Some(frame) = self
                .reader
                .next_frame()
                .map_err(|e| frame_error(&location, e))?
            else {
                return Ok(None);
            };
            let key = DeltaKey {
                row_idx: frame.ordinal,
                timestamp: frame.timestamp,
            };
            if let Some(last) = self.last_key {
                if key < last {
                    return Err(ToolError::decode(
                        self.location(key.row_idx),
                        format!("record {key} stored after {last}"),
                    ));
                }
            }
            self.last_key = Some(key);
            self.pending = Some(frame);
        }
        Ok(self.pending.as_ref())
    }
}

impl DeltaIterator for DeltaFileIterator<'_> {
    fn seek_to_ordinal(&mut self, ordinal: u64) -> Result<(), ToolError> {
        self.reader = FrameReader::new(Cursor::new(self.payload));
        self.pending = None;
        self.last_key = None;
        while let Some(next) = self.peek()?.map(|f| f.ordinal) {
            if next >= ordinal {
                break;
            }
            self.pending = None;
        }
        self.current = ordinal;
        self.window = ordinal..ordinal;
        Ok(())
    }

    fn prepare_batch(&mut self, nrows: usize) -> Result<(), ToolError> {
        let end = self.current.saturating_add(nrows as u64);
        self.window = self.current..end;
        self.current = end;
        Ok(())
    }

    fn collect_deltas(
        &mut self,
        scratch: &mut ScratchRegion,
    ) -> Result<Vec<DeltaKeyAndUpdate>, ToolError> {
        let mut out = Vec::new();
        loop {
            let Some(next) = self.peek()?.map(|f| f.ordinal) else {
                break;
            };
            if next >= self.window.end {
                break;
            }
            let Some(frame) = self.pending.take() else {
                break;
            };
            if frame.ordinal < self.window.start {
                continue;
            }
            if self.snapshot.is_committed(frame.timestamp) != self.include_committed {
                continue;
            }
            let location = self.location(frame.ordinal);
            if !matches!(
                frame.kind,
                CHANGE_KIND_UPDATE | CHANGE_KIND_DELETE | CHANGE_KIND_REINSERT
            ) {
                return Err(ToolError::decode(
                    &location,
                    format!("unknown change kind {}", frame.kind),
                ));
            }
            let change = RowChangeList::decode(&frame.payload, self.schema, &location)?;
            if change.kind() != frame.kind {
                return Err(ToolError::decode(
                    &location,
                    "change kind does not match record payload",
                ));
            }
            let cell = scratch.alloc(&frame.payload)?;
            out.push(DeltaKeyAndUpdate {
                key: DeltaKey {
                    row_idx: frame.ordinal,
                    timestamp: frame.timestamp,
                },
                cell,
            });
        }
        Ok(out)
    }
}

/// Builds a delta block from unsorted records.
pub struct DeltaBlockWriter {
    delta_type: DeltaType,
    records: Vec<(DeltaKey, RowChangeList)>,
}

impl DeltaBlockWriter {
    pub fn new(delta_type: DeltaType) -> Self {
        Self {
            delta_type,
            records: Vec::new(),
        }
    }

    pub fn add(&mut self, row_idx: u64, timestamp: u64, change: RowChangeList) {
        self.records
            .push((DeltaKey { row_idx, timestamp }, change));
    }

    pub fn finish(mut self, store: &BlockStore, id: BlockId) -> Result<DeltaBlockHeader, ToolError> {
        self.records.sort_by_key(|(key, _)| *key);
        let mut stats = DeltaStats::default();
        let mut writer = FrameWriter::new(Vec::new());
        for (key, change) in &self.records {
            stats.record(key.timestamp, change);
            writer
                .append(key.row_idx, key.timestamp, change.kind(), &change.encode()?)
                .map_err(|e| ToolError::Encode(format!("block {id} record {key}: {e}")))?;
        }
        let header = DeltaBlockHeader {
            delta_type: self.delta_type,
            stats,
        };
        store.create(id, DELTA_BLOCK_MAGIC, &header, &writer.into_inner())?;
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::{DeltaBlockWriter, DeltaFileReader, DeltaIterator, DeltaType, MvccSnapshot};
    use crate::block::changelist::RowChangeList;
    use crate::block::{BlockId, BlockStore};
    use crate::catalog::schema::{ColumnDef, ColumnId, TableSchema};
    use crate::catalog::types::{ColumnType, Value};
    use crate::error::ToolErrorCode;
    use crate::layout::FsLayout;
    use crate::scratch::ScratchRegion;
    use tempfile::tempdir;

    fn schema() -> TableSchema {
        TableSchema::new(
            vec![
                ColumnDef {
                    id: ColumnId(0),
                    name: "key".into(),
                    col_type: ColumnType::Integer,
                    nullable: false,
                },
                ColumnDef {
                    id: ColumnId(1),
                    name: "val".into(),
                    col_type: ColumnType::Text,
                    nullable: true,
                },
            ],
            1,
        )
    }

    fn set_val(s: &str) -> RowChangeList {
        RowChangeList::Update(vec![(ColumnId(1), Value::Text(s.into()))])
    }

    fn store(dir: &std::path::Path) -> BlockStore {
        let (layout, _) = FsLayout::create(dir).expect("layout");
        BlockStore::new(&layout)
    }

    #[test]
    fn snapshots_decide_committed_timestamps() {
        assert!(MvccSnapshot::IncludingAll.is_committed(5));
        assert!(!MvccSnapshot::IncludingNone.is_committed(5));
        assert!(MvccSnapshot::CommittedBefore(6).is_committed(5));
        assert!(!MvccSnapshot::CommittedBefore(5).is_committed(5));
    }

    #[test]
    fn writer_sorts_records_and_computes_stats() {
        let dir = tempdir().expect("temp");
        let store = store(dir.path());
        let mut writer = DeltaBlockWriter::new(DeltaType::Redo);
        writer.add(4, 20, RowChangeList::Delete);
        writer.add(1, 10, set_val("a"));
        writer.add(1, 5, set_val("b"));
        let header = writer.finish(&store, BlockId(1)).expect("finish");
        assert_eq!(header.stats.num_records, 3);
        assert_eq!(header.stats.min_timestamp, 5);
        assert_eq!(header.stats.max_timestamp, 20);
        assert_eq!(header.stats.delete_count, 1);
        assert_eq!(header.stats.update_counts.get(&ColumnId(1)), Some(&2));

        let reader = DeltaFileReader::open(&store, BlockId(1), DeltaType::Redo).expect("open");
        let schema = schema();
        let mut iter = reader
            .new_iterator(&schema, MvccSnapshot::IncludingAll)
            .expect("iter")
            .expect("relevant");
        iter.seek_to_ordinal(0).expect("seek");
        iter.prepare_batch(10).expect("prepare");
        let mut scratch = ScratchRegion::new();
        let deltas = iter.collect_deltas(&mut scratch).expect("collect");
        let keys: Vec<(u64, u64)> = deltas
            .iter()
            .map(|d| (d.key.row_idx, d.key.timestamp))
            .collect();
        assert_eq!(keys, vec![(1, 5), (1, 10), (4, 20)]);
    }

    #[test]
    fn windows_split_records_by_row() {
        let dir = tempdir().expect("temp");
        let store = store(dir.path());
        let mut writer = DeltaBlockWriter::new(DeltaType::Redo);
        for row in [0, 2, 3, 5, 9] {
            writer.add(row, 1, set_val("x"));
        }
        writer.finish(&store, BlockId(2)).expect("finish");
        let reader = DeltaFileReader::open(&store, BlockId(2), DeltaType::Redo).expect("open");
        let schema = schema();
        let mut iter = reader
            .new_iterator(&schema, MvccSnapshot::IncludingAll)
            .expect("iter")
            .expect("relevant");
        iter.seek_to_ordinal(0).expect("seek");
        let mut scratch = ScratchRegion::new();
        let mut per_window = Vec::new();
        for _ in 0..3 {
            scratch.reset();
            iter.prepare_batch(4).expect("prepare");
            let rows: Vec<u64> = iter
                .collect_deltas(&mut scratch)
                .expect("collect")
                .iter()
                .map(|d| d.key.row_idx)
                .collect();
            per_window.push(rows);
        }
        assert_eq!(per_window, vec![vec![0, 2, 3], vec![5], vec![9]]);
    }

    #[test]
    fn undo_block_under_all_committed_snapshot_is_empty() {
        let dir = tempdir().expect("temp");
        let store = store(dir.path());
        let mut writer = DeltaBlockWriter::new(DeltaType::Undo);
        writer.add(0, 3, set_val("old"));
        writer.finish(&store, BlockId(3)).expect("finish");
        let reader = DeltaFileReader::open(&store, BlockId(3), DeltaType::Undo).expect("open");
        let schema = schema();
        assert!(
            reader
                .new_iterator(&schema, MvccSnapshot::IncludingAll)
                .expect("iter")
                .is_none()
        );
        assert!(
            reader
                .new_iterator(&schema, DeltaType::Undo.dump_snapshot())
                .expect("iter")
                .is_some()
        );
    }

    #[test]
    fn empty_block_has_no_iterator_and_wrong_type_is_rejected() {
        let dir = tempdir().expect("temp");
        let store = store(dir.path());
        DeltaBlockWriter::new(DeltaType::Redo)
            .finish(&store, BlockId(4))
            .expect("finish");
        let reader = DeltaFileReader::open(&store, BlockId(4), DeltaType::Redo).expect("open");
        let schema = schema();
        assert!(
            reader
                .new_iterator(&schema, MvccSnapshot::IncludingAll)
                .expect("iter")
                .is_none()
        );
        let err = DeltaFileReader::open(&store, BlockId(4), DeltaType::Undo).expect_err("type");
        assert_eq!(err.code(), ToolErrorCode::Decode);
    }

    #[test]
    fn malformed_payload_names_the_row() {
        let dir = tempdir().expect("temp");
        let store = store(dir.path());
        let mut writer = DeltaBlockWriter::new(DeltaType::Redo);
        writer.add(7, 1, RowChangeList::Update(vec![(ColumnId(42), Value::Integer(1))]));
        writer.finish(&store, BlockId(5)).expect("finish");
        let reader = DeltaFileReader::open(&store, BlockId(5), DeltaType::Redo).expect("open");
        let schema = schema();
        let mut iter = reader
            .new_iterator(&schema, MvccSnapshot::IncludingAll)
            .expect("iter")
            .expect("relevant");
        iter.seek_to_ordinal(0).expect("seek");
        iter.prepare_batch(100).expect("prepare");
        let err = iter
            .collect_deltas(&mut ScratchRegion::new())
            .expect_err("decode");
        assert_eq!(err.code(), ToolErrorCode::Decode);
        assert!(err.to_string().contains("row 7"), "{err}");
    }

    #[test]
    fn corrupt_frame_is_located_after_the_last_good_row() {
        let dir = tempdir().expect("temp");
        let (layout, _) = FsLayout::create(dir.path()).expect("layout");
        let store = BlockStore::new(&layout);
        let flip_last_byte = |id: BlockId| {
            let path = layout.block_path(id);
            let mut bytes = std::fs::read(&path).expect("read");
            let last = bytes.len() - 1;
            bytes[last] ^= 0xFF;
            std::fs::write(&path, bytes).expect("write");
        };
        let schema = schema();

        let mut writer = DeltaBlockWriter::new(DeltaType::Redo);
        writer.add(2, 1, RowChangeList::Delete);
        writer.add(4, 2, set_val("late"));
        writer.finish(&store, BlockId(6)).expect("finish");
        flip_last_byte(BlockId(6));
        let reader = DeltaFileReader::open(&store, BlockId(6), DeltaType::Redo).expect("open");
        let mut iter = reader
            .new_iterator(&schema, MvccSnapshot::IncludingAll)
            .expect("iter")
            .expect("relevant");
        iter.seek_to_ordinal(0).expect("seek");
        iter.prepare_batch(100).expect("prepare");
        let err = iter
            .collect_deltas(&mut ScratchRegion::new())
            .expect_err("corrupt");
        assert_eq!(err.code(), ToolErrorCode::Decode);
        let message = err.to_string();
        assert!(
            message.contains("delta block 0000000000000006 record after row 2"),
            "{message}"
        );
        assert!(!message.contains("block 0000000000000006 row 2"), "{message}");

        let mut writer = DeltaBlockWriter::new(DeltaType::Redo);
        writer.add(9, 1, RowChangeList::Delete);
        writer.finish(&store, BlockId(7)).expect("finish");
        flip_last_byte(BlockId(7));
        let reader = DeltaFileReader::open(&store, BlockId(7), DeltaType::Redo).expect("open");
        let mut iter = reader
            .new_iterator(&schema, MvccSnapshot::IncludingAll)
            .expect("iter")
            .expect("relevant");
        let err = iter.seek_to_ordinal(0).expect_err("corrupt");
        assert!(err.to_string().contains("delta block 0000000000000007 first record"), "{err}");
    }
}
