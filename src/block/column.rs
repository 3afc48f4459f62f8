use crate::block::{BlockId, BlockStore, ReadableBlock, RowCursor, frame_error};
use crate::catalog::schema::{ColumnDef, ColumnId};
use crate::catalog::types::{ColumnType, Value};
use crate::error::ToolError;
use crate::wal::frame::{FrameReader, FrameWriter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io::Cursor;

pub const COLUMN_BLOCK_MAGIC: &[u8; 8] = b"RTCOLBK1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnBlockHeader {
    pub column_id: ColumnId,
    pub col_type: ColumnType,
    pub nullable: bool,
    pub num_values: u64,
    pub null_count: u64,
    pub distinct_values: u64,
}

impl fmt::Display for ColumnBlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "column_id: {} type: {} nullable: {} num_values: {} null_count: {} distinct_values: {}",
            self.column_id,
            self.col_type,
            self.nullable,
            self.num_values,
            self.null_count,
            self.distinct_values
        )
    }
}

/// An opened column block. Only the header is decoded on open.
#[derive(Debug)]
pub struct ColumnBlockReader {
    block: ReadableBlock,
    header: ColumnBlockHeader,
}

impl ColumnBlockReader {
    pub fn open(store: &BlockStore, id: BlockId) -> Result<Self, ToolError> {
        let block = store.open(id, COLUMN_BLOCK_MAGIC)?;
        let header: ColumnBlockHeader = block.decode_header()?;
        Ok(Self { block, header })
    }

    pub fn id(&self) -> BlockId {
        self.block.id()
    }

    pub fn header(&self) -> &ColumnBlockHeader {
        &self.header
    }

    pub fn num_rows(&self) -> u64 {
        self.header.num_values
    }

    pub fn new_cursor(&self) -> ColumnCursor<'_> {
        ColumnCursor {
            block_id: self.block.id(),
            header: &self.header,
            payload: self.block.payload(),
            reader: FrameReader::new(Cursor::new(self.block.payload())),
            position: 0,
            batch: Vec::new(),
        }
    }
}

/// Decodes values of one column block a batch at a time.
pub struct ColumnCursor<'a> {
    block_id: BlockId,
    header: &'a ColumnBlockHeader,
    payload: &'a [u8],
    reader: FrameReader<Cursor<&'a [u8]>>,
    position: u64,
    batch: Vec<Value>,
}

impl<'a> ColumnCursor<'a> {
    /// Row index of the first value in the current batch.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn batch_values(&self) -> &[Value] {
        &self.batch
    }

    fn read_value(&mut self, row: u64) -> Result<Value, ToolError> {
        let location = format!("column block {} row {row}", self.block_id);
        let frame = self
            .reader
            .next_frame()
            .map_err(|e| frame_error(&location, e))?
            .ok_or_else(|| ToolError::decode(&location, "block ended before num_values rows"))?;
        if frame.ordinal != row {
            return Err(ToolError::decode(
                &location,
                format!("found value for row {}", frame.ordinal),
            ));
        }
        let value: Value =
            rmp_serde::from_slice(&frame.payload).map_err(|e| ToolError::decode(&location, e))?;
        if !value.fits(self.header.col_type, self.header.nullable) {
            return Err(ToolError::decode(
                &location,
                format!("value {value} does not fit type {}", self.header.col_type),
            ));
        }
        Ok(value)
    }
}

impl RowCursor for ColumnCursor<'_> {
    fn seek_to_start(&mut self) -> Result<(), ToolError> {
        self.reader = FrameReader::new(Cursor::new(self.payload));
        self.position = 0;
        self.batch.clear();
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.position < self.header.num_values
    }

    fn prepare_batch(&mut self, requested: usize) -> Result<usize, ToolError> {
        self.batch.clear();
        let remaining = self.header.num_values - self.position;
        let n = (requested as u64).min(remaining);
        for i in 0..n {
            let value = self.read_value(self.position + i)?;
            self.batch.push(value);
        }
        Ok(self.batch.len())
    }

    fn finish_batch(&mut self) -> Result<(), ToolError> {
        self.position += self.batch.len() as u64;
        self.batch.clear();
        Ok(())
    }
}

/// Builds a column block in memory and writes it in one go.
pub struct ColumnBlockWriter {
    column: ColumnDef,
    values: Vec<Value>,
}

impl ColumnBlockWriter {
    pub fn new(column: ColumnDef) -> Self {
        Self {
            column,
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, value: Value) -> Result<(), ToolError> {
        if !value.fits(self.column.col_type, self.column.nullable) {
            return Err(ToolError::InvalidArgument(format!(
                "value {value} does not fit column {}",
                self.column
            )));
        }
        self.values.push(value);
        Ok(())
    }

    pub fn finish(self, store: &BlockStore, id: BlockId) -> Result<ColumnBlockHeader, ToolError> {
        let null_count = self.values.iter().filter(|v| v.is_null()).count() as u64;
        let distinct_values = self
            .values
            .iter()
            .filter(|v| !v.is_null())
            .collect::<BTreeSet<_>>()
            .len() as u64;
        let header = ColumnBlockHeader {
            column_id: self.column.id,
            col_type: self.column.col_type,
            nullable: self.column.nullable,
            num_values: self.values.len() as u64,
            null_count,
            distinct_values,
        };
        let mut writer = FrameWriter::new(Vec::new());
        for (row, value) in self.values.iter().enumerate() {
            let payload = rmp_serde::to_vec(value).map_err(|e| ToolError::Encode(e.to_string()))?;
            writer
                .append(row as u64, 0, 0, &payload)
                .map_err(|e| ToolError::Encode(format!("block {id} row {row}: {e}")))?;
        }
        store.create(id, COLUMN_BLOCK_MAGIC, &header, &writer.into_inner())?;
        Ok(header)
    }
}
