use crate::block::column::ColumnBlockReader;
use crate::block::{BlockStore, RowCursor};
use crate::error::ToolError;
use crate::metadata::RowGroupMetadata;

/// Row positions of a row group, taken from its column block headers.
///
/// Opening reads headers only, so walking a row group's deltas never decodes
/// base values.
#[derive(Debug, Clone)]
pub struct RowGroupCursor {
    num_rows: u64,
    position: u64,
    prepared: u64,
}

impl RowGroupCursor {
    pub fn open(store: &BlockStore, row_group: &RowGroupMetadata) -> Result<Self, ToolError> {
        let mut num_rows: Option<u64> = None;
        for (column, block_id) in &row_group.columns {
            let reader = ColumnBlockReader::open(store, *block_id)?;
            let rows = reader.num_rows();
            match num_rows {
                None => num_rows = Some(rows),
                Some(expected) if expected != rows => {
                    return Err(ToolError::decode(
                        format!("row group {} column {column}", row_group.id),
                        format!("block {block_id} has {rows} rows, expected {expected}"),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(Self::with_rows(num_rows.unwrap_or(0)))
    }

    pub fn with_rows(num_rows: u64) -> Self {
        Self {
            num_rows,
            position: 0,
            prepared: 0,
        }
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }
}

impl RowCursor for RowGroupCursor {
    fn seek_to_start(&mut self) -> Result<(), ToolError> {
        self.position = 0;
        self.prepared = 0;
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.position < self.num_rows
    }

    fn prepare_batch(&mut self, requested: usize) -> Result<usize, ToolError> {
        self.prepared = (requested as u64).min(self.num_rows - self.position);
        Ok(self.prepared as usize)
    }

    fn finish_batch(&mut self) -> Result<(), ToolError> {
        self.position += self.prepared;
        self.prepared = 0;
        Ok(())
    }
}
