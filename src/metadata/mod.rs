pub mod atomic;

use crate::block::BlockId;
use crate::catalog::schema::{ColumnId, TableSchema};
use crate::error::{ResourceType, ToolError};
use crate::layout::FsLayout;
use atomic::write_file_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;

/// Key range owned by a replica. Keys are hex encoded; an empty key is
/// unbounded on that side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionInfo {
    #[serde(default)]
    pub start_key: String,
    #[serde(default)]
    pub end_key: String,
}

impl fmt::Display for PartitionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = if self.start_key.is_empty() {
            "<start>"
        } else {
            self.start_key.as_str()
        };
        let end = if self.end_key.is_empty() {
            "<end>"
        } else {
            self.end_key.as_str()
        };
        write!(f, "[{start}, {end})")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DataState {
    #[default]
    Ready,
    Copying,
    Tombstoned,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowGroupMetadata {
    pub id: u64,
    #[serde(default)]
    pub last_durable_redo_timestamp: u64,
    pub columns: BTreeMap<ColumnId, BlockId>,
    #[serde(default)]
    pub undo_delta_blocks: Vec<BlockId>,
    #[serde(default)]
    pub redo_delta_blocks: Vec<BlockId>,
}

impl RowGroupMetadata {
    pub fn column_block(&self, column: ColumnId) -> Option<BlockId> {
        self.columns.get(&column).copied()
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.columns
            .values()
            .chain(&self.undo_delta_blocks)
            .chain(&self.redo_delta_blocks)
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaMetadata {
    pub replica_id: String,
    pub table_id: String,
    pub table_name: String,
    pub schema_version: u32,
    pub schema: TableSchema,
    #[serde(default)]
    pub partition: PartitionInfo,
    #[serde(default)]
    pub data_state: DataState,
    #[serde(default)]
    pub row_groups: Vec<RowGroupMetadata>,
}

impl ReplicaMetadata {
    pub fn load(layout: &FsLayout, replica_id: &str) -> Result<Self, ToolError> {
        let path = layout.replica_metadata_path(replica_id)?;
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::not_found(ResourceType::Replica, replica_id)
            } else {
                ToolError::io_at(format!("replica {replica_id} metadata"), e)
            }
        })?;
        let meta: ReplicaMetadata = Self::from_json(&bytes, replica_id)?;
        if meta.replica_id != replica_id {
            return Err(ToolError::decode(
                path.display().to_string(),
                format!("metadata belongs to replica {}", meta.replica_id),
            ));
        }
        Ok(meta)
    }

    pub fn from_json(bytes: &[u8], replica_id: &str) -> Result<Self, ToolError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ToolError::decode(format!("replica {replica_id} metadata"), e))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ToolError> {
        serde_json::to_vec_pretty(self).map_err(|e| ToolError::Encode(e.to_string()))
    }

    pub fn store(&self, layout: &FsLayout) -> Result<(), ToolError> {
        let path = layout.replica_metadata_path(&self.replica_id)?;
        write_file_atomic(&path, &self.to_json()?)
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.row_groups.iter().flat_map(|rg| rg.block_ids()).collect()
    }
}
