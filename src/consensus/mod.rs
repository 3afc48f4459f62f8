//! Per-replica consensus metadata: the current term, the last vote and the
//! committed peer configuration.

pub mod rewrite;

use crate::error::{ResourceType, ToolError};
use crate::hostport::HostPort;
use crate::layout::FsLayout;
use crate::metadata::atomic::write_file_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberType {
    Voter,
    NonVoter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaftPeer {
    pub permanent_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_addr: Option<HostPort>,
    pub member_type: MemberType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaftConfig {
    /// Log index at which this configuration was committed, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opid_index: Option<u64>,
    pub peers: Vec<RaftPeer>,
}

impl RaftConfig {
    pub fn peer_uuids(&self) -> Vec<&str> {
        self.peers.iter().map(|p| p.permanent_uuid.as_str()).collect()
    }

    pub fn contains_peer(&self, uuid: &str) -> bool {
        self.peers.iter().any(|p| p.permanent_uuid == uuid)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsensusState {
    pub current_term: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voted_for: Option<String>,
    pub committed_config: RaftConfig,
}

/// A replica's consensus metadata file, loaded into memory.
///
/// Changes are only visible on disk after [`ConsensusMetadata::flush`].
#[derive(Debug)]
pub struct ConsensusMetadata {
    path: PathBuf,
    replica_id: String,
    peer_uuid: String,
    state: ConsensusState,
}

impl ConsensusMetadata {
    /// Writes a new metadata file. Fails if one already exists.
    pub fn create(
        layout: &FsLayout,
        replica_id: &str,
        peer_uuid: &str,
        state: ConsensusState,
    ) -> Result<Self, ToolError> {
        let path = layout.consensus_metadata_path(replica_id)?;
        if path.exists() {
            return Err(ToolError::PreconditionFailed(format!(
                "consensus metadata for replica {replica_id} already exists"
            )));
        }
        let cmeta = Self {
            path,
            replica_id: replica_id.to_string(),
            peer_uuid: peer_uuid.to_string(),
            state,
        };
        cmeta.flush()?;
        Ok(cmeta)
    }

    /// Loads the metadata of `replica_id` as seen by the local peer `peer_uuid`.
    pub fn load(layout: &FsLayout, replica_id: &str, peer_uuid: &str) -> Result<Self, ToolError> {
        let path = layout.consensus_metadata_path(replica_id)?;
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::not_found(ResourceType::ConsensusMetadata, replica_id)
            } else {
                ToolError::io_at(format!("replica {replica_id} consensus metadata"), e)
            }
        })?;
        let state: ConsensusState = serde_json::from_slice(&bytes).map_err(|e| {
            ToolError::decode(format!("replica {replica_id} consensus metadata"), e)
        })?;
        Ok(Self {
            path,
            replica_id: replica_id.to_string(),
            peer_uuid: peer_uuid.to_string(),
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn peer_uuid(&self) -> &str {
        &self.peer_uuid
    }

    pub fn current_term(&self) -> u64 {
        self.state.current_term
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.state.voted_for.as_deref()
    }

    pub fn committed_config(&self) -> &RaftConfig {
        &self.state.committed_config
    }

    pub fn set_committed_config(&mut self, config: RaftConfig) {
        self.state.committed_config = config;
    }

    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    /// Atomically replaces the file on disk with the in-memory state.
    pub fn flush(&self) -> Result<(), ToolError> {
        let bytes =
            serde_json::to_vec_pretty(&self.state).map_err(|e| ToolError::Encode(e.to_string()))?;
        write_file_atomic(&self.path, &bytes)?;
        info!(
            replica = %self.replica_id,
            term = self.state.current_term,
            peers = self.state.committed_config.peers.len(),
            "flushed consensus metadata"
        );
        Ok(())
    }
}
