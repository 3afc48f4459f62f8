use crate::block::BlockId;
use crate::config::ToolConfig;
use crate::error::{ResourceType, ToolError};
use crate::metadata::atomic::write_file_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const INSTANCE_FILE: &str = "instance";
pub const REPLICA_META_DIR: &str = "replica-meta";
pub const CONSENSUS_META_DIR: &str = "consensus-meta";
pub const DATA_DIR: &str = "data";
pub const WAL_DIR: &str = "wals";

const INSTANCE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceMetadata {
    pub uuid: String,
    pub format_version: u32,
}

/// Deterministic mapping from identifiers to paths under a node's roots.
#[derive(Debug, Clone)]
pub struct FsLayout {
    data_root: PathBuf,
    wal_root: PathBuf,
}

impl FsLayout {
    pub fn new(data_root: impl Into<PathBuf>, wal_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            wal_root: wal_root.into(),
        }
    }

    pub fn from_config(config: &ToolConfig) -> Self {
        Self::new(config.data_root.clone(), config.effective_wal_root())
    }

    /// Initializes an empty layout with a fresh instance uuid.
    pub fn create(root: &Path) -> Result<(Self, InstanceMetadata), ToolError> {
        let layout = Self::new(root, root);
        if layout.instance_path().exists() {
            return Err(ToolError::PreconditionFailed(format!(
                "instance file already exists: {}",
                layout.instance_path().display()
            )));
        }
        for dir in [
            layout.replica_meta_dir(),
            layout.consensus_meta_dir(),
            layout.data_dir(),
            layout.wal_root.join(WAL_DIR),
        ] {
            fs::create_dir_all(&dir).map_err(|e| ToolError::io_at(dir.display().to_string(), e))?;
        }
        let instance = InstanceMetadata {
            uuid: uuid::Uuid::new_v4().simple().to_string(),
            format_version: INSTANCE_FORMAT_VERSION,
        };
        let bytes =
            serde_json::to_vec_pretty(&instance).map_err(|e| ToolError::Encode(e.to_string()))?;
        write_file_atomic(&layout.instance_path(), &bytes)?;
        Ok((layout, instance))
    }

    /// Opens the layout read-only by loading its instance file.
    pub fn open(config: &ToolConfig) -> Result<(Self, InstanceMetadata), ToolError> {
        let layout = Self::from_config(config);
        let instance = layout.load_instance()?;
        Ok((layout, instance))
    }

    pub fn load_instance(&self) -> Result<InstanceMetadata, ToolError> {
        let path = self.instance_path();
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::not_found(ResourceType::Instance, path.display().to_string())
            } else {
                ToolError::io_at(path.display().to_string(), e)
            }
        })?;
        let instance: InstanceMetadata = serde_json::from_slice(&bytes)
            .map_err(|e| ToolError::decode(path.display().to_string(), e))?;
        if instance.format_version != INSTANCE_FORMAT_VERSION {
            return Err(ToolError::decode(
                path.display().to_string(),
                format!("unsupported instance format version {}", instance.format_version),
            ));
        }
        Ok(instance)
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn wal_root(&self) -> &Path {
        &self.wal_root
    }

    pub fn instance_path(&self) -> PathBuf {
        self.data_root.join(INSTANCE_FILE)
    }

    pub fn replica_meta_dir(&self) -> PathBuf {
        self.data_root.join(REPLICA_META_DIR)
    }

    pub fn consensus_meta_dir(&self) -> PathBuf {
        self.data_root.join(CONSENSUS_META_DIR)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_root.join(DATA_DIR)
    }

    pub fn replica_metadata_path(&self, replica_id: &str) -> Result<PathBuf, ToolError> {
        validate_replica_id(replica_id)?;
        Ok(self.replica_meta_dir().join(replica_id))
    }

    pub fn consensus_metadata_path(&self, replica_id: &str) -> Result<PathBuf, ToolError> {
        validate_replica_id(replica_id)?;
        Ok(self.consensus_meta_dir().join(replica_id))
    }

    pub fn block_path(&self, block_id: BlockId) -> PathBuf {
        self.data_dir().join(block_id.filename())
    }

    pub fn replica_wal_dir(&self, replica_id: &str) -> Result<PathBuf, ToolError> {
        validate_replica_id(replica_id)?;
        Ok(self.wal_root.join(WAL_DIR).join(replica_id))
    }

    /// Replica identifiers with a metadata file, in lexical order.
    pub fn list_replica_ids(&self) -> Result<Vec<String>, ToolError> {
        let dir = self.replica_meta_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ToolError::io_at(dir.display().to_string(), e)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ToolError::io_at(dir.display().to_string(), e))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // Temp files left behind by an interrupted atomic write.
            if name.starts_with('.') || validate_replica_id(&name).is_err() {
                continue;
            }
            ids.push(name);
        }
        ids.sort();
        Ok(ids)
    }
}

pub fn validate_replica_id(replica_id: &str) -> Result<(), ToolError> {
    if replica_id.is_empty() {
        return Err(ToolError::InvalidArgument(
            "replica id must not be empty".into(),
        ));
    }
    if replica_id == "." || replica_id == ".." || replica_id.contains(['/', '\\']) {
        return Err(ToolError::InvalidArgument(format!(
            "replica id '{replica_id}' must not contain path components"
        )));
    }
    Ok(())
}
