//! TCP implementation of [`CopyClient`].
//!
//! Files are staged in a hidden temporary directory under the data root and
//! only moved into place by [`CopyClient::finish`]. Until then a failed or
//! abandoned copy leaves the local node untouched.

use crate::copy::protocol::{
    CHUNK_BYTES, COPY_IO_TIMEOUT, CopyManifest, CopyRequest, CopyResponse, FileEntry, FileKind,
    KIND_REQUEST, KIND_RESPONSE, read_message, write_message,
};
use crate::copy::{CopyClient, CopyStats};
use crate::error::ToolError;
use crate::hostport::HostPort;
use crate::layout::FsLayout;
use crate::metadata::ReplicaMetadata;
use crate::metadata::atomic::{copy_file_exclusive, fsync_dir, write_file_atomic};
use crate::wal::segment::segment_filename;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

fn block_on<F, T>(rt: &Runtime, f: F) -> T
where
    F: Future<Output = T>,
{
    match Handle::try_current() {
        Ok(_) => tokio::task::block_in_place(|| rt.block_on(f)),
        Err(_) => rt.block_on(f),
    }
}

struct Connection {
    stream: TcpStream,
    next_seq: u64,
}

impl Connection {
    async fn round_trip(&mut self, request: &CopyRequest) -> Result<CopyResponse, ToolError> {
        self.next_seq += 1;
        tokio::time::timeout(
            COPY_IO_TIMEOUT,
            write_message(&mut self.stream, self.next_seq, KIND_REQUEST, request),
        )
        .await
        .map_err(|_| ToolError::Protocol("timed out sending request".into()))??;
        let response = tokio::time::timeout(
            COPY_IO_TIMEOUT,
            read_message::<_, CopyResponse>(&mut self.stream, KIND_RESPONSE),
        )
        .await
        .map_err(|_| ToolError::Protocol("timed out waiting for source".into()))??;
        match response {
            None => Err(ToolError::Protocol("source closed the connection".into())),
            Some((_, CopyResponse::Error { code, message })) => Err(ToolError::Protocol(
                format!("source failed with {code}: {message}"),
            )),
            Some((_, response)) => Ok(response),
        }
    }
}

struct StagedCopy {
    dir: TempDir,
    files: Vec<(FileKind, PathBuf)>,
    stats: CopyStats,
}

pub struct TcpCopyClient {
    layout: FsLayout,
    replica_id: String,
    runtime: Runtime,
    conn: Option<Connection>,
    session: Option<(String, CopyManifest)>,
    staged: Option<StagedCopy>,
}

impl TcpCopyClient {
    pub fn new(layout: FsLayout, replica_id: impl Into<String>) -> Result<Self, ToolError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            layout,
            replica_id: replica_id.into(),
            runtime,
            conn: None,
            session: None,
            staged: None,
        })
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn manifest(&self) -> Option<&CopyManifest> {
        self.session.as_ref().map(|(_, manifest)| manifest)
    }

    fn ensure_not_local(&self) -> Result<(), ToolError> {
        let meta_path = self.layout.replica_metadata_path(&self.replica_id)?;
        let cmeta_path = self.layout.consensus_metadata_path(&self.replica_id)?;
        if meta_path.exists() || cmeta_path.exists() {
            return Err(ToolError::PreconditionFailed(format!(
                "replica {} already exists locally",
                self.replica_id
            )));
        }
        Ok(())
    }

    fn fetch_file(
        &mut self,
        session_id: &str,
        entry: &FileEntry,
        staged_path: &Path,
    ) -> Result<(), ToolError> {
        let ctx = || staged_path.display().to_string();
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| ToolError::PreconditionFailed("copy is not connected".into()))?;
        let mut file = File::create(staged_path).map_err(|e| ToolError::io_at(ctx(), e))?;
        let mut hasher = Sha256::new();
        let mut offset = 0u64;
        loop {
            let request = CopyRequest::FetchChunk {
                session_id: session_id.to_string(),
                kind: entry.kind,
                offset,
                max_len: CHUNK_BYTES,
            };
            let response = block_on(&self.runtime, conn.round_trip(&request))?;
            let CopyResponse::Chunk {
                offset: chunk_offset,
                data,
                total_size,
            } = response
            else {
                return Err(ToolError::Protocol(format!(
                    "unexpected response while fetching {}",
                    entry.kind
                )));
            };
            if chunk_offset != offset || total_size != entry.size_bytes {
                return Err(ToolError::Protocol(format!(
                    "{} changed on the source during the copy",
                    entry.kind
                )));
            }
            if data.is_empty() && offset < total_size {
                return Err(ToolError::Protocol(format!(
                    "source sent an empty chunk for {} at offset {offset}",
                    entry.kind
                )));
            }
            hasher.update(&data);
            file.write_all(&data).map_err(|e| ToolError::io_at(ctx(), e))?;
            offset += data.len() as u64;
            if offset >= total_size {
                break;
            }
        }
        file.sync_all().map_err(|e| ToolError::io_at(ctx(), e))?;

        let digest = hex::encode(hasher.finalize());
        if offset != entry.size_bytes || digest != entry.sha256_hex {
            return Err(ToolError::Protocol(format!(
                "checksum mismatch for {}: expected {} got {digest}",
                entry.kind, entry.sha256_hex
            )));
        }
        debug!(file = %entry.kind, bytes = offset, "fetched");
        Ok(())
    }
}

impl CopyClient for TcpCopyClient {
    fn start(&mut self, source: &HostPort) -> Result<(), ToolError> {
        if self.session.is_some() {
            return Err(ToolError::PreconditionFailed("copy already started".into()));
        }
        self.ensure_not_local()?;

        let addr = (source.host.trim_matches(|c| c == '[' || c == ']').to_string(), source.port);
        let stream = block_on(&self.runtime, async {
            tokio::time::timeout(COPY_IO_TIMEOUT, TcpStream::connect(addr)).await
        })
        .map_err(|_| ToolError::Protocol(format!("timed out connecting to {source}")))?
        .map_err(|e| ToolError::io_at(format!("connect to {source}"), e))?;
        let mut conn = Connection {
            stream,
            next_seq: 0,
        };

        let request = CopyRequest::BeginSession {
            replica_id: self.replica_id.clone(),
        };
        let response = block_on(&self.runtime, conn.round_trip(&request))?;
        let CopyResponse::SessionStarted {
            session_id,
            manifest,
        } = response
        else {
            return Err(ToolError::Protocol(
                "unexpected response to session start".into(),
            ));
        };
        if manifest.replica_id != self.replica_id {
            return Err(ToolError::Protocol(format!(
                "source offered replica {} instead of {}",
                manifest.replica_id, self.replica_id
            )));
        }
        info!(
            replica = %self.replica_id,
            %source,
            session = %session_id,
            files = manifest.files.len(),
            "started copy"
        );
        self.conn = Some(conn);
        self.session = Some((session_id, manifest));
        Ok(())
    }

    fn fetch_all(&mut self) -> Result<CopyStats, ToolError> {
        let Some((session_id, manifest)) = self.session.clone() else {
            return Err(ToolError::PreconditionFailed("copy has not started".into()));
        };
        if self.staged.is_some() {
            return Err(ToolError::PreconditionFailed("copy already fetched".into()));
        }

        // Every block the metadata references must be shipped.
        let meta = ReplicaMetadata::from_json(&manifest.replica_metadata, &self.replica_id)?;
        let shipped: BTreeSet<FileKind> = manifest.files.iter().map(|f| f.kind).collect();
        if let Some(missing) = meta
            .block_ids()
            .into_iter()
            .find(|id| !shipped.contains(&FileKind::Block(*id)))
        {
            return Err(ToolError::Protocol(format!(
                "source manifest is missing block {missing}"
            )));
        }

        let data_root = self.layout.data_root().to_path_buf();
        fs::create_dir_all(&data_root)
            .map_err(|e| ToolError::io_at(data_root.display().to_string(), e))?;
        let dir = tempfile::Builder::new()
            .prefix(".copy-")
            .tempdir_in(&data_root)
            .map_err(|e| ToolError::io_at(data_root.display().to_string(), e))?;

        let mut files = Vec::with_capacity(manifest.files.len());
        let mut stats = CopyStats::default();
        for (i, entry) in manifest.files.iter().enumerate() {
            let staged_path = dir.path().join(format!("{i:08}"));
            self.fetch_file(&session_id, entry, &staged_path)?;
            stats.files += 1;
            stats.bytes += entry.size_bytes;
            files.push((entry.kind, staged_path));
        }
        info!(replica = %self.replica_id, files = stats.files, bytes = stats.bytes, "fetched copy");
        self.staged = Some(StagedCopy { dir, files, stats });
        Ok(stats)
    }

    fn finish(&mut self) -> Result<(), ToolError> {
        let Some((session_id, manifest)) = self.session.as_ref() else {
            return Err(ToolError::PreconditionFailed("copy has not started".into()));
        };
        let Some(staged) = self.staged.as_ref() else {
            return Err(ToolError::PreconditionFailed("copy has not been fetched".into()));
        };
        self.ensure_not_local()?;

        let data_dir = self.layout.data_dir();
        let wal_dir = self.layout.replica_wal_dir(&self.replica_id)?;
        for dir in [&data_dir, &wal_dir] {
            fs::create_dir_all(dir).map_err(|e| ToolError::io_at(dir.display().to_string(), e))?;
        }
        for (kind, staged_path) in &staged.files {
            let target = match kind {
                FileKind::Block(id) => self.layout.block_path(*id),
                FileKind::WalSegment(seq) => wal_dir.join(segment_filename(*seq)),
            };
            copy_file_exclusive(staged_path, &target)?;
        }
        fsync_dir(&data_dir)?;
        fsync_dir(&wal_dir)?;

        write_file_atomic(
            &self.layout.consensus_metadata_path(&self.replica_id)?,
            &manifest.consensus_metadata,
        )?;
        // Last: the replica only becomes visible once its metadata exists.
        write_file_atomic(
            &self.layout.replica_metadata_path(&self.replica_id)?,
            &manifest.replica_metadata,
        )?;
        info!(
            replica = %self.replica_id,
            files = staged.stats.files,
            bytes = staged.stats.bytes,
            "committed copy"
        );

        let request = CopyRequest::EndSession {
            session_id: session_id.clone(),
        };
        if let Some(conn) = self.conn.as_mut() {
            if let Err(e) = block_on(&self.runtime, conn.round_trip(&request)) {
                warn!(error = %e, "could not end copy session on the source");
            }
        }
        self.conn = None;
        if let Some(staged) = self.staged.take() {
            let path = staged.dir.path().to_path_buf();
            if let Err(e) = staged.dir.close() {
                warn!(path = %path.display(), error = %e, "could not remove staging directory");
            }
        }
        Ok(())
    }
}
