//! Serves local replicas to remote copy clients.

use crate::copy::protocol::{
    CHUNK_BYTES, CopyManifest, CopyRequest, CopyResponse, FileEntry, FileKind, KIND_REQUEST,
    KIND_RESPONSE, read_message, write_message,
};
use crate::error::{ResourceType, ToolError};
use crate::layout::FsLayout;
use crate::metadata::{DataState, ReplicaMetadata};
use crate::wal::reader::LogReader;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::future::Future;
use std::io::{Read, Seek, SeekFrom};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub struct CopyServer {
    listener: TcpListener,
    layout: Arc<FsLayout>,
}

impl CopyServer {
    pub async fn bind(addr: &str, layout: FsLayout) -> Result<Self, ToolError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ToolError::io_at(format!("listen on {addr}"), e))?;
        Ok(Self {
            listener,
            layout: Arc::new(layout),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ToolError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the process exits.
    pub async fn serve(self) -> Result<(), ToolError> {
        self.serve_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves. Connections already
    /// accepted keep running on their own tasks.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<(), ToolError>
    where
        F: Future<Output = ()>,
    {
        info!(addr = ?self.listener.local_addr().ok(), "serving replica copies");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => return Ok(()),
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    let layout = Arc::clone(&self.layout);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &layout).await {
                            warn!(%peer, error = %e, "copy connection failed");
                        }
                    });
                }
            }
        }
    }
}

struct ServerSession {
    id: String,
    replica_id: String,
    files: BTreeMap<FileKind, PathBuf>,
}

async fn handle_connection(mut stream: TcpStream, layout: &FsLayout) -> Result<(), ToolError> {
    let mut session: Option<ServerSession> = None;
    let mut seq = 0u64;
    while let Some((_, request)) = read_message::<_, CopyRequest>(&mut stream, KIND_REQUEST).await? {
        let response = match handle_request(layout, &mut session, request) {
            Ok(response) => response,
            Err(e) => CopyResponse::Error {
                code: e.code_str().to_string(),
                message: e.to_string(),
            },
        };
        seq += 1;
        write_message(&mut stream, seq, KIND_RESPONSE, &response).await?;
    }
    if let Some(session) = session {
        debug!(session = %session.id, replica = %session.replica_id, "client left without ending session");
    }
    Ok(())
}

fn handle_request(
    layout: &FsLayout,
    session: &mut Option<ServerSession>,
    request: CopyRequest,
) -> Result<CopyResponse, ToolError> {
    match request {
        CopyRequest::BeginSession { replica_id } => {
            if session.is_some() {
                return Err(ToolError::PreconditionFailed(
                    "a copy session is already open on this connection".into(),
                ));
            }
            let (manifest, files) = build_manifest(layout, &replica_id)?;
            let id = uuid::Uuid::new_v4().simple().to_string();
            info!(session = %id, replica = %replica_id, files = files.len(), "began copy session");
            *session = Some(ServerSession {
                id: id.clone(),
                replica_id,
                files,
            });
            Ok(CopyResponse::SessionStarted {
                session_id: id,
                manifest,
            })
        }
        CopyRequest::FetchChunk {
            session_id,
            kind,
            offset,
            max_len,
        } => {
            let open = expect_session(session, &session_id)?;
            let path = open.files.get(&kind).ok_or_else(|| {
                ToolError::InvalidArgument(format!("{kind} is not part of session {session_id}"))
            })?;
            read_chunk(path, offset, max_len.min(CHUNK_BYTES))
        }
        CopyRequest::EndSession { session_id } => {
            expect_session(session, &session_id)?;
            info!(session = %session_id, "ended copy session");
            *session = None;
            Ok(CopyResponse::SessionEnded)
        }
    }
}

fn expect_session<'a>(
    session: &'a Option<ServerSession>,
    session_id: &str,
) -> Result<&'a ServerSession, ToolError> {
    match session {
        Some(open) if open.id == session_id => Ok(open),
        _ => Err(ToolError::PreconditionFailed(format!(
            "no open copy session {session_id}"
        ))),
    }
}

fn build_manifest(
    layout: &FsLayout,
    replica_id: &str,
) -> Result<(CopyManifest, BTreeMap<FileKind, PathBuf>), ToolError> {
    let meta_path = layout.replica_metadata_path(replica_id)?;
    let replica_metadata = read_control_file(&meta_path, ResourceType::Replica, replica_id)?;
    let meta = ReplicaMetadata::from_json(&replica_metadata, replica_id)?;
    if meta.data_state != DataState::Ready {
        return Err(ToolError::PreconditionFailed(format!(
            "replica {replica_id} is {:?} and cannot be copied",
            meta.data_state
        )));
    }
    let consensus_metadata = read_control_file(
        &layout.consensus_metadata_path(replica_id)?,
        ResourceType::ConsensusMetadata,
        replica_id,
    )?;

    let mut files = BTreeMap::new();
    for block_id in meta.block_ids() {
        let path = layout.block_path(block_id);
        if !path.is_file() {
            return Err(ToolError::not_found(ResourceType::Block, block_id.to_string()));
        }
        files.insert(FileKind::Block(block_id), path);
    }
    for segment in LogReader::open(layout, replica_id)?.segments() {
        files.insert(
            FileKind::WalSegment(segment.header().segment_seq),
            segment.path().to_path_buf(),
        );
    }

    let mut entries = Vec::with_capacity(files.len());
    for (kind, path) in &files {
        let (size_bytes, sha256_hex) = checksum_file(path)?;
        entries.push(FileEntry {
            kind: *kind,
            size_bytes,
            sha256_hex,
        });
    }
    Ok((
        CopyManifest {
            replica_id: replica_id.to_string(),
            replica_metadata,
            consensus_metadata,
            files: entries,
        },
        files,
    ))
}

fn read_control_file(
    path: &Path,
    resource_type: ResourceType,
    replica_id: &str,
) -> Result<Vec<u8>, ToolError> {
    fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolError::not_found(resource_type, replica_id)
        } else {
            ToolError::io_at(path.display().to_string(), e)
        }
    })
}

pub(crate) fn checksum_file(path: &Path) -> Result<(u64, String), ToolError> {
    let ctx = || path.display().to_string();
    let mut file = File::open(path).map_err(|e| ToolError::io_at(ctx(), e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(|e| ToolError::io_at(ctx(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, hex::encode(hasher.finalize())))
}

fn read_chunk(path: &Path, offset: u64, max_len: u64) -> Result<CopyResponse, ToolError> {
    let ctx = || path.display().to_string();
    let mut file = File::open(path).map_err(|e| ToolError::io_at(ctx(), e))?;
    let total_size = file.metadata().map_err(|e| ToolError::io_at(ctx(), e))?.len();
    if offset > total_size {
        return Err(ToolError::InvalidArgument(format!(
            "offset {offset} is past the end of {} ({total_size} bytes)",
            ctx()
        )));
    }
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| ToolError::io_at(ctx(), e))?;
    let len = max_len.min(total_size - offset) as usize;
    let mut data = vec![0u8; len];
    file.read_exact(&mut data)
        .map_err(|e| ToolError::io_at(ctx(), e))?;
    Ok(CopyResponse::Chunk {
        offset,
        data,
        total_size,
    })
}

#[cfg(test)]
mod tests {
    use super::{checksum_file, read_chunk};
    use crate::copy::protocol::CopyResponse;
    use crate::error::ToolErrorCode;
    use tempfile::tempdir;

    #[test]
    fn chunks_cover_the_file_and_reject_bad_offsets() {
        let dir = tempdir().expect("temp");
        let path = dir.path().join("f");
        std::fs::write(&path, b"0123456789").expect("write");

        match read_chunk(&path, 8, 4).expect("tail") {
            CopyResponse::Chunk {
                offset,
                data,
                total_size,
            } => {
                assert_eq!(offset, 8);
                assert_eq!(data, b"89");
                assert_eq!(total_size, 10);
            }
            other => panic!("unexpected {other:?}"),
        }
        let err = read_chunk(&path, 11, 4).expect_err("past end");
        assert_eq!(err.code(), ToolErrorCode::InvalidArgument);
    }

    #[test]
    fn checksum_matches_known_digest() {
        let dir = tempdir().expect("temp");
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").expect("write");
        let (size, digest) = checksum_file(&path).expect("checksum");
        assert_eq!(size, 3);
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
