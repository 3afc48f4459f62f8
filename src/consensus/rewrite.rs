//! Manual replacement of a replica's committed peer configuration.
//!
//! The steps run strictly in order and each must succeed before the next:
//! parse every peer, back up the current file under a fresh name, load it,
//! swap in the new peer set, then flush atomically over the original path.
//! Nothing touches the disk until every peer has parsed, and the backup is
//! never overwritten, so a second run that collides with an existing backup
//! fails before anything is rewritten.

use crate::consensus::{ConsensusMetadata, MemberType, RaftConfig, RaftPeer};
use crate::error::{ResourceType, ToolError};
use crate::hostport::HostPort;
use crate::layout::FsLayout;
use crate::metadata::atomic::copy_file_exclusive;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Replica hosting the cluster's own catalog. Rewrites of any other replica
/// are not noticed by the cluster membership tracker.
pub const SYSTEM_REPLICA_ID: &str = "00000000000000000000000000000000";

pub const BACKUP_MARKER: &str = "pre_rewrite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    pub uuid: String,
    pub addr: HostPort,
}

/// Parses `uuid:host:port`. The uuid ends at the first ':'.
pub fn parse_peer_string(input: &str) -> Result<PeerSpec, ToolError> {
    let Some((uuid, hostport)) = input.split_once(':') else {
        return Err(ToolError::InvalidArgument(format!("bad peer '{input}'")));
    };
    if uuid.is_empty() {
        return Err(ToolError::InvalidArgument(format!(
            "bad peer '{input}': empty uuid"
        )));
    }
    let addr = HostPort::parse_nonzero(hostport).map_err(|e| {
        ToolError::InvalidArgument(format!("error while parsing peer '{input}': {e}"))
    })?;
    Ok(PeerSpec {
        uuid: uuid.to_string(),
        addr,
    })
}

pub fn parse_peers<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<PeerSpec>, ToolError> {
    if inputs.is_empty() {
        return Err(ToolError::InvalidArgument(
            "at least one peer is required".into(),
        ));
    }
    inputs
        .iter()
        .map(|s| parse_peer_string(s.as_ref()))
        .collect()
}

pub fn backup_path_for(cmeta_path: &Path, timestamp_micros: u64) -> PathBuf {
    let mut name = cmeta_path.as_os_str().to_os_string();
    name.push(format!(".{BACKUP_MARKER}.{timestamp_micros}"));
    PathBuf::from(name)
}

#[derive(Debug, Clone)]
pub struct RewriteReport {
    pub backup_path: PathBuf,
    pub previous_config: RaftConfig,
    pub new_config: RaftConfig,
}

pub fn rewrite_raft_config<S: AsRef<str>>(
    layout: &FsLayout,
    replica_id: &str,
    peers: &[S],
) -> Result<RewriteReport, ToolError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    rewrite_raft_config_at(layout, replica_id, peers, now)
}

/// [`rewrite_raft_config`] with the backup timestamp supplied by the caller.
pub fn rewrite_raft_config_at<S: AsRef<str>>(
    layout: &FsLayout,
    replica_id: &str,
    peers: &[S],
    timestamp_micros: u64,
) -> Result<RewriteReport, ToolError> {
    if replica_id != SYSTEM_REPLICA_ID {
        warn!(
            replica = %replica_id,
            "the cluster will not notice a rewritten config of a regular replica; a regular config change must follow"
        );
    }
    let peers = parse_peers(peers)?;
    let cmeta_path = layout.consensus_metadata_path(replica_id)?;

    let backup_path = backup_path_for(&cmeta_path, timestamp_micros);
    copy_file_exclusive(&cmeta_path, &backup_path).map_err(|e| {
        if e.is_io_kind(std::io::ErrorKind::NotFound) && !cmeta_path.exists() {
            ToolError::not_found(ResourceType::ConsensusMetadata, replica_id)
        } else {
            e
        }
    })?;
    info!(backup = %backup_path.display(), "backed up current config");

    let instance = layout.load_instance()?;
    let mut cmeta = ConsensusMetadata::load(layout, replica_id, &instance.uuid)?;
    let previous_config = cmeta.committed_config().clone();
    let new_config = RaftConfig {
        peers: peers
            .into_iter()
            .map(|p| RaftPeer {
                permanent_uuid: p.uuid,
                last_known_addr: Some(p.addr),
                member_type: MemberType::Voter,
            })
            .collect(),
        ..previous_config.clone()
    };
    cmeta.set_committed_config(new_config.clone());
    cmeta.flush()?;
    Ok(RewriteReport {
        backup_path,
        previous_config,
        new_config,
    })
}

#[cfg(test)]
mod tests {
    use super::{backup_path_for, parse_peer_string, parse_peers};
    use crate::error::ToolErrorCode;
    use crate::hostport::HostPort;
    use std::path::Path;

    #[test]
    fn uuid_ends_at_first_colon() {
        let peer = parse_peer_string("1c7f19e7:db-1:7050").expect("parse");
        assert_eq!(peer.uuid, "1c7f19e7");
        assert_eq!(peer.addr, HostPort::new("db-1", 7050));
    }

    #[test]
    fn malformed_peers_are_invalid_arguments() {
        for bad in ["badpeer", ":h:0", "a:h:0", "a::100", "a:h", "a:h:", ":h:100"] {
            let err = parse_peer_string(bad).expect_err(bad);
            assert_eq!(err.code(), ToolErrorCode::InvalidArgument, "{bad}");
        }
    }

    #[test]
    fn one_bad_peer_fails_the_whole_list() {
        assert!(parse_peers(&["a:h1:100", "b:h2:0"]).is_err());
        assert!(parse_peers::<&str>(&[]).is_err());
        assert_eq!(parse_peers(&["a:h1:100", "b:h2:200"]).expect("parse").len(), 2);
    }

    #[test]
    fn backup_name_carries_marker_and_timestamp() {
        let path = backup_path_for(Path::new("/data/consensus-meta/r1"), 1234);
        assert_eq!(path, Path::new("/data/consensus-meta/r1.pre_rewrite.1234"));
    }
}
