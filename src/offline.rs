//! Entry points behind the command-line subcommands that are not dumps of
//! row-group contents or log segments.

use crate::consensus::ConsensusMetadata;
use crate::copy::client::TcpCopyClient;
use crate::copy::server::CopyServer;
use crate::copy::{CopyStats, copy_from_remote};
use crate::dump::{SEPARATOR_LINE, indent};
use crate::error::ToolError;
use crate::hostport::HostPort;
use crate::layout::FsLayout;
use crate::metadata::ReplicaMetadata;
use std::io::Write;
use tracing::info;

/// Prints the id of every local replica, one per line. With `verbose` each
/// id is followed by its metadata, indented.
pub fn list_replicas<W: Write>(
    layout: &FsLayout,
    verbose: bool,
    out: &mut W,
) -> Result<Vec<String>, ToolError> {
    let ids = layout.list_replica_ids()?;
    for id in &ids {
        writeln!(out, "{id}")?;
        if verbose {
            let meta = ReplicaMetadata::load(layout, id)?;
            print_metadata(&meta, 2, out)?;
            writeln!(out)?;
        }
    }
    Ok(ids)
}

pub fn dump_block_ids<W: Write>(
    layout: &FsLayout,
    replica_id: &str,
    out: &mut W,
) -> Result<usize, ToolError> {
    let meta = ReplicaMetadata::load(layout, replica_id)?;
    if meta.row_groups.is_empty() {
        writeln!(out, "No row groups found for replica {replica_id}")?;
        return Ok(0);
    }
    writeln!(out, "Listing all data blocks in replica {replica_id}:")?;
    let mut count = 0;
    for (idx, row_group) in meta.row_groups.iter().enumerate() {
        writeln!(out, "Row group {idx}")?;
        writeln!(out, "{SEPARATOR_LINE}")?;
        for (column_id, block_id) in &row_group.columns {
            match meta.schema.column_by_id(*column_id) {
                Some(col) => writeln!(
                    out,
                    "Column block for column ID {column_id} ({col}): {block_id}"
                )?,
                None => writeln!(out, "Column block for column ID {column_id}: {block_id}")?,
            }
            count += 1;
        }
        for block_id in &row_group.undo_delta_blocks {
            writeln!(out, "UNDO: {block_id}")?;
            count += 1;
        }
        for block_id in &row_group.redo_delta_blocks {
            writeln!(out, "REDO: {block_id}")?;
            count += 1;
        }
        writeln!(out)?;
    }
    Ok(count)
}

pub fn dump_metadata<W: Write>(
    layout: &FsLayout,
    replica_id: &str,
    out: &mut W,
) -> Result<(), ToolError> {
    let meta = ReplicaMetadata::load(layout, replica_id)?;
    print_metadata(&meta, 0, out)
}

fn print_metadata<W: Write>(
    meta: &ReplicaMetadata,
    indent_by: usize,
    out: &mut W,
) -> Result<(), ToolError> {
    let pad = indent(indent_by);
    writeln!(out, "{pad}Partition: {}", meta.partition)?;
    writeln!(
        out,
        "{pad}Table name: {} Table id: {}",
        meta.table_name, meta.table_id
    )?;
    writeln!(out, "{pad}Schema (version={}):", meta.schema_version)?;
    for line in meta.schema.to_string().lines() {
        writeln!(out, "{pad}{line}")?;
    }
    writeln!(out, "{pad}Superblock:")?;
    let json = meta.to_json()?;
    for line in String::from_utf8_lossy(&json).lines() {
        writeln!(out, "{pad}{line}")?;
    }
    Ok(())
}

/// Prints the permanent uuids of the committed configuration's peers,
/// space separated, on one line.
pub fn print_replica_uuids<W: Write>(
    layout: &FsLayout,
    replica_id: &str,
    out: &mut W,
) -> Result<Vec<String>, ToolError> {
    let instance = layout.load_instance()?;
    let cmeta = ConsensusMetadata::load(layout, replica_id, &instance.uuid)?;
    let uuids: Vec<String> = cmeta
        .committed_config()
        .peer_uuids()
        .into_iter()
        .map(str::to_string)
        .collect();
    writeln!(out, "{}", uuids.join(" "))?;
    Ok(uuids)
}

pub fn copy_replica_from(
    layout: &FsLayout,
    replica_id: &str,
    source: &HostPort,
) -> Result<CopyStats, ToolError> {
    layout.load_instance()?;
    let mut client = TcpCopyClient::new(layout.clone(), replica_id)?;
    let stats = copy_from_remote(&mut client, source)?;
    info!(replica = %replica_id, %source, files = stats.files, bytes = stats.bytes, "copied replica");
    Ok(stats)
}

/// Serves this node's replicas to copy clients. Only returns on error.
pub fn serve_copies(layout: &FsLayout, listen: &str) -> Result<(), ToolError> {
    layout.load_instance()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let server = CopyServer::bind(listen, layout.clone()).await?;
        server.serve().await
    })
}

#[cfg(test)]
mod tests {
    use super::{dump_block_ids, dump_metadata, list_replicas, print_replica_uuids};
    use crate::block::BlockId;
    use crate::catalog::schema::{ColumnDef, ColumnId, TableSchema};
    use crate::catalog::types::ColumnType;
    use crate::consensus::{ConsensusMetadata, ConsensusState, MemberType, RaftConfig, RaftPeer};
    use crate::error::ToolErrorCode;
    use crate::layout::FsLayout;
    use crate::metadata::{PartitionInfo, ReplicaMetadata, RowGroupMetadata};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn replica(id: &str, row_groups: Vec<RowGroupMetadata>) -> ReplicaMetadata {
        ReplicaMetadata {
            replica_id: id.into(),
            table_id: "t-1".into(),
            table_name: "orders".into(),
            schema_version: 4,
            schema: TableSchema::new(
                vec![ColumnDef {
                    id: ColumnId(10),
                    name: "id".into(),
                    col_type: ColumnType::Integer,
                    nullable: false,
                }],
                1,
            ),
            partition: PartitionInfo {
                start_key: "00".into(),
                end_key: String::new(),
            },
            data_state: Default::default(),
            row_groups,
        }
    }

    #[test]
    fn block_ids_are_listed_per_row_group() {
        let dir = tempdir().expect("temp");
        let (layout, _) = FsLayout::create(dir.path()).expect("layout");
        let rg = RowGroupMetadata {
            id: 0,
            last_durable_redo_timestamp: 0,
            columns: BTreeMap::from([(ColumnId(10), BlockId(7))]),
            undo_delta_blocks: vec![BlockId(8)],
            redo_delta_blocks: vec![BlockId(9)],
        };
        replica("r1", vec![rg]).store(&layout).expect("store");

        let mut out = Vec::new();
        let count = dump_block_ids(&layout, "r1", &mut out).expect("dump");
        let out = String::from_utf8(out).expect("utf8");
        assert_eq!(count, 3);
        assert!(out.starts_with("Listing all data blocks in replica r1:\nRow group 0\n"));
        assert!(out.contains("Column block for column ID 10 (id INT64 NOT NULL): 0000000000000007\n"));
        assert!(out.contains("UNDO: 0000000000000008\nREDO: 0000000000000009\n"));

        replica("r2", Vec::new()).store(&layout).expect("store");
        let mut out = Vec::new();
        dump_block_ids(&layout, "r2", &mut out).expect("dump");
        assert_eq!(String::from_utf8(out).expect("utf8"), "No row groups found for replica r2\n");
    }

    #[test]
    fn metadata_dump_names_table_and_schema() {
        let dir = tempdir().expect("temp");
        let (layout, _) = FsLayout::create(dir.path()).expect("layout");
        replica("r1", Vec::new()).store(&layout).expect("store");
        let mut out = Vec::new();
        dump_metadata(&layout, "r1", &mut out).expect("dump");
        let out = String::from_utf8(out).expect("utf8");
        assert!(out.contains("Partition: [00, <end>)\n"));
        assert!(out.contains("Table name: orders Table id: t-1\n"));
        assert!(out.contains("Schema (version=4):\n"));
        assert!(out.contains("Superblock:\n"));

        let err = dump_metadata(&layout, "missing", &mut Vec::new()).expect_err("missing");
        assert_eq!(err.code(), ToolErrorCode::ReplicaNotFound);
    }

    #[test]
    fn verbose_listing_indents_metadata() {
        let dir = tempdir().expect("temp");
        let (layout, _) = FsLayout::create(dir.path()).expect("layout");
        replica("r2", Vec::new()).store(&layout).expect("store");
        replica("r1", Vec::new()).store(&layout).expect("store");

        let mut out = Vec::new();
        let ids = list_replicas(&layout, false, &mut out).expect("list");
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(String::from_utf8(out).expect("utf8"), "r1\nr2\n");

        let mut out = Vec::new();
        list_replicas(&layout, true, &mut out).expect("list");
        let out = String::from_utf8(out).expect("utf8");
        assert!(out.starts_with("r1\n  Partition: "));
    }

    #[test]
    fn replica_uuids_are_space_separated() {
        let dir = tempdir().expect("temp");
        let (layout, instance) = FsLayout::create(dir.path()).expect("layout");
        let peer = |uuid: &str| RaftPeer {
            permanent_uuid: uuid.into(),
            last_known_addr: None,
            member_type: MemberType::Voter,
        };
        let state = ConsensusState {
            current_term: 1,
            voted_for: None,
            committed_config: RaftConfig {
                opid_index: None,
                peers: vec![peer("a"), peer("b"), peer("c")],
            },
        };
        ConsensusMetadata::create(&layout, "r1", &instance.uuid, state).expect("cmeta");
        let mut out = Vec::new();
        print_replica_uuids(&layout, "r1", &mut out).expect("print");
        assert_eq!(String::from_utf8(out).expect("utf8"), "a b c\n");
    }
}
