//! Offline inspection and repair of a node's local replicas.
//!
//! Everything here works directly on the on-disk state of a stopped node:
//! replica metadata, column and delta blocks, write-ahead log segments and
//! consensus metadata.

pub mod block;
pub mod catalog;
pub mod config;
pub mod consensus;
pub mod copy;
pub mod dump;
pub mod error;
pub mod hostport;
pub mod layout;
pub mod metadata;
pub mod offline;
pub mod scratch;
pub mod wal;

pub use config::{DumpOptions, ToolConfig, WalPrintOptions};
pub use consensus::rewrite::{RewriteReport, rewrite_raft_config};
pub use dump::{DumpReport, dump_row_groups};
pub use error::{ToolError, ToolErrorCode};
pub use hostport::HostPort;
pub use layout::FsLayout;
pub use metadata::ReplicaMetadata;
pub use wal::print::dump_wals;
