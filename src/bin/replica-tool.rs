//! Command-line front end for offline replica inspection and repair.

use clap::{ArgAction, Parser, Subcommand};
use replica_tool::config::{DATA_ROOT_ENV, DEFAULT_TRUNCATE_DATA_BYTES};
use replica_tool::{
    DumpOptions, FsLayout, HostPort, ToolConfig, ToolError, WalPrintOptions, dump_row_groups,
    dump_wals, offline, rewrite_raft_config,
};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "replica-tool")]
#[command(about = "Inspect and repair the local replicas of a stopped node", long_about = None)]
struct Args {
    /// Root directory holding instance, metadata and block files.
    #[arg(long, env = DATA_ROOT_ENV)]
    data_root: PathBuf,
    /// Root directory of the write-ahead logs, if not the data root.
    #[arg(long)]
    wal_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the replicas stored on this node.
    List {
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
    #[command(subcommand)]
    Dump(DumpCommand),
    #[command(subcommand)]
    Cmeta(CmetaCommand),
    /// Copy a replica from a remote node serving copies.
    CopyFromRemote {
        replica_id: String,
        /// Source address (host:port).
        source: HostPort,
    },
    /// Serve this node's replicas to copy clients.
    ServeCopy {
        #[arg(long, default_value = "0.0.0.0:7150")]
        listen: String,
    },
}

#[derive(Subcommand)]
enum DumpCommand {
    /// List every block referenced by a replica.
    BlockIds { replica_id: String },
    /// Print a replica's metadata.
    Meta { replica_id: String },
    /// Print the column and delta blocks of a replica's row groups.
    RowGroup {
        replica_id: String,
        /// Only print block headers and summaries.
        #[arg(long, default_value_t = false)]
        metadata_only: bool,
        /// Rows to print per block; 0 prints all of them.
        #[arg(long, default_value_t = 0)]
        nrows: u64,
        /// Dump only the row group at this index.
        #[arg(long)]
        row_group_index: Option<usize>,
        /// Print values and delta records.
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
    /// Print a replica's write-ahead log segments.
    Wals {
        replica_id: String,
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        print_entries: bool,
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        print_meta: bool,
        /// Bytes of entry payload to print; 0 prints everything.
        #[arg(long, default_value_t = DEFAULT_TRUNCATE_DATA_BYTES)]
        truncate_data: usize,
    },
}

#[derive(Subcommand)]
enum CmetaCommand {
    /// Print the uuids of the peers in a replica's committed config.
    PrintReplicaUuids { replica_id: String },
    /// Replace a replica's committed peers. Each peer is uuid:host:port.
    RewriteRaftConfig {
        replica_id: String,
        #[arg(required = true, num_args = 1..)]
        peers: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), ToolError> {
    let mut config = ToolConfig::new(args.data_root);
    if let Some(wal_root) = args.wal_root {
        config = config.with_wal_root(wal_root);
    }
    let layout = FsLayout::from_config(&config);
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let result = match args.command {
        Command::List { verbose } => offline::list_replicas(&layout, verbose, &mut out).map(drop),
        Command::Dump(DumpCommand::BlockIds { replica_id }) => {
            offline::dump_block_ids(&layout, &replica_id, &mut out).map(drop)
        }
        Command::Dump(DumpCommand::Meta { replica_id }) => {
            offline::dump_metadata(&layout, &replica_id, &mut out)
        }
        Command::Dump(DumpCommand::RowGroup {
            replica_id,
            metadata_only,
            nrows,
            row_group_index,
            verbose,
        }) => {
            let options = DumpOptions {
                metadata_only,
                nrows,
                row_group_index,
                verbose,
            };
            let config = config.with_dump_options(options);
            dump_row_groups(&layout, &replica_id, &config.dump, &mut out).map(drop)
        }
        Command::Dump(DumpCommand::Wals {
            replica_id,
            print_entries,
            print_meta,
            truncate_data,
        }) => {
            let options = WalPrintOptions {
                print_entries,
                print_meta,
                truncate_data,
            };
            let config = config.with_wal_print_options(options);
            dump_wals(&layout, &replica_id, &config.wal_print, &mut out).map(drop)
        }
        Command::Cmeta(CmetaCommand::PrintReplicaUuids { replica_id }) => {
            offline::print_replica_uuids(&layout, &replica_id, &mut out).map(drop)
        }
        Command::Cmeta(CmetaCommand::RewriteRaftConfig { replica_id, peers }) => {
            rewrite_raft_config(&layout, &replica_id, &peers).map(drop)
        }
        Command::CopyFromRemote { replica_id, source } => {
            offline::copy_replica_from(&layout, &replica_id, &source).map(drop)
        }
        Command::ServeCopy { listen } => offline::serve_copies(&layout, &listen),
    };
    // Whatever was printed before a failure still reaches the terminal.
    out.flush()?;
    result
}
