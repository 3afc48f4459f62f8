use std::path::PathBuf;

/// Rows requested from a cursor per batch. Bounds scratch usage, not row-group size.
pub const ROWS_PER_BATCH: usize = 100;

/// Default number of payload bytes printed per WAL entry.
pub const DEFAULT_TRUNCATE_DATA_BYTES: usize = 100;

pub const DATA_ROOT_ENV: &str = "REPLICA_TOOL_DATA_ROOT";

/// Options shared by the row-group dump commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpOptions {
    /// Print block identifiers and summary statistics only; no value or
    /// record decoding.
    pub metadata_only: bool,
    /// Approximate cap on rows emitted per block. Zero means unbounded.
    pub nrows: u64,
    /// Dump only the row group at this position.
    pub row_group_index: Option<usize>,
    /// Print every value and delta record.
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalPrintOptions {
    pub print_entries: bool,
    pub print_meta: bool,
    /// Maximum payload bytes printed per entry. Zero disables truncation.
    pub truncate_data: usize,
}

impl Default for WalPrintOptions {
    fn default() -> Self {
        Self {
            print_entries: true,
            print_meta: true,
            truncate_data: DEFAULT_TRUNCATE_DATA_BYTES,
        }
    }
}

/// Runtime configuration for one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub data_root: PathBuf,
    /// Separate root for write-ahead log segments. Defaults to `data_root`.
    pub wal_root: Option<PathBuf>,
    pub dump: DumpOptions,
    pub wal_print: WalPrintOptions,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("."),
            wal_root: None,
            dump: DumpOptions::default(),
            wal_print: WalPrintOptions::default(),
        }
    }
}

impl ToolConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }

    pub fn with_wal_root(mut self, wal_root: impl Into<PathBuf>) -> Self {
        self.wal_root = Some(wal_root.into());
        self
    }

    pub fn with_dump_options(mut self, dump: DumpOptions) -> Self {
        self.dump = dump;
        self
    }

    pub fn with_wal_print_options(mut self, wal_print: WalPrintOptions) -> Self {
        self.wal_print = wal_print;
        self
    }

    pub fn effective_wal_root(&self) -> PathBuf {
        self.wal_root
            .clone()
            .unwrap_or_else(|| self.data_root.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{DumpOptions, ToolConfig, WalPrintOptions};
    use std::path::PathBuf;

    #[test]
    fn wal_root_falls_back_to_data_root() {
        let cfg = ToolConfig::new("/srv/node");
        assert_eq!(cfg.effective_wal_root(), PathBuf::from("/srv/node"));
        let cfg = cfg.with_wal_root("/srv/wal");
        assert_eq!(cfg.effective_wal_root(), PathBuf::from("/srv/wal"));
    }

    #[test]
    fn defaults_are_unbounded_and_quiet() {
        let cfg = ToolConfig::default();
        assert_eq!(cfg.dump, DumpOptions::default());
        assert_eq!(cfg.dump.nrows, 0);
        assert!(!cfg.dump.verbose);
        assert_eq!(cfg.wal_print, WalPrintOptions::default());
        assert_eq!(cfg.wal_print.truncate_data, 100);
    }
}
