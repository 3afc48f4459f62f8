//! Human-readable dumps of a replica's row groups.
//!
//! For each row group the column blocks are dumped first, then the UNDO
//! blocks and finally the REDO blocks. A failing block is reported inline
//! and the dump moves on to the next block; the first failure is returned
//! once everything else has been printed.

pub mod batch;
pub mod merge;

use crate::block::changelist::RowChangeList;
use crate::block::column::ColumnBlockReader;
use crate::block::delta::{DeltaFileReader, DeltaType};
use crate::block::row_group::RowGroupCursor;
use crate::block::{BlockId, BlockStore};
use crate::catalog::schema::TableSchema;
use crate::config::DumpOptions;
use crate::error::ToolError;
use crate::layout::FsLayout;
use crate::metadata::{ReplicaMetadata, RowGroupMetadata};
use crate::scratch::ScratchRegion;
use batch::RowBudgetedBatches;
use merge::DeltaMerge;
use std::io::Write;
use tracing::{debug, warn};

pub const SEPARATOR_LINE: &str =
    "----------------------------------------------------------------------";

pub(crate) fn indent(n: usize) -> String {
    " ".repeat(n)
}

/// Counters for one dump. `errors` holds every block that failed, in the
/// order they were hit.
#[derive(Debug, Default)]
pub struct DumpReport {
    pub row_groups: usize,
    pub column_blocks: usize,
    pub delta_blocks: usize,
    pub values_printed: u64,
    pub deltas_collected: u64,
    pub errors: Vec<(BlockId, ToolError)>,
}

impl DumpReport {
    /// The first block failure, if any.
    pub fn into_result(mut self) -> Result<Self, ToolError> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            let (_, err) = self.errors.remove(0);
            Err(err)
        }
    }

    fn absorb(&mut self, other: DumpReport) {
        self.row_groups += other.row_groups;
        self.column_blocks += other.column_blocks;
        self.delta_blocks += other.delta_blocks;
        self.values_printed += other.values_printed;
        self.deltas_collected += other.deltas_collected;
        self.errors.extend(other.errors);
    }
}

/// Dumps every row group of `replica_id`, or only the one selected by
/// `options.row_group_index`.
pub fn dump_row_groups<W: Write>(
    layout: &FsLayout,
    replica_id: &str,
    options: &DumpOptions,
    out: &mut W,
) -> Result<DumpReport, ToolError> {
    let meta = ReplicaMetadata::load(layout, replica_id)?;
    let store = BlockStore::new(layout);
    dump_replica(&store, &meta, options, out)?.into_result()
}

pub fn dump_replica<W: Write>(
    store: &BlockStore,
    meta: &ReplicaMetadata,
    options: &DumpOptions,
    out: &mut W,
) -> Result<DumpReport, ToolError> {
    let num_row_groups = meta.row_groups.len();
    if let Some(index) = options.row_group_index {
        let Some(row_group) = meta.row_groups.get(index) else {
            return Err(ToolError::InvalidArgument(format!(
                "row group index {index} is out of range for replica {}: valid indexes are [0, {num_row_groups})",
                meta.replica_id
            )));
        };
        return dump_row_group(store, &meta.schema, row_group, options, 0, out);
    }

    if num_row_groups == 0 {
        writeln!(out, "No row groups found on disk for replica {}", meta.replica_id)?;
        return Ok(DumpReport::default());
    }
    let mut report = DumpReport::default();
    for (idx, row_group) in meta.row_groups.iter().enumerate() {
        writeln!(out)?;
        writeln!(out, "Dumping row group {idx}")?;
        writeln!(out, "{SEPARATOR_LINE}")?;
        let rg_report = dump_row_group(store, &meta.schema, row_group, options, 2, out)?;
        report.absorb(rg_report);
    }
    Ok(report)
}

/// Dumps one row group. Only output failures are returned as errors; block
/// failures are printed and collected in the report.
pub fn dump_row_group<W: Write>(
    store: &BlockStore,
    schema: &TableSchema,
    row_group: &RowGroupMetadata,
    options: &DumpOptions,
    indent_by: usize,
    out: &mut W,
) -> Result<DumpReport, ToolError> {
    let pad = indent(indent_by);
    let mut report = DumpReport {
        row_groups: 1,
        ..DumpReport::default()
    };
    let rg_json =
        serde_json::to_string(row_group).map_err(|e| ToolError::Encode(e.to_string()))?;
    writeln!(out, "{pad}Row group metadata: {rg_json}")?;
    writeln!(out)?;

    for (column_id, block_id) in &row_group.columns {
        write!(out, "{pad}Dumping column block {block_id} for column id {column_id}")?;
        if let Some(col) = schema.column_by_id(*column_id) {
            write!(out, " ({col})")?;
        }
        writeln!(out, ":")?;
        writeln!(out, "{pad}{SEPARATOR_LINE}")?;
        report.column_blocks += 1;
        match dump_column_block(store, *block_id, options, indent_by, out) {
            Ok(values) => report.values_printed += values,
            Err(err) => block_failed(&mut report, *block_id, err, &pad, out)?,
        }
        writeln!(out)?;
    }
    for col in &schema.columns {
        if row_group.column_block(col.id).is_none() {
            writeln!(
                out,
                "{pad}Column {} ({col}) has no block in row group {}, skipping",
                col.id, row_group.id
            )?;
            debug!(row_group = row_group.id, column = %col.id, "column has no block");
        }
    }

    let mut scratch = ScratchRegion::new();
    for (delta_type, blocks) in [
        (DeltaType::Undo, &row_group.undo_delta_blocks),
        (DeltaType::Redo, &row_group.redo_delta_blocks),
    ] {
        if blocks.is_empty() {
            writeln!(out, "{pad}{delta_type} deltas: empty")?;
            continue;
        }
        let kind = match delta_type {
            DeltaType::Undo => "undo",
            DeltaType::Redo => "redo",
        };
        for block_id in blocks {
            writeln!(out, "{pad}Dumping {kind} delta block {block_id}:")?;
            writeln!(out, "{pad}{SEPARATOR_LINE}")?;
            report.delta_blocks += 1;
            let block = DeltaBlockDump {
                store,
                schema,
                row_group,
                block_id: *block_id,
                delta_type,
                options,
                indent_by,
            };
            match block.run(&mut scratch, out) {
                Ok(collected) => report.deltas_collected += collected,
                Err(err) => block_failed(&mut report, *block_id, err, &pad, out)?,
            }
            writeln!(out)?;
        }
    }
    Ok(report)
}

fn block_failed<W: Write>(
    report: &mut DumpReport,
    block_id: BlockId,
    err: ToolError,
    pad: &str,
    out: &mut W,
) -> Result<(), ToolError> {
    // Output errors end the whole dump.
    if let ToolError::Io(_) = err {
        return Err(err);
    }
    writeln!(out, "{pad}Error dumping block {block_id}: {err}")?;
    warn!(block = %block_id, error = %err, "failed to dump block");
    report.errors.push((block_id, err));
    Ok(())
}

/// Prints a column block's header and, when verbose, its values up to the
/// row budget. Returns the number of values printed.
fn dump_column_block<W: Write>(
    store: &BlockStore,
    block_id: BlockId,
    options: &DumpOptions,
    indent_by: usize,
    out: &mut W,
) -> Result<u64, ToolError> {
    let pad = indent(indent_by);
    let reader = ColumnBlockReader::open(store, block_id)?;
    writeln!(out, "{pad}Column block header: {}", reader.header())?;
    if options.metadata_only || !options.verbose {
        return Ok(0);
    }
    writeln!(out, "{pad}{} values:", reader.num_rows())?;
    let value_pad = indent(indent_by + 2);
    let mut batches = RowBudgetedBatches::new(reader.new_cursor(), options.nrows)?;
    while let Some(batch) = batches.next_batch()? {
        for (i, value) in batches.cursor().batch_values().iter().enumerate() {
            writeln!(out, "{value_pad}{}: {value}", batch.offset + i as u64)?;
        }
    }
    batches.finish()
}

struct DeltaBlockDump<'a> {
    store: &'a BlockStore,
    schema: &'a TableSchema,
    row_group: &'a RowGroupMetadata,
    block_id: BlockId,
    delta_type: DeltaType,
    options: &'a DumpOptions,
    indent_by: usize,
}

impl DeltaBlockDump<'_> {
    /// Returns the number of delta records collected.
    fn run<W: Write>(&self, scratch: &mut ScratchRegion, out: &mut W) -> Result<u64, ToolError> {
        let pad = indent(self.indent_by);
        let reader = DeltaFileReader::open(self.store, self.block_id, self.delta_type)?;
        writeln!(out, "{pad}Delta stats: {}", reader.stats())?;
        if self.options.metadata_only {
            return Ok(0);
        }
        let Some(iter) = reader.new_iterator(self.schema, self.delta_type.dump_snapshot())? else {
            writeln!(out, "{pad}Empty delta block.")?;
            return Ok(0);
        };

        let base = RowGroupCursor::open(self.store, self.row_group)?;
        let mut batches = RowBudgetedBatches::new(base, self.options.nrows)?;
        let mut merge = DeltaMerge::new(iter, scratch)?;
        while let Some(batch) = batches.next_batch()? {
            let deltas = merge.step(&batch)?;
            if !self.options.verbose {
                continue;
            }
            for delta in &deltas {
                let location = format!("delta block {} row {}", self.block_id, delta.key.row_idx);
                let bytes = merge
                    .scratch()
                    .get(delta.cell)
                    .ok_or_else(|| ToolError::decode(&location, "record outlived its batch"))?;
                let change = RowChangeList::decode(bytes, self.schema, &location)?;
                writeln!(out, "{pad}{} {}", delta.key, change.to_string(self.schema))?;
            }
        }
        let rows = batches.finish()?;
        debug!(
            block = %self.block_id,
            deltas = merge.collected(),
            rows,
            "processed {} deltas for {} possible rows",
            merge.collected(),
            rows
        );
        Ok(merge.collected())
    }
}
