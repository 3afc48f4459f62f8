use crate::config::WalPrintOptions;
use crate::error::ToolError;
use crate::layout::FsLayout;
use crate::wal::reader::{LogEntry, LogReader, ReadableLogSegment};
use std::io::Write;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentSummary {
    pub num_entries: u64,
    pub min_op_index: Option<u64>,
    pub max_op_index: Option<u64>,
    pub truncated_tail: bool,
}

/// Prints every segment of `replica_id`'s log in sequence order.
pub fn dump_wals<W: Write>(
    layout: &FsLayout,
    replica_id: &str,
    options: &WalPrintOptions,
    out: &mut W,
) -> Result<Vec<SegmentSummary>, ToolError> {
    let reader = LogReader::open(layout, replica_id)?;
    if reader.segments().is_empty() {
        writeln!(out, "No WAL segments found for replica {replica_id}")?;
        return Ok(Vec::new());
    }
    let mut summaries = Vec::with_capacity(reader.segments().len());
    for segment in reader.segments() {
        summaries.push(print_segment(segment, options, out)?);
    }
    Ok(summaries)
}

pub fn print_segment<W: Write>(
    segment: &ReadableLogSegment,
    options: &WalPrintOptions,
    out: &mut W,
) -> Result<SegmentSummary, ToolError> {
    let header = segment.header();
    if options.print_meta {
        writeln!(out, "Segment: {}", segment.path().display())?;
        writeln!(out, "Header:")?;
        writeln!(out, "  segment_seq: {}", header.segment_seq)?;
        writeln!(out, "  format_version: {}", header.format_version)?;
        writeln!(out, "  instance_id: {}", header.instance_id)?;
        writeln!(out, "  created_at_micros: {}", header.created_at_micros)?;
        writeln!(out, "  prev_segment_hash: {}", hex::encode(header.prev_segment_hash))?;
    }
    if !segment.chain_valid() {
        warn!(
            segment = %segment.path().display(),
            "segment does not chain to the previous segment"
        );
    }

    let mut summary = SegmentSummary::default();
    if options.print_entries || options.print_meta {
        let mut entries = segment.entries()?;
        while let Some(entry) = entries.next_entry()? {
            if options.print_entries {
                writeln!(out, "{}", format_entry(&entry, options.truncate_data))?;
            }
            summary.num_entries += 1;
            summary.min_op_index = Some(
                summary
                    .min_op_index
                    .map_or(entry.op_index, |m| m.min(entry.op_index)),
            );
            summary.max_op_index = Some(
                summary
                    .max_op_index
                    .map_or(entry.op_index, |m| m.max(entry.op_index)),
            );
        }
        summary.truncated_tail = entries.truncated_tail();
    }

    if options.print_meta {
        let op_range = match (summary.min_op_index, summary.max_op_index) {
            (Some(min), Some(max)) => format!("{min}..={max}"),
            _ => "none".to_string(),
        };
        writeln!(out, "Footer:")?;
        writeln!(out, "  num_entries: {}", summary.num_entries)?;
        writeln!(out, "  op_indexes: {op_range}")?;
        writeln!(out, "  file_size: {}", segment.file_size())?;
        writeln!(
            out,
            "  hash_chain: {}",
            if segment.chain_valid() { "valid" } else { "BROKEN" }
        )?;
    }
    if summary.truncated_tail {
        writeln!(out, "Note: segment ends with a partially written entry")?;
    }
    Ok(summary)
}

fn format_entry(entry: &LogEntry, truncate_data: usize) -> String {
    let kind = match entry.entry_type() {
        Some(t) => t.to_string(),
        None => format!("UNKNOWN({})", entry.entry_type),
    };
    let shown = if truncate_data > 0 && entry.payload.len() > truncate_data {
        format!("{}...", hex::encode(&entry.payload[..truncate_data]))
    } else {
        hex::encode(&entry.payload)
    };
    format!(
        "{kind} op_index: {} timestamp: {} payload ({} bytes): {shown}",
        entry.op_index,
        entry.timestamp,
        entry.payload.len()
    )
}

#[cfg(test)]
mod tests {
    use super::{dump_wals, format_entry};
    use crate::config::WalPrintOptions;
    use crate::layout::FsLayout;
    use crate::wal::reader::LogEntry;
    use crate::wal::segment::{LogEntryType, SegmentWriter};
    use tempfile::tempdir;

    #[test]
    fn long_payloads_are_truncated() {
        let entry = LogEntry {
            op_index: 4,
            timestamp: 9,
            entry_type: LogEntryType::Write.to_byte(),
            payload: vec![0xab; 10],
        };
        assert_eq!(
            format_entry(&entry, 2),
            "WRITE_OP op_index: 4 timestamp: 9 payload (10 bytes): abab..."
        );
        assert!(format_entry(&entry, 0).ends_with(&"ab".repeat(10)));
    }

    #[test]
    fn entries_and_footer_follow_options() {
        let dir = tempdir().expect("temp");
        let (layout, _) = FsLayout::create(dir.path()).expect("layout");
        let wal_dir = layout.replica_wal_dir("r1").expect("wal dir");
        let mut writer = SegmentWriter::create(&wal_dir, 1, 1, [0u8; 32]).expect("create");
        for op in 5..8 {
            writer
                .append(op, op, LogEntryType::Write, b"payload")
                .expect("append");
        }
        writer.close().expect("close");

        let mut out = Vec::new();
        let summaries =
            dump_wals(&layout, "r1", &WalPrintOptions::default(), &mut out).expect("dump");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].num_entries, 3);
        assert_eq!(summaries[0].min_op_index, Some(5));
        assert!(text.contains("Header:"));
        assert!(text.contains("op_indexes: 5..=7"));
        assert!(text.contains("hash_chain: valid"));
        assert_eq!(text.matches("WRITE_OP").count(), 3);

        let quiet = WalPrintOptions {
            print_entries: false,
            print_meta: false,
            truncate_data: 0,
        };
        let mut out = Vec::new();
        dump_wals(&layout, "r1", &quiet, &mut out).expect("dump");
        assert!(out.is_empty());
    }
}
