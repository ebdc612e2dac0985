//! Plain-text summaries written to stdout

use std::io::Write;

use anyhow::Result;
use dx_data::{BinKind, BinTable, Engine, LoadSummary};

const BAR_WIDTH: usize = 40;

pub fn write_summary<W: Write>(out: &mut W, engine: &Engine, summary: &LoadSummary, bin_fields: &[String]) -> Result<()> {
    writeln!(out, "{} rows loaded in {:.1} ms", summary.row_count, summary.load_time_ms)?;
    writeln!(out)?;
    writeln!(out, "{:<24} {:<8} {:>14} {:>14} {:>8}", "field", "type", "min", "max", "nulls")?;
    for entry in summary.schema.fields() {
        let kind = if entry.is_categorical() {
            format!("{}*", entry.field_type.name())
        } else {
            entry.field_type.name().to_string()
        };
        writeln!(
            out,
            "{:<24} {:<8} {:>14} {:>14} {:>8}",
            entry.name,
            kind,
            entry.min.map(|v| format!("{}", v)).unwrap_or_default(),
            entry.max.map(|v| format!("{}", v)).unwrap_or_default(),
            entry.null_count
        )?;
    }

    let snapshot = engine.snapshot();
    writeln!(out)?;
    writeln!(
        out,
        "{} of {} rows pass ({:.2}%)",
        snapshot.filtered_count,
        snapshot.total_count,
        snapshot.percentage()
    )?;
    for entry in &snapshot.filters {
        let state = if entry.spec.enabled { "" } else { " (disabled)" };
        writeln!(out, "  {} {} {}{}", entry.field, entry.spec.kind, entry.spec.value, state)?;
    }

    let fields: Vec<String> = if bin_fields.is_empty() {
        summary.schema.names().map(str::to_string).collect()
    } else {
        bin_fields.to_vec()
    };
    for field in &fields {
        let Some(table) = engine.bin_table(field)? else {
            continue;
        };
        writeln!(out)?;
        write_bins(out, &table, &snapshot.membership)?;

        let numeric = summary.schema.get(field).map_or(false, |e| e.field_type.is_numeric());
        if numeric {
            let stats = engine.field_stats(field, true)?;
            writeln!(
                out,
                "  filtered: n={} mean={:.3} sd={:.3} min={} max={}",
                stats.count, stats.mean, stats.std_dev, stats.min, stats.max
            )?;
        }
    }
    Ok(())
}

/// One line per bucket: label, filtered/total and a bar scaled to the largest bucket
fn write_bins<W: Write>(out: &mut W, table: &BinTable, membership: &[bool]) -> Result<()> {
    let layout = match table.kind() {
        BinKind::Continuous { .. } => "continuous",
        BinKind::Categorical { .. } => "categorical",
        BinKind::Circular { .. } => "circular",
    };
    writeln!(out, "{} ({}, {} buckets)", table.field(), layout, table.num_buckets())?;

    let filtered = table.filtered_counts(membership);
    let scale = table.max_count().max(1);
    for (idx, total) in table.counts().into_iter().enumerate() {
        if total == 0 {
            continue;
        }
        let label = match (table.bucket_bounds(idx), table.bucket_value(idx)) {
            (Some((lo, hi)), _) => format!("[{:.4}, {:.4})", lo, hi),
            (None, Some(value)) => value.to_string(),
            (None, None) => idx.to_string(),
        };
        let passing = filtered.get(idx).copied().unwrap_or(total);
        let bar = "#".repeat(passing * BAR_WIDTH / scale);
        writeln!(out, "  {:<28} {:>9}/{:<9} {}", label, passing, total, bar)?;
    }
    if table.null_count() > 0 {
        let passing = table.filtered_null_count(membership);
        writeln!(out, "  {:<28} {:>9}/{:<9}", "(missing)", passing, table.null_count())?;
    }
    Ok(())
}
