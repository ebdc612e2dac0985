//! Load-time pre-binning
//!
//! Every binnable field is partitioned into buckets of row indices once, when
//! the dataset is loaded. Charts read bucket sizes (and, through
//! [`BinTable::filtered_counts`], bucket sizes under the current filter)
//! without touching the columns again. Bin tables never depend on filter
//! state.

use serde::Serialize;
use tracing::debug;
use dx_core::EngineSettings;

use crate::column::Column;
use crate::schema::SchemaEntry;
use crate::value::Value;

/// Full circle for angle fields, in degrees
pub const FULL_CIRCLE: f64 = 360.0;

/// How a field's buckets are laid out
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BinKind {
    /// Equal-width buckets over `[min, max)`; the last bucket also holds `max`
    Continuous { min: f64, max: f64, bin_size: f64 },
    /// One bucket per value, in ascending value order
    Categorical { values: Vec<Value> },
    /// Equal-angle buckets over `[0, 360)` with wraparound
    Circular { bin_size: f64 },
}

/// Row indices of one field partitioned into buckets.
///
/// Every row index of the dataset appears exactly once: either in one value
/// bucket or, for rows with a missing numeric value, in the null rows.
#[derive(Debug, Clone)]
pub struct BinTable {
    field: String,
    kind: BinKind,
    buckets: Vec<Vec<u32>>,
    null_rows: Vec<u32>,
    max_count: usize,
}

impl BinTable {
    fn new(field: &str, kind: BinKind, buckets: Vec<Vec<u32>>, null_rows: Vec<u32>) -> Self {
        let max_count = buckets.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            field: field.to_string(),
            kind,
            buckets,
            null_rows,
            max_count,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn kind(&self) -> &BinKind {
        &self.kind
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Row indices in bucket `idx`, ascending
    pub fn bucket(&self, idx: usize) -> &[u32] {
        &self.buckets[idx]
    }

    pub fn buckets(&self) -> &[Vec<u32>] {
        &self.buckets
    }

    /// Rows with no value to bucket, ascending
    pub fn null_rows(&self) -> &[u32] {
        &self.null_rows
    }

    pub fn null_count(&self) -> usize {
        self.null_rows.len()
    }

    /// Largest value bucket size, for display scaling. Null rows are not counted.
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Value bucket sizes; add [`null_count`](Self::null_count) for the row total
    pub fn counts(&self) -> Vec<usize> {
        self.buckets.iter().map(Vec::len).collect()
    }

    /// Value bucket sizes counting only rows whose membership flag is set.
    ///
    /// Rows beyond the end of `membership` count as not passing.
    pub fn filtered_counts(&self, membership: &[bool]) -> Vec<usize> {
        self.buckets.iter().map(|rows| count_passing(rows, membership)).collect()
    }

    /// Null rows whose membership flag is set
    pub fn filtered_null_count(&self, membership: &[bool]) -> usize {
        count_passing(&self.null_rows, membership)
    }

    /// Value range `[lo, hi)` covered by a bucket; `None` for categorical tables
    pub fn bucket_bounds(&self, idx: usize) -> Option<(f64, f64)> {
        match &self.kind {
            BinKind::Continuous { min, bin_size, .. } => {
                let lo = min + idx as f64 * bin_size;
                Some((lo, lo + bin_size))
            }
            BinKind::Circular { bin_size } => {
                let lo = idx as f64 * bin_size;
                Some((lo, lo + bin_size))
            }
            BinKind::Categorical { .. } => None,
        }
    }

    /// Label value of a categorical bucket
    pub fn bucket_value(&self, idx: usize) -> Option<&Value> {
        match &self.kind {
            BinKind::Categorical { values } => values.get(idx),
            _ => None,
        }
    }
}

/// Builds bin tables from columns and their schema entries
pub struct Binner {
    default_bins: usize,
    angle_bins: usize,
    max_string_categories: usize,
    settings: EngineSettings,
}

impl Binner {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            default_bins: settings.default_bins.max(1),
            angle_bins: settings.angle_bins.max(1),
            max_string_categories: settings.max_string_categories,
            settings: settings.clone(),
        }
    }

    /// Bin one field; `None` for string fields above the category limit
    pub fn build(&self, column: &Column, entry: &SchemaEntry) -> Option<BinTable> {
        let table = match column {
            Column::Utf8(strings) => {
                if strings.dictionary().len() > self.max_string_categories {
                    debug!(
                        "Skipping bins for '{}': {} distinct strings",
                        entry.name,
                        strings.dictionary().len()
                    );
                    return None;
                }
                let mut buckets = vec![Vec::new(); strings.dictionary().len()];
                for (row, code) in strings.codes().iter().enumerate() {
                    buckets[*code as usize].push(row as u32);
                }
                let values = strings
                    .dictionary()
                    .iter()
                    .map(|s| Value::Text(s.to_string()))
                    .collect();
                BinTable::new(&entry.name, BinKind::Categorical { values }, buckets, Vec::new())
            }
            Column::Boolean(flags) => {
                let mut buckets = vec![Vec::new(), Vec::new()];
                for (row, flag) in flags.iter().enumerate() {
                    buckets[usize::from(*flag)].push(row as u32);
                }
                let values = vec![Value::Bool(false), Value::Bool(true)];
                BinTable::new(&entry.name, BinKind::Categorical { values }, buckets, Vec::new())
            }
            numeric => {
                if let Some(distinct) = &entry.distinct_values {
                    self.categorical(numeric, entry, distinct)
                } else if self.settings.is_angle_field(&entry.name) {
                    self.circular(numeric, entry)
                } else {
                    self.continuous(numeric, entry)
                }
            }
        };

        debug!(
            "Binned '{}' into {} buckets (max {}, {} null)",
            entry.name,
            table.num_buckets(),
            table.max_count(),
            table.null_count()
        );
        Some(table)
    }

    fn categorical(&self, column: &Column, entry: &SchemaEntry, distinct: &[f64]) -> BinTable {
        let mut buckets = vec![Vec::new(); distinct.len()];
        let mut null_rows = Vec::new();
        for_each_number(column, |row, value| {
            // +0.0 and -0.0 share a bucket, as they share a distinct value
            let found = value.and_then(|v| {
                let v = v + 0.0;
                distinct.binary_search_by(|probe| probe.total_cmp(&v)).ok()
            });
            match found {
                Some(idx) => buckets[idx].push(row as u32),
                None => null_rows.push(row as u32),
            }
        });
        let values = distinct.iter().map(|v| Value::Number(*v)).collect();
        BinTable::new(&entry.name, BinKind::Categorical { values }, buckets, null_rows)
    }

    fn continuous(&self, column: &Column, entry: &SchemaEntry) -> BinTable {
        let num_bins = self.default_bins;
        let (min, max) = match (entry.min, entry.max) {
            (Some(min), Some(max)) => (min, max),
            _ => (0.0, 0.0),
        };
        let bin_size = (max - min) / num_bins as f64;
        let mut buckets = vec![Vec::new(); num_bins];
        let mut null_rows = Vec::new();

        for_each_number(column, |row, value| match value {
            Some(v) if bin_size > 0.0 => buckets[continuous_index(v, min, max, bin_size, num_bins)].push(row as u32),
            Some(_) => buckets[0].push(row as u32),
            None => null_rows.push(row as u32),
        });

        BinTable::new(&entry.name, BinKind::Continuous { min, max, bin_size }, buckets, null_rows)
    }

    fn circular(&self, column: &Column, entry: &SchemaEntry) -> BinTable {
        let num_bins = self.angle_bins;
        let bin_size = FULL_CIRCLE / num_bins as f64;
        let mut buckets = vec![Vec::new(); num_bins];
        let mut null_rows = Vec::new();

        for_each_number(column, |row, value| match value {
            Some(v) => buckets[circular_index(v, bin_size, num_bins)].push(row as u32),
            None => null_rows.push(row as u32),
        });

        BinTable::new(&entry.name, BinKind::Circular { bin_size }, buckets, null_rows)
    }
}

/// Bucket for `v` in an equal-width layout; `max` lands in the last bucket
pub fn continuous_index(v: f64, min: f64, max: f64, bin_size: f64, num_bins: usize) -> usize {
    let clamped = v.min(max - f64::EPSILON * max.abs().max(1.0)).max(min);
    let idx = ((clamped - min) / bin_size).floor() as usize;
    idx.min(num_bins - 1)
}

/// Bucket for an angle in degrees, wrapping through 0/360
pub fn circular_index(v: f64, bin_size: f64, num_bins: usize) -> usize {
    let idx = (v / bin_size).floor() as i64;
    idx.rem_euclid(num_bins as i64) as usize
}

fn count_passing(rows: &[u32], membership: &[bool]) -> usize {
    rows.iter()
        .filter(|&&row| membership.get(row as usize).copied().unwrap_or(false))
        .count()
}

/// Visit every row of a numeric column as `f64`, `None` for missing floats
fn for_each_number(column: &Column, mut visit: impl FnMut(usize, Option<f64>)) {
    match column {
        Column::Float32(data) => {
            for (row, v) in data.iter().enumerate() {
                visit(row, (!v.is_nan()).then(|| f64::from(*v)));
            }
        }
        Column::UInt8(data) => data.iter().enumerate().for_each(|(row, v)| visit(row, Some(f64::from(*v)))),
        Column::UInt16(data) => data.iter().enumerate().for_each(|(row, v)| visit(row, Some(f64::from(*v)))),
        Column::UInt32(data) => data.iter().enumerate().for_each(|(row, v)| visit(row, Some(f64::from(*v)))),
        Column::Utf8(_) | Column::Boolean(_) => {}
    }
}
