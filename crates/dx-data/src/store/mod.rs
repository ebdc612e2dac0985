//! Column store
//!
//! A [`Dataset`] owns the typed columns, their schema and their bin tables.
//! It is built once per load and never mutated afterwards, so it is shared
//! behind an `Arc` by any number of readers without locking.

use std::sync::Arc;
use std::time::Instant;
use rayon::prelude::*;
use tracing::{debug, info};
use dx_core::EngineSettings;

use crate::binning::{BinTable, Binner};
use crate::column::{Column, StringColumn};
use crate::schema::{Cell, CellReader, DatasetSchema, FieldType, SchemaEntry, SchemaInferencer};
use crate::sources::{ColumnBuffer, DataSource, RawColumn};
use crate::stats::FieldStats;
use crate::value::Value;
use crate::{DataError, Result};

/// Outcome of a successful load
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub success: bool,
    pub row_count: usize,
    pub schema: Arc<DatasetSchema>,
    pub load_time_ms: f64,
}

/// Published after a dataset replaces the previous one
#[derive(Debug, Clone)]
pub struct DatasetLoaded {
    pub source_kind: String,
    pub row_count: usize,
    pub field_count: usize,
    pub load_time_ms: f64,
}

/// Published when a load is rejected; the previous dataset stays in place
#[derive(Debug, Clone)]
pub struct DatasetLoadFailed {
    pub source_kind: String,
    pub error: String,
}

dx_core::impl_event!(DatasetLoaded, DatasetLoadFailed);

/// Immutable columnar dataset
#[derive(Debug)]
pub struct Dataset {
    schema: Arc<DatasetSchema>,
    columns: Vec<Column>,
    bins: Vec<Option<Arc<BinTable>>>,
    row_count: usize,
}

impl Dataset {
    /// Build a dataset from a source: normalise, infer, convert, bin.
    pub fn load(source: DataSource, settings: &EngineSettings) -> Result<(Dataset, LoadSummary)> {
        let start = Instant::now();
        let kind = source.kind_name();
        let raw = source.into_columns()?;
        let row_count = raw.first().map(|c| c.data.len()).unwrap_or(0);
        debug!("Loading {} fields x {} rows from {}", raw.len(), row_count, kind);

        let inferencer = SchemaInferencer::new(settings);
        let (entries, columns): (Vec<SchemaEntry>, Vec<Column>) = raw
            .into_par_iter()
            .map(|column| {
                let entry = inferencer.infer(&column.name, &column.data);
                let typed = build_column(column, &entry, settings);
                (entry, typed)
            })
            .unzip();

        let binner = Binner::new(settings);
        let bins: Vec<Option<Arc<BinTable>>> = columns
            .par_iter()
            .zip(entries.par_iter())
            .map(|(column, entry)| binner.build(column, entry).map(Arc::new))
            .collect();

        let schema = Arc::new(DatasetSchema::new(entries, row_count));
        let load_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            "Loaded {} rows, {} fields from {} in {:.1} ms",
            row_count,
            schema.len(),
            kind,
            load_time_ms
        );

        let summary = LoadSummary {
            success: true,
            row_count,
            schema: schema.clone(),
            load_time_ms,
        };
        let dataset = Dataset {
            schema,
            columns,
            bins,
            row_count,
        };
        Ok((dataset, summary))
    }

    pub fn schema(&self) -> &Arc<DatasetSchema> {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, field: &str) -> Result<&Column> {
        self.field_index(field).map(|idx| &self.columns[idx])
    }

    pub fn column_at(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    pub fn field_index(&self, field: &str) -> Result<usize> {
        self.schema
            .index_of(field)
            .ok_or_else(|| DataError::FieldNotFound(field.to_string()))
    }

    /// Pre-built bins for a field; `None` when the field is not binnable
    pub fn bin_table(&self, field: &str) -> Result<Option<Arc<BinTable>>> {
        self.field_index(field).map(|idx| self.bins[idx].clone())
    }

    /// Values of a field, optionally only the rows whose membership flag is set
    pub fn field_values(&self, field: &str, membership: Option<&[bool]>) -> Result<Vec<Value>> {
        let column = self.column(field)?;
        let values = match membership {
            Some(mask) => (0..self.row_count)
                .filter(|&row| mask[row])
                .map(|row| column.get(row))
                .collect(),
            None => (0..self.row_count).map(|row| column.get(row)).collect(),
        };
        Ok(values)
    }

    /// Summary statistics of a numeric field
    pub fn field_stats(&self, field: &str, membership: Option<&[bool]>) -> Result<FieldStats> {
        let column = self.column(field)?;
        if !column.is_numeric() {
            return Err(DataError::NotNumeric(field.to_string()));
        }
        Ok(FieldStats::compute(column, membership))
    }

    /// Approximate memory held by the columns
    pub fn memory_size(&self) -> usize {
        self.columns.iter().map(Column::memory_size).sum()
    }
}

/// Convert a raw buffer into the storage chosen by its schema entry
fn build_column(raw: RawColumn, entry: &SchemaEntry, settings: &EngineSettings) -> Column {
    let reader = CellReader::new(settings);
    match (entry.field_type, raw.data) {
        (FieldType::Float, ColumnBuffer::Float32(v)) => Column::Float32(v),
        (FieldType::Float, ColumnBuffer::Float64(v)) => Column::Float32(v.into_iter().map(|x| x as f32).collect()),
        (FieldType::Float, ColumnBuffer::Int64(v)) => Column::Float32(v.into_iter().map(|x| x as f32).collect()),
        (FieldType::Float, ColumnBuffer::Values(cells)) => Column::Float32(
            cells
                .iter()
                .map(|c| reader.number(c).map(|n| n as f32).unwrap_or(f32::NAN))
                .collect(),
        ),
        (FieldType::Float, data) => Column::Float32(numbers(data, &reader).map(|x| x as f32).collect()),
        (FieldType::UInt8, data) => Column::UInt8(numbers(data, &reader).map(|x| x as u8).collect()),
        (FieldType::UInt16, data) => Column::UInt16(numbers(data, &reader).map(|x| x as u16).collect()),
        (FieldType::UInt32, data) => Column::UInt32(numbers(data, &reader).map(|x| x as u32).collect()),
        (FieldType::Boolean, ColumnBuffer::Boolean(v)) => Column::Boolean(v),
        (FieldType::Boolean, ColumnBuffer::Values(cells)) => {
            Column::Boolean(cells.iter().map(|c| reader.boolean(c).unwrap_or(false)).collect())
        }
        (FieldType::String, ColumnBuffer::Utf8(v)) => Column::Utf8(StringColumn::from_values(v)),
        (FieldType::String, ColumnBuffer::Values(cells)) => {
            Column::Utf8(StringColumn::from_values(cells.iter().map(|c| text_of(c, &reader))))
        }
        (FieldType::Boolean, other) => Column::Boolean(
            buffer_text(other)
                .iter()
                .map(|s| settings.parse_bool(s).unwrap_or(false))
                .collect(),
        ),
        (FieldType::String, other) => Column::Utf8(StringColumn::from_values(buffer_text(other))),
    }
}

/// Buffer contents as `f64`. Integer fields only reach this after the
/// inferencer proved them gap-free, so the zero fallback is never stored.
fn numbers<'a>(data: ColumnBuffer, reader: &'a CellReader<'a>) -> Box<dyn Iterator<Item = f64> + 'a> {
    match data {
        ColumnBuffer::UInt8(v) => Box::new(v.into_iter().map(f64::from)),
        ColumnBuffer::UInt16(v) => Box::new(v.into_iter().map(f64::from)),
        ColumnBuffer::UInt32(v) => Box::new(v.into_iter().map(f64::from)),
        ColumnBuffer::Int64(v) => Box::new(v.into_iter().map(|x| x as f64)),
        ColumnBuffer::Float32(v) => Box::new(v.into_iter().map(f64::from)),
        ColumnBuffer::Float64(v) => Box::new(v.into_iter()),
        ColumnBuffer::Values(cells) => Box::new(cells.into_iter().map(move |c| reader.number(&c).unwrap_or(0.0))),
        ColumnBuffer::Boolean(v) => Box::new(v.into_iter().map(|b| if b { 1.0 } else { 0.0 })),
        ColumnBuffer::Utf8(v) => Box::new(v.into_iter().map(|s| s.trim().parse::<f64>().unwrap_or(0.0))),
    }
}

fn text_of(cell: &Value, reader: &CellReader<'_>) -> String {
    match reader.read(cell) {
        Cell::Null => String::new(),
        _ => cell.to_string(),
    }
}

fn buffer_text(data: ColumnBuffer) -> Vec<String> {
    match data {
        ColumnBuffer::Float32(v) => v.into_iter().map(|x| x.to_string()).collect(),
        ColumnBuffer::Float64(v) => v.into_iter().map(|x| x.to_string()).collect(),
        ColumnBuffer::UInt8(v) => v.into_iter().map(|x| x.to_string()).collect(),
        ColumnBuffer::UInt16(v) => v.into_iter().map(|x| x.to_string()).collect(),
        ColumnBuffer::UInt32(v) => v.into_iter().map(|x| x.to_string()).collect(),
        ColumnBuffer::Int64(v) => v.into_iter().map(|x| x.to_string()).collect(),
        ColumnBuffer::Boolean(v) => v.into_iter().map(|x| x.to_string()).collect(),
        ColumnBuffer::Utf8(v) => v,
        ColumnBuffer::Values(v) => v.into_iter().map(|x| x.to_string()).collect(),
    }
}
