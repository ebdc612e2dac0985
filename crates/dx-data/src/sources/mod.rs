//! Input shapes accepted by the column store
//!
//! Loaders hand the store either row-oriented records or columnar buffers.
//! Arrow record batches and JSON documents are normalised into the same
//! columnar form before schema inference runs.

pub mod arrow_source;
pub mod csv_source;
pub mod json_source;

use indexmap::IndexMap;

use crate::value::{Record, Value};
use crate::{DataError, Result};

pub use csv_source::CsvSource;

/// Data handed to [`crate::Dataset::load`]
#[derive(Debug, Clone)]
pub enum DataSource {
    /// Row-oriented records; a key missing from a record reads as null
    Records(Vec<Record>),
    /// Named columnar buffers, one per field
    Columns(Vec<(String, ColumnBuffer)>),
    /// An Arrow record batch
    Arrow(arrow::record_batch::RecordBatch),
    /// A JSON array of objects, or an object of arrays
    Json(serde_json::Value),
}

/// An already-columnar buffer for one field
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnBuffer {
    /// Floats; NaN is missing
    Float32(Vec<f32>),
    /// Floats; NaN is missing
    Float64(Vec<f64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    Boolean(Vec<bool>),
    Utf8(Vec<String>),
    /// Untyped cells whose type is inferred
    Values(Vec<Value>),
}

impl ColumnBuffer {
    pub fn len(&self) -> usize {
        match self {
            ColumnBuffer::Float32(v) => v.len(),
            ColumnBuffer::Float64(v) => v.len(),
            ColumnBuffer::UInt8(v) => v.len(),
            ColumnBuffer::UInt16(v) => v.len(),
            ColumnBuffer::UInt32(v) => v.len(),
            ColumnBuffer::Int64(v) => v.len(),
            ColumnBuffer::Boolean(v) => v.len(),
            ColumnBuffer::Utf8(v) => v.len(),
            ColumnBuffer::Values(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named buffer after normalisation
#[derive(Debug, Clone)]
pub struct RawColumn {
    pub name: String,
    pub data: ColumnBuffer,
}

impl DataSource {
    /// Short description used in logs and load events
    pub fn kind_name(&self) -> &'static str {
        match self {
            DataSource::Records(_) => "records",
            DataSource::Columns(_) => "columns",
            DataSource::Arrow(_) => "arrow",
            DataSource::Json(_) => "json",
        }
    }

    /// Normalise into named columns.
    ///
    /// Fails with [`DataError::Schema`] when field names repeat or buffer
    /// lengths disagree, and with [`DataError::UnsupportedSource`] when the
    /// input cannot be read as a table.
    pub fn into_columns(self) -> Result<Vec<RawColumn>> {
        let columns = match self {
            DataSource::Records(records) => records_to_columns(records),
            DataSource::Columns(columns) => columns
                .into_iter()
                .map(|(name, data)| RawColumn { name, data })
                .collect(),
            DataSource::Arrow(batch) => arrow_source::batch_to_columns(&batch)?,
            DataSource::Json(document) => json_source::json_to_columns(document)?,
        };

        validate_columns(&columns)?;
        Ok(columns)
    }
}

/// Transpose records into one `Values` buffer per field.
///
/// Field order is order of first appearance across the records.
pub fn records_to_columns(records: Vec<Record>) -> Vec<RawColumn> {
    let row_count = records.len();
    let mut fields: IndexMap<String, Vec<Value>> = IndexMap::new();

    for (row, record) in records.into_iter().enumerate() {
        for (name, value) in record {
            let cells = fields.entry(name).or_insert_with(|| vec![Value::Null; row_count]);
            cells[row] = value;
        }
    }

    fields
        .into_iter()
        .map(|(name, cells)| RawColumn {
            name,
            data: ColumnBuffer::Values(cells),
        })
        .collect()
}

fn validate_columns(columns: &[RawColumn]) -> Result<()> {
    let mut seen = ahash::AHashSet::new();
    for column in columns {
        if !seen.insert(column.name.as_str()) {
            return Err(DataError::Schema(format!("duplicate field name '{}'", column.name)));
        }
    }

    if let Some(first) = columns.first() {
        let expected = first.data.len();
        if let Some(bad) = columns.iter().find(|c| c.data.len() != expected) {
            return Err(DataError::Schema(format!(
                "field '{}' has {} rows but field '{}' has {}",
                bad.name,
                bad.data.len(),
                first.name,
                expected
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_records_transpose_with_missing_keys() {
        let records = vec![
            record(&[("a", Value::Number(1.0)), ("b", Value::from("x"))]),
            record(&[("a", Value::Number(2.0))]),
            record(&[("c", Value::Bool(true))]),
        ];

        let columns = DataSource::Records(records).into_columns().unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(
            columns[1].data,
            ColumnBuffer::Values(vec![Value::from("x"), Value::Null, Value::Null])
        );
        assert!(columns.iter().all(|c| c.data.len() == 3));
    }

    #[test]
    fn test_mismatched_lengths_is_schema_error() {
        let source = DataSource::Columns(vec![
            ("a".to_string(), ColumnBuffer::Float64(vec![1.0, 2.0])),
            ("b".to_string(), ColumnBuffer::UInt8(vec![1])),
        ]);
        assert!(matches!(source.into_columns(), Err(DataError::Schema(_))));
    }

    #[test]
    fn test_duplicate_names_is_schema_error() {
        let source = DataSource::Columns(vec![
            ("a".to_string(), ColumnBuffer::UInt8(vec![1])),
            ("a".to_string(), ColumnBuffer::UInt8(vec![2])),
        ]);
        assert!(matches!(source.into_columns(), Err(DataError::Schema(_))));
    }
}
