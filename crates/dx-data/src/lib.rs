//! Data handling and the filter engine for the exploration platform
//!
//! Columnar storage, schema inference, pre-binning and the incremental
//! filter pipeline that keeps row membership consistent across every
//! chart consuming a dataset.

pub mod binning;
pub mod column;
pub mod engine;
pub mod export;
pub mod filter;
pub mod schema;
pub mod sources;
pub mod stats;
pub mod store;
pub mod value;

use arrow::error::ArrowError;
use thiserror::Error;

// Re-exports
pub use binning::{BinKind, BinTable, Binner};
pub use column::{Column, StringColumn};
pub use engine::Engine;
pub use export::ExportRows;
pub use filter::{
    FilterChanged, FilterComplete, FilterConfigEntry, FilterEntry, FilterRegistry, FilterSnapshot,
    FilterSpec, Predicate, PredicateKind,
};
pub use schema::{DatasetSchema, FieldType, SchemaEntry, SchemaInferencer};
pub use sources::{ColumnBuffer, CsvSource, DataSource};
pub use stats::FieldStats;
pub use store::{Dataset, DatasetLoadFailed, DatasetLoaded, LoadSummary};
pub use value::{Record, Value};

/// Result alias used throughout the crate
pub type Result<T, E = DataError> = std::result::Result<T, E>;

/// Errors that can occur in data and filter operations
#[derive(Error, Debug)]
pub enum DataError {
    /// Per-field lengths disagree, or field names collide
    #[error("Schema error: {0}")]
    Schema(String),

    /// The input is not a shape the column store can load
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    /// Unknown predicate kind, malformed payload, or predicate/field type mismatch
    #[error("Invalid filter kind for field '{field}': {reason}")]
    InvalidFilterKind { field: String, reason: String },

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Field '{0}' is not numeric")]
    NotNumeric(String),

    #[error("No dataset loaded")]
    NoDataset,

    #[error("Configuration error: {0}")]
    Config(#[source] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(ArrowError),

    #[error("CSV parsing error: {0}")]
    Csv(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DataError {
    pub(crate) fn invalid_filter(field: &str, reason: impl Into<String>) -> Self {
        DataError::InvalidFilterKind {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<csv::Error> for DataError {
    fn from(error: csv::Error) -> Self {
        match error.kind() {
            csv::ErrorKind::Io(io_err) => DataError::Io(std::io::Error::new(io_err.kind(), error.to_string())),
            _ => DataError::Csv(error.to_string()),
        }
    }
}

impl From<ArrowError> for DataError {
    fn from(error: ArrowError) -> Self {
        DataError::Arrow(error)
    }
}
