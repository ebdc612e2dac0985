use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use csv::ReaderBuilder;
use tracing::info;

use super::DataSource;
use crate::value::{Record, Value};
use crate::Result;

/// CSV file reader producing row-oriented records.
///
/// Every cell stays text; typing and null detection happen during schema
/// inference.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    delimiter: u8,
    has_headers: bool,
}

impl CsvSource {
    /// Create a new CSV source from a file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
            has_headers: true,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Without headers, fields are named `column_0`, `column_1`, ...
    pub fn with_headers(mut self, has_headers: bool) -> Self {
        self.has_headers = has_headers;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the source name
    pub fn source_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv")
    }

    /// Read the whole file
    pub fn read(&self) -> Result<DataSource> {
        let file = File::open(&self.path)?;
        let records = self.read_records(BufReader::new(file))?;
        info!("Read {} rows from {}", records.len(), self.path.display());
        Ok(DataSource::Records(records))
    }

    /// Read records from any reader using this source's options
    pub fn read_records<R: Read>(&self, reader: R) -> Result<Vec<Record>> {
        let mut csv_reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_headers)
            .from_reader(reader);

        let headers: Vec<String> = if self.has_headers {
            csv_reader.headers()?.iter().map(|h| h.trim().to_string()).collect()
        } else {
            Vec::new()
        };

        let mut records = Vec::new();
        for result in csv_reader.records() {
            let row = result?;
            let record: Record = row
                .iter()
                .enumerate()
                .map(|(idx, cell)| {
                    let name = headers
                        .get(idx)
                        .cloned()
                        .unwrap_or_else(|| format!("column_{}", idx));
                    (name, Value::Text(cell.to_string()))
                })
                .collect();
            records.push(record);
        }

        Ok(records)
    }
}
