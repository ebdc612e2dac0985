//! Filtered row export
//!
//! [`ExportRows`] pairs a dataset with one committed membership vector. It
//! is a lazy, finite, restartable sequence: every iteration reads the
//! stored columns again, in original row order, yielding only passing rows.

use std::io::Write;
use std::sync::Arc;
use tracing::debug;

use crate::filter::FilterSnapshot;
use crate::store::Dataset;
use crate::value::{Record, Value};
use crate::Result;

/// Passing rows of a dataset, projected onto a set of fields
#[derive(Debug, Clone)]
pub struct ExportRows {
    dataset: Arc<Dataset>,
    membership: Arc<[bool]>,
    filtered_count: usize,
    fields: Vec<(String, usize)>,
}

impl ExportRows {
    /// Export `fields` (all fields when `None`) of the rows `snapshot` passes
    pub fn new(dataset: Arc<Dataset>, snapshot: &FilterSnapshot, fields: Option<&[&str]>) -> Result<Self> {
        let fields = match fields {
            Some(names) => names
                .iter()
                .map(|name| dataset.field_index(name).map(|idx| (name.to_string(), idx)))
                .collect::<Result<Vec<_>>>()?,
            None => dataset
                .schema()
                .names()
                .enumerate()
                .map(|(idx, name)| (name.to_string(), idx))
                .collect(),
        };
        Ok(Self {
            dataset,
            membership: snapshot.membership.clone(),
            filtered_count: snapshot.filtered_count,
            fields,
        })
    }

    /// Number of rows the sequence yields
    pub fn len(&self) -> usize {
        self.filtered_count
    }

    pub fn is_empty(&self) -> bool {
        self.filtered_count == 0
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// A fresh pass over the passing rows
    pub fn iter(&self) -> ExportIter<'_> {
        ExportIter {
            rows: self,
            next_row: 0,
            remaining: self.filtered_count,
        }
    }

    fn record(&self, row: usize) -> Record {
        self.fields
            .iter()
            .map(|(name, idx)| (name.clone(), self.dataset.column_at(*idx).get(row)))
            .collect()
    }

    /// Write the rows as CSV with a header line
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.field_names())?;

        let mut written = 0;
        for record in self.iter() {
            csv_writer.write_record(record.values().map(Value::to_string))?;
            written += 1;
        }
        csv_writer.flush()?;
        debug!("Exported {} rows x {} fields as CSV", written, self.fields.len());
        Ok(written)
    }
}

/// Iterator over [`ExportRows`]
pub struct ExportIter<'a> {
    rows: &'a ExportRows,
    next_row: usize,
    remaining: usize,
}

impl Iterator for ExportIter<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let membership = &self.rows.membership;
        while self.next_row < membership.len() {
            let row = self.next_row;
            self.next_row += 1;
            if membership[row] {
                self.remaining = self.remaining.saturating_sub(1);
                return Some(self.rows.record(row));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a> IntoIterator for &'a ExportRows {
    type Item = Record;
    type IntoIter = ExportIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::DataSource;
    use dx_core::EngineSettings;
    use serde_json::json;

    fn rows(fields: Option<&[&str]>) -> Result<ExportRows> {
        let source = DataSource::Json(json!({
            "v": [0, 10, 20, 30, 40],
            "c": ["a", "b", "a", "c", "b"],
        }));
        let dataset = Arc::new(Dataset::load(source, &EngineSettings::default()).unwrap().0);
        let snapshot = FilterSnapshot {
            generation: 1,
            membership: vec![false, true, true, false, true].into(),
            filtered_count: 3,
            total_count: 5,
            filters: Vec::new(),
        };
        ExportRows::new(dataset, &snapshot, fields)
    }

    #[test]
    fn test_only_passing_rows_in_order() {
        let export = rows(Some(&["v"][..])).unwrap();
        let values: Vec<Value> = export.iter().map(|r| r["v"].clone()).collect();
        assert_eq!(values, vec![Value::Number(10.0), Value::Number(20.0), Value::Number(40.0)]);
        assert_eq!(export.iter().size_hint(), (3, Some(3)));
    }

    #[test]
    fn test_restartable() {
        let export = rows(None).unwrap();
        let first: Vec<Record> = export.iter().collect();
        let second: Vec<Record> = (&export).into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), export.len());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(rows(Some(&["nope"][..])), Err(crate::DataError::FieldNotFound(_))));
    }

    #[test]
    fn test_write_csv() {
        let export = rows(Some(&["c", "v"][..])).unwrap();
        let mut out = Vec::new();
        assert_eq!(export.write_csv(&mut out).unwrap(), 3);
        assert_eq!(String::from_utf8(out).unwrap(), "c,v\nb,10\na,20\nb,40\n");
    }
}
