//! JSON documents as load sources

use serde_json::Value as Json;

use super::{records_to_columns, ColumnBuffer, RawColumn};
use crate::value::{Record, Value};
use crate::{DataError, Result};

/// Read a JSON document as a table.
///
/// An array of objects is row-oriented; an object whose members are all
/// arrays is columnar. Anything else, or any nested cell, is unsupported.
pub fn json_to_columns(document: Json) -> Result<Vec<RawColumn>> {
    match document {
        Json::Array(rows) => {
            let mut records = Vec::with_capacity(rows.len());
            for (idx, row) in rows.into_iter().enumerate() {
                let Json::Object(object) = row else {
                    return Err(DataError::UnsupportedSource(format!(
                        "row {} is not an object",
                        idx
                    )));
                };
                let mut record = Record::with_capacity(object.len());
                for (name, cell) in object {
                    let value = scalar(&name, &cell)?;
                    record.insert(name, value);
                }
                records.push(record);
            }
            Ok(records_to_columns(records))
        }
        Json::Object(object) => object
            .into_iter()
            .map(|(name, cells)| {
                let Json::Array(cells) = cells else {
                    return Err(DataError::UnsupportedSource(format!(
                        "member '{}' is not an array",
                        name
                    )));
                };
                let values = cells
                    .iter()
                    .map(|cell| scalar(&name, cell))
                    .collect::<Result<Vec<_>>>()?;
                Ok(RawColumn {
                    name,
                    data: ColumnBuffer::Values(values),
                })
            })
            .collect(),
        other => Err(DataError::UnsupportedSource(format!(
            "expected an array of records or an object of columns, got {}",
            json_kind(&other)
        ))),
    }
}

fn scalar(field: &str, cell: &Json) -> Result<Value> {
    Value::from_json(cell).ok_or_else(|| {
        DataError::UnsupportedSource(format!("field '{}' contains a nested {}", field, json_kind(cell)))
    })
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_of_objects() {
        let columns = json_to_columns(json!([{"v": 1, "c": "a"}, {"v": 2}])).unwrap();
        assert_eq!(columns.len(), 2);
        let c = columns.iter().find(|c| c.name == "c").unwrap();
        assert_eq!(c.data, ColumnBuffer::Values(vec![Value::from("a"), Value::Null]));
    }

    #[test]
    fn test_object_of_arrays() {
        let columns = json_to_columns(json!({"v": [0, 10, 20], "ok": [true, false, true]})).unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].data.len(), 3);
    }

    #[test]
    fn test_object_columns_keep_document_order() {
        let columns = json_to_columns(json!({"zeta": [1], "alpha": [2], "mid": [3]})).unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_unsupported_shapes() {
        for doc in [json!(42), json!("text"), json!([1, 2]), json!({"v": 1}), json!([{"v": [1]}])] {
            assert!(
                matches!(json_to_columns(doc.clone()), Err(DataError::UnsupportedSource(_))),
                "{doc} should be rejected"
            );
        }
    }
}
