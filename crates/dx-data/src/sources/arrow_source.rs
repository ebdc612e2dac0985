//! Arrow record batches as load sources

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, LargeStringArray, StringArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use super::{ColumnBuffer, RawColumn};
use crate::value::Value;
use crate::{DataError, Result};

/// Convert every column of a batch into a buffer.
///
/// Primitive columns without nulls keep their width; integer columns with
/// nulls become floats with NaN; strings and booleans with nulls become
/// untyped cells so inference sees the gaps.
pub fn batch_to_columns(batch: &RecordBatch) -> Result<Vec<RawColumn>> {
    let schema = batch.schema();
    schema
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, array)| {
            Ok(RawColumn {
                name: field.name().clone(),
                data: array_to_buffer(field.name(), array)?,
            })
        })
        .collect()
}

macro_rules! downcast {
    ($array:expr, $ty:ty) => {
        $array
            .as_any()
            .downcast_ref::<$ty>()
            .ok_or_else(|| DataError::UnsupportedSource(format!("unexpected array layout for {}", stringify!($ty))))?
    };
}

macro_rules! integers {
    ($array:expr, $ty:ty, $variant:ident, $convert:expr) => {{
        let typed = downcast!($array, $ty);
        if typed.null_count() == 0 {
            ColumnBuffer::$variant(typed.values().iter().map($convert).collect())
        } else {
            ColumnBuffer::Float64(
                typed
                    .iter()
                    .map(|v| v.map(|v| v as f64).unwrap_or(f64::NAN))
                    .collect(),
            )
        }
    }};
}

fn array_to_buffer(name: &str, array: &ArrayRef) -> Result<ColumnBuffer> {
    let buffer = match array.data_type() {
        DataType::Float32 => {
            let typed = downcast!(array, Float32Array);
            ColumnBuffer::Float32(typed.iter().map(|v| v.unwrap_or(f32::NAN)).collect())
        }
        DataType::Float64 => {
            let typed = downcast!(array, Float64Array);
            ColumnBuffer::Float64(typed.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
        }
        DataType::UInt8 => integers!(array, UInt8Array, UInt8, |v: &u8| *v),
        DataType::UInt16 => integers!(array, UInt16Array, UInt16, |v: &u16| *v),
        DataType::UInt32 => integers!(array, UInt32Array, UInt32, |v: &u32| *v),
        DataType::UInt64 => {
            let typed = downcast!(array, UInt64Array);
            ColumnBuffer::Float64(typed.iter().map(|v| v.map(|v| v as f64).unwrap_or(f64::NAN)).collect())
        }
        DataType::Int8 => integers!(array, Int8Array, Int64, |v: &i8| i64::from(*v)),
        DataType::Int16 => integers!(array, Int16Array, Int64, |v: &i16| i64::from(*v)),
        DataType::Int32 => integers!(array, Int32Array, Int64, |v: &i32| i64::from(*v)),
        DataType::Int64 => integers!(array, Int64Array, Int64, |v: &i64| *v),
        DataType::Boolean => {
            let typed = downcast!(array, BooleanArray);
            if typed.null_count() == 0 {
                ColumnBuffer::Boolean(typed.iter().map(|v| v.unwrap_or(false)).collect())
            } else {
                ColumnBuffer::Values(typed.iter().map(|v| v.map(Value::Bool).unwrap_or(Value::Null)).collect())
            }
        }
        DataType::Utf8 => {
            let typed = downcast!(array, StringArray);
            strings(typed.null_count(), typed.iter())
        }
        DataType::LargeUtf8 => {
            let typed = downcast!(array, LargeStringArray);
            strings(typed.null_count(), typed.iter())
        }
        other => {
            return Err(DataError::UnsupportedSource(format!(
                "field '{}' has unsupported Arrow type {}",
                name, other
            )))
        }
    };
    Ok(buffer)
}

fn strings<'a>(null_count: usize, values: impl Iterator<Item = Option<&'a str>>) -> ColumnBuffer {
    if null_count == 0 {
        ColumnBuffer::Utf8(values.map(|v| v.unwrap_or_default().to_string()).collect())
    } else {
        ColumnBuffer::Values(
            values
                .map(|v| v.map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use arrow::array::ListArray;
    use arrow::datatypes::{Field, Int32Type, Schema};

    #[test]
    fn test_primitive_columns_keep_width() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("u", DataType::UInt8, false),
            Field::new("f", DataType::Float64, true),
            Field::new("s", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(UInt8Array::from(vec![1u8, 2])),
                Arc::new(Float64Array::from(vec![Some(0.5), None])),
                Arc::new(StringArray::from(vec!["a", "b"])),
            ],
        )
        .unwrap();

        let columns = batch_to_columns(&batch).unwrap();
        assert_eq!(columns[0].data, ColumnBuffer::UInt8(vec![1, 2]));
        match &columns[1].data {
            ColumnBuffer::Float64(v) => assert!(v[0] == 0.5 && v[1].is_nan()),
            other => panic!("unexpected buffer {:?}", other),
        }
        assert_eq!(columns[2].data, ColumnBuffer::Utf8(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_nullable_integers_become_floats() {
        let schema = Arc::new(Schema::new(vec![Field::new("i", DataType::Int32, true)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![Some(3), None]))]).unwrap();

        let columns = batch_to_columns(&batch).unwrap();
        assert!(matches!(&columns[0].data, ColumnBuffer::Float64(v) if v[0] == 3.0 && v[1].is_nan()));
    }

    #[test]
    fn test_nested_type_is_unsupported() {
        let list = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![Some(vec![Some(1)])]);
        let schema = Arc::new(Schema::new(vec![Field::new("l", list.data_type().clone(), true)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(list)]).unwrap();

        assert!(matches!(batch_to_columns(&batch), Err(DataError::UnsupportedSource(_))));
    }
}
