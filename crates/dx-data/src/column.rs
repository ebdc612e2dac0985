//! Fixed-width column storage
//!
//! A dataset stores each field in the most compact representation its
//! schema allows. `Column` is a closed sum over those representations with
//! a uniform indexed accessor, so hot loops match on the variant once and
//! then run over a plain slice.

use std::sync::Arc;
use ahash::AHashMap;

use crate::schema::FieldType;
use crate::value::Value;

/// Typed storage for one field
#[derive(Debug, Clone)]
pub enum Column {
    /// Floats; missing values are NaN
    Float32(Vec<f32>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    Utf8(StringColumn),
    Boolean(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float32(data) => data.len(),
            Column::UInt8(data) => data.len(),
            Column::UInt16(data) => data.len(),
            Column::UInt32(data) => data.len(),
            Column::Utf8(data) => data.len(),
            Column::Boolean(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The schema type this storage corresponds to
    pub fn field_type(&self) -> FieldType {
        match self {
            Column::Float32(_) => FieldType::Float,
            Column::UInt8(_) => FieldType::UInt8,
            Column::UInt16(_) => FieldType::UInt16,
            Column::UInt32(_) => FieldType::UInt32,
            Column::Utf8(_) => FieldType::String,
            Column::Boolean(_) => FieldType::Boolean,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.field_type().is_numeric()
    }

    /// Value at `row` as a record cell
    pub fn get(&self, row: usize) -> Value {
        match self {
            Column::Float32(data) => {
                let v = data[row];
                if v.is_nan() {
                    Value::Null
                } else {
                    Value::Number(f64::from(v))
                }
            }
            Column::UInt8(data) => Value::Number(f64::from(data[row])),
            Column::UInt16(data) => Value::Number(f64::from(data[row])),
            Column::UInt32(data) => Value::Number(f64::from(data[row])),
            Column::Utf8(data) => Value::Text(data.value(row).to_string()),
            Column::Boolean(data) => Value::Bool(data[row]),
        }
    }

    /// Numeric value at `row`; `None` for non-numeric columns and missing floats
    pub fn number(&self, row: usize) -> Option<f64> {
        match self {
            Column::Float32(data) => Some(f64::from(data[row])).filter(|v| !v.is_nan()),
            Column::UInt8(data) => Some(f64::from(data[row])),
            Column::UInt16(data) => Some(f64::from(data[row])),
            Column::UInt32(data) => Some(f64::from(data[row])),
            Column::Utf8(_) | Column::Boolean(_) => None,
        }
    }

    /// Approximate heap footprint in bytes
    pub fn memory_size(&self) -> usize {
        match self {
            Column::Float32(data) => data.len() * 4,
            Column::UInt8(data) => data.len(),
            Column::UInt16(data) => data.len() * 2,
            Column::UInt32(data) => data.len() * 4,
            Column::Utf8(data) => data.memory_size(),
            Column::Boolean(data) => data.len(),
        }
    }
}

/// Dictionary-encoded strings.
///
/// The dictionary is sorted ascending, so code order is value order and a
/// code doubles as the categorical bucket index.
#[derive(Debug, Clone, Default)]
pub struct StringColumn {
    dictionary: Vec<Arc<str>>,
    codes: Vec<u32>,
}

impl StringColumn {
    /// Encode a sequence of strings
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lookup: AHashMap<Arc<str>, u32> = AHashMap::new();
        let mut first_seen: Vec<Arc<str>> = Vec::new();
        let mut codes = Vec::new();

        for value in values {
            let value = value.as_ref();
            let code = match lookup.get(value) {
                Some(code) => *code,
                None => {
                    let key: Arc<str> = Arc::from(value);
                    let code = first_seen.len() as u32;
                    lookup.insert(key.clone(), code);
                    first_seen.push(key);
                    code
                }
            };
            codes.push(code);
        }

        // Re-number so that codes follow sorted order
        let mut order: Vec<u32> = (0..first_seen.len() as u32).collect();
        order.sort_by(|a, b| first_seen[*a as usize].cmp(&first_seen[*b as usize]));
        let mut remap = vec![0u32; first_seen.len()];
        for (sorted_code, provisional) in order.iter().enumerate() {
            remap[*provisional as usize] = sorted_code as u32;
        }
        for code in codes.iter_mut() {
            *code = remap[*code as usize];
        }
        let dictionary = order.into_iter().map(|c| first_seen[c as usize].clone()).collect();

        Self { dictionary, codes }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn value(&self, row: usize) -> &str {
        &self.dictionary[self.codes[row] as usize]
    }

    pub fn code(&self, row: usize) -> u32 {
        self.codes[row]
    }

    pub fn codes(&self) -> &[u32] {
        &self.codes
    }

    /// Distinct values in ascending order
    pub fn dictionary(&self) -> &[Arc<str>] {
        &self.dictionary
    }

    /// Code for a value, if it occurs in the column
    pub fn code_of(&self, value: &str) -> Option<u32> {
        self.dictionary
            .binary_search_by(|probe| probe.as_ref().cmp(value))
            .ok()
            .map(|idx| idx as u32)
    }

    fn memory_size(&self) -> usize {
        self.codes.len() * 4 + self.dictionary.iter().map(|s| s.len() + 16).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_column_sorted_dictionary() {
        let column = StringColumn::from_values(["b", "a", "c", "a", "b"]);

        let dict: Vec<&str> = column.dictionary().iter().map(|s| s.as_ref()).collect();
        assert_eq!(dict, vec!["a", "b", "c"]);
        assert_eq!(column.codes(), &[1, 0, 2, 0, 1]);
        assert_eq!(column.value(3), "a");
        assert_eq!(column.code_of("c"), Some(2));
        assert_eq!(column.code_of("z"), None);
    }

    #[test]
    fn test_float_nan_reads_as_null() {
        let column = Column::Float32(vec![1.5, f32::NAN]);
        assert_eq!(column.get(0), Value::Number(1.5));
        assert_eq!(column.get(1), Value::Null);
        assert_eq!(column.number(1), None);
    }

    #[test]
    fn test_uniform_access() {
        let column = Column::UInt16(vec![300, 7]);
        assert_eq!(column.len(), 2);
        assert_eq!(column.field_type(), FieldType::UInt16);
        assert_eq!(column.number(0), Some(300.0));
        assert_eq!(Column::Boolean(vec![true]).get(0), Value::Bool(true));
    }
}
