use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use dx_core::EngineSettings;

use crate::sources::ColumnBuffer;
use crate::value::Value;

/// Storage type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Float,
    UInt8,
    UInt16,
    UInt32,
    String,
    Boolean,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Float | FieldType::UInt8 | FieldType::UInt16 | FieldType::UInt32)
    }

    /// Smallest unsigned width holding `max`, or float when none does
    pub fn unsigned_for(max: f64) -> FieldType {
        if max <= f64::from(u8::MAX) {
            FieldType::UInt8
        } else if max <= f64::from(u16::MAX) {
            FieldType::UInt16
        } else if max <= f64::from(u32::MAX) {
            FieldType::UInt32
        } else {
            FieldType::Float
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Float => "float",
            FieldType::UInt8 => "u8",
            FieldType::UInt16 => "u16",
            FieldType::UInt32 => "u32",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
        }
    }
}

/// Metadata derived once from a field's values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaEntry {
    pub name: String,
    pub field_type: FieldType,
    /// Exact minimum over the full column (numeric fields)
    pub min: Option<f64>,
    /// Exact maximum over the full column (numeric fields)
    pub max: Option<f64>,
    /// Sorted distinct values for low-cardinality numeric fields
    pub distinct_values: Option<Vec<f64>>,
    pub null_count: usize,
    pub row_count: usize,
}

impl SchemaEntry {
    /// Numeric field that should be charted and binned by value
    pub fn is_categorical(&self) -> bool {
        self.distinct_values.is_some()
    }

    fn empty(name: &str, row_count: usize) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::String,
            min: None,
            max: None,
            distinct_values: None,
            null_count: row_count,
            row_count,
        }
    }
}

/// Ordered collection of schema entries
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetSchema {
    fields: Vec<SchemaEntry>,
    #[serde(skip)]
    index: AHashMap<String, usize>,
    row_count: usize,
}

impl DatasetSchema {
    pub fn new(fields: Vec<SchemaEntry>, row_count: usize) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.name.clone(), idx))
            .collect();
        Self { fields, index, row_count }
    }

    pub fn get(&self, name: &str) -> Option<&SchemaEntry> {
        self.index_of(name).map(|idx| &self.fields[idx])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn fields(&self) -> &[SchemaEntry] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }
}

/// A raw cell after token interpretation
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Cell<'a> {
    Null,
    Bool(bool),
    Number(f64),
    Text(&'a str),
}

/// Interprets raw cells using the configured null and boolean tokens
#[derive(Debug, Clone)]
pub(crate) struct CellReader<'s> {
    settings: &'s EngineSettings,
}

impl<'s> CellReader<'s> {
    pub(crate) fn new(settings: &'s EngineSettings) -> Self {
        Self { settings }
    }

    pub(crate) fn read<'a>(&self, value: &'a Value) -> Cell<'a> {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) if n.is_nan() => Cell::Null,
            Value::Number(n) => Cell::Number(*n),
            Value::Text(s) => {
                if self.settings.is_null_token(s) {
                    Cell::Null
                } else if let Ok(n) = s.trim().parse::<f64>() {
                    if n.is_nan() {
                        Cell::Null
                    } else {
                        Cell::Number(n)
                    }
                } else if let Some(b) = self.settings.parse_bool(s) {
                    Cell::Bool(b)
                } else {
                    Cell::Text(s)
                }
            }
        }
    }

    pub(crate) fn number(&self, value: &Value) -> Option<f64> {
        match self.read(value) {
            Cell::Number(n) => Some(n),
            _ => None,
        }
    }

    pub(crate) fn boolean(&self, value: &Value) -> Option<bool> {
        match self.read(value) {
            Cell::Bool(b) => Some(b),
            _ => None,
        }
    }
}

/// Provisional type decided from the sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleType {
    Empty,
    Boolean,
    Float,
    Unsigned,
    String,
}

/// Exact statistics over a numeric column
#[derive(Debug, Clone, PartialEq)]
struct NumericProfile {
    min: Option<f64>,
    max: Option<f64>,
    null_count: usize,
    all_integral: bool,
    distinct: Option<Vec<f64>>,
}

/// Schema detector for analyzing raw columns and determining field types
pub struct SchemaInferencer {
    settings: EngineSettings,
}

impl SchemaInferencer {
    /// Create a new schema inferencer
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    /// Derive the schema entry for one length-validated column
    pub fn infer(&self, name: &str, data: &ColumnBuffer) -> SchemaEntry {
        let row_count = data.len();
        if row_count == 0 {
            return SchemaEntry::empty(name, 0);
        }

        match data {
            ColumnBuffer::Values(cells) => self.infer_cells(name, cells),
            ColumnBuffer::Float32(v) => {
                self.float_entry(name, row_count, self.profile(v.iter().map(|x| nan_to_none(f64::from(*x)))))
            }
            ColumnBuffer::Float64(v) => self.float_entry(
                name,
                row_count,
                self.profile(v.iter().map(|x| nan_to_none(round_f32(*x)))),
            ),
            ColumnBuffer::UInt8(v) => self.integer_entry(name, row_count, v.iter().map(|x| Some(f64::from(*x)))),
            ColumnBuffer::UInt16(v) => self.integer_entry(name, row_count, v.iter().map(|x| Some(f64::from(*x)))),
            ColumnBuffer::UInt32(v) => self.integer_entry(name, row_count, v.iter().map(|x| Some(f64::from(*x)))),
            ColumnBuffer::Int64(v) => self.integer_entry(name, row_count, v.iter().map(|x| Some(*x as f64))),
            ColumnBuffer::Boolean(_) => SchemaEntry {
                name: name.to_string(),
                field_type: FieldType::Boolean,
                min: None,
                max: None,
                distinct_values: None,
                null_count: 0,
                row_count,
            },
            ColumnBuffer::Utf8(_) => SchemaEntry {
                name: name.to_string(),
                field_type: FieldType::String,
                min: None,
                max: None,
                distinct_values: None,
                null_count: 0,
                row_count,
            },
        }
    }

    fn infer_cells(&self, name: &str, cells: &[Value]) -> SchemaEntry {
        let reader = CellReader::new(&self.settings);
        let row_count = cells.len();

        match self.classify_sample(&reader, cells) {
            SampleType::Empty => SchemaEntry::empty(name, row_count),
            SampleType::Boolean => SchemaEntry {
                name: name.to_string(),
                field_type: FieldType::Boolean,
                min: None,
                max: None,
                distinct_values: None,
                null_count: cells.iter().filter(|c| reader.boolean(c).is_none()).count(),
                row_count,
            },
            SampleType::String => SchemaEntry {
                name: name.to_string(),
                field_type: FieldType::String,
                min: None,
                max: None,
                distinct_values: None,
                null_count: cells.iter().filter(|c| reader.read(c) == Cell::Null).count(),
                row_count,
            },
            SampleType::Float => self.float_entry(
                name,
                row_count,
                self.profile(cells.iter().map(|c| reader.number(c).map(round_f32))),
            ),
            SampleType::Unsigned => self.integer_entry(name, row_count, cells.iter().map(|c| reader.number(c))),
        }
    }

    /// Decide the provisional type from the first non-null cells
    fn classify_sample(&self, reader: &CellReader<'_>, cells: &[Value]) -> SampleType {
        let mut sampled = 0usize;
        let mut has_bool = false;
        let mut has_numeric = false;
        let mut has_fraction = false;
        let mut has_text = false;

        for cell in cells.iter().map(|c| reader.read(c)) {
            match cell {
                Cell::Null => continue,
                Cell::Bool(_) => has_bool = true,
                Cell::Number(n) => {
                    has_numeric = true;
                    if n.fract() != 0.0 {
                        has_fraction = true;
                    }
                }
                Cell::Text(_) => has_text = true,
            }
            sampled += 1;
            if sampled >= self.settings.type_sample_size {
                break;
            }
        }

        if sampled == 0 {
            SampleType::Empty
        } else if has_bool && !has_numeric {
            if has_text {
                SampleType::String
            } else {
                SampleType::Boolean
            }
        } else if has_fraction {
            SampleType::Float
        } else if has_numeric && !has_bool && !has_text {
            SampleType::Unsigned
        } else {
            SampleType::String
        }
    }

    /// Full-column min/max, null count and bounded distinct tracking.
    ///
    /// Distinct tracking is abandoned as soon as the categorical threshold is
    /// exceeded, so it costs one small hash probe per row at most.
    fn profile(&self, values: impl Iterator<Item = Option<f64>>) -> NumericProfile {
        let threshold = self.settings.categorical_threshold;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut null_count = 0usize;
        let mut all_integral = true;
        let mut distinct: Option<AHashSet<u64>> = (threshold > 0).then(AHashSet::new);

        for value in values {
            let Some(v) = value else {
                null_count += 1;
                continue;
            };
            min = min.min(v);
            max = max.max(v);
            if all_integral && v.fract() != 0.0 {
                all_integral = false;
            }
            if let Some(set) = distinct.as_mut() {
                // +0.0 and -0.0 are one value
                set.insert((v + 0.0).to_bits());
                if set.len() > threshold {
                    distinct = None;
                }
            }
        }

        let seen_any = min <= max;
        let distinct = distinct.filter(|set| seen_any && !set.is_empty()).map(|set| {
            let mut values: Vec<f64> = set.into_iter().map(f64::from_bits).collect();
            values.sort_by(|a, b| a.total_cmp(b));
            values
        });

        NumericProfile {
            min: seen_any.then_some(min),
            max: seen_any.then_some(max),
            null_count,
            all_integral,
            distinct,
        }
    }

    fn float_entry(&self, name: &str, row_count: usize, profile: NumericProfile) -> SchemaEntry {
        SchemaEntry {
            name: name.to_string(),
            field_type: FieldType::Float,
            min: profile.min,
            max: profile.max,
            distinct_values: profile.distinct,
            null_count: profile.null_count,
            row_count,
        }
    }

    /// Pick the narrowest unsigned width, falling back to float when the
    /// column has gaps, fractions or values outside `0..=u32::MAX`
    fn integer_entry(
        &self,
        name: &str,
        row_count: usize,
        values: impl Iterator<Item = Option<f64>>,
    ) -> SchemaEntry {
        let profile = self.profile(values);
        let field_type = match (profile.min, profile.max) {
            (Some(min), Some(max)) if profile.null_count == 0 && profile.all_integral && min >= 0.0 => {
                FieldType::unsigned_for(max)
            }
            (None, None) => return SchemaEntry::empty(name, row_count),
            _ => FieldType::Float,
        };

        if field_type == FieldType::Float {
            return self.float_entry(name, row_count, to_f32_profile(profile));
        }

        SchemaEntry {
            name: name.to_string(),
            field_type,
            min: profile.min,
            max: profile.max,
            distinct_values: profile.distinct,
            null_count: 0,
            row_count,
        }
    }
}

impl Default for SchemaInferencer {
    fn default() -> Self {
        Self::new(&EngineSettings::default())
    }
}

/// Floats are stored as f32; schema bounds use the stored values
fn round_f32(v: f64) -> f64 {
    f64::from(v as f32)
}

fn nan_to_none(v: f64) -> Option<f64> {
    (!v.is_nan()).then_some(v)
}

/// Rounding is monotone, so rounding the bounds gives the bounds of the
/// rounded column
fn to_f32_profile(profile: NumericProfile) -> NumericProfile {
    let distinct = profile.distinct.map(|values| {
        let mut rounded: Vec<f64> = values.into_iter().map(round_f32).collect();
        rounded.dedup();
        rounded
    });
    NumericProfile {
        min: profile.min.map(round_f32),
        max: profile.max.map(round_f32),
        distinct,
        ..profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> ColumnBuffer {
        ColumnBuffer::Values(values.iter().map(|v| Value::from(*v)).collect())
    }

    fn infer(values: &[&str]) -> SchemaEntry {
        SchemaInferencer::default().infer("field", &cells(values))
    }

    #[test]
    fn test_integral_values_pick_narrowest_width() {
        assert_eq!(infer(&["0", "10", "255"]).field_type, FieldType::UInt8);
        assert_eq!(infer(&["0", "256"]).field_type, FieldType::UInt16);
        assert_eq!(infer(&["70000"]).field_type, FieldType::UInt32);
        assert_eq!(infer(&["5000000000"]).field_type, FieldType::Float);
    }

    #[test]
    fn test_negative_or_missing_integers_fall_back_to_float() {
        assert_eq!(infer(&["-1", "3"]).field_type, FieldType::Float);

        let entry = infer(&["1", "", "3"]);
        assert_eq!(entry.field_type, FieldType::Float);
        assert_eq!(entry.null_count, 1);
    }

    #[test]
    fn test_fraction_makes_float() {
        let entry = infer(&["1", "2.5", "3"]);
        assert_eq!(entry.field_type, FieldType::Float);
        assert_eq!(entry.min, Some(1.0));
        assert_eq!(entry.max, Some(3.0));
    }

    #[test]
    fn test_boolean_tokens() {
        let entry = infer(&["true", "false", "yes", ""]);
        assert_eq!(entry.field_type, FieldType::Boolean);
        assert_eq!(entry.null_count, 1);

        // Numbers mixed with boolean tokens are not boolean
        assert_eq!(infer(&["true", "1"]).field_type, FieldType::String);
    }

    #[test]
    fn test_text_is_string() {
        let entry = infer(&["a", "b", "a"]);
        assert_eq!(entry.field_type, FieldType::String);
        assert_eq!(entry.min, None);
    }

    #[test]
    fn test_empty_column_is_string_with_null_range() {
        let entry = SchemaInferencer::default().infer("e", &ColumnBuffer::Values(Vec::new()));
        assert_eq!(entry.field_type, FieldType::String);
        assert_eq!((entry.min, entry.max), (None, None));

        let all_null = infer(&["", "null"]);
        assert_eq!(all_null.field_type, FieldType::String);
    }

    #[test]
    fn test_min_max_cover_full_column_not_sample() {
        let mut values: Vec<String> = (0..500).map(|i| (i % 50).to_string()).collect();
        values.push("9999".to_string());
        let refs: Vec<&str> = values.iter().map(|s| s.as_str()).collect();

        let entry = infer(&refs);
        assert_eq!(entry.max, Some(9999.0));
        assert_eq!(entry.field_type, FieldType::UInt16);
    }

    #[test]
    fn test_low_cardinality_numeric_is_categorical() {
        let entry = infer(&["3", "1", "2", "1", "3"]);
        assert_eq!(entry.distinct_values, Some(vec![1.0, 2.0, 3.0]));
        assert!(entry.is_categorical());

        let wide: Vec<String> = (0..11).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = wide.iter().map(|s| s.as_str()).collect();
        assert!(!infer(&refs).is_categorical());
    }

    #[test]
    fn test_late_distinct_value_is_tracked() {
        let mut values = vec!["1"; 20_000];
        values.push("7");
        let entry = infer(&values);
        assert_eq!(entry.distinct_values, Some(vec![1.0, 7.0]));
    }

    #[test]
    fn test_typed_buffers() {
        let inferencer = SchemaInferencer::default();
        let entry = inferencer.infer("i", &ColumnBuffer::Int64(vec![0, 40, 300]));
        assert_eq!(entry.field_type, FieldType::UInt16);

        let entry = inferencer.infer("f", &ColumnBuffer::Float64(vec![0.5, f64::NAN]));
        assert_eq!(entry.field_type, FieldType::Float);
        assert_eq!(entry.null_count, 1);

        let entry = inferencer.infer("b", &ColumnBuffer::Boolean(vec![true, false]));
        assert_eq!(entry.field_type, FieldType::Boolean);
    }

    #[test]
    fn test_schema_lookup() {
        let inferencer = SchemaInferencer::default();
        let schema = DatasetSchema::new(
            vec![
                inferencer.infer("a", &cells(&["1"])),
                inferencer.infer("b", &cells(&["x"])),
            ],
            1,
        );
        assert_eq!(schema.index_of("b"), Some(1));
        assert_eq!(schema.get("a").map(|e| e.field_type), Some(FieldType::UInt8));
        assert!(schema.get("c").is_none());
    }
}
