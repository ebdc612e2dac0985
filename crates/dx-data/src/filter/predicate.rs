//! Filter predicates and their wire form

use std::fmt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::schema::FieldType;
use crate::value::Value;
use crate::{DataError, Result};

/// The closed set of predicate kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateKind {
    Range,
    CategorySet,
    CircularRange,
    Interval,
}

impl PredicateKind {
    /// Parse a kind name, accepting the short aliases used in configs
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "range" => Some(PredicateKind::Range),
            "category-set" | "category" | "categories" => Some(PredicateKind::CategorySet),
            "circular-range" | "circular" => Some(PredicateKind::CircularRange),
            "interval" | "time" => Some(PredicateKind::Interval),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PredicateKind::Range => "range",
            PredicateKind::CategorySet => "category-set",
            PredicateKind::CircularRange => "circular-range",
            PredicateKind::Interval => "interval",
        }
    }
}

impl fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated row test on one field.
///
/// Every interval is half-open: the lower bound passes, the upper does not.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `lo <= v < hi`
    Range { lo: f64, hi: f64 },
    /// `v` is one of the accepted values
    CategorySet(Vec<Value>),
    /// `[start, end)` in degrees, wrapping through 0 when `start > end`
    CircularRange { start: f64, end: f64 },
    /// Time-like `[start, end)`, same semantics as a range
    Interval { start: f64, end: f64 },
}

impl Predicate {
    pub fn range(lo: f64, hi: f64) -> Self {
        Predicate::Range { lo, hi }
    }

    pub fn category_set<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut accepted: Vec<Value> = Vec::new();
        for value in values {
            let value = value.into();
            if !accepted.contains(&value) {
                accepted.push(value);
            }
        }
        Predicate::CategorySet(accepted)
    }

    pub fn circular(start: f64, end: f64) -> Self {
        Predicate::CircularRange { start, end }
    }

    pub fn interval(start: f64, end: f64) -> Self {
        Predicate::Interval { start, end }
    }

    pub fn kind(&self) -> PredicateKind {
        match self {
            Predicate::Range { .. } => PredicateKind::Range,
            Predicate::CategorySet(_) => PredicateKind::CategorySet,
            Predicate::CircularRange { .. } => PredicateKind::CircularRange,
            Predicate::Interval { .. } => PredicateKind::Interval,
        }
    }

    /// Check the payload and that the predicate can apply to a field of `field_type`
    pub fn validate(&self, field: &str, field_type: FieldType) -> Result<()> {
        match self {
            Predicate::Range { lo, hi } | Predicate::Interval { start: lo, end: hi } => {
                require_numeric(field, field_type, self.kind())?;
                require_finite(field, &[*lo, *hi])?;
                if lo > hi {
                    return Err(DataError::invalid_filter(
                        field,
                        format!("{} bounds out of order: {} > {}", self.kind(), lo, hi),
                    ));
                }
            }
            Predicate::CircularRange { start, end } => {
                require_numeric(field, field_type, self.kind())?;
                require_finite(field, &[*start, *end])?;
            }
            Predicate::CategorySet(values) => {
                for value in values {
                    let fits = match value {
                        Value::Number(n) => field_type.is_numeric() && !n.is_nan(),
                        Value::Text(_) => field_type == FieldType::String,
                        Value::Bool(_) => field_type == FieldType::Boolean,
                        Value::Null => false,
                    };
                    if !fits {
                        return Err(DataError::invalid_filter(
                            field,
                            format!("{} value {} does not match a {} field", self.kind(), value.kind_name(), field_type.name()),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Row test on a single value.
    ///
    /// The evaluator compiles predicates against the column storage instead;
    /// this is the reference semantics used for checks and export.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Predicate::Range { lo, hi } | Predicate::Interval { start: lo, end: hi } => match value {
                Value::Number(v) => *lo <= *v && *v < *hi,
                _ => false,
            },
            Predicate::CircularRange { start, end } => match value {
                Value::Number(v) => in_circular_range(*v, *start, *end),
                _ => false,
            },
            Predicate::CategorySet(values) => !value.is_null() && values.contains(value),
        }
    }

    /// Build from the user-facing `{type, value}` form
    pub fn from_spec(field: &str, spec: &FilterSpec) -> Result<Self> {
        let kind = PredicateKind::parse(&spec.kind)
            .ok_or_else(|| DataError::invalid_filter(field, format!("unknown filter type '{}'", spec.kind)))?;

        match kind {
            PredicateKind::Range => bounds(field, kind, &spec.value).map(|(lo, hi)| Predicate::range(lo, hi)),
            PredicateKind::Interval => bounds(field, kind, &spec.value).map(|(s, e)| Predicate::interval(s, e)),
            PredicateKind::CircularRange => bounds(field, kind, &spec.value).map(|(s, e)| Predicate::circular(s, e)),
            PredicateKind::CategorySet => {
                let items = spec
                    .value
                    .as_array()
                    .ok_or_else(|| DataError::invalid_filter(field, "category-set expects an array of values"))?;
                let values = items
                    .iter()
                    .map(|item| match Value::from_json(item) {
                        Some(Value::Null) | None => Err(DataError::invalid_filter(
                            field,
                            format!("category-set value {} is not a scalar", item),
                        )),
                        Some(value) => Ok(value),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Predicate::category_set(values))
            }
        }
    }

    /// Payload in the form [`Predicate::from_spec`] accepts
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Predicate::Range { lo, hi } => json!([lo, hi]),
            Predicate::CircularRange { start, end } | Predicate::Interval { start, end } => json!([start, end]),
            Predicate::CategorySet(values) => serde_json::Value::Array(values.iter().map(Value::to_json).collect()),
        }
    }

    pub fn to_spec(&self, enabled: bool) -> FilterSpec {
        FilterSpec {
            kind: self.kind().as_str().to_string(),
            value: self.payload(),
            enabled,
        }
    }
}

/// Circular containment on `[start, end)`, wrapping when `start > end`
pub fn in_circular_range<T: PartialOrd>(v: T, start: T, end: T) -> bool {
    if start <= end {
        start <= v && v < end
    } else {
        v >= start || v < end
    }
}

fn require_numeric(field: &str, field_type: FieldType, kind: PredicateKind) -> Result<()> {
    if field_type.is_numeric() {
        Ok(())
    } else {
        Err(DataError::invalid_filter(
            field,
            format!("{} filter needs a numeric field, found {}", kind, field_type.name()),
        ))
    }
}

fn require_finite(field: &str, bounds: &[f64]) -> Result<()> {
    if bounds.iter().all(|b| b.is_finite()) {
        Ok(())
    } else {
        Err(DataError::invalid_filter(field, "bounds must be finite numbers"))
    }
}

/// Accepts `[a, b]` or an object with `lo/hi`, `min/max` or `start/end`
fn bounds(field: &str, kind: PredicateKind, payload: &serde_json::Value) -> Result<(f64, f64)> {
    let pair = match payload {
        serde_json::Value::Array(items) if items.len() == 2 => Some((items[0].as_f64(), items[1].as_f64())),
        serde_json::Value::Object(map) => [("lo", "hi"), ("min", "max"), ("start", "end")]
            .iter()
            .find(|(a, b)| map.contains_key(*a) && map.contains_key(*b))
            .map(|(a, b)| (map[*a].as_f64(), map[*b].as_f64())),
        _ => None,
    };
    match pair {
        Some((Some(a), Some(b))) => Ok((a, b)),
        _ => Err(DataError::invalid_filter(
            field,
            format!("{} expects [lo, hi] or {{\"lo\", \"hi\"}}, got {}", kind, payload),
        )),
    }
}

fn enabled_by_default() -> bool {
    true
}

/// User-facing filter description: `{"type": "range", "value": [10, 30], "enabled": true}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl FilterSpec {
    pub fn new(kind: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            value,
            enabled: true,
        }
    }

    pub fn range(lo: f64, hi: f64) -> Self {
        Predicate::range(lo, hi).to_spec(true)
    }

    pub fn circular(start: f64, end: f64) -> Self {
        Predicate::circular(start, end).to_spec(true)
    }

    pub fn interval(start: f64, end: f64) -> Self {
        Predicate::interval(start, end).to_spec(true)
    }

    pub fn categories<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::category_set(values).to_spec(true)
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// One entry of an exported filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfigEntry {
    pub field: String,
    #[serde(flatten)]
    pub spec: FilterSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases() {
        assert_eq!(PredicateKind::parse("Range"), Some(PredicateKind::Range));
        assert_eq!(PredicateKind::parse("category"), Some(PredicateKind::CategorySet));
        assert_eq!(PredicateKind::parse("circular"), Some(PredicateKind::CircularRange));
        assert_eq!(PredicateKind::parse("time"), Some(PredicateKind::Interval));
        assert_eq!(PredicateKind::parse("regex"), None);
    }

    #[test]
    fn test_spec_payload_shapes() {
        let spec = FilterSpec::new("range", json!({"min": 1, "max": 4}));
        assert_eq!(Predicate::from_spec("v", &spec).unwrap(), Predicate::range(1.0, 4.0));

        let spec = FilterSpec::new("circular-range", json!([350, 10]));
        assert_eq!(Predicate::from_spec("a", &spec).unwrap(), Predicate::circular(350.0, 10.0));

        let spec = FilterSpec::new("category-set", json!(["a", "b", "a"]));
        assert_eq!(Predicate::from_spec("c", &spec).unwrap(), Predicate::category_set(["a", "b"]));
    }

    #[test]
    fn test_unknown_kind_and_bad_payload_rejected() {
        let err = Predicate::from_spec("v", &FilterSpec::new("regex", json!(".*"))).unwrap_err();
        assert!(matches!(err, DataError::InvalidFilterKind { .. }));

        let err = Predicate::from_spec("v", &FilterSpec::new("range", json!([1]))).unwrap_err();
        assert!(matches!(err, DataError::InvalidFilterKind { .. }));

        let err = Predicate::from_spec("c", &FilterSpec::new("category", json!([["nested"]]))).unwrap_err();
        assert!(matches!(err, DataError::InvalidFilterKind { .. }));
    }

    #[test]
    fn test_validate_against_field_type() {
        assert!(Predicate::range(0.0, 1.0).validate("v", FieldType::UInt8).is_ok());
        assert!(Predicate::range(0.0, 1.0).validate("c", FieldType::String).is_err());
        assert!(Predicate::range(2.0, 1.0).validate("v", FieldType::Float).is_err());
        assert!(Predicate::range(0.0, f64::INFINITY).validate("v", FieldType::Float).is_err());
        assert!(Predicate::circular(350.0, 10.0).validate("a", FieldType::Float).is_ok());
        assert!(Predicate::category_set(["a"]).validate("c", FieldType::String).is_ok());
        assert!(Predicate::category_set(["a"]).validate("v", FieldType::UInt8).is_err());
        assert!(Predicate::category_set([1.0]).validate("v", FieldType::UInt16).is_ok());
        assert!(Predicate::category_set([true]).validate("ok", FieldType::Boolean).is_ok());
    }

    #[test]
    fn test_reference_matching_is_half_open() {
        let range = Predicate::range(10.0, 30.0);
        assert!(range.matches(&Value::Number(10.0)));
        assert!(!range.matches(&Value::Number(30.0)));
        assert!(!range.matches(&Value::Null));

        let wrap = Predicate::circular(350.0, 10.0);
        assert!(wrap.matches(&Value::Number(355.0)));
        assert!(wrap.matches(&Value::Number(5.0)));
        assert!(!wrap.matches(&Value::Number(10.0)));
        assert!(!wrap.matches(&Value::Number(180.0)));
    }

    #[test]
    fn test_config_entry_json_form() {
        let entry = FilterConfigEntry {
            field: "v".to_string(),
            spec: FilterSpec::range(10.0, 30.0).enabled(false),
        };
        let text = serde_json::to_value(&entry).unwrap();
        assert_eq!(text, json!({"field": "v", "type": "range", "value": [10.0, 30.0], "enabled": false}));

        let parsed: FilterConfigEntry =
            serde_json::from_value(json!({"field": "c", "type": "category", "value": ["a"]})).unwrap();
        assert!(parsed.spec.enabled);
    }
}
