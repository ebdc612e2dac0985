//! Filter registry
//!
//! The set of predicates the user wants applied, keyed by field. Every
//! mutation is validated against the dataset schema first, so a rejected
//! call leaves the registry exactly as it was.

use std::sync::Arc;
use indexmap::IndexMap;
use tracing::debug;

use super::predicate::{FilterConfigEntry, FilterSpec, Predicate};
use crate::schema::DatasetSchema;
use crate::{DataError, Result};

/// A registered predicate and whether it currently applies
#[derive(Debug, Clone, PartialEq)]
pub struct FilterEntry {
    pub predicate: Predicate,
    pub enabled: bool,
}

/// Field to predicate map in insertion order
#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    schema: Arc<DatasetSchema>,
    filters: IndexMap<String, FilterEntry>,
}

impl FilterRegistry {
    pub fn new(schema: Arc<DatasetSchema>) -> Self {
        Self {
            schema,
            filters: IndexMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<DatasetSchema> {
        &self.schema
    }

    /// Add or replace the predicate for `field`
    pub fn set(&mut self, field: &str, predicate: Predicate, enabled: bool) -> Result<()> {
        let entry = self
            .schema
            .get(field)
            .ok_or_else(|| DataError::FieldNotFound(field.to_string()))?;
        predicate.validate(field, entry.field_type)?;

        debug!("Filter set on '{}': {:?} (enabled: {})", field, predicate, enabled);
        self.filters.insert(field.to_string(), FilterEntry { predicate, enabled });
        Ok(())
    }

    /// Parse and add a user-facing spec
    pub fn set_spec(&mut self, field: &str, spec: &FilterSpec) -> Result<()> {
        let predicate = Predicate::from_spec(field, spec)?;
        self.set(field, predicate, spec.enabled)
    }

    /// Remove the predicate for `field`; `false` when none was registered
    pub fn remove(&mut self, field: &str) -> Result<bool> {
        if self.schema.get(field).is_none() {
            return Err(DataError::FieldNotFound(field.to_string()));
        }
        Ok(self.filters.shift_remove(field).is_some())
    }

    /// Toggle a registered predicate; `false` when the flag was already set that way
    pub fn set_enabled(&mut self, field: &str, enabled: bool) -> Result<bool> {
        let entry = self
            .filters
            .get_mut(field)
            .ok_or_else(|| DataError::FieldNotFound(field.to_string()))?;
        let changed = entry.enabled != enabled;
        entry.enabled = enabled;
        Ok(changed)
    }

    pub fn get(&self, field: &str) -> Option<&FilterEntry> {
        self.filters.get(field)
    }

    /// Enabled predicates in insertion order
    pub fn active(&self) -> impl Iterator<Item = (&str, &Predicate)> {
        self.filters
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(field, entry)| (field.as_str(), &entry.predicate))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterEntry)> {
        self.filters.iter().map(|(field, entry)| (field.as_str(), entry))
    }

    /// Drop every predicate; `false` when there were none
    pub fn clear(&mut self) -> bool {
        let had_filters = !self.filters.is_empty();
        self.filters.clear();
        had_filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Serialisable form of every entry, enabled or not
    pub fn to_specs(&self) -> Vec<FilterConfigEntry> {
        self.filters
            .iter()
            .map(|(field, entry)| FilterConfigEntry {
                field: field.clone(),
                spec: entry.predicate.to_spec(entry.enabled),
            })
            .collect()
    }

    /// Registry holding exactly `entries`, validated as a whole
    pub fn from_specs(schema: Arc<DatasetSchema>, entries: &[FilterConfigEntry]) -> Result<Self> {
        let mut registry = Self::new(schema);
        for entry in entries {
            registry.set_spec(&entry.field, &entry.spec)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, SchemaEntry};
    use crate::value::Value;

    fn schema() -> Arc<DatasetSchema> {
        let field = |name: &str, field_type| SchemaEntry {
            name: name.to_string(),
            field_type,
            min: None,
            max: None,
            distinct_values: None,
            null_count: 0,
            row_count: 5,
        };
        Arc::new(DatasetSchema::new(
            vec![field("v", FieldType::UInt8), field("c", FieldType::String), field("a", FieldType::Float)],
            5,
        ))
    }

    #[test]
    fn test_set_overwrites_and_keeps_order() {
        let mut registry = FilterRegistry::new(schema());
        registry.set("v", Predicate::range(0.0, 10.0), true).unwrap();
        registry.set("c", Predicate::category_set(["a"]), true).unwrap();
        registry.set("v", Predicate::range(5.0, 10.0), true).unwrap();

        let fields: Vec<&str> = registry.iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec!["v", "c"]);
        assert_eq!(registry.get("v").unwrap().predicate, Predicate::range(5.0, 10.0));
    }

    #[test]
    fn test_rejected_set_leaves_registry_unchanged() {
        let mut registry = FilterRegistry::new(schema());
        registry.set("v", Predicate::range(0.0, 10.0), true).unwrap();

        let err = registry.set("c", Predicate::range(0.0, 1.0), true).unwrap_err();
        assert!(matches!(err, DataError::InvalidFilterKind { .. }));
        let err = registry.set_spec("v", &FilterSpec::new("bogus", serde_json::json!(1))).unwrap_err();
        assert!(matches!(err, DataError::InvalidFilterKind { .. }));
        let err = registry.set("nope", Predicate::range(0.0, 1.0), true).unwrap_err();
        assert!(matches!(err, DataError::FieldNotFound(_)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("v").unwrap().predicate, Predicate::range(0.0, 10.0));
    }

    #[test]
    fn test_active_skips_disabled() {
        let mut registry = FilterRegistry::new(schema());
        registry.set("v", Predicate::range(0.0, 10.0), true).unwrap();
        registry.set("a", Predicate::circular(350.0, 10.0), true).unwrap();
        assert!(registry.set_enabled("v", false).unwrap());
        assert!(!registry.set_enabled("v", false).unwrap());

        let active: Vec<&str> = registry.active().map(|(f, _)| f).collect();
        assert_eq!(active, vec!["a"]);
        assert!(matches!(registry.set_enabled("c", true), Err(DataError::FieldNotFound(_))));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut registry = FilterRegistry::new(schema());
        registry.set("c", Predicate::category_set([Value::from("a")]), true).unwrap();

        assert!(!registry.remove("v").unwrap());
        assert!(registry.remove("c").unwrap());
        assert!(matches!(registry.remove("missing"), Err(DataError::FieldNotFound(_))));
        assert!(!registry.clear());
    }

    #[test]
    fn test_specs_round_trip() {
        let mut registry = FilterRegistry::new(schema());
        registry.set("a", Predicate::circular(350.0, 10.0), false).unwrap();
        registry.set("c", Predicate::category_set(["x", "y"]), true).unwrap();

        let specs = registry.to_specs();
        let rebuilt = FilterRegistry::from_specs(schema(), &specs).unwrap();
        assert_eq!(rebuilt.to_specs(), specs);
        assert!(!rebuilt.get("a").unwrap().enabled);
    }
}
