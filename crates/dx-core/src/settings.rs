//! Engine settings
//!
//! Every heuristic the engine relies on (chunk size, bin counts, the
//! categorical cardinality threshold, angle naming conventions, boolean and
//! null tokens) lives here so hosts can tune it or load it from a file.

use std::path::Path;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Settings shared by loading, binning and filter evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Rows processed per evaluator slice before yielding
    pub chunk_size: usize,

    /// Bucket count for continuous fields
    pub default_bins: usize,

    /// Bucket count for fields named like an angle
    pub angle_bins: usize,

    /// Case-insensitive substrings marking a field as an angle in degrees
    pub angle_field_patterns: Vec<String>,

    /// Numeric fields with at most this many distinct values are categorical
    pub categorical_threshold: usize,

    /// Values sampled for type inference
    pub type_sample_size: usize,

    /// String fields with more distinct values than this are not binned
    pub max_string_categories: usize,

    /// Tokens recognised as booleans, in `true, false` pairs
    pub boolean_tokens: Vec<(String, String)>,

    /// Text values treated as missing
    pub null_tokens: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100_000,
            default_bins: 50,
            angle_bins: 120,
            angle_field_patterns: ["angle", "deg", "heading", "bearing", "azimuth"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            categorical_threshold: 10,
            type_sample_size: 100,
            max_string_categories: 1_000,
            boolean_tokens: vec![
                ("true".to_string(), "false".to_string()),
                ("yes".to_string(), "no".to_string()),
            ],
            null_tokens: ["", "null", "NULL", "N/A", "n/a", "NaN", "-"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl EngineSettings {
    /// Set the evaluator chunk size
    pub fn with_chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = rows;
        self
    }

    /// Set the default continuous bucket count
    pub fn with_default_bins(mut self, bins: usize) -> Self {
        self.default_bins = bins;
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        if self.default_bins == 0 || self.angle_bins == 0 {
            bail!("bin counts must be at least 1");
        }
        if self.type_sample_size == 0 {
            bail!("type_sample_size must be at least 1");
        }
        Ok(())
    }

    /// Whether a field name follows the angle naming convention
    pub fn is_angle_field(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.angle_field_patterns
            .iter()
            .any(|pattern| lower.contains(&pattern.to_lowercase()))
    }

    /// Interpret a text token as a boolean, if it is one
    pub fn parse_bool(&self, token: &str) -> Option<bool> {
        let token = token.trim();
        self.boolean_tokens.iter().find_map(|(yes, no)| {
            if token.eq_ignore_ascii_case(yes) {
                Some(true)
            } else if token.eq_ignore_ascii_case(no) {
                Some(false)
            } else {
                None
            }
        })
    }

    /// Whether a text token stands for a missing value
    pub fn is_null_token(&self, token: &str) -> bool {
        let token = token.trim();
        self.null_tokens.iter().any(|pattern| token == pattern)
    }

    /// Load settings from a JSON file; missing keys keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing settings in {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings as pretty JSON
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("writing settings to {}", path.display()))
    }
}
