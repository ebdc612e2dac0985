//! Command line surface

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use dx_data::FilterConfigEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Output {
    /// Schema, filter state and bin summaries
    Summary,
    /// Passing rows as CSV
    Csv,
    /// Current filters as a JSON config
    Filters,
}

/// Load a CSV file, apply filters and report the result.
#[derive(Parser, Debug)]
#[command(name = "dxplore", version, about = "Filter and summarise tabular data in memory.")]
pub struct Args {
    /// CSV file to load
    pub input: PathBuf,

    /// Field delimiter
    #[arg(long, default_value_t = ',')]
    pub delimiter: char,

    /// Treat the first line as data and name fields `column_N`
    #[arg(long)]
    pub no_headers: bool,

    /// Engine settings JSON; missing keys keep their defaults
    #[arg(long, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Filter config JSON: an array of `{field, type, value, enabled}`
    #[arg(long, value_name = "PATH")]
    pub filters: Option<PathBuf>,

    /// Inline filter, `FIELD=TYPE:JSON`, e.g. `v=range:[10,30]` (repeatable)
    #[arg(long = "filter", value_name = "FILTER")]
    pub inline_filters: Vec<String>,

    /// Fields to print bins for (repeatable); all binnable fields when omitted
    #[arg(long = "bins", value_name = "FIELD")]
    pub bin_fields: Vec<String>,

    /// Fields to include in CSV output (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,

    /// What to write to stdout
    #[arg(long, value_enum, default_value_t = Output::Summary)]
    pub output: Output,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        u8::try_from(self.delimiter)
            .map_err(|_| anyhow!("delimiter must be a single-byte character, got {:?}", self.delimiter))
    }

    /// Filters from the config file followed by the inline ones
    pub fn filter_entries(&self) -> Result<Vec<FilterConfigEntry>> {
        let mut entries = match &self.filters {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading filters from {}", path.display()))?;
                serde_json::from_str::<Vec<FilterConfigEntry>>(&text)
                    .with_context(|| format!("parsing filters in {}", path.display()))?
            }
            None => Vec::new(),
        };
        for raw in &self.inline_filters {
            entries.push(parse_inline_filter(raw)?);
        }
        Ok(entries)
    }
}

/// Parse `FIELD=TYPE:JSON`
pub fn parse_inline_filter(raw: &str) -> Result<FilterConfigEntry> {
    let Some((field, rest)) = raw.split_once('=') else {
        bail!("filter {:?} is not of the form FIELD=TYPE:JSON", raw);
    };
    let Some((kind, value)) = rest.split_once(':') else {
        bail!("filter {:?} is missing ':' between type and value", raw);
    };
    let value: serde_json::Value =
        serde_json::from_str(value).with_context(|| format!("filter value {:?} is not valid JSON", value))?;

    Ok(FilterConfigEntry {
        field: field.trim().to_string(),
        spec: dx_data::FilterSpec::new(kind.trim(), value),
    })
}
