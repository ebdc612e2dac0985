//! `dxplore`: load a CSV file into the engine, apply filters, report or export

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use dx_core::EngineSettings;
use dx_data::{CsvSource, Engine};

mod cli;
mod report;

use cli::{Args, Output};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    dx_core::logging::init(args.log_level());

    let settings = match &args.settings {
        Some(path) => EngineSettings::from_json_file(path)?,
        None => EngineSettings::default(),
    };
    let engine = Engine::new(settings).context("creating engine")?;

    let source = CsvSource::new(&args.input)
        .with_delimiter(args.delimiter_byte()?)
        .with_headers(!args.no_headers);
    info!("Reading {}", source.path().display());
    let summary = engine
        .load(source.read().with_context(|| format!("reading {}", args.input.display()))?)
        .context("loading dataset")?;

    let filters = args.filter_entries()?;
    if !filters.is_empty() {
        engine.import_filters(&filters).context("applying filters")?;
    }
    let snapshot = engine.settled().await;
    info!(
        "{} of {} rows pass {} filters",
        snapshot.filtered_count,
        snapshot.total_count,
        snapshot.filters.len()
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match args.output {
        Output::Summary => report::write_summary(&mut out, &engine, &summary, &args.bin_fields)?,
        Output::Csv => {
            let fields: Vec<&str> = args.fields.iter().map(String::as_str).collect();
            let projection = (!fields.is_empty()).then_some(fields.as_slice());
            let rows = engine.export_rows(projection)?;
            let written = rows.write_csv(&mut out)?;
            info!("Wrote {} rows", written);
        }
        Output::Filters => writeln!(out, "{}", engine.export_filters_json()?)?,
    }
    out.flush()?;
    Ok(())
}
