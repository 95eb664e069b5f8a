//! Command execution: input loading, pipeline invocation, output writing.

use crate::cli::args::{Args, Commands, PrepareArgs};
use crate::config::PrepConfig;
use crate::error::PrepError;
use crate::models::{FlagType, Observation, SiteMetadata, Variable};
use crate::pipeline::{Collaborators, PrepResult, prepare};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use colored::*;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Run the parsed command.
pub fn run(args: Args) -> Result<()> {
    match args.command {
        Some(Commands::Prepare(prepare_args)) => run_prepare(&prepare_args),
        None => unreachable!("main shows help when no command is given"),
    }
}

/// One row of the long-format input CSV.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "region")]
    _region: String,
    #[serde(rename = "site")]
    _site: String,
    #[serde(rename = "DateTime_UTC")]
    datetime_utc: String,
    variable: String,
    value: Option<f64>,
    flagtype: Option<String>,
    #[serde(rename = "flagcomment")]
    _flagcomment: Option<String>,
}

fn run_prepare(args: &PrepareArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => PrepConfig::from_toml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PrepConfig::default(),
    };
    if let Some(interval) = &args.interval {
        config.interval = Some(interval.clone());
    }

    let site = load_site(&args.site)
        .with_context(|| format!("loading site metadata from {}", args.site.display()))?;
    let observations = load_observations(&args.input)
        .with_context(|| format!("reading records from {}", args.input.display()))?;

    let result = prepare(observations, &site, &config, &Collaborators::default())
        .context("preparation failed")?;

    write_output(&args.output, &result)
        .with_context(|| format!("writing output to {}", args.output.display()))?;

    print_summary(args, &result);
    Ok(())
}

fn load_site(path: &Path) -> Result<SiteMetadata> {
    let text = std::fs::read_to_string(path)?;
    let site: SiteMetadata = serde_json::from_str(&text)?;
    Ok(site)
}

fn load_observations(path: &Path) -> Result<Vec<Observation>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut observations = Vec::new();

    for (index, record) in reader.deserialize::<RawRecord>().enumerate() {
        // Header is line 1; the first data row is line 2.
        let row = index + 2;
        let record = record?;

        let timestamp = parse_timestamp(&record.datetime_utc).map_err(|reason| {
            PrepError::InputParsing {
                row,
                reason,
            }
        })?;
        let flag = match record.flagtype.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(FlagType::from_str(raw).map_err(|e| PrepError::InputParsing {
                row,
                reason: e.to_string(),
            })?),
        };

        observations.push(Observation {
            variable: Variable::from_name(&record.variable),
            timestamp,
            value: record.value,
            flag,
        });
    }

    Ok(observations)
}

/// Accept RFC 3339 or a bare `YYYY-MM-DD HH:MM:SS` assumed UTC.
fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| format!("unrecognized timestamp '{}'", raw))
}

fn write_output(path: &Path, result: &PrepResult) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["solar_time".to_string()];
    header.extend(result.table.columns.iter().map(|(name, _)| name.clone()));
    writer.write_record(&header)?;

    for (row, solar_time) in result.table.solar_time.iter().enumerate() {
        let mut record = vec![solar_time.format("%Y-%m-%d %H:%M:%S").to_string()];
        for (_, values) in &result.table.columns {
            record.push(match values[row] {
                Some(value) => format!("{}", value),
                None => String::new(),
            });
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn print_summary(args: &PrepareArgs, result: &PrepResult) {
    println!("\n{}", "Preparation complete".bright_green().bold());
    println!("  {}", result.stats.summary());
    println!(
        "  {} {} min | {} {} | {} {}",
        "Interval used:".bright_cyan(),
        result.spec.interval_minutes,
        "fill:".bright_cyan(),
        result.spec.fill_method.as_str(),
        "rating curve:".bright_cyan(),
        if result.spec.rating_curve_applied {
            "applied"
        } else {
            "not applied"
        }
    );

    if !result.diagnostics.is_empty() {
        println!(
            "{}",
            format!("Warnings ({})", result.diagnostics.len())
                .bright_yellow()
                .bold()
        );
        for diagnostic in result.diagnostics.entries() {
            println!("  [{}] {}", diagnostic.kind, diagnostic.message);
        }
    }

    println!(
        "{} {}",
        "Output written to".bright_green(),
        args.output.display()
    );
}
