//! Command-line argument definitions.
//!
//! Defines the CLI interface using the clap derive API. The heavy lifting
//! lives in the library; the CLI is a thin acquisition-and-formatting shell
//! around [`crate::pipeline::prepare`].

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for the sensor-series preparation tool
///
/// Conditions irregular multi-sensor stream time series into a single
/// regularly-spaced table suitable for metabolism models.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "metab-prep",
    version,
    about = "Condition multi-sensor stream time series into model-ready tables",
    long_about = "Reads long-format sensor records, infers and reconciles sampling \
                  intervals, aligns every variable onto a canonical regular grid, \
                  derives discharge and depth from a rating curve when needed, and \
                  writes a single model-ready table."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Condition a record set into a model-ready table
    Prepare(PrepareArgs),
}

/// Arguments for the prepare command
#[derive(Debug, Clone, Parser)]
pub struct PrepareArgs {
    /// Input CSV of long-format records
    ///
    /// Expected columns: region, site, DateTime_UTC, variable, value,
    /// flagtype, flagcomment. Timestamps are ISO-8601 UTC instants.
    #[arg(
        short = 'i',
        long = "input",
        value_name = "FILE",
        help = "Input CSV of long-format sensor records"
    )]
    pub input: PathBuf,

    /// Site metadata JSON file
    ///
    /// Expected fields: region, site, lat, lon.
    #[arg(
        short = 's',
        long = "site",
        value_name = "FILE",
        help = "Site metadata JSON file"
    )]
    pub site: PathBuf,

    /// Path to configuration file
    ///
    /// TOML configuration covering the model, interval, flag removal,
    /// gap filling, and rating-curve settings. Defaults apply when
    /// omitted.
    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    pub config: Option<PathBuf>,

    /// Output path for the conditioned table
    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        default_value = "prepared.csv",
        help = "Output CSV path"
    )]
    pub output: PathBuf,

    /// Override the configured target interval
    ///
    /// Accepts the same grammar as the configuration file, e.g. "15 min"
    /// or "0.5 hour".
    #[arg(
        long = "interval",
        value_name = "INTERVAL",
        help = "Override the target interval, e.g. \"15 min\""
    )]
    pub interval: Option<String>,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub verbose: bool,
}
