//! Core data model for sensor series preparation.
//!
//! This module contains the structures shared across the pipeline: long-format
//! observation records as delivered by the acquisition layer, the variable
//! vocabulary, per-variable series, the canonical timestamp grid, and the wide
//! table that pipeline stages mutate in sequence.

use crate::error::{PrepError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Quality flags
// =============================================================================

/// Quality flag attached to an observation by the acquisition layer.
///
/// Unflagged observations carry no `FlagType` at all; these three values are
/// the only flagged states the input contract allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlagType {
    /// Flagged for attention but not necessarily wrong.
    Interesting,
    /// Plausibly wrong; kept or removed by configuration.
    Questionable,
    /// Known-bad data.
    #[serde(alias = "Bad Data")]
    BadData,
}

impl FromStr for FlagType {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Interesting" => Ok(FlagType::Interesting),
            "Questionable" => Ok(FlagType::Questionable),
            "Bad Data" | "BadData" => Ok(FlagType::BadData),
            other => Err(PrepError::configuration(format!(
                "Unknown flag type '{}': expected Interesting, Questionable, or Bad Data",
                other
            ))),
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlagType::Interesting => "Interesting",
            FlagType::Questionable => "Questionable",
            FlagType::BadData => "Bad Data",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Variable vocabulary
// =============================================================================

/// A measured or derived quantity, keyed by its canonical column name.
///
/// The `Usgs*` variants are the remote reference-gauge versions of level and
/// discharge; the unifier promotes them to the local name when no local sensor
/// is present. Unrecognized input names are carried through as [`Variable::Other`]
/// so the pipeline never silently drops a column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variable {
    /// Dissolved oxygen concentration, mg/L.
    DoConc,
    /// Dissolved oxygen saturation concentration, mg/L.
    DoSat,
    /// Water temperature, degrees C.
    WaterTemp,
    /// Photosynthetically active radiation, umol m^-2 s^-1.
    Light,
    /// Stage: water surface height above the local sensor reference, m.
    Level,
    /// Depth from streambed to water surface, m.
    Depth,
    /// Discharge, m^3/s.
    Discharge,
    /// Air pressure, kPa.
    AirPressure,
    /// Level reported by a remote reference gauge, m.
    UsgsLevel,
    /// Discharge reported by a remote reference gauge, m^3/s.
    UsgsDischarge,
    /// Any other input column, carried through unchanged.
    Other(String),
}

impl Variable {
    /// Map a raw input column name onto the vocabulary. Never fails;
    /// unknown names become [`Variable::Other`].
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "DO_mgL" => Variable::DoConc,
            "satDO_mgL" => Variable::DoSat,
            "WaterTemp_C" => Variable::WaterTemp,
            "Light_PAR" => Variable::Light,
            "Level_m" => Variable::Level,
            "Depth_m" => Variable::Depth,
            "Discharge_m3s" => Variable::Discharge,
            "AirPres_kPa" => Variable::AirPressure,
            "USGSLevel_m" => Variable::UsgsLevel,
            "USGSDischarge_m3s" => Variable::UsgsDischarge,
            other => Variable::Other(other.to_string()),
        }
    }

    /// The canonical column name for this variable.
    pub fn canonical_name(&self) -> &str {
        match self {
            Variable::DoConc => "DO_mgL",
            Variable::DoSat => "satDO_mgL",
            Variable::WaterTemp => "WaterTemp_C",
            Variable::Light => "Light_PAR",
            Variable::Level => "Level_m",
            Variable::Depth => "Depth_m",
            Variable::Discharge => "Discharge_m3s",
            Variable::AirPressure => "AirPres_kPa",
            Variable::UsgsLevel => "USGSLevel_m",
            Variable::UsgsDischarge => "USGSDischarge_m3s",
            Variable::Other(name) => name,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

// =============================================================================
// Long-format records and site metadata
// =============================================================================

/// One long-format record from the acquisition layer.
///
/// The collection delivered to the pipeline is keyed by
/// `(variable, timestamp)`; duplicates are a contract violation and abort
/// series assembly.
#[derive(Debug, Clone)]
pub struct Observation {
    pub variable: Variable,
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
    pub flag: Option<FlagType>,
}

/// Site metadata accompanying a record set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteMetadata {
    pub region: String,
    pub site: String,
    /// Latitude in WGS84 decimal degrees.
    pub lat: f64,
    /// Longitude in WGS84 decimal degrees.
    pub lon: f64,
}

impl SiteMetadata {
    /// Validate coordinate ranges and identifiers.
    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(PrepError::configuration(format!(
                "Invalid latitude {}: must be between -90 and 90 degrees",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(PrepError::configuration(format!(
                "Invalid longitude {}: must be between -180 and 180 degrees",
                self.lon
            )));
        }
        if self.site.trim().is_empty() {
            return Err(PrepError::configuration(
                "Site identifier cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Per-variable series
// =============================================================================

/// One variable's records, sorted ascending with unique timestamps.
///
/// Points with a missing value are retained: a record with no value still
/// marks a sampling instant, and interval inference depends on those
/// instants.
#[derive(Debug, Clone)]
pub struct VariableSeries {
    pub variable: Variable,
    pub points: Vec<(DateTime<Utc>, Option<f64>)>,
}

impl VariableSeries {
    /// Assemble a series from unordered observations of one variable.
    ///
    /// Sorts ascending and rejects duplicate timestamps.
    pub fn assemble(
        variable: Variable,
        mut points: Vec<(DateTime<Utc>, Option<f64>)>,
    ) -> Result<Self> {
        points.sort_by_key(|(ts, _)| *ts);
        for pair in points.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(PrepError::DuplicateRecords {
                    variable: variable.canonical_name().to_string(),
                    timestamp: pair[0].0.to_rfc3339(),
                });
            }
        }
        Ok(Self { variable, points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sampling instants, in ascending order.
    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.points.iter().map(|(ts, _)| *ts)
    }
}

// =============================================================================
// Sampling intervals and the canonical grid
// =============================================================================

/// A variable's inferred native sampling interval.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalRecord {
    pub variable: Variable,
    /// Modal spacing in whole seconds.
    pub seconds: i64,
    /// Number of contiguous gap regions detected in the series.
    pub gap_count: usize,
    /// True when the spacings are not all multiples of the finest spacing.
    pub irregular: bool,
}

impl IntervalRecord {
    pub fn minutes(&self) -> f64 {
        self.seconds as f64 / 60.0
    }
}

/// The canonical regular timeline for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step_seconds: i64,
}

impl Grid {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, step_seconds: i64) -> Result<Self> {
        if step_seconds <= 0 {
            return Err(PrepError::configuration(format!(
                "Grid step must be positive, got {} seconds",
                step_seconds
            )));
        }
        if end < start {
            return Err(PrepError::configuration(format!(
                "Grid end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self {
            start,
            end,
            step_seconds,
        })
    }

    /// Number of rows: floor((end - start) / step) + 1.
    pub fn row_count(&self) -> usize {
        ((self.end - self.start).num_seconds() / self.step_seconds) as usize + 1
    }

    /// Materialize the grid timestamps.
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        (0..self.row_count())
            .map(|i| self.start + Duration::seconds(i as i64 * self.step_seconds))
            .collect()
    }

    pub fn step_minutes(&self) -> f64 {
        self.step_seconds as f64 / 60.0
    }
}

// =============================================================================
// Wide table
// =============================================================================

/// The wide, timestamp-indexed table each pipeline stage transforms.
///
/// Invariants: exactly one row per timestamp, every column the same length
/// as the timestamp index, no duplicate columns. Columns are kept in a
/// `BTreeMap` so iteration order is deterministic.
#[derive(Debug, Clone)]
pub struct WideTable {
    timestamps: Vec<DateTime<Utc>>,
    columns: BTreeMap<Variable, Vec<Option<f64>>>,
}

impl WideTable {
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Self {
        Self {
            timestamps,
            columns: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn has_column(&self, variable: &Variable) -> bool {
        self.columns.contains_key(variable)
    }

    /// Column names in deterministic order.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.columns.keys()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, variable: &Variable) -> Option<&[Option<f64>]> {
        self.columns.get(variable).map(|v| v.as_slice())
    }

    pub fn column_mut(&mut self, variable: &Variable) -> Option<&mut Vec<Option<f64>>> {
        self.columns.get_mut(variable)
    }

    /// Insert a new column. Duplicate columns and length mismatches are
    /// contract violations.
    pub fn insert_column(&mut self, variable: Variable, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.timestamps.len() {
            return Err(PrepError::configuration(format!(
                "Column {} has {} values for {} grid rows",
                variable.canonical_name(),
                values.len(),
                self.timestamps.len()
            )));
        }
        if self.columns.contains_key(&variable) {
            return Err(PrepError::configuration(format!(
                "Duplicate column: {}",
                variable.canonical_name()
            )));
        }
        self.columns.insert(variable, values);
        Ok(())
    }

    pub fn remove_column(&mut self, variable: &Variable) -> Option<Vec<Option<f64>>> {
        self.columns.remove(variable)
    }

    /// Rename a column, failing if the target name is already taken.
    pub fn rename_column(&mut self, from: &Variable, to: Variable) -> Result<()> {
        if self.columns.contains_key(&to) {
            return Err(PrepError::configuration(format!(
                "Cannot rename {} to {}: target column exists",
                from.canonical_name(),
                to.canonical_name()
            )));
        }
        match self.columns.remove(from) {
            Some(values) => {
                self.columns.insert(to, values);
                Ok(())
            }
            None => Err(PrepError::configuration(format!(
                "Cannot rename missing column {}",
                from.canonical_name()
            ))),
        }
    }

    /// Fraction of rows with no value in the given column. `None` when the
    /// column does not exist; 1.0 for an empty table.
    pub fn missing_fraction(&self, variable: &Variable) -> Option<f64> {
        let column = self.columns.get(variable)?;
        if column.is_empty() {
            return Some(1.0);
        }
        let missing = column.iter().filter(|v| v.is_none()).count();
        Some(missing as f64 / column.len() as f64)
    }
}

// =============================================================================
// Variable inventory
// =============================================================================

/// Presence map built once after the pivot and kept in sync by the stages
/// that add, promote, or drop columns. Later stages consult this instead of
/// re-checking column existence ad hoc.
#[derive(Debug, Clone, Default)]
pub struct VariableInventory {
    present: BTreeSet<Variable>,
}

impl VariableInventory {
    pub fn from_table(table: &WideTable) -> Self {
        Self {
            present: table.variables().cloned().collect(),
        }
    }

    pub fn has(&self, variable: &Variable) -> bool {
        self.present.contains(variable)
    }

    pub fn record(&mut self, variable: Variable) {
        self.present.insert(variable);
    }

    pub fn remove(&mut self, variable: &Variable) {
        self.present.remove(variable);
    }
}

// =============================================================================
// Output schema selection
// =============================================================================

/// Closed set of output schemas. Exactly one formatter exists per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    StreamMetabolizerBayes,
    StreamMetabolizerMle,
    Base,
}
