//! Pipeline orchestration.
//!
//! Runs the conditioning stages in their required order: flag masking,
//! series assembly, interval inference and reconciliation, pivot,
//! unification, grid alignment, pressure reconciliation, discharge and
//! depth derivation, saturation/light/solar derivations, gap filling,
//! sanitation, and finally formatting for the selected output schema. The
//! stages are strictly sequential; each consumes the table the previous
//! stage produced.

use crate::config::{FillMethod, PrepConfig};
use crate::constants::output_columns;
use crate::error::{PrepError, Result};
use crate::fill::{BuiltinGapFiller, GapFiller};
use crate::models::{
    FlagType, Observation, OutputKind, SiteMetadata, Variable, VariableInventory, VariableSeries,
    WideTable,
};
use crate::physics;
use crate::pipeline::align::align_to_grid;
use crate::pipeline::diagnostics::{DiagnosticKind, DiagnosticLog, PrepStats};
use crate::pipeline::interval::{infer_interval, reconcile_intervals};
use crate::pipeline::pressure::{PressureNeeds, PressureSource, reconcile_pressure};
use crate::pipeline::rating::{areal_depth_from_discharge, derive_discharge_and_depth};
use crate::pipeline::sanitize::{kpa_to_atm, sanitize};
use crate::pipeline::unify::unify_variables;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use tracing::info;

static BUILTIN_FILLER: BuiltinGapFiller = BuiltinGapFiller;

/// External collaborators consumed by the pipeline. All calls are
/// synchronous; the pressure sources are the only I/O boundary.
pub struct Collaborators<'a> {
    pub gap_filler: &'a dyn GapFiller,
    pub primary_pressure: Option<&'a dyn PressureSource>,
    pub secondary_pressure: Option<&'a dyn PressureSource>,
}

impl Default for Collaborators<'_> {
    /// Builtin gap filler, no pressure sources.
    fn default() -> Self {
        Self {
            gap_filler: &BUILTIN_FILLER,
            primary_pressure: None,
            secondary_pressure: None,
        }
    }
}

/// Description of what one run actually did, returned alongside the table.
#[derive(Debug, Clone)]
pub struct PrepSpecRecord {
    pub kind: OutputKind,
    /// Grid spacing actually used, in minutes.
    pub interval_minutes: f64,
    pub flags_removed: Vec<FlagType>,
    pub fill_method: FillMethod,
    pub maxhours: f64,
    pub rating_curve_applied: bool,
    pub level_substituted_for_depth: bool,
}

/// The conditioned output table in its canonical schema.
#[derive(Debug, Clone)]
pub struct OutputTable {
    /// Mean solar time per grid row.
    pub solar_time: Vec<NaiveDateTime>,
    /// Canonical columns in schema order.
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

impl OutputTable {
    pub fn len(&self) -> usize {
        self.solar_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solar_time.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, values)| values.as_slice())
    }
}

/// Result of one preparation run.
#[derive(Debug)]
pub struct PrepResult {
    pub table: OutputTable,
    pub spec: PrepSpecRecord,
    pub stats: PrepStats,
    pub diagnostics: DiagnosticLog,
}

/// Condition a long-format record set into a model-ready table.
///
/// Fatal errors (configuration, insufficient data, alignment failure)
/// abort with no partial output; recoverable degradations are recorded in
/// the returned diagnostic log.
pub fn prepare(
    observations: Vec<Observation>,
    site: &SiteMetadata,
    config: &PrepConfig,
    collaborators: &Collaborators<'_>,
) -> Result<PrepResult> {
    let kind = config.validate()?;
    site.validate()?;

    let mut stats = PrepStats::new();
    let mut diagnostics = DiagnosticLog::new();
    stats.input_records = observations.len();

    let observations = mask_flagged(observations, &config.rm_flagged, &mut stats);
    let series = assemble_series(observations)?;

    // Interval inference, then reconciliation into the grid spacing.
    let mut interval_records = Vec::new();
    for series in series.values() {
        if series.len() < 2 {
            diagnostics.warn(
                DiagnosticKind::ShortSeries,
                format!(
                    "{} has {} record(s); too few to infer a sampling interval",
                    series.variable.canonical_name(),
                    series.len()
                ),
            );
            continue;
        }
        interval_records.push(infer_interval(series, &mut diagnostics)?);
    }
    let requested = config.requested_interval_seconds()?;
    let step_seconds = reconcile_intervals(&interval_records, requested, &mut diagnostics)?;

    let mut table = pivot_to_wide(&series);
    stats.input_variables = table.column_count();
    let mut inventory = VariableInventory::from_table(&table);

    let discharge_expected = inventory.has(&Variable::Discharge)
        || inventory.has(&Variable::UsgsDischarge)
        || config.rating_curve.is_some();
    let level_substituted = unify_variables(
        &mut table,
        &mut inventory,
        config,
        discharge_expected,
        &mut diagnostics,
    )?;

    require_variable(&inventory, &Variable::DoConc, "dissolved-oxygen concentration")?;
    require_variable(&inventory, &Variable::WaterTemp, "water temperature")?;

    let aligned = align_to_grid(&table, step_seconds)?;
    let mut table = aligned.table;
    stats.grid_rows = table.len();
    stats.alignment_offset = aligned.offset;
    info!(
        rows = stats.grid_rows,
        offset = aligned.offset,
        step_minutes = aligned.grid.step_minutes(),
        "aligned to canonical grid"
    );

    let needs = PressureNeeds {
        for_saturation: !inventory.has(&Variable::DoSat),
        for_discharge: false,
        force_retrieve: config.retrieve_pressure,
    };
    reconcile_pressure(
        &mut table,
        &mut inventory,
        site,
        needs,
        collaborators.primary_pressure,
        collaborators.secondary_pressure,
        &mut stats,
        &mut diagnostics,
    )?;

    // Discharge from the rating curve when no measured discharge exists.
    let mut rating_curve_applied = false;
    match &config.rating_curve {
        Some(spec) if !inventory.has(&Variable::Discharge) => {
            derive_discharge_and_depth(
                &mut table,
                &mut inventory,
                spec,
                !config.estimate_areal_depth,
                &mut diagnostics,
            )?;
            rating_curve_applied = true;
        }
        Some(_) => {
            diagnostics.warn(
                DiagnosticKind::RatingCurve,
                "A measured discharge series is present; the rating curve was not applied",
            );
        }
        None => {}
    }

    if config.estimate_areal_depth
        && inventory.has(&Variable::Discharge)
        && !inventory.has(&Variable::Depth)
    {
        let depth = table
            .column(&Variable::Discharge)
            .expect("inventory tracks table columns")
            .iter()
            .map(|value| value.and_then(areal_depth_from_discharge))
            .collect();
        table.insert_column(Variable::Depth, depth)?;
        inventory.record(Variable::Depth);
    }

    require_variable(&inventory, &Variable::Depth, "depth (and no way to derive it)")?;

    derive_do_saturation(&mut table, &mut inventory, &mut diagnostics)?;
    derive_light(&mut table, &mut inventory, site, config, &mut diagnostics)?;

    let max_span_rows = ((config.maxhours * 3600.0) / step_seconds as f64).floor() as usize;
    collaborators.gap_filler.fill(
        &mut table,
        config.fillgaps,
        max_span_rows,
        &mut stats,
        &mut diagnostics,
    )?;

    sanitize(&mut table, &inventory, &mut stats, &mut diagnostics);

    let output = format_output(&table, &inventory, kind, site)?;
    let spec = PrepSpecRecord {
        kind,
        interval_minutes: step_seconds as f64 / 60.0,
        flags_removed: config.rm_flagged.clone(),
        fill_method: config.fillgaps,
        maxhours: config.maxhours,
        rating_curve_applied,
        level_substituted_for_depth: level_substituted,
    };

    info!("{}", stats.summary());
    Ok(PrepResult {
        table: output,
        spec,
        stats,
        diagnostics,
    })
}

/// Blank the values of observations carrying a removed flag.
fn mask_flagged(
    mut observations: Vec<Observation>,
    removed: &[FlagType],
    stats: &mut PrepStats,
) -> Vec<Observation> {
    if removed.is_empty() {
        return observations;
    }
    let mut masked = 0usize;
    for observation in &mut observations {
        if let Some(flag) = observation.flag {
            if removed.contains(&flag) && observation.value.is_some() {
                observation.value = None;
                masked += 1;
            }
        }
    }
    stats.flagged_removed = masked;
    if masked > 0 {
        info!(masked, "flagged values blanked");
    }
    observations
}

/// Group long-format records into per-variable series, enforcing the
/// unique (variable, timestamp) contract.
fn assemble_series(
    observations: Vec<Observation>,
) -> Result<BTreeMap<Variable, VariableSeries>> {
    let mut grouped: BTreeMap<Variable, Vec<_>> = BTreeMap::new();
    for observation in observations {
        grouped
            .entry(observation.variable.clone())
            .or_default()
            .push((observation.timestamp, observation.value));
    }

    let mut series = BTreeMap::new();
    for (variable, points) in grouped {
        series.insert(
            variable.clone(),
            VariableSeries::assemble(variable, points)?,
        );
    }
    Ok(series)
}

/// Pivot per-variable series onto the union of their timestamps.
fn pivot_to_wide(series: &BTreeMap<Variable, VariableSeries>) -> WideTable {
    let union: std::collections::BTreeSet<_> = series
        .values()
        .flat_map(|s| s.timestamps())
        .collect();
    let timestamps: Vec<_> = union.into_iter().collect();
    let index: std::collections::HashMap<i64, usize> = timestamps
        .iter()
        .enumerate()
        .map(|(i, ts)| (ts.timestamp(), i))
        .collect();

    let mut table = WideTable::new(timestamps);
    for (variable, series) in series {
        let mut column = vec![None; table.len()];
        for (ts, value) in &series.points {
            column[index[&ts.timestamp()]] = *value;
        }
        table
            .insert_column(variable.clone(), column)
            .expect("series variables are unique");
    }
    table
}

fn require_variable(
    inventory: &VariableInventory,
    variable: &Variable,
    description: &str,
) -> Result<()> {
    if inventory.has(variable) {
        Ok(())
    } else {
        Err(PrepError::data_sufficiency(format!(
            "No {} after all substitutions ({} column is absent)",
            description,
            variable.canonical_name()
        )))
    }
}

/// Compute DO saturation from water temperature and air pressure when no
/// measured saturation series exists. Rows without air pressure fall back
/// to standard sea-level pressure, with a warning.
fn derive_do_saturation(
    table: &mut WideTable,
    inventory: &mut VariableInventory,
    diagnostics: &mut DiagnosticLog,
) -> Result<()> {
    if inventory.has(&Variable::DoSat) {
        return Ok(());
    }

    let temp = table
        .column(&Variable::WaterTemp)
        .expect("water temperature checked earlier")
        .to_vec();
    let pressure = table
        .column(&Variable::AirPressure)
        .map(|column| column.to_vec())
        .unwrap_or_else(|| vec![None; table.len()]);

    let mut defaulted = 0usize;
    let saturation: Vec<Option<f64>> = temp
        .iter()
        .zip(pressure.iter())
        .map(|(temp, pressure)| {
            temp.map(|t| {
                let atm = match pressure {
                    Some(kpa) => kpa_to_atm(*kpa),
                    None => {
                        defaulted += 1;
                        1.0
                    }
                };
                physics::do_saturation_mgl(t, atm)
            })
        })
        .collect();

    if defaulted > 0 {
        diagnostics.warn(
            DiagnosticKind::IncompleteDerivation,
            format!(
                "Air pressure unavailable for {} row(s); standard pressure assumed for DO saturation",
                defaulted
            ),
        );
    }

    table.insert_column(Variable::DoSat, saturation)?;
    inventory.record(Variable::DoSat);
    Ok(())
}

/// Fill the light column from the clear-sky estimate when no sensor series
/// exists and estimation is enabled.
fn derive_light(
    table: &mut WideTable,
    inventory: &mut VariableInventory,
    site: &SiteMetadata,
    config: &PrepConfig,
    diagnostics: &mut DiagnosticLog,
) -> Result<()> {
    if inventory.has(&Variable::Light) {
        return Ok(());
    }
    if !config.estimate_par {
        diagnostics.warn(
            DiagnosticKind::IncompleteDerivation,
            "No light series and estimate_par is disabled; the light column will be missing",
        );
        return Ok(());
    }

    let light = table
        .timestamps()
        .iter()
        .map(|ts| Some(physics::clear_sky_par(*ts, site.lat, site.lon)))
        .collect();
    table.insert_column(Variable::Light, light)?;
    inventory.record(Variable::Light);
    Ok(())
}

/// Format the conditioned table for the selected output schema.
///
/// One formatter exists per output kind; the unsupported kinds fail with
/// their fixed errors here as well as at configuration validation.
fn format_output(
    table: &WideTable,
    inventory: &VariableInventory,
    kind: OutputKind,
    site: &SiteMetadata,
) -> Result<OutputTable> {
    match kind {
        OutputKind::StreamMetabolizerBayes => {
            Ok(format_stream_metabolizer(table, inventory, site))
        }
        OutputKind::StreamMetabolizerMle => {
            Err(PrepError::configuration(crate::config::MLE_UNSUPPORTED))
        }
        OutputKind::Base => Err(PrepError::configuration(crate::config::BASE_UNSUPPORTED)),
    }
}

fn format_stream_metabolizer(
    table: &WideTable,
    inventory: &VariableInventory,
    site: &SiteMetadata,
) -> OutputTable {
    let solar_time = table
        .timestamps()
        .iter()
        .map(|ts| physics::mean_solar_time(*ts, site.lon))
        .collect();

    let take = |variable: &Variable| -> Vec<Option<f64>> {
        table
            .column(variable)
            .map(|column| column.to_vec())
            .unwrap_or_else(|| vec![None; table.len()])
    };

    let mut columns = vec![
        (output_columns::DO_OBS.to_string(), take(&Variable::DoConc)),
        (output_columns::DO_SAT.to_string(), take(&Variable::DoSat)),
        (output_columns::DEPTH.to_string(), take(&Variable::Depth)),
        (
            output_columns::TEMP_WATER.to_string(),
            take(&Variable::WaterTemp),
        ),
        (output_columns::LIGHT.to_string(), take(&Variable::Light)),
    ];
    if inventory.has(&Variable::Discharge) {
        columns.push((
            output_columns::DISCHARGE.to_string(),
            take(&Variable::Discharge),
        ));
    }

    OutputTable { solar_time, columns }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 10, 0, 0).unwrap()
    }

    fn observation(
        variable: Variable,
        minutes: i64,
        value: Option<f64>,
        flag: Option<FlagType>,
    ) -> Observation {
        Observation {
            variable,
            timestamp: base() + Duration::minutes(minutes),
            value,
            flag,
        }
    }

    #[test]
    fn test_mask_flagged_blanks_only_removed_flags() {
        let observations = vec![
            observation(Variable::DoConc, 0, Some(8.0), Some(FlagType::BadData)),
            observation(Variable::DoConc, 15, Some(8.1), Some(FlagType::Interesting)),
            observation(Variable::DoConc, 30, Some(8.2), None),
        ];
        let mut stats = PrepStats::new();
        let masked = mask_flagged(
            observations,
            &[FlagType::Questionable, FlagType::BadData],
            &mut stats,
        );
        assert_eq!(masked[0].value, None);
        assert_eq!(masked[1].value, Some(8.1));
        assert_eq!(masked[2].value, Some(8.2));
        assert_eq!(stats.flagged_removed, 1);
    }

    #[test]
    fn test_assemble_series_detects_duplicates() {
        let observations = vec![
            observation(Variable::DoConc, 0, Some(8.0), None),
            observation(Variable::DoConc, 0, Some(8.3), None),
        ];
        assert!(matches!(
            assemble_series(observations),
            Err(PrepError::DuplicateRecords { .. })
        ));
    }

    #[test]
    fn test_pivot_unions_timestamps() {
        let observations = vec![
            observation(Variable::DoConc, 0, Some(8.0), None),
            observation(Variable::DoConc, 15, Some(8.1), None),
            observation(Variable::WaterTemp, 15, Some(20.0), None),
            observation(Variable::WaterTemp, 30, Some(20.5), None),
        ];
        let series = assemble_series(observations).unwrap();
        let table = pivot_to_wide(&series);
        assert_eq!(table.len(), 3);
        assert_eq!(table.column(&Variable::DoConc).unwrap()[2], None);
        assert_eq!(table.column(&Variable::WaterTemp).unwrap()[0], None);
    }
}
