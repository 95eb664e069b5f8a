//! Air-pressure reconciliation against external retrieval sources.
//!
//! Air pressure is the pipeline's single I/O boundary. When the local
//! series is absent or incomplete and pressure is actually needed, values
//! are retrieved from a primary source, falling back once to a secondary
//! source; retrieved values only ever fill timestamps the sensor did not
//! cover. Failures degrade the run with a warning instead of aborting it.

use crate::constants::MIN_PRESSURE_COVERAGE;
use crate::error::Result;
use crate::models::{SiteMetadata, Variable, VariableInventory, WideTable};
use crate::pipeline::diagnostics::{DiagnosticKind, DiagnosticLog, PrepStats};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::info;

/// External air-pressure retrieval boundary.
///
/// Implementations are synchronous and return either the series for the
/// requested span or an error; expected degradation is handled here, not
/// with control flow inside the source.
pub trait PressureSource {
    /// Short name for diagnostics.
    fn name(&self) -> &str;

    /// Retrieve pressure in kPa for the site over `[start, end]`.
    fn fetch(
        &self,
        site: &SiteMetadata,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, f64)>>;
}

/// Why pressure is (or is not) required for this run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PressureNeeds {
    /// DO saturation must be computed and needs barometric pressure.
    pub for_saturation: bool,
    /// A depth-from-water-pressure path needs a barometric correction.
    pub for_discharge: bool,
    /// Retrieval was explicitly requested by configuration.
    pub force_retrieve: bool,
}

impl PressureNeeds {
    fn any(&self) -> bool {
        self.for_saturation || self.for_discharge || self.force_retrieve
    }
}

/// Merge, retrieve, and interpolate the air-pressure column.
pub fn reconcile_pressure(
    table: &mut WideTable,
    inventory: &mut VariableInventory,
    site: &SiteMetadata,
    needs: PressureNeeds,
    primary: Option<&dyn PressureSource>,
    secondary: Option<&dyn PressureSource>,
    stats: &mut PrepStats,
    diagnostics: &mut DiagnosticLog,
) -> Result<()> {
    let present = inventory.has(&Variable::AirPressure);
    let missing_fraction = table
        .missing_fraction(&Variable::AirPressure)
        .unwrap_or(1.0);

    let should_retrieve =
        needs.force_retrieve || (needs.any() && (!present || missing_fraction > 0.0));

    if should_retrieve {
        if let Some(fetched) = retrieve_with_fallback(site, table, primary, secondary, diagnostics)
        {
            merge_fetched(table, inventory, &fetched, stats)?;
        }
        if inventory.has(&Variable::AirPressure) {
            if let Some(column) = table.column_mut(&Variable::AirPressure) {
                interpolate_between_neighbors(column);
            }
        }
    }

    let coverage = 1.0
        - table
            .missing_fraction(&Variable::AirPressure)
            .unwrap_or(1.0);
    if coverage < MIN_PRESSURE_COVERAGE && !should_retrieve {
        diagnostics.warn(
            DiagnosticKind::LowPressureCoverage,
            format!(
                "Air-pressure coverage is {:.0}%; downstream modeling may fail",
                coverage * 100.0
            ),
        );
    }

    Ok(())
}

/// Try the primary source, then the secondary; record each failure. Both
/// failing leaves the run degraded but alive.
fn retrieve_with_fallback(
    site: &SiteMetadata,
    table: &WideTable,
    primary: Option<&dyn PressureSource>,
    secondary: Option<&dyn PressureSource>,
    diagnostics: &mut DiagnosticLog,
) -> Option<Vec<(DateTime<Utc>, f64)>> {
    let timestamps = table.timestamps();
    let (start, end) = (*timestamps.first()?, *timestamps.last()?);

    for source in [primary, secondary].into_iter().flatten() {
        match source.fetch(site, start, end) {
            Ok(series) => {
                info!(
                    source = source.name(),
                    values = series.len(),
                    "air pressure retrieved"
                );
                return Some(series);
            }
            Err(error) => {
                diagnostics.warn(
                    DiagnosticKind::RetrievalDegradation,
                    format!(
                        "Pressure retrieval from {} failed: {}",
                        source.name(),
                        error
                    ),
                );
            }
        }
    }

    if primary.is_none() && secondary.is_none() {
        diagnostics.warn(
            DiagnosticKind::RetrievalDegradation,
            "Air pressure is needed but no retrieval source is available",
        );
    }
    None
}

/// Fill only the timestamps the sensor did not cover; measured values are
/// never overwritten.
fn merge_fetched(
    table: &mut WideTable,
    inventory: &mut VariableInventory,
    fetched: &[(DateTime<Utc>, f64)],
    stats: &mut PrepStats,
) -> Result<()> {
    if !inventory.has(&Variable::AirPressure) {
        let blank = vec![None; table.len()];
        table.insert_column(Variable::AirPressure, blank)?;
        inventory.record(Variable::AirPressure);
    }

    let by_timestamp: HashMap<i64, f64> = fetched.iter().map(|(ts, v)| (ts.timestamp(), *v)).collect();
    let timestamps = table.timestamps().to_vec();
    let column = table
        .column_mut(&Variable::AirPressure)
        .expect("column inserted above");

    let mut filled = 0usize;
    for (slot, ts) in column.iter_mut().zip(timestamps.iter()) {
        if slot.is_none() {
            if let Some(value) = by_timestamp.get(&ts.timestamp()) {
                *slot = Some(*value);
                filled += 1;
            }
        }
    }
    stats.pressure_filled += filled;
    Ok(())
}

/// Linear interpolation between the nearest measured neighbors. Leading and
/// trailing gaps are left alone: no extrapolation beyond the dataset
/// bounds.
fn interpolate_between_neighbors(column: &mut [Option<f64>]) {
    let mut i = 0;
    while i < column.len() {
        if column[i].is_some() {
            i += 1;
            continue;
        }
        let gap_start = i;
        while i < column.len() && column[i].is_none() {
            i += 1;
        }
        // Interior gap only: needs a neighbor on both sides.
        if gap_start == 0 || i == column.len() {
            continue;
        }
        let left = column[gap_start - 1].expect("left neighbor exists");
        let right = column[i].expect("right neighbor exists");
        let span = (i - gap_start + 1) as f64;
        for (k, slot) in column[gap_start..i].iter_mut().enumerate() {
            let t = (k + 1) as f64 / span;
            *slot = Some(left + (right - left) * t);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrepError;
    use chrono::{Duration, TimeZone};

    struct StubSource {
        name: &'static str,
        series: Option<Vec<(DateTime<Utc>, f64)>>,
    }

    impl PressureSource for StubSource {
        fn name(&self) -> &str {
            self.name
        }

        fn fetch(
            &self,
            _site: &SiteMetadata,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<(DateTime<Utc>, f64)>> {
            self.series.clone().ok_or(PrepError::PressureRetrieval {
                src_name: self.name.to_string(),
                reason: "unreachable host".to_string(),
            })
        }
    }

    fn site() -> SiteMetadata {
        SiteMetadata {
            region: "NC".to_string(),
            site: "Eno".to_string(),
            lat: 36.02,
            lon: -78.98,
        }
    }

    fn timestamps(count: usize) -> Vec<DateTime<Utc>> {
        let base = Utc.with_ymd_and_hms(2023, 6, 1, 10, 0, 0).unwrap();
        (0..count)
            .map(|i| base + Duration::minutes(i as i64 * 15))
            .collect()
    }

    fn needs_saturation() -> PressureNeeds {
        PressureNeeds {
            for_saturation: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_fetched_values_fill_only_missing_rows() {
        let ts = timestamps(4);
        let mut table = WideTable::new(ts.clone());
        table
            .insert_column(
                Variable::AirPressure,
                vec![Some(101.0), None, None, Some(101.6)],
            )
            .unwrap();
        let mut inventory = VariableInventory::from_table(&table);

        let source = StubSource {
            name: "noaa",
            series: Some(ts.iter().map(|t| (*t, 99.0)).collect()),
        };
        let mut stats = PrepStats::new();
        let mut log = DiagnosticLog::new();
        reconcile_pressure(
            &mut table,
            &mut inventory,
            &site(),
            needs_saturation(),
            Some(&source),
            None,
            &mut stats,
            &mut log,
        )
        .unwrap();

        let column = table.column(&Variable::AirPressure).unwrap();
        // Measured endpoints untouched, interior filled from retrieval.
        assert_eq!(column[0], Some(101.0));
        assert_eq!(column[3], Some(101.6));
        assert_eq!(column[1], Some(99.0));
        assert_eq!(stats.pressure_filled, 2);
    }

    #[test]
    fn test_secondary_source_used_when_primary_fails() {
        let ts = timestamps(3);
        let mut table = WideTable::new(ts.clone());
        let mut inventory = VariableInventory::from_table(&table);

        let primary = StubSource {
            name: "noaa",
            series: None,
        };
        let secondary = StubSource {
            name: "asos",
            series: Some(ts.iter().map(|t| (*t, 100.5)).collect()),
        };
        let mut stats = PrepStats::new();
        let mut log = DiagnosticLog::new();
        reconcile_pressure(
            &mut table,
            &mut inventory,
            &site(),
            needs_saturation(),
            Some(&primary),
            Some(&secondary),
            &mut stats,
            &mut log,
        )
        .unwrap();

        assert!(log.has(DiagnosticKind::RetrievalDegradation));
        assert_eq!(stats.pressure_filled, 3);
        assert_eq!(
            table.missing_fraction(&Variable::AirPressure),
            Some(0.0)
        );
    }

    #[test]
    fn test_both_sources_failing_degrades_without_error() {
        let mut table = WideTable::new(timestamps(3));
        let mut inventory = VariableInventory::from_table(&table);

        let primary = StubSource {
            name: "noaa",
            series: None,
        };
        let secondary = StubSource {
            name: "asos",
            series: None,
        };
        let mut stats = PrepStats::new();
        let mut log = DiagnosticLog::new();
        let result = reconcile_pressure(
            &mut table,
            &mut inventory,
            &site(),
            needs_saturation(),
            Some(&primary),
            Some(&secondary),
            &mut stats,
            &mut log,
        );

        assert!(result.is_ok());
        assert_eq!(log.count(DiagnosticKind::RetrievalDegradation), 2);
        assert!(!inventory.has(&Variable::AirPressure));
    }

    #[test]
    fn test_interior_gaps_interpolated_ends_left_alone() {
        let mut column = vec![None, Some(100.0), None, None, Some(103.0), None];
        interpolate_between_neighbors(&mut column);
        assert_eq!(column[0], None);
        assert_eq!(column[2], Some(101.0));
        assert_eq!(column[3], Some(102.0));
        assert_eq!(column[5], None);
    }

    #[test]
    fn test_low_coverage_without_need_warns() {
        let mut table = WideTable::new(timestamps(4));
        table
            .insert_column(
                Variable::AirPressure,
                vec![Some(101.0), None, None, None],
            )
            .unwrap();
        let mut inventory = VariableInventory::from_table(&table);

        let mut stats = PrepStats::new();
        let mut log = DiagnosticLog::new();
        reconcile_pressure(
            &mut table,
            &mut inventory,
            &site(),
            PressureNeeds::default(),
            None,
            None,
            &mut stats,
            &mut log,
        )
        .unwrap();

        assert!(log.has(DiagnosticKind::LowPressureCoverage));
    }
}
