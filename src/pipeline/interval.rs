//! Sampling-interval inference and reconciliation.
//!
//! Each variable's native interval is inferred from the run-length structure
//! of its successive timestamp differences, then the per-variable intervals
//! are reconciled into one target grid spacing, either automatically or
//! against a user-requested interval.

use crate::error::{PrepError, Result};
use crate::models::{IntervalRecord, VariableSeries};
use crate::pipeline::diagnostics::{DiagnosticKind, DiagnosticLog};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Infer the native sampling interval of one variable.
///
/// Successive differences are run-length encoded. A single run means the
/// spacing is exact. Otherwise the modal interval is the difference value
/// covering the largest share of the record's duration (summed temporal
/// length of its runs, not its run count), so a long burst of anomalously
/// fine spacing cannot displace the spacing that dominates the record.
///
/// The series must hold at least 2 points.
pub fn infer_interval(
    series: &VariableSeries,
    diagnostics: &mut DiagnosticLog,
) -> Result<IntervalRecord> {
    if series.len() < 2 {
        return Err(PrepError::data_sufficiency(format!(
            "Cannot infer interval for {} from {} record(s)",
            series.variable.canonical_name(),
            series.len()
        )));
    }

    let timestamps: Vec<_> = series.timestamps().collect();
    let diffs: Vec<i64> = timestamps
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_seconds())
        .collect();

    let runs = run_length_encode(&diffs);
    if runs.len() == 1 {
        return Ok(IntervalRecord {
            variable: series.variable.clone(),
            seconds: runs[0].0,
            gap_count: 0,
            irregular: false,
        });
    }

    // Summed temporal length per distinct difference value.
    let mut durations: BTreeMap<i64, i64> = BTreeMap::new();
    for &(value, length) in &runs {
        *durations.entry(value).or_insert(0) += value * length as i64;
    }
    // Iterate descending so max_by_key's keep-last rule breaks ties toward
    // the smaller value.
    let modal = durations
        .iter()
        .rev()
        .max_by_key(|(_, duration)| *duration)
        .map(|(value, _)| *value)
        .expect("at least one difference exists");

    let min_diff = *durations.keys().next().expect("at least one difference");
    let irregular = durations.keys().any(|value| value % min_diff != 0);
    let gap_count = runs.iter().filter(|(value, _)| *value != modal).count();

    if irregular {
        diagnostics.warn(
            DiagnosticKind::IrregularInterval,
            format!(
                "{} is sampled irregularly; using the {:.1} min modal interval, gaps will be introduced",
                series.variable.canonical_name(),
                modal as f64 / 60.0
            ),
        );
    } else {
        debug!(
            variable = series.variable.canonical_name(),
            gap_count, "interval inferred with gaps"
        );
    }

    Ok(IntervalRecord {
        variable: series.variable.clone(),
        seconds: modal,
        gap_count,
        irregular,
    })
}

/// Run-length encode a difference sequence into (value, length) runs.
fn run_length_encode(values: &[i64]) -> Vec<(i64, usize)> {
    let mut runs: Vec<(i64, usize)> = Vec::new();
    for &value in values {
        match runs.last_mut() {
            Some((last, length)) if *last == value => *length += 1,
            _ => runs.push((value, 1)),
        }
    }
    runs
}

/// Select the target grid spacing from the per-variable intervals.
///
/// When the variables agree, their shared interval is used. When they
/// disagree and no interval was requested, the coarsest detected interval
/// wins, so the finer series are thinned instead of the coarser series
/// gaining gaps. A requested interval must either match a detected interval
/// exactly or be an exact multiple of the coarsest one.
pub fn reconcile_intervals(
    records: &[IntervalRecord],
    requested_seconds: Option<i64>,
    diagnostics: &mut DiagnosticLog,
) -> Result<i64> {
    if records.is_empty() {
        return Err(PrepError::data_sufficiency(
            "No variable had enough records to infer a sampling interval",
        ));
    }

    let detected: BTreeSet<i64> = records.iter().map(|r| r.seconds).collect();
    let coarsest = *detected.iter().next_back().expect("non-empty set");

    match requested_seconds {
        None => {
            if detected.len() > 1 {
                let listing = describe_intervals(records);
                diagnostics.warn(
                    DiagnosticKind::IntervalFallback,
                    format!(
                        "Variables disagree on sampling interval ({}); using the coarsest, {:.1} min",
                        listing,
                        coarsest as f64 / 60.0
                    ),
                );
            }
            Ok(coarsest)
        }
        Some(requested) => {
            if detected.contains(&requested) || requested % coarsest == 0 {
                Ok(requested)
            } else {
                let accepted: Vec<String> = detected
                    .iter()
                    .map(|s| format!("{:.1} min", *s as f64 / 60.0))
                    .collect();
                Err(PrepError::configuration(format!(
                    "Requested interval {:.1} min is not usable; accepted values are {} or any multiple of {:.1} min",
                    requested as f64 / 60.0,
                    accepted.join(", "),
                    coarsest as f64 / 60.0
                )))
            }
        }
    }
}

fn describe_intervals(records: &[IntervalRecord]) -> String {
    records
        .iter()
        .map(|r| {
            format!(
                "{}: {:.1} min",
                r.variable.canonical_name(),
                r.minutes()
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Variable;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
    }

    fn series_from_offsets(offsets_min: &[i64]) -> VariableSeries {
        let points = offsets_min
            .iter()
            .map(|m| (base() + Duration::minutes(*m), Some(1.0)))
            .collect();
        VariableSeries::assemble(Variable::DoConc, points).unwrap()
    }

    fn record(variable: Variable, seconds: i64) -> IntervalRecord {
        IntervalRecord {
            variable,
            seconds,
            gap_count: 0,
            irregular: false,
        }
    }

    #[test]
    fn test_uniform_spacing_is_exact() {
        let series = series_from_offsets(&[0, 15, 30, 45, 60]);
        let mut log = DiagnosticLog::new();
        let interval = infer_interval(&series, &mut log).unwrap();
        assert_eq!(interval.seconds, 900);
        assert_eq!(interval.gap_count, 0);
        assert!(!interval.irregular);
        assert!(log.is_empty());
    }

    #[test]
    fn test_single_gap_detected() {
        // One missing sample at minute 45: the 30-minute jump is one gap.
        let series = series_from_offsets(&[0, 15, 30, 60, 75, 90]);
        let mut log = DiagnosticLog::new();
        let interval = infer_interval(&series, &mut log).unwrap();
        assert_eq!(interval.seconds, 900);
        assert_eq!(interval.gap_count, 1);
        assert!(!interval.irregular);
    }

    #[test]
    fn test_two_gaps_detected() {
        let series = series_from_offsets(&[0, 15, 45, 60, 120, 135]);
        let mut log = DiagnosticLog::new();
        let interval = infer_interval(&series, &mut log).unwrap();
        assert_eq!(interval.seconds, 900);
        assert_eq!(interval.gap_count, 2);
    }

    #[test]
    fn test_duration_weighted_mode_resists_long_anomalous_run() {
        // Twenty 1-minute diffs (20 min of record) against eight 15-minute
        // diffs (120 min of record). Occurrence count favors 1 min; the
        // duration-weighted mode must still pick 15 min.
        let mut offsets: Vec<i64> = (0..=20).collect();
        let last = *offsets.last().unwrap();
        offsets.extend((1..=8).map(|i| last + i * 15));
        let series = series_from_offsets(&offsets);
        let mut log = DiagnosticLog::new();
        let interval = infer_interval(&series, &mut log).unwrap();
        assert_eq!(interval.seconds, 900);
    }

    #[test]
    fn test_irregular_spacing_warns() {
        // 7-minute diffs are not multiples of 5-minute diffs.
        let series = series_from_offsets(&[0, 5, 10, 17, 24, 31, 38, 45]);
        let mut log = DiagnosticLog::new();
        let interval = infer_interval(&series, &mut log).unwrap();
        assert!(interval.irregular);
        assert!(log.has(DiagnosticKind::IrregularInterval));
        // 7-minute spacing covers 28 min, 5-minute covers 20 min.
        assert_eq!(interval.seconds, 420);
    }

    #[test]
    fn test_too_short_series_rejected() {
        let series = series_from_offsets(&[0]);
        let mut log = DiagnosticLog::new();
        assert!(infer_interval(&series, &mut log).is_err());
    }

    #[test]
    fn test_reconcile_agreement_passes_through() {
        let records = vec![
            record(Variable::DoConc, 900),
            record(Variable::WaterTemp, 900),
        ];
        let mut log = DiagnosticLog::new();
        assert_eq!(reconcile_intervals(&records, None, &mut log).unwrap(), 900);
        assert!(log.is_empty());
    }

    #[test]
    fn test_reconcile_disagreement_picks_coarsest() {
        let records = vec![
            record(Variable::DoConc, 300),
            record(Variable::WaterTemp, 900),
        ];
        let mut log = DiagnosticLog::new();
        assert_eq!(reconcile_intervals(&records, None, &mut log).unwrap(), 900);
        assert!(log.has(DiagnosticKind::IntervalFallback));
    }

    #[test]
    fn test_reconcile_accepts_detected_or_multiple() {
        let records = vec![
            record(Variable::DoConc, 300),
            record(Variable::WaterTemp, 900),
        ];
        let mut log = DiagnosticLog::new();
        // Matches a detected interval exactly.
        assert_eq!(
            reconcile_intervals(&records, Some(300), &mut log).unwrap(),
            300
        );
        // Thinning: a multiple of the coarsest interval.
        assert_eq!(
            reconcile_intervals(&records, Some(1800), &mut log).unwrap(),
            1800
        );
    }

    #[test]
    fn test_reconcile_rejects_incompatible_request() {
        let records = vec![
            record(Variable::DoConc, 300),
            record(Variable::WaterTemp, 900),
        ];
        let mut log = DiagnosticLog::new();
        let err = reconcile_intervals(&records, Some(420), &mut log).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("5.0 min"));
        assert!(message.contains("15.0 min"));
    }

    #[test]
    fn test_reconcile_requires_records() {
        let mut log = DiagnosticLog::new();
        assert!(reconcile_intervals(&[], None, &mut log).is_err());
    }
}
