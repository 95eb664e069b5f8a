//! Gap filling for the conditioned table.
//!
//! Imputation is a pluggable boundary: the pipeline only depends on the
//! [`GapFiller`] trait. The builtin filler covers the simple methods
//! (linear interpolation, last-observation-carried-forward, column mean);
//! the model-based methods must come from an external collaborator.

use crate::config::FillMethod;
use crate::error::{PrepError, Result};
use crate::models::WideTable;
use crate::pipeline::diagnostics::{DiagnosticLog, PrepStats};
use tracing::debug;

/// Pluggable imputation boundary.
///
/// `max_span_rows` is the longest consecutive missing run the filler may
/// impute; longer runs must be left missing.
pub trait GapFiller {
    fn fill(
        &self,
        table: &mut WideTable,
        method: FillMethod,
        max_span_rows: usize,
        stats: &mut PrepStats,
        diagnostics: &mut DiagnosticLog,
    ) -> Result<()>;
}

/// Builtin filler for the methods that need no model fitting.
#[derive(Debug, Default)]
pub struct BuiltinGapFiller;

impl GapFiller for BuiltinGapFiller {
    fn fill(
        &self,
        table: &mut WideTable,
        method: FillMethod,
        max_span_rows: usize,
        stats: &mut PrepStats,
        _diagnostics: &mut DiagnosticLog,
    ) -> Result<()> {
        match method {
            FillMethod::None => return Ok(()),
            FillMethod::Interpolation | FillMethod::Locf | FillMethod::Mean => {}
            FillMethod::Random | FillMethod::Kalman | FillMethod::Ma => {
                return Err(PrepError::configuration(format!(
                    "Gap-fill method '{}' requires an external imputation collaborator",
                    method.as_str()
                )));
            }
        }

        let variables: Vec<_> = table.variables().cloned().collect();
        let mut filled_total = 0usize;
        for variable in variables {
            let column = table.column_mut(&variable).expect("iterating own columns");
            filled_total += fill_column(column, method, max_span_rows);
        }

        debug!(
            method = method.as_str(),
            filled = filled_total,
            "gap filling complete"
        );
        stats.gaps_filled += filled_total;
        Ok(())
    }
}

/// Fill one column's missing runs of length <= `max_span_rows`. Returns
/// the number of values imputed.
fn fill_column(column: &mut [Option<f64>], method: FillMethod, max_span_rows: usize) -> usize {
    let mean = match method {
        FillMethod::Mean => column_mean(column),
        _ => None,
    };

    let mut filled = 0usize;
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
        let gap_len = i - gap_start;
        if gap_len > max_span_rows {
            continue;
        }

        match method {
            FillMethod::Interpolation => {
                // Needs a measured neighbor on both sides; no extrapolation.
                if gap_start == 0 || i == column.len() {
                    continue;
                }
                let left = column[gap_start - 1].expect("left neighbor exists");
                let right = column[i].expect("right neighbor exists");
                let span = (gap_len + 1) as f64;
                for (k, slot) in column[gap_start..i].iter_mut().enumerate() {
                    let t = (k + 1) as f64 / span;
                    *slot = Some(left + (right - left) * t);
                    filled += 1;
                }
            }
            FillMethod::Locf => {
                if gap_start == 0 {
                    continue;
                }
                let carried = column[gap_start - 1].expect("predecessor exists");
                for slot in column[gap_start..i].iter_mut() {
                    *slot = Some(carried);
                    filled += 1;
                }
            }
            FillMethod::Mean => {
                if let Some(mean) = mean {
                    for slot in column[gap_start..i].iter_mut() {
                        *slot = Some(mean);
                        filled += 1;
                    }
                }
            }
            _ => unreachable!("filtered in fill()"),
        }
    }
    filled
}

fn column_mean(column: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = column.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Variable;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn table_with_column(values: Vec<Option<f64>>) -> WideTable {
        let base = Utc.with_ymd_and_hms(2023, 6, 1, 10, 0, 0).unwrap();
        let timestamps: Vec<DateTime<Utc>> = (0..values.len())
            .map(|i| base + Duration::minutes(i as i64 * 15))
            .collect();
        let mut table = WideTable::new(timestamps);
        table.insert_column(Variable::DoConc, values).unwrap();
        table
    }

    fn run(
        values: Vec<Option<f64>>,
        method: FillMethod,
        max_span: usize,
    ) -> (Vec<Option<f64>>, PrepStats) {
        let mut table = table_with_column(values);
        let mut stats = PrepStats::new();
        let mut log = DiagnosticLog::new();
        BuiltinGapFiller
            .fill(&mut table, method, max_span, &mut stats, &mut log)
            .unwrap();
        (table.column(&Variable::DoConc).unwrap().to_vec(), stats)
    }

    #[test]
    fn test_interpolation_fills_short_gap() {
        let (filled, stats) = run(
            vec![Some(1.0), None, None, Some(4.0)],
            FillMethod::Interpolation,
            4,
        );
        assert_eq!(filled, vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(stats.gaps_filled, 2);
    }

    #[test]
    fn test_interpolation_respects_max_span() {
        let (filled, stats) = run(
            vec![Some(1.0), None, None, None, Some(5.0)],
            FillMethod::Interpolation,
            2,
        );
        assert_eq!(
            filled,
            vec![Some(1.0), None, None, None, Some(5.0)]
        );
        assert_eq!(stats.gaps_filled, 0);
    }

    #[test]
    fn test_interpolation_never_extrapolates() {
        let (filled, _) = run(
            vec![None, Some(2.0), Some(3.0), None],
            FillMethod::Interpolation,
            4,
        );
        assert_eq!(filled, vec![None, Some(2.0), Some(3.0), None]);
    }

    #[test]
    fn test_locf_carries_forward_only() {
        let (filled, _) = run(
            vec![None, Some(2.0), None, None],
            FillMethod::Locf,
            4,
        );
        assert_eq!(filled, vec![None, Some(2.0), Some(2.0), Some(2.0)]);
    }

    #[test]
    fn test_mean_fills_with_column_mean() {
        let (filled, _) = run(
            vec![Some(1.0), None, Some(3.0)],
            FillMethod::Mean,
            4,
        );
        assert_eq!(filled, vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_none_is_a_no_op() {
        let (filled, stats) = run(vec![Some(1.0), None], FillMethod::None, 4);
        assert_eq!(filled, vec![Some(1.0), None]);
        assert_eq!(stats.gaps_filled, 0);
    }

    #[test]
    fn test_model_based_methods_need_external_collaborator() {
        let mut table = table_with_column(vec![Some(1.0), None]);
        let mut stats = PrepStats::new();
        let mut log = DiagnosticLog::new();
        for method in [FillMethod::Kalman, FillMethod::Ma, FillMethod::Random] {
            let result =
                BuiltinGapFiller.fill(&mut table, method, 4, &mut stats, &mut log);
            assert!(matches!(result, Err(PrepError::Configuration { .. })));
        }
    }
}
