//! Rating-curve estimation: discharge (and depth) from a level series.
//!
//! Fits a stage-discharge relationship from calibration pairs, or applies
//! supplied coefficients, then predicts discharge for every grid timestamp
//! from the continuous level series. The adjusted level series doubles as a
//! derived depth when no depth measurement exists.

use crate::config::{CurveForm, RatingCurveSpec};
use crate::constants::{DEPTH_SCALING_COEF, DEPTH_SCALING_EXP};
use crate::error::{PrepError, Result};
use crate::models::{Variable, VariableInventory, WideTable};
use crate::pipeline::diagnostics::{DiagnosticKind, DiagnosticLog};
use tracing::{debug, info};

/// A rating curve ready to apply: the functional form, its parameters, and
/// the stage range it was calibrated over (absent when coefficients were
/// supplied directly).
#[derive(Debug, Clone, PartialEq)]
pub struct FittedCurve {
    pub form: CurveForm,
    pub a: f64,
    pub b: f64,
    pub z_range: Option<(f64, f64)>,
}

impl FittedCurve {
    /// Predicted discharge for a stage value. `None` when the form is not
    /// defined at that stage (non-positive stage under the power form).
    pub fn predict(&self, z: f64) -> Option<f64> {
        match self.form {
            CurveForm::Power => (z > 0.0).then(|| self.a * z.powf(self.b)),
            CurveForm::Exponential => Some(self.a * (self.b * z).exp()),
            CurveForm::Linear => Some(self.a * z + self.b),
        }
    }

    /// Whether a stage value lies inside the calibration range. Always true
    /// when no range is known.
    pub fn in_range(&self, z: f64) -> bool {
        match self.z_range {
            Some((lo, hi)) => z >= lo && z <= hi,
            None => true,
        }
    }
}

/// Resolve a usable curve from the specification: supplied coefficients win
/// over calibration pairs, with the conflict recorded; pairs are fitted by
/// least squares on the form's linearizing transform.
pub fn resolve_curve(spec: &RatingCurveSpec, diagnostics: &mut DiagnosticLog) -> Result<FittedCurve> {
    match (&spec.coefficients, &spec.calibration_pairs) {
        (Some((a, b)), pairs) => {
            if pairs.is_some() {
                diagnostics.warn(
                    DiagnosticKind::RatingCurve,
                    "Both coefficients and calibration pairs supplied; using coefficients and ignoring the pairs",
                );
            }
            Ok(FittedCurve {
                form: spec.form,
                a: *a,
                b: *b,
                z_range: None,
            })
        }
        (None, Some(pairs)) => fit_curve(spec.form, &pairs.z, &pairs.q, diagnostics),
        (None, None) => Err(PrepError::configuration(
            "Rating curve requires calibration_pairs or coefficients",
        )),
    }
}

/// Fit (a, b) for the given form from stage-discharge pairs.
///
/// Power and exponential forms are fitted as ordinary least squares on the
/// log-transformed relationship; the linear form directly. Pairs the
/// transform cannot use (non-positive stage or discharge) are dropped with
/// a warning.
pub fn fit_curve(
    form: CurveForm,
    z: &[f64],
    q: &[f64],
    diagnostics: &mut DiagnosticLog,
) -> Result<FittedCurve> {
    let usable: Vec<(f64, f64)> = z
        .iter()
        .zip(q.iter())
        .filter(|(z, q)| {
            let finite = z.is_finite() && q.is_finite();
            match form {
                CurveForm::Power => finite && **z > 0.0 && **q > 0.0,
                CurveForm::Exponential => finite && **q > 0.0,
                CurveForm::Linear => finite,
            }
        })
        .map(|(z, q)| (*z, *q))
        .collect();

    let dropped = z.len().min(q.len()) - usable.len();
    if dropped > 0 {
        diagnostics.warn(
            DiagnosticKind::RatingCurve,
            format!(
                "{} calibration pair(s) unusable under the {:?} form were dropped",
                dropped, form
            ),
        );
    }
    if usable.len() < 2 {
        return Err(PrepError::configuration(format!(
            "Rating curve fit needs at least 2 usable calibration pairs, got {}",
            usable.len()
        )));
    }

    let (x, y): (Vec<f64>, Vec<f64>) = usable
        .iter()
        .map(|(z, q)| match form {
            CurveForm::Power => (z.ln(), q.ln()),
            CurveForm::Exponential => (*z, q.ln()),
            CurveForm::Linear => (*z, *q),
        })
        .unzip();
    let (slope, intercept) = least_squares(&x, &y)?;

    let (a, b) = match form {
        CurveForm::Power | CurveForm::Exponential => (intercept.exp(), slope),
        CurveForm::Linear => (slope, intercept),
    };

    let z_min = usable.iter().map(|(z, _)| *z).fold(f64::INFINITY, f64::min);
    let z_max = usable
        .iter()
        .map(|(z, _)| *z)
        .fold(f64::NEG_INFINITY, f64::max);

    info!(?form, a, b, z_min, z_max, "rating curve fitted");
    Ok(FittedCurve {
        form,
        a,
        b,
        z_range: Some((z_min, z_max)),
    })
}

/// Ordinary least squares for y = slope * x + intercept.
fn least_squares(x: &[f64], y: &[f64]) -> Result<(f64, f64)> {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let ss_xx: f64 = x.iter().map(|v| (v - mean_x).powi(2)).sum();
    if ss_xx.abs() < f64::EPSILON {
        return Err(PrepError::configuration(
            "Rating curve fit is degenerate: calibration stages are constant",
        ));
    }
    let ss_xy: f64 = x
        .iter()
        .zip(y.iter())
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let slope = ss_xy / ss_xx;
    Ok((slope, mean_y - slope * mean_x))
}

/// Derive discharge (and depth, when absent) from the level series.
///
/// The level series is shifted by `sensor_height` to the calibration's
/// vertical reference before prediction, and the shifted series becomes the
/// derived depth unless `derive_depth` is false (the caller will estimate
/// reach-averaged depth from the discharge instead). Out-of-range stages
/// are blanked rather than extrapolated when `ignore_out_of_range` is set
/// and a calibration range is known.
pub fn derive_discharge_and_depth(
    table: &mut WideTable,
    inventory: &mut VariableInventory,
    spec: &RatingCurveSpec,
    derive_depth: bool,
    diagnostics: &mut DiagnosticLog,
) -> Result<()> {
    if !inventory.has(&Variable::Level) {
        return Err(PrepError::data_sufficiency(
            "Rating curve requires a level series and none is present",
        ));
    }

    let curve = resolve_curve(spec, diagnostics)?;
    if spec.ignore_out_of_range && curve.z_range.is_none() {
        diagnostics.warn(
            DiagnosticKind::RatingCurve,
            "ignore_out_of_range has no effect with supplied coefficients: no calibration range is known",
        );
    }
    if spec.plot {
        debug!("rating-curve plot requested; delegated to the external plotting collaborator");
    }

    let offset = spec.sensor_height.unwrap_or(0.0);
    let adjusted: Vec<Option<f64>> = table
        .column(&Variable::Level)
        .expect("inventory tracks table columns")
        .iter()
        .map(|v| v.map(|z| z + offset))
        .collect();

    let mut out_of_range = 0usize;
    let discharge: Vec<Option<f64>> = adjusted
        .iter()
        .map(|value| {
            value.and_then(|z| {
                if spec.ignore_out_of_range && !curve.in_range(z) {
                    out_of_range += 1;
                    return None;
                }
                curve.predict(z)
            })
        })
        .collect();
    if out_of_range > 0 {
        diagnostics.warn(
            DiagnosticKind::OutOfRangeDischarge,
            format!(
                "{} stage value(s) outside the calibration range were set to missing",
                out_of_range
            ),
        );
    }

    table.insert_column(Variable::Discharge, discharge)?;
    inventory.record(Variable::Discharge);

    if derive_depth && !inventory.has(&Variable::Depth) {
        table.insert_column(Variable::Depth, adjusted)?;
        inventory.record(Variable::Depth);
    }

    Ok(())
}

/// Reach-averaged depth from discharge via downstream hydraulic-geometry
/// scaling.
pub fn areal_depth_from_discharge(q: f64) -> Option<f64> {
    (q > 0.0).then(|| DEPTH_SCALING_COEF * q.powf(DEPTH_SCALING_EXP))
}
