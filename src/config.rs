//! Run configuration and validation.
//!
//! Mirrors the recognized option surface: output model, estimation method,
//! target interval, flag removal, gap filling, rating-curve specification,
//! and the derivation switches. Configurations deserialize from TOML and are
//! validated up front; every closed option set is a Rust enum so invalid
//! values fail at parse or validation time, never mid-pipeline.

use crate::constants::SECONDS_PER_MINUTE;
use crate::error::{PrepError, Result};
use crate::models::{FlagType, OutputKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Fixed rejection messages for the currently unsupported schema targets.
pub const BASE_UNSUPPORTED: &str = "BASE output is not yet supported";
pub const MLE_UNSUPPORTED: &str =
    "MLE estimation is not currently supported; use method = \"bayes\"";

/// Output model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "streamMetabolizer")]
    StreamMetabolizer,
    #[serde(rename = "BASE")]
    Base,
}

/// Estimation method the downstream model will use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimationMethod {
    Bayes,
    Mle,
}

/// Gap imputation method requested for the conditioned table.
///
/// The builtin filler covers the simple methods; `kalman`, `ma`, and
/// `random` require an external imputation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMethod {
    Interpolation,
    Locf,
    Mean,
    Random,
    Kalman,
    Ma,
    None,
}

impl FillMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillMethod::Interpolation => "interpolation",
            FillMethod::Locf => "locf",
            FillMethod::Mean => "mean",
            FillMethod::Random => "random",
            FillMethod::Kalman => "kalman",
            FillMethod::Ma => "ma",
            FillMethod::None => "none",
        }
    }
}

/// Policy for duplicate measurements of the same quantity (level vs depth,
/// local vs remote discharge). Never applied silently; the chosen policy is
/// always surfaced as a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the primary series (depth, or the local sensor).
    PreferPrimary,
    /// Keep the secondary series (level, or the remote gauge).
    PreferSecondary,
    /// Keep whichever series has fewer missing values.
    FewestMissing,
}

/// Functional form of the rating curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveForm {
    /// Q = a * Z^b
    Power,
    /// Q = a * e^(b Z)
    Exponential,
    /// Q = a * Z + b
    Linear,
}

/// Stage-discharge calibration pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPairs {
    /// Stage/level values, same vertical reference as the calibration gauge.
    pub z: Vec<f64>,
    /// Discharge values paired with `z`.
    pub q: Vec<f64>,
}

/// Rating-curve specification: calibration pairs to fit, or coefficients to
/// apply directly. When both are given, coefficients win and the conflict is
/// recorded as a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingCurveSpec {
    #[serde(default)]
    pub calibration_pairs: Option<CalibrationPairs>,
    /// Pre-fitted (a, b) for the selected form.
    #[serde(default)]
    pub coefficients: Option<(f64, f64)>,
    pub form: CurveForm,
    /// Height of the level sensor above the calibration datum, in meters.
    /// Added to the continuous level series before prediction.
    #[serde(default)]
    pub sensor_height: Option<f64>,
    /// Blank predictions whose stage lies outside the calibration range
    /// instead of extrapolating.
    #[serde(default)]
    pub ignore_out_of_range: bool,
    /// Request a diagnostic plot from the external plotting collaborator.
    #[serde(default)]
    pub plot: bool,
}

impl RatingCurveSpec {
    /// Shape-level validation; numeric fitting concerns are checked at fit
    /// time where the diagnostic log is available.
    pub fn validate(&self) -> Result<()> {
        if self.calibration_pairs.is_none() && self.coefficients.is_none() {
            return Err(PrepError::configuration(
                "Rating curve requires calibration_pairs or coefficients",
            ));
        }
        if let Some(pairs) = &self.calibration_pairs {
            if pairs.z.len() != pairs.q.len() {
                return Err(PrepError::configuration(format!(
                    "Rating curve has {} stage values but {} discharge values",
                    pairs.z.len(),
                    pairs.q.len()
                )));
            }
            if pairs.z.len() < 2 && self.coefficients.is_none() {
                return Err(PrepError::configuration(
                    "Rating curve needs at least 2 calibration pairs to fit",
                ));
            }
        }
        Ok(())
    }
}

/// Complete configuration for one preparation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    pub model: ModelKind,
    /// Estimation method; accepted as `type` in configuration files.
    #[serde(alias = "type")]
    pub method: EstimationMethod,

    /// Target interval as `"<number> min"` or `"<number> hour"`; `None`
    /// selects the interval automatically from the data.
    pub interval: Option<String>,

    /// Flags whose observations are blanked before processing. An empty
    /// list removes nothing.
    pub rm_flagged: Vec<FlagType>,

    pub fillgaps: FillMethod,

    /// Longest consecutive missing span to impute, in hours.
    pub maxhours: f64,

    pub rating_curve: Option<RatingCurveSpec>,

    /// Estimate reach-averaged depth from discharge instead of substituting
    /// level for depth.
    pub estimate_areal_depth: bool,

    /// Model photosynthetically active radiation when no light sensor is
    /// present.
    pub estimate_par: bool,

    /// Always retrieve air pressure, even when a partial local series
    /// exists.
    pub retrieve_pressure: bool,

    /// Policy when both members of a duplicate pair are present.
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::StreamMetabolizer,
            method: EstimationMethod::Bayes,
            interval: None,
            rm_flagged: vec![FlagType::Questionable, FlagType::BadData],
            fillgaps: FillMethod::Interpolation,
            maxhours: 3.0,
            rating_curve: None,
            estimate_areal_depth: false,
            estimate_par: true,
            retrieve_pressure: false,
            duplicate_policy: DuplicatePolicy::PreferPrimary,
        }
    }
}

impl PrepConfig {
    /// Load a configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| PrepError::configuration(format!("Invalid config file: {}", e)))
    }

    /// Validate the configuration and resolve the output schema tag.
    ///
    /// Configuration errors are fatal and reported before any data is
    /// touched.
    pub fn validate(&self) -> Result<OutputKind> {
        let kind = match (self.model, self.method) {
            (ModelKind::Base, _) => return Err(PrepError::configuration(BASE_UNSUPPORTED)),
            (ModelKind::StreamMetabolizer, EstimationMethod::Mle) => {
                return Err(PrepError::configuration(MLE_UNSUPPORTED));
            }
            (ModelKind::StreamMetabolizer, EstimationMethod::Bayes) => {
                OutputKind::StreamMetabolizerBayes
            }
        };

        if !self.maxhours.is_finite() || self.maxhours <= 0.0 {
            return Err(PrepError::configuration(format!(
                "maxhours must be a positive number, got {}",
                self.maxhours
            )));
        }

        if let Some(raw) = &self.interval {
            parse_interval(raw)?;
        }

        if let Some(curve) = &self.rating_curve {
            curve.validate()?;
        }

        Ok(kind)
    }

    /// Requested interval in seconds, if one was configured. Call only
    /// after [`PrepConfig::validate`].
    pub fn requested_interval_seconds(&self) -> Result<Option<i64>> {
        self.interval.as_deref().map(parse_interval).transpose()
    }

    /// Set the target interval string.
    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());
        self
    }

    /// Set the gap-fill method.
    pub fn with_fill_method(mut self, method: FillMethod) -> Self {
        self.fillgaps = method;
        self
    }

    /// Set the flags to remove.
    pub fn with_removed_flags(mut self, flags: Vec<FlagType>) -> Self {
        self.rm_flagged = flags;
        self
    }

    /// Attach a rating-curve specification.
    pub fn with_rating_curve(mut self, spec: RatingCurveSpec) -> Self {
        self.rating_curve = Some(spec);
        self
    }

    /// Enable areal depth estimation from discharge.
    pub fn with_areal_depth(mut self) -> Self {
        self.estimate_areal_depth = true;
        self
    }
}

/// Parse the interval grammar `"<number> (min|hour)"`.
///
/// Minutes must be whole; hours may be fractional but must normalize to a
/// whole number of minutes, since the grid builder cannot represent
/// fractional-minute steps.
pub fn parse_interval(raw: &str) -> Result<i64> {
    // Unwrap is safe: the pattern is a compile-time literal.
    let re = Regex::new(r"^\s*([0-9]+(?:\.[0-9]+)?)\s*(min|hour)s?\s*$").unwrap();
    let caps = re.captures(raw).ok_or_else(|| {
        PrepError::configuration(format!(
            "Invalid interval '{}': expected \"<number> min\" or \"<number> hour\"",
            raw
        ))
    })?;

    let number: f64 = caps[1]
        .parse()
        .map_err(|_| PrepError::configuration(format!("Invalid interval number in '{}'", raw)))?;
    if number <= 0.0 {
        return Err(PrepError::configuration(format!(
            "Interval must be positive, got '{}'",
            raw
        )));
    }

    let minutes = match &caps[2] {
        "min" => {
            if number.fract() != 0.0 {
                return Err(PrepError::configuration(format!(
                    "Minute intervals must be whole numbers, got '{}'",
                    raw
                )));
            }
            number
        }
        "hour" => {
            let minutes = number * 60.0;
            if (minutes - minutes.round()).abs() > 1e-9 {
                return Err(PrepError::configuration(format!(
                    "Interval '{}' does not normalize to whole minutes",
                    raw
                )));
            }
            minutes.round()
        }
        _ => unreachable!("regex restricts the unit"),
    };

    Ok(minutes as i64 * SECONDS_PER_MINUTE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = PrepConfig::default();
        assert_eq!(
            config.validate().unwrap(),
            OutputKind::StreamMetabolizerBayes
        );
    }

    #[test]
    fn test_base_model_rejected() {
        let config = PrepConfig {
            model: ModelKind::Base,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("BASE"));
    }

    #[test]
    fn test_mle_method_rejected() {
        let config = PrepConfig {
            method: EstimationMethod::Mle,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("MLE"));
    }

    #[test]
    fn test_maxhours_must_be_positive() {
        let config = PrepConfig {
            maxhours: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_grammar() {
        assert_eq!(parse_interval("15 min").unwrap(), 900);
        assert_eq!(parse_interval("15min").unwrap(), 900);
        assert_eq!(parse_interval("1 hour").unwrap(), 3600);
        assert_eq!(parse_interval("0.5 hours").unwrap(), 1800);
        assert_eq!(parse_interval("0.25 hour").unwrap(), 900);

        assert!(parse_interval("7.5 min").is_err());
        assert!(parse_interval("0.333 hour").is_err());
        assert!(parse_interval("90 sec").is_err());
        assert!(parse_interval("fast").is_err());
        assert!(parse_interval("0 min").is_err());
    }

    #[test]
    fn test_rating_curve_shape_validation() {
        let spec = RatingCurveSpec {
            calibration_pairs: None,
            coefficients: None,
            form: CurveForm::Power,
            sensor_height: None,
            ignore_out_of_range: false,
            plot: false,
        };
        assert!(spec.validate().is_err());

        let spec = RatingCurveSpec {
            calibration_pairs: Some(CalibrationPairs {
                z: vec![0.1, 0.2],
                q: vec![0.5],
            }),
            coefficients: None,
            form: CurveForm::Power,
            sensor_height: None,
            ignore_out_of_range: false,
            plot: false,
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let text = r#"
            model = "streamMetabolizer"
            type = "bayes"
            interval = "15 min"
            rm_flagged = ["Questionable", "Bad Data"]
            fillgaps = "interpolation"
            maxhours = 3.0
            estimate_areal_depth = true

            [rating_curve]
            form = "power"
            sensor_height = 0.3
            ignore_out_of_range = true

            [rating_curve.calibration_pairs]
            z = [0.1, 0.2, 0.3]
            q = [0.5, 1.1, 2.0]
        "#;
        let config: PrepConfig = toml::from_str(text).unwrap();
        assert_eq!(config.model, ModelKind::StreamMetabolizer);
        assert_eq!(config.interval.as_deref(), Some("15 min"));
        assert!(config.estimate_areal_depth);
        let curve = config.rating_curve.as_ref().unwrap();
        assert_eq!(curve.form, CurveForm::Power);
        assert_eq!(curve.sensor_height, Some(0.3));
        assert!(curve.ignore_out_of_range);
        assert!(config.validate().is_ok());
    }
}
