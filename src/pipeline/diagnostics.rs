//! Run diagnostics and processing statistics.
//!
//! Every recoverable quality issue the pipeline encounters is recorded here
//! and also emitted through `tracing`, so a run's degradations are never
//! silently dropped and never held in process-wide mutable state.

use std::fmt;
use tracing::warn;

/// Category of a recorded diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Sampling intervals are not clean multiples; gaps will be introduced.
    IrregularInterval,
    /// Variables disagreed on interval; the coarsest was selected.
    IntervalFallback,
    /// A variable could not vote on the interval (too few records).
    ShortSeries,
    /// Level was substituted for missing depth.
    LevelAsDepth,
    /// Duplicate measurements of one quantity were resolved by policy.
    DuplicateResolved,
    /// Rating-curve inputs conflicted or were partially unusable.
    RatingCurve,
    /// Predictions outside the calibration range were blanked.
    OutOfRangeDischarge,
    /// Physically invalid values were floored.
    InvalidValueFloored,
    /// External pressure retrieval failed or partially succeeded.
    RetrievalDegradation,
    /// Air-pressure coverage is low enough to threaten downstream modeling.
    LowPressureCoverage,
    /// A required derivation could not be completed for some rows.
    IncompleteDerivation,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::IrregularInterval => "irregular-interval",
            DiagnosticKind::IntervalFallback => "interval-fallback",
            DiagnosticKind::ShortSeries => "short-series",
            DiagnosticKind::LevelAsDepth => "level-as-depth",
            DiagnosticKind::DuplicateResolved => "duplicate-resolved",
            DiagnosticKind::RatingCurve => "rating-curve",
            DiagnosticKind::OutOfRangeDischarge => "out-of-range-discharge",
            DiagnosticKind::InvalidValueFloored => "invalid-value-floored",
            DiagnosticKind::RetrievalDegradation => "retrieval-degradation",
            DiagnosticKind::LowPressureCoverage => "low-pressure-coverage",
            DiagnosticKind::IncompleteDerivation => "incomplete-derivation",
        };
        write!(f, "{}", name)
    }
}

/// One recorded quality issue.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Ordered log of the run's recoverable quality issues.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic and emit it as a tracing warning.
    pub fn warn(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        warn!(kind = %kind, "{}", message);
        self.entries.push(Diagnostic { kind, message });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any diagnostic of the given kind was recorded.
    pub fn has(&self, kind: DiagnosticKind) -> bool {
        self.entries.iter().any(|d| d.kind == kind)
    }

    /// Count of diagnostics of the given kind.
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }
}

/// Stage-by-stage counters for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrepStats {
    /// Long-format records received from the acquisition layer.
    pub input_records: usize,
    /// Values blanked by flag removal.
    pub flagged_removed: usize,
    /// Variables present after the pivot.
    pub input_variables: usize,
    /// Rows in the canonical grid.
    pub grid_rows: usize,
    /// Grid phase offset selected by the aligner (0 = first observed row).
    pub alignment_offset: usize,
    /// Pressure values merged in from external retrieval.
    pub pressure_filled: usize,
    /// Values imputed by gap filling.
    pub gaps_filled: usize,
    /// Depth/discharge values floored by sanitation.
    pub values_floored: usize,
}

impl PrepStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-line run summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "Prepared {} grid rows from {} records ({} variables) | \
             flagged removed: {} | pressure filled: {} | gaps filled: {} | \
             values floored: {}",
            self.grid_rows,
            self.input_records,
            self.input_variables,
            self.flagged_removed,
            self.pressure_filled,
            self.gaps_filled,
            self.values_floored
        )
    }
}
