//! The time-series conditioning pipeline.
//!
//! This module turns a flag-masked, long-format record set into a single
//! regularly-spaced wide table ready for a metabolism model. It is
//! organized into stages that run in strict sequence:
//!
//! 1. [`interval`] - per-variable sampling-interval inference and
//!    reconciliation into one grid spacing
//! 2. [`unify`] - proxy/duplicate variable resolution
//! 3. [`align`] - phase-searched left join onto the canonical grid
//! 4. [`pressure`] - air-pressure merge against external retrieval
//! 5. [`rating`] - discharge and depth from a rating curve
//! 6. [`sanitize`] - physical floors and unit conversions
//!
//! [`prepare`] orchestrates the stages; [`diagnostics`] collects each
//! run's warnings and counters so no quality issue is dropped silently.

pub mod align;
pub mod diagnostics;
pub mod interval;
pub mod prepare;
pub mod pressure;
pub mod rating;
pub mod sanitize;
pub mod unify;

// Re-export the main entry points for easy access.
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLog, PrepStats};
pub use prepare::{Collaborators, OutputTable, PrepResult, PrepSpecRecord, prepare};
pub use pressure::{PressureNeeds, PressureSource};
pub use rating::{FittedCurve, fit_curve, resolve_curve};
