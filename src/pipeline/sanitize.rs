//! Value sanitation: physical floors and unit conversions.
//!
//! Metabolism models divide by depth and take logs of discharge, so
//! non-positive values in either series are replaced with a small positive
//! floor and counted into a warning. Unit conversions are pure scalar
//! transforms applied column-wise.

use crate::constants::{KPA_PER_ATM, POSITIVE_FLOOR};
use crate::models::{Variable, VariableInventory, WideTable};
use crate::pipeline::diagnostics::{DiagnosticKind, DiagnosticLog, PrepStats};

/// Floor physically invalid depth and discharge values.
pub fn sanitize(
    table: &mut WideTable,
    inventory: &VariableInventory,
    stats: &mut PrepStats,
    diagnostics: &mut DiagnosticLog,
) {
    for variable in [Variable::Depth, Variable::Discharge] {
        if inventory.has(&variable) {
            floor_nonpositive(table, &variable, stats, diagnostics);
        }
    }
}

/// Replace values <= 0 in one column with [`POSITIVE_FLOOR`], recording a
/// count-based warning.
pub fn floor_nonpositive(
    table: &mut WideTable,
    variable: &Variable,
    stats: &mut PrepStats,
    diagnostics: &mut DiagnosticLog,
) {
    let Some(column) = table.column_mut(variable) else {
        return;
    };

    let mut floored = 0usize;
    for slot in column.iter_mut() {
        if let Some(value) = slot {
            if *value <= 0.0 {
                *value = POSITIVE_FLOOR;
                floored += 1;
            }
        }
    }

    if floored > 0 {
        stats.values_floored += floored;
        diagnostics.warn(
            DiagnosticKind::InvalidValueFloored,
            format!(
                "{} non-positive {} value(s) floored to {}",
                floored,
                variable.canonical_name(),
                POSITIVE_FLOOR
            ),
        );
    }
}

/// Multiply every value in a column by a constant factor.
pub fn scale_column(table: &mut WideTable, variable: &Variable, factor: f64) {
    if let Some(column) = table.column_mut(variable) {
        for slot in column.iter_mut() {
            if let Some(value) = slot {
                *value *= factor;
            }
        }
    }
}

/// Kilopascals to standard atmospheres.
pub fn kpa_to_atm(kpa: f64) -> f64 {
    kpa / KPA_PER_ATM
}
