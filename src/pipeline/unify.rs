//! Variable unification: resolving proxy and duplicate measurements.
//!
//! Promotes remote reference-gauge series to the local name when no local
//! sensor exists, resolves duplicated quantities by the configured policy,
//! and substitutes level for depth when nothing better will become
//! available. Nothing here is resolved silently; every substitution or
//! duplicate resolution is recorded as a diagnostic.

use crate::config::{DuplicatePolicy, PrepConfig};
use crate::error::Result;
use crate::models::{Variable, VariableInventory, WideTable};
use crate::pipeline::diagnostics::{DiagnosticKind, DiagnosticLog};
use tracing::debug;

/// Apply the unification rules in order. Returns whether level was
/// substituted for depth, for the run's specification record.
///
/// `discharge_expected` is true when a discharge series is present or a
/// rating curve will derive one later; with areal depth estimation
/// requested, that path supplies depth and level is not substituted.
pub fn unify_variables(
    table: &mut WideTable,
    inventory: &mut VariableInventory,
    config: &PrepConfig,
    discharge_expected: bool,
    diagnostics: &mut DiagnosticLog,
) -> Result<bool> {
    resolve_pair(
        table,
        inventory,
        Variable::Level,
        Variable::UsgsLevel,
        config.duplicate_policy,
        diagnostics,
    )?;
    resolve_pair(
        table,
        inventory,
        Variable::Discharge,
        Variable::UsgsDischarge,
        config.duplicate_policy,
        diagnostics,
    )?;

    let mut level_substituted = false;
    let depth_from_discharge = config.estimate_areal_depth && discharge_expected;
    if inventory.has(&Variable::Level) && !inventory.has(&Variable::Depth) && !depth_from_discharge
    {
        let level = table
            .column(&Variable::Level)
            .expect("inventory tracks table columns")
            .to_vec();
        table.insert_column(Variable::Depth, level)?;
        inventory.record(Variable::Depth);
        level_substituted = true;
        diagnostics.warn(
            DiagnosticKind::LevelAsDepth,
            "No depth series; using level as a depth substitute. A true depth measurement is preferable",
        );
    }

    // Both level and depth present is worth surfacing even though depth wins
    // downstream: the series may disagree on vertical reference.
    if !level_substituted && inventory.has(&Variable::Level) && inventory.has(&Variable::Depth) {
        diagnostics.warn(
            DiagnosticKind::DuplicateResolved,
            "Both level and depth are present; depth is used for modeling and level only for discharge estimation",
        );
    }

    Ok(level_substituted)
}

/// Resolve a local/remote pair of the same quantity.
///
/// A lone remote series is promoted to the local name. When both exist, the
/// configured duplicate policy decides which survives, and the outcome is
/// recorded.
fn resolve_pair(
    table: &mut WideTable,
    inventory: &mut VariableInventory,
    primary: Variable,
    secondary: Variable,
    policy: DuplicatePolicy,
    diagnostics: &mut DiagnosticLog,
) -> Result<()> {
    let has_primary = inventory.has(&primary);
    let has_secondary = inventory.has(&secondary);

    if has_secondary && !has_primary {
        debug!(
            from = secondary.canonical_name(),
            to = primary.canonical_name(),
            "promoting remote series to local name"
        );
        table.rename_column(&secondary, primary.clone())?;
        inventory.remove(&secondary);
        inventory.record(primary);
        return Ok(());
    }

    if has_primary && has_secondary {
        let keep_primary = match policy {
            DuplicatePolicy::PreferPrimary => true,
            DuplicatePolicy::PreferSecondary => false,
            DuplicatePolicy::FewestMissing => {
                let primary_missing = table.missing_fraction(&primary).unwrap_or(1.0);
                let secondary_missing = table.missing_fraction(&secondary).unwrap_or(1.0);
                primary_missing <= secondary_missing
            }
        };

        if keep_primary {
            table.remove_column(&secondary);
            inventory.remove(&secondary);
            diagnostics.warn(
                DiagnosticKind::DuplicateResolved,
                format!(
                    "Both {} and {} present; kept {} ({:?})",
                    primary.canonical_name(),
                    secondary.canonical_name(),
                    primary.canonical_name(),
                    policy
                ),
            );
        } else {
            table.remove_column(&primary);
            inventory.remove(&primary);
            table.rename_column(&secondary, primary.clone())?;
            inventory.remove(&secondary);
            diagnostics.warn(
                DiagnosticKind::DuplicateResolved,
                format!(
                    "Both {} and {} present; kept {} ({:?})",
                    primary.canonical_name(),
                    secondary.canonical_name(),
                    secondary.canonical_name(),
                    policy
                ),
            );
            inventory.record(primary);
        }
    }

    Ok(())
}
