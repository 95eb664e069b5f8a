//! Grid alignment: joining irregular rows onto the canonical timeline.
//!
//! A sensor deployment can start mid-cycle relative to the desired grid, so
//! anchoring the grid at the first observed row may place every grid
//! timestamp between the real samples and produce columns that are almost
//! entirely missing. The aligner searches a bounded number of candidate
//! starting rows for a phase under which the data actually lands on the
//! grid.

use crate::constants::{
    ACCEPTABLE_MISSING_COLUMN_FRACTION, MAX_ALIGNMENT_ATTEMPTS, MOSTLY_MISSING_THRESHOLD,
};
use crate::error::{PrepError, Result};
use crate::models::{Grid, WideTable};
use std::collections::HashMap;
use tracing::debug;

/// A successfully aligned table with the phase that produced it.
#[derive(Debug)]
pub struct AlignmentOutcome {
    pub table: WideTable,
    pub grid: Grid,
    /// Index of the observed row the grid was anchored at.
    pub offset: usize,
}

/// Left-join the table onto a regular grid at `step_seconds`, searching for
/// the correct phase offset.
///
/// Candidate anchors are the first [`MAX_ALIGNMENT_ATTEMPTS`] observed rows.
/// For each, a grid is built from that row to the last observation and the
/// data is joined on exact timestamp match; the candidate is accepted when
/// at most [`ACCEPTABLE_MISSING_COLUMN_FRACTION`] of the data columns end up
/// mostly missing. Exhausting the bound is a fatal alignment failure: no
/// phase of the requested interval fits the data.
pub fn align_to_grid(table: &WideTable, step_seconds: i64) -> Result<AlignmentOutcome> {
    let rows = table.timestamps();
    if rows.is_empty() {
        return Err(PrepError::data_sufficiency(
            "Cannot align an empty table to a grid",
        ));
    }
    let last = rows[rows.len() - 1];

    let row_index: HashMap<i64, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, ts)| (ts.timestamp(), i))
        .collect();

    for offset in 0..MAX_ALIGNMENT_ATTEMPTS.min(rows.len()) {
        let grid = Grid::new(rows[offset], last, step_seconds)?;
        let candidate = join_onto_grid(table, &grid, &row_index)?;

        let column_count = candidate.column_count();
        let mostly_missing = candidate
            .variables()
            .filter(|v| {
                candidate
                    .missing_fraction(v)
                    .is_some_and(|f| f > MOSTLY_MISSING_THRESHOLD)
            })
            .count();

        let acceptable = column_count == 0
            || (mostly_missing as f64 / column_count as f64)
                <= ACCEPTABLE_MISSING_COLUMN_FRACTION;
        debug!(
            offset,
            mostly_missing, column_count, acceptable, "alignment candidate evaluated"
        );
        if acceptable {
            return Ok(AlignmentOutcome {
                table: candidate,
                grid,
                offset,
            });
        }
    }

    Err(PrepError::AlignmentFailure {
        attempts: MAX_ALIGNMENT_ATTEMPTS,
        step_minutes: step_seconds as f64 / 60.0,
    })
}

/// Build the grid-indexed table, taking values from observed rows whose
/// timestamp matches a grid timestamp exactly.
fn join_onto_grid(
    table: &WideTable,
    grid: &Grid,
    row_index: &HashMap<i64, usize>,
) -> Result<WideTable> {
    let grid_timestamps = grid.timestamps();
    let source_rows: Vec<Option<usize>> = grid_timestamps
        .iter()
        .map(|ts| row_index.get(&ts.timestamp()).copied())
        .collect();

    let mut joined = WideTable::new(grid_timestamps);
    for variable in table.variables() {
        let source = table.column(variable).expect("iterating own columns");
        let values = source_rows
            .iter()
            .map(|row| row.and_then(|i| source[i]))
            .collect();
        joined.insert_column(variable.clone(), values)?;
    }
    Ok(joined)
}
