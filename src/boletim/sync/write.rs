use tracing::{debug, info, instrument, warn};

use crate::boletim::sync::error::{Result, SyncError};
use crate::boletim::sync::io::{RangeRef, SheetBackend};
use crate::boletim::sync::model::{SheetPosition, SourceDataset};
use crate::boletim::sync::normalize::Normalizer;

/// 1-based number of the last row holding a non-blank cell, or 0 for an
/// empty tab.
pub fn last_populated_row(values: &[Vec<String>]) -> u32 {
    values
        .iter()
        .rposition(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map_or(0, |index| index as u32 + 1)
}

/// First free row below the existing data.
pub fn next_append_row(values: &[Vec<String>]) -> u32 {
    last_populated_row(values) + 1
}

/// Appends `dataset` below the data already present in `tab`.
///
/// Returns `None` when the dataset has no rows. A write failure is returned
/// as [`SyncError::WriteFailed`]; nothing written before the failure is
/// rolled back.
#[instrument(
    level = "info",
    skip_all,
    fields(tab = %tab, rows = dataset.row_count(), columns = dataset.column_count())
)]
pub fn append_dataset<B: SheetBackend + ?Sized>(
    backend: &mut B,
    tab: &str,
    dataset: &SourceDataset,
    normalizer: &Normalizer,
) -> Result<Option<SheetPosition>> {
    if dataset.rows.is_empty() {
        info!("dataset has no rows, nothing to append");
        return Ok(None);
    }

    let existing = backend.tab_values(tab)?;
    let start = next_append_row(&existing);
    let end = start + dataset.row_count() as u32 - 1;
    let column_count = dataset.column_count() as u32;
    info!(start, end, "computed append position");

    let grid_rows = backend.row_count(tab)?;
    if end > grid_rows {
        debug!(grid_rows, end, "grid too small, appending a blank row");
        if let Err(error) = backend.append_blank_row(tab) {
            warn!(%error, "could not expand the grid, writing anyway");
        }
    }

    let values = normalizer.normalize_dataset(dataset);
    let range = RangeRef::rows(start, end, column_count);
    backend
        .write_range(tab, &range, &values)
        .map_err(|source| SyncError::WriteFailed {
            tab: tab.to_string(),
            range: range.to_string(),
            source: Box::new(source),
        })?;
    info!(%range, "rows written");

    Ok(Some(SheetPosition {
        append_start_row: start,
        append_end_row: end,
        column_count,
    }))
}
