//! Adapters for the spreadsheet that receives the reports.

pub mod a1;
pub mod google;
pub mod memory;
pub mod workbook;

use crate::boletim::sync::error::Result;
use crate::boletim::sync::model::{CellStyle, CellValue};

pub use a1::{CellRef, RangeRef};

/// Operations the sync engine needs from the destination spreadsheet.
///
/// Rows are 1-based and columns zero-based throughout.
pub trait SheetBackend {
    /// Displayed values of the tab, row-major. Trailing empty rows may be
    /// omitted by the implementation.
    fn tab_values(&mut self, tab: &str) -> Result<Vec<Vec<String>>>;

    /// Physical number of rows in the tab's grid.
    fn row_count(&mut self, tab: &str) -> Result<u32>;

    /// Appends one blank row so the grid grows.
    fn append_blank_row(&mut self, tab: &str) -> Result<()>;

    /// Writes values as if typed by a user, so dates, numbers and `=`
    /// formulas are interpreted by the destination.
    fn write_range(&mut self, tab: &str, range: &RangeRef, rows: &[Vec<CellValue>]) -> Result<()>;

    fn format_range(&mut self, tab: &str, range: &RangeRef, style: &CellStyle) -> Result<()>;

    /// Formula text of a cell, or its raw value when it holds none.
    fn read_formula(&mut self, tab: &str, cell: CellRef) -> Result<Option<String>>;

    /// Pastes only the formula of `source` over `destination`, shifting
    /// relative references by each destination cell's offset.
    fn copy_formula(&mut self, tab: &str, source: CellRef, destination: &RangeRef) -> Result<()>;

    /// Persists pending changes. Remote backends commit on every call.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
