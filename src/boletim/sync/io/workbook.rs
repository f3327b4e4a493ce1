//! Local `.xlsx` file standing in for the remote spreadsheet.
//!
//! The workbook is loaded into a [`MemorySpreadsheet`], mutated there, and
//! written back on [`SheetBackend::flush`]. Cell styles from earlier saves
//! are not read back.

use std::path::{Path, PathBuf};

use calamine::{CellType, DataType, Range, Reader, Xlsx, open_workbook};
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet};
use tracing::{debug, info, instrument};

use crate::boletim::sync::error::{Result, SyncError};
use crate::boletim::sync::io::SheetBackend;
use crate::boletim::sync::io::a1::{CellRef, RangeRef};
use crate::boletim::sync::io::memory::{MemoryCell, MemorySpreadsheet, MemoryTab};
use crate::boletim::sync::model::{CellStyle, CellValue};

/// Row limit of the xlsx grid.
pub const XLSX_MAX_ROWS: u32 = 1_048_576;

#[derive(Debug, Clone)]
pub struct LocalWorkbook {
    path: PathBuf,
    sheets: MemorySpreadsheet,
}

impl LocalWorkbook {
    /// Loads values and formulas of every worksheet.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self> {
        let mut workbook: Xlsx<_> = open_workbook(path)?;
        let mut sheets = MemorySpreadsheet::new();

        for name in workbook.sheet_names().to_owned() {
            let values = read_sheet(workbook.worksheet_range(&name), &name)?;
            let formulas = read_sheet(workbook.worksheet_formula(&name), &name)?;

            let tab = sheets.add_tab(MemoryTab::new(name.as_str(), XLSX_MAX_ROWS));
            let (value_row, value_column) = values.start().unwrap_or((0, 0));
            for (row, column, cell) in values.cells() {
                let value = cell_to_value(cell);
                if value.is_empty() {
                    continue;
                }
                let cell = CellRef::new(value_row + row as u32 + 1, value_column + column as u32);
                tab.set_value(cell, value);
            }
            let (formula_row, formula_column) = formulas.start().unwrap_or((0, 0));
            for (row, column, formula) in formulas.cells() {
                if formula.is_empty() {
                    continue;
                }
                let cell =
                    CellRef::new(formula_row + row as u32 + 1, formula_column + column as u32);
                tab.set_formula(cell, format!("={formula}"));
            }
            debug!(tab = %name, "worksheet loaded");
        }

        info!(tabs = sheets.tabs().len(), "workbook loaded");
        Ok(Self {
            path: path.to_path_buf(),
            sheets,
        })
    }

    /// New workbook with empty tabs, not yet written to disk.
    pub fn create<I, S>(path: &Path, tabs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sheets = MemorySpreadsheet::new();
        for tab in tabs {
            sheets.add_tab(MemoryTab::new(tab, XLSX_MAX_ROWS));
        }
        Self {
            path: path.to_path_buf(),
            sheets,
        }
    }

    /// Opens `path` when it exists, otherwise starts a workbook holding `tab`.
    /// A missing tab is added to an existing workbook.
    pub fn open_or_create(path: &Path, tab: &str) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::create(path, [tab]));
        }
        let mut workbook = Self::open(path)?;
        if workbook.sheets.tab(tab).is_none() {
            workbook.sheets.add_tab(MemoryTab::new(tab, XLSX_MAX_ROWS));
        }
        Ok(workbook)
    }

    pub fn sheets(&self) -> &MemorySpreadsheet {
        &self.sheets
    }

    pub fn sheets_mut(&mut self) -> &mut MemorySpreadsheet {
        &mut self.sheets
    }

    /// Writes every tab back to the workbook path.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub fn save(&self) -> Result<()> {
        let mut writer = Workbook::new();
        for tab in self.sheets.tabs() {
            let worksheet = writer.add_worksheet();
            worksheet.set_name(&tab.name)?;
            for (cell, entry) in tab.cells() {
                write_cell(worksheet, *cell, entry)?;
            }
        }
        writer.save(&self.path)?;
        info!("workbook saved");
        Ok(())
    }
}

fn read_sheet<T: CellType>(
    range: Option<std::result::Result<Range<T>, calamine::XlsxError>>,
    name: &str,
) -> Result<Range<T>> {
    let range = range.ok_or_else(|| SyncError::TabNotFound(name.to_string()))?;
    Ok(range?)
}

fn cell_to_value(cell: &DataType) -> CellValue {
    match cell {
        DataType::String(value) => CellValue::Text(value.clone()),
        DataType::Int(value) => CellValue::Integer(*value),
        DataType::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            CellValue::Integer(*value as i64)
        }
        DataType::Float(value) => CellValue::Float(*value),
        DataType::Bool(value) => CellValue::Text(value.to_string().to_uppercase()),
        DataType::Empty => CellValue::Empty,
        other => CellValue::Text(other.to_string()),
    }
}

fn style_format(style: &CellStyle) -> Format {
    let format = Format::new().set_background_color(Color::RGB(style.background.to_hex()));
    if style.bold {
        format.set_bold()
    } else {
        format
    }
}

fn write_cell(worksheet: &mut Worksheet, cell: CellRef, entry: &MemoryCell) -> Result<()> {
    let row = cell.row - 1;
    let column = u16::try_from(cell.column)
        .map_err(|_| SyncError::InvalidReference(cell.to_string()))?;
    let format = entry.style.as_ref().map(style_format);

    if let Some(formula) = &entry.formula {
        match &format {
            Some(format) => worksheet.write_formula_with_format(row, column, formula.as_str(), format)?,
            None => worksheet.write_formula(row, column, formula.as_str())?,
        };
        return Ok(());
    }

    match (&entry.value, &format) {
        (CellValue::Empty, Some(format)) => {
            worksheet.write_blank(row, column, format)?;
        }
        (CellValue::Empty, None) => {}
        (CellValue::Integer(value), Some(format)) => {
            worksheet.write_number_with_format(row, column, *value as f64, format)?;
        }
        (CellValue::Integer(value), None) => {
            worksheet.write_number(row, column, *value as f64)?;
        }
        (CellValue::Float(value), Some(format)) => {
            worksheet.write_number_with_format(row, column, *value, format)?;
        }
        (CellValue::Float(value), None) => {
            worksheet.write_number(row, column, *value)?;
        }
        (CellValue::Text(value), Some(format)) => {
            worksheet.write_string_with_format(row, column, value, format)?;
        }
        (CellValue::Text(value), None) => {
            worksheet.write_string(row, column, value)?;
        }
    }
    Ok(())
}

impl SheetBackend for LocalWorkbook {
    fn tab_values(&mut self, tab: &str) -> Result<Vec<Vec<String>>> {
        self.sheets.tab_values(tab)
    }

    fn row_count(&mut self, tab: &str) -> Result<u32> {
        self.sheets.row_count(tab)
    }

    fn append_blank_row(&mut self, tab: &str) -> Result<()> {
        self.sheets.append_blank_row(tab)
    }

    fn write_range(&mut self, tab: &str, range: &RangeRef, rows: &[Vec<CellValue>]) -> Result<()> {
        self.sheets.write_range(tab, range, rows)
    }

    fn format_range(&mut self, tab: &str, range: &RangeRef, style: &CellStyle) -> Result<()> {
        self.sheets.format_range(tab, range, style)
    }

    fn read_formula(&mut self, tab: &str, cell: CellRef) -> Result<Option<String>> {
        self.sheets.read_formula(tab, cell)
    }

    fn copy_formula(&mut self, tab: &str, source: CellRef, destination: &RangeRef) -> Result<()> {
        self.sheets.copy_formula(tab, source, destination)
    }

    fn flush(&mut self) -> Result<()> {
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boletim::sync::model::Rgb;
    use tempfile::tempdir;

    #[test]
    fn saved_values_and_formulas_load_back() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("boletim.xlsx");

        let mut workbook = LocalWorkbook::create(&path, ["BASE"]);
        let range = RangeRef::rows(1, 2, 3);
        workbook
            .write_range(
                "BASE",
                &range,
                &[
                    vec![
                        CellValue::Text("Codigo".into()),
                        CellValue::Text("Valor".into()),
                        CellValue::Text("Dobro".into()),
                    ],
                    vec![
                        CellValue::Text("037".into()),
                        CellValue::Float(1234.56),
                        CellValue::Text("=B2*2".into()),
                    ],
                ],
            )
            .expect("written");
        workbook
            .format_range(
                "BASE",
                &RangeRef::rows(1, 1, 3),
                &CellStyle {
                    background: Rgb::new(0.0, 0.66, 0.35),
                    bold: true,
                },
            )
            .expect("formatted");
        workbook.flush().expect("saved");

        let mut reopened = LocalWorkbook::open(&path).expect("workbook reopens");
        let tab = reopened.sheets().tab("BASE").expect("tab");
        assert_eq!(tab.value(CellRef::new(1, 0)), CellValue::Text("Codigo".into()));
        assert_eq!(tab.value(CellRef::new(2, 0)), CellValue::Text("037".into()));
        assert_eq!(tab.value(CellRef::new(2, 1)), CellValue::Float(1234.56));
        assert_eq!(tab.formula(CellRef::new(2, 2)), Some("=B2*2"));
        assert_eq!(
            reopened.read_formula("BASE", CellRef::new(2, 2)).expect("read"),
            Some("=B2*2".to_string())
        );
        assert_eq!(reopened.tab_values("BASE").expect("values").len(), 2);
    }

    #[test]
    fn missing_file_starts_an_empty_workbook() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("novo.xlsx");
        let mut workbook = LocalWorkbook::open_or_create(&path, "BASE").expect("created");
        assert!(workbook.tab_values("BASE").expect("tab").is_empty());
        assert_eq!(workbook.row_count("BASE").expect("tab"), XLSX_MAX_ROWS);
        assert!(!path.exists());
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("quebrado.xlsx");
        std::fs::write(&path, b"not a zip").expect("fixture written");
        assert!(LocalWorkbook::open(&path).is_err());
    }
}
