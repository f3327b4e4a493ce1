//! In-process spreadsheet used for offline runs and tests.
//!
//! Formula pastes go through [`shift_references`], mirroring what the remote
//! service does when a formula is copied down a column.

use std::collections::BTreeMap;

use crate::boletim::sync::error::{Result, SyncError};
use crate::boletim::sync::formula::shift_references;
use crate::boletim::sync::io::SheetBackend;
use crate::boletim::sync::io::a1::{CellRef, RangeRef};
use crate::boletim::sync::model::{CellStyle, CellValue};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryCell {
    pub value: CellValue,
    pub formula: Option<String>,
    pub style: Option<CellStyle>,
}

impl MemoryCell {
    /// What a reader of the sheet sees: the formula text stands in for its
    /// result since nothing is evaluated here.
    pub fn display(&self) -> String {
        match &self.formula {
            Some(formula) => formula.clone(),
            None => self.value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTab {
    pub name: String,
    cells: BTreeMap<CellRef, MemoryCell>,
    grid_rows: u32,
}

impl MemoryTab {
    pub fn new(name: impl Into<String>, grid_rows: u32) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
            grid_rows,
        }
    }

    pub fn grid_rows(&self) -> u32 {
        self.grid_rows
    }

    /// Stores a user-entered value; text starting with `=` becomes a formula.
    pub fn set_value(&mut self, cell: CellRef, value: CellValue) {
        self.grid_rows = self.grid_rows.max(cell.row);
        let entry = self.cells.entry(cell).or_default();
        match value {
            CellValue::Text(text) if text.starts_with('=') => {
                entry.formula = Some(text);
                entry.value = CellValue::Empty;
            }
            other => {
                entry.formula = None;
                entry.value = other;
            }
        }
    }

    pub fn set_formula(&mut self, cell: CellRef, formula: impl Into<String>) {
        self.grid_rows = self.grid_rows.max(cell.row);
        self.cells.entry(cell).or_default().formula = Some(formula.into());
    }

    pub fn set_style(&mut self, cell: CellRef, style: CellStyle) {
        self.cells.entry(cell).or_default().style = Some(style);
    }

    pub fn cell(&self, cell: CellRef) -> Option<&MemoryCell> {
        self.cells.get(&cell)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&CellRef, &MemoryCell)> {
        self.cells.iter()
    }

    pub fn value(&self, cell: CellRef) -> CellValue {
        self.cells
            .get(&cell)
            .map(|entry| entry.value.clone())
            .unwrap_or(CellValue::Empty)
    }

    pub fn formula(&self, cell: CellRef) -> Option<&str> {
        self.cells.get(&cell).and_then(|entry| entry.formula.as_deref())
    }

    pub fn style(&self, cell: CellRef) -> Option<CellStyle> {
        self.cells.get(&cell).and_then(|entry| entry.style)
    }

    /// Displayed values up to the last row holding content, each row trimmed
    /// of trailing empty cells.
    pub fn values(&self) -> Vec<Vec<String>> {
        let mut rows: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for (cell, entry) in &self.cells {
            let shown = entry.display();
            if shown.is_empty() {
                continue;
            }
            let row = rows.entry(cell.row).or_default();
            let index = cell.column as usize;
            if row.len() <= index {
                row.resize(index + 1, String::new());
            }
            row[index] = shown;
        }
        let last = rows.keys().next_back().copied().unwrap_or(0);
        (1..=last)
            .map(|row| rows.remove(&row).unwrap_or_default())
            .collect()
    }
}

/// Ordered collection of tabs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemorySpreadsheet {
    tabs: Vec<MemoryTab>,
}

impl MemorySpreadsheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tab(&mut self, tab: MemoryTab) -> &mut MemoryTab {
        self.tabs.retain(|existing| existing.name != tab.name);
        self.tabs.push(tab);
        let last = self.tabs.len() - 1;
        &mut self.tabs[last]
    }

    pub fn tabs(&self) -> &[MemoryTab] {
        &self.tabs
    }

    pub fn tab(&self, name: &str) -> Option<&MemoryTab> {
        self.tabs.iter().find(|tab| tab.name == name)
    }

    pub fn tab_mut(&mut self, name: &str) -> Result<&mut MemoryTab> {
        self.tabs
            .iter_mut()
            .find(|tab| tab.name == name)
            .ok_or_else(|| SyncError::TabNotFound(name.to_string()))
    }

    fn existing(&self, name: &str) -> Result<&MemoryTab> {
        self.tab(name)
            .ok_or_else(|| SyncError::TabNotFound(name.to_string()))
    }
}

impl SheetBackend for MemorySpreadsheet {
    fn tab_values(&mut self, tab: &str) -> Result<Vec<Vec<String>>> {
        Ok(self.existing(tab)?.values())
    }

    fn row_count(&mut self, tab: &str) -> Result<u32> {
        Ok(self.existing(tab)?.grid_rows())
    }

    fn append_blank_row(&mut self, tab: &str) -> Result<()> {
        let sheet = self.tab_mut(tab)?;
        sheet.grid_rows += 1;
        Ok(())
    }

    fn write_range(&mut self, tab: &str, range: &RangeRef, rows: &[Vec<CellValue>]) -> Result<()> {
        let sheet = self.tab_mut(tab)?;
        for (offset, row) in rows.iter().enumerate() {
            let row_number = range.first_row + offset as u32;
            for (column_offset, value) in row.iter().enumerate() {
                let column = range.first_column + column_offset as u32;
                sheet.set_value(CellRef::new(row_number, column), value.clone());
            }
        }
        Ok(())
    }

    fn format_range(&mut self, tab: &str, range: &RangeRef, style: &CellStyle) -> Result<()> {
        let sheet = self.tab_mut(tab)?;
        for cell in range.cells() {
            sheet.set_style(cell, *style);
        }
        Ok(())
    }

    fn read_formula(&mut self, tab: &str, cell: CellRef) -> Result<Option<String>> {
        let sheet = self.existing(tab)?;
        Ok(sheet.cell(cell).and_then(|entry| {
            entry
                .formula
                .clone()
                .or_else(|| Some(entry.value.to_string()).filter(|text| !text.is_empty()))
        }))
    }

    fn copy_formula(&mut self, tab: &str, source: CellRef, destination: &RangeRef) -> Result<()> {
        let sheet = self.tab_mut(tab)?;
        let source_cell = sheet.cell(source).cloned().unwrap_or_default();
        for cell in destination.cells() {
            match &source_cell.formula {
                Some(formula) => {
                    let row_delta = i64::from(cell.row) - i64::from(source.row);
                    let column_delta = i64::from(cell.column) - i64::from(source.column);
                    let shifted = shift_references(formula, row_delta, column_delta);
                    sheet.set_value(cell, CellValue::Text(shifted));
                }
                None => sheet.set_value(cell, source_cell.value.clone()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_stop_at_last_row_with_content() {
        let mut book = MemorySpreadsheet::new();
        let tab = book.add_tab(MemoryTab::new("BASE", 1000));
        tab.set_value(CellRef::new(1, 0), CellValue::Text("Data".into()));
        tab.set_value(CellRef::new(3, 1), CellValue::Integer(5));
        tab.set_style(CellRef::new(9, 0), CellStyle {
            background: crate::boletim::sync::model::Rgb::new(1.0, 1.0, 1.0),
            bold: false,
        });

        let values = book.tab_values("BASE").expect("tab exists");
        assert_eq!(
            values,
            vec![vec!["Data".to_string()], vec![], vec![String::new(), "5".to_string()]]
        );
        assert_eq!(book.row_count("BASE").expect("tab exists"), 1000);
    }

    #[test]
    fn user_entered_text_becomes_formula() {
        let mut book = MemorySpreadsheet::new();
        book.add_tab(MemoryTab::new("BASE", 10));
        let range = RangeRef::column(15, 2, 2);
        book.write_range("BASE", &range, &[vec![CellValue::Text("=B2*2".into())]])
            .expect("written");
        assert_eq!(
            book.read_formula("BASE", CellRef::new(2, 15)).expect("read"),
            Some("=B2*2".to_string())
        );
    }

    #[test]
    fn copy_formula_shifts_per_row() {
        let mut book = MemorySpreadsheet::new();
        book.add_tab(MemoryTab::new("BASE", 10))
            .set_formula(CellRef::new(10, 15), "=TEXT(C10,\"DD/M\")");
        book.copy_formula("BASE", CellRef::new(10, 15), &RangeRef::column(15, 11, 12))
            .expect("pasted");
        let tab = book.tab("BASE").expect("tab");
        assert_eq!(tab.formula(CellRef::new(11, 15)), Some("=TEXT(C11,\"DD/M\")"));
        assert_eq!(tab.formula(CellRef::new(12, 15)), Some("=TEXT(C12,\"DD/M\")"));
        assert_eq!(tab.grid_rows(), 12);
    }

    #[test]
    fn unknown_tab_is_reported() {
        let mut book = MemorySpreadsheet::new();
        assert!(matches!(
            book.tab_values("missing"),
            Err(SyncError::TabNotFound(_))
        ));
    }
}
