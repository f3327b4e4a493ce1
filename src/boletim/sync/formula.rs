//! Extends per-column formulas onto freshly appended rows.
//!
//! The preferred path copies the formula sitting right above the block and
//! lets the destination shift its references. Template expansion is used
//! when there is no formula to copy or the copy fails.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::boletim::sync::error::{Result, SyncError};
use crate::boletim::sync::io::SheetBackend;
use crate::boletim::sync::io::a1::{CellRef, RangeRef, column_index, column_letters};
use crate::boletim::sync::model::{CellValue, FormulaSpec, SheetPosition, SyncWarning};
use crate::boletim::sync::write::last_populated_row;

/// First data row below the header.
pub const DEFAULT_FIRST_DATA_ROW: u32 = 2;

const INVALID_REFERENCE: &str = "#REF!";

static CELL_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\$?)([A-Za-z]{1,3})(\$?)(\d+)$").expect("static pattern")
});

/// How a column ended up filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Copied { source: CellRef },
    Template,
}

/// Rewrites relative A1 references in `formula` as if the formula were
/// pasted `row_delta` rows and `column_delta` columns away.
///
/// `$`-anchored parts stay put, string literals and quoted sheet names are
/// copied verbatim, and tokens followed by `(` or `!` are treated as
/// function or sheet names. References pushed off the grid become `#REF!`.
pub fn shift_references(formula: &str, row_delta: i64, column_delta: i64) -> String {
    let chars: Vec<char> = formula.chars().collect();
    let mut shifted = String::with_capacity(formula.len());
    let mut index = 0;

    while index < chars.len() {
        let current = chars[index];
        if current == '"' || current == '\'' {
            index = copy_quoted(&chars, index, &mut shifted);
            continue;
        }
        if is_token_char(current) {
            let start = index;
            while index < chars.len() && is_token_char(chars[index]) {
                index += 1;
            }
            let token: String = chars[start..index].iter().collect();
            match chars.get(index) {
                Some('(') | Some('!') => shifted.push_str(&token),
                _ => shifted.push_str(&shift_token(&token, row_delta, column_delta)),
            }
            continue;
        }
        shifted.push(current);
        index += 1;
    }
    shifted
}

fn is_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '$')
}

/// Copies a quoted run starting at `start`, honouring doubled quotes, and
/// returns the index just past it. An unterminated run copies to the end.
fn copy_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push(quote);
    let mut index = start + 1;
    while index < chars.len() {
        let ch = chars[index];
        out.push(ch);
        index += 1;
        if ch == quote {
            if chars.get(index) == Some(&quote) {
                out.push(quote);
                index += 1;
            } else {
                break;
            }
        }
    }
    index
}

fn shift_token(token: &str, row_delta: i64, column_delta: i64) -> String {
    let Some(captures) = CELL_TOKEN.captures(token) else {
        return token.to_string();
    };
    let column_anchor = &captures[1];
    let letters = &captures[2];
    let row_anchor = &captures[3];
    let Ok(row) = captures[4].parse::<i64>() else {
        return token.to_string();
    };
    let Ok(column) = column_index(letters) else {
        return token.to_string();
    };

    let column_text = if column_anchor.is_empty() {
        let moved = i64::from(column) + column_delta;
        if moved < 0 || moved > i64::from(u32::MAX) {
            return INVALID_REFERENCE.to_string();
        }
        column_letters(moved as u32)
    } else {
        letters.to_string()
    };
    let row_number = if row_anchor.is_empty() {
        row + row_delta
    } else {
        row
    };
    if row_number < 1 {
        return INVALID_REFERENCE.to_string();
    }
    format!("{column_anchor}{column_text}{row_anchor}{row_number}")
}

/// Extends every formula column over the appended block.
///
/// Failures are per column: a column that cannot be filled becomes a
/// warning and the remaining columns are still processed.
#[instrument(
    level = "info",
    skip_all,
    fields(tab = %tab, columns = specs.len(), start = position.append_start_row)
)]
pub fn propagate_formulas<B: SheetBackend + ?Sized>(
    backend: &mut B,
    tab: &str,
    specs: &[FormulaSpec],
    position: &SheetPosition,
) -> Vec<SyncWarning> {
    let mut warnings = Vec::new();
    for spec in specs {
        match propagate_column(backend, tab, spec, position) {
            Ok(Propagation::Copied { source }) => {
                info!(column = %spec.column, %source, "formula copied onto new rows");
            }
            Ok(Propagation::Template) => {
                info!(column = %spec.column, "formula template applied to new rows");
            }
            Err(error) => {
                warn!(column = %spec.column, %error, "formula not applied");
                warnings.push(SyncWarning::Formula {
                    column: spec.column.clone(),
                    message: error.to_string(),
                });
            }
        }
    }
    warnings
}

fn propagate_column<B: SheetBackend + ?Sized>(
    backend: &mut B,
    tab: &str,
    spec: &FormulaSpec,
    position: &SheetPosition,
) -> Result<Propagation> {
    let column = column_index(&spec.column)?;
    let start = position.append_start_row;
    let end = position.append_end_row;
    let destination = RangeRef::column(column, start, end);

    if start > 1 {
        let source = CellRef::new(start - 1, column);
        let formula = match backend.read_formula(tab, source) {
            Ok(text) => text.filter(|text| text.starts_with('=')),
            Err(error) => {
                warn!(%source, %error, "could not read source formula, using template");
                None
            }
        };
        match formula {
            Some(formula) => {
                debug!(%source, %formula, "source formula found");
                match backend.copy_formula(tab, source, &destination) {
                    Ok(()) => return Ok(Propagation::Copied { source }),
                    Err(error) => {
                        warn!(%source, %error, "formula copy failed, using template");
                    }
                }
            }
            None => debug!(%source, "no formula above the block"),
        }
    }

    apply_template(backend, tab, spec, start, end)?;
    Ok(Propagation::Template)
}

/// Writes `spec`'s template into rows `first_row..=last_row` of its column.
pub fn apply_template<B: SheetBackend + ?Sized>(
    backend: &mut B,
    tab: &str,
    spec: &FormulaSpec,
    first_row: u32,
    last_row: u32,
) -> Result<()> {
    if spec.template.trim().is_empty() {
        return Err(SyncError::Config(format!(
            "column {} has no formula to copy and no template",
            spec.column
        )));
    }
    if last_row < first_row {
        return Ok(());
    }
    let column = column_index(&spec.column)?;
    let range = RangeRef::column(column, first_row, last_row);
    let rows: Vec<Vec<CellValue>> = (first_row..=last_row)
        .map(|row| vec![CellValue::Text(spec.expand(row))])
        .collect();
    backend.write_range(tab, &range, &rows)
}

/// Applies every template from `first_row` down to the last populated row
/// of the tab. Columns that fail are reported as warnings.
#[instrument(level = "info", skip_all, fields(tab = %tab, first_row))]
pub fn apply_templates_to_all_rows<B: SheetBackend + ?Sized>(
    backend: &mut B,
    tab: &str,
    specs: &[FormulaSpec],
    first_row: u32,
) -> Result<Vec<SyncWarning>> {
    let values = backend.tab_values(tab)?;
    let last_row = last_populated_row(&values);
    if last_row < first_row {
        info!(last_row, "no populated rows to fill");
        return Ok(Vec::new());
    }

    let mut warnings = Vec::new();
    for spec in specs {
        match apply_template(backend, tab, spec, first_row, last_row) {
            Ok(()) => info!(column = %spec.column, first_row, last_row, "template applied"),
            Err(error) => {
                warn!(column = %spec.column, %error, "template not applied");
                warnings.push(SyncWarning::Formula {
                    column: spec.column.clone(),
                    message: error.to_string(),
                });
            }
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boletim::sync::io::memory::{MemorySpreadsheet, MemoryTab};
    use crate::boletim::sync::model::CellStyle;

    fn position(start: u32, end: u32) -> SheetPosition {
        SheetPosition {
            append_start_row: start,
            append_end_row: end,
            column_count: 4,
        }
    }

    /// Memory sheet whose formula paste always fails.
    struct NoPaste(MemorySpreadsheet);

    impl SheetBackend for NoPaste {
        fn tab_values(&mut self, tab: &str) -> Result<Vec<Vec<String>>> {
            self.0.tab_values(tab)
        }
        fn row_count(&mut self, tab: &str) -> Result<u32> {
            self.0.row_count(tab)
        }
        fn append_blank_row(&mut self, tab: &str) -> Result<()> {
            self.0.append_blank_row(tab)
        }
        fn write_range(&mut self, tab: &str, range: &RangeRef, rows: &[Vec<CellValue>]) -> Result<()> {
            self.0.write_range(tab, range, rows)
        }
        fn format_range(&mut self, tab: &str, range: &RangeRef, style: &CellStyle) -> Result<()> {
            self.0.format_range(tab, range, style)
        }
        fn read_formula(&mut self, tab: &str, cell: CellRef) -> Result<Option<String>> {
            self.0.read_formula(tab, cell)
        }
        fn copy_formula(&mut self, _tab: &str, _source: CellRef, _dest: &RangeRef) -> Result<()> {
            Err(SyncError::Api {
                status: 500,
                message: "paste rejected".into(),
            })
        }
    }

    #[test]
    fn relative_references_follow_the_row_offset() {
        assert_eq!(shift_references("=TEXT(C10,\"DD/M\")", 1, 0), "=TEXT(C11,\"DD/M\")");
        assert_eq!(shift_references("=M10-K10", 3, 0), "=M13-K13");
        assert_eq!(shift_references("=SUM(A1:B2)", 2, 1), "=SUM(B3:C4)");
    }

    #[test]
    fn anchored_parts_do_not_move() {
        assert_eq!(shift_references("=$A$1+A$1+$A1", 4, 2), "=$A$1+C$1+$A5");
    }

    #[test]
    fn literals_functions_and_sheet_names_are_untouched() {
        assert_eq!(
            shift_references("=IF(B2=\"A1\",'Base 2'!C3,LOG10(D4))", 1, 0),
            "=IF(B3=\"A1\",'Base 2'!C4,LOG10(D5))"
        );
        assert_eq!(shift_references("=Sheet1!A1*1.5", 1, 0), "=Sheet1!A2*1.5");
        assert_eq!(shift_references("=\"say \"\"B2\"\"\"&B2", 1, 0), "=\"say \"\"B2\"\"\"&B3");
    }

    #[test]
    fn references_pushed_off_the_grid_become_invalid() {
        assert_eq!(shift_references("=A1+B5", -2, 0), "=#REF!+B3");
        assert_eq!(shift_references("=A1", 0, -1), "=#REF!");
    }

    #[test]
    fn formula_above_block_is_copied_down() {
        let mut book = MemorySpreadsheet::new();
        book.add_tab(MemoryTab::new("BASE", 10))
            .set_formula(CellRef::new(10, 15), "=TEXT(C10,\"DD/M\")");

        let specs = [FormulaSpec::new("P", "=TEXT(C{row};\"DD/M\")")];
        let warnings = propagate_formulas(&mut book, "BASE", &specs, &position(11, 13));

        assert!(warnings.is_empty());
        let tab = book.tab("BASE").expect("tab");
        for row in 11..=13 {
            let expected = format!("=TEXT(C{row},\"DD/M\")");
            assert_eq!(tab.formula(CellRef::new(row, 15)), Some(expected.as_str()));
        }
    }

    #[test]
    fn template_is_used_without_a_source_formula() {
        let mut book = MemorySpreadsheet::new();
        book.add_tab(MemoryTab::new("BASE", 10))
            .set_value(CellRef::new(10, 16), CellValue::Integer(7));

        let specs = [FormulaSpec::new("Q", "=M{row}-K{row}")];
        let warnings = propagate_formulas(&mut book, "BASE", &specs, &position(11, 12));

        assert!(warnings.is_empty());
        let tab = book.tab("BASE").expect("tab");
        assert_eq!(tab.formula(CellRef::new(11, 16)), Some("=M11-K11"));
        assert_eq!(tab.formula(CellRef::new(12, 16)), Some("=M12-K12"));
    }

    #[test]
    fn failed_paste_falls_back_to_template() {
        let mut book = MemorySpreadsheet::new();
        book.add_tab(MemoryTab::new("BASE", 10))
            .set_formula(CellRef::new(10, 0), "=B10*2");
        let mut backend = NoPaste(book);

        let specs = [FormulaSpec::new("A", "=B{row}*2")];
        let warnings = propagate_formulas(&mut backend, "BASE", &specs, &position(11, 11));

        assert!(warnings.is_empty());
        let tab = backend.0.tab("BASE").expect("tab");
        assert_eq!(tab.formula(CellRef::new(11, 0)), Some("=B11*2"));
    }

    #[test]
    fn one_bad_column_does_not_stop_the_others() {
        let mut book = MemorySpreadsheet::new();
        book.add_tab(MemoryTab::new("BASE", 10));

        let specs = [
            FormulaSpec::new("1X", "=A{row}"),
            FormulaSpec::new("R", ""),
            FormulaSpec::new("S", "=A{row}+1"),
        ];
        let warnings = propagate_formulas(&mut book, "BASE", &specs, &position(11, 11));

        assert_eq!(warnings.len(), 2);
        assert!(matches!(&warnings[0], SyncWarning::Formula { column, .. } if column == "1X"));
        assert!(matches!(&warnings[1], SyncWarning::Formula { column, .. } if column == "R"));
        let tab = book.tab("BASE").expect("tab");
        assert_eq!(tab.formula(CellRef::new(11, 18)), Some("=A11+1"));
    }

    #[test]
    fn templates_cover_every_populated_row() {
        let mut book = MemorySpreadsheet::new();
        let tab = book.add_tab(MemoryTab::new("BASE", 100));
        for row in 1..=4 {
            tab.set_value(CellRef::new(row, 0), CellValue::Integer(i64::from(row)));
        }

        let specs = [FormulaSpec::new("C", "=A{row}*10")];
        let warnings =
            apply_templates_to_all_rows(&mut book, "BASE", &specs, DEFAULT_FIRST_DATA_ROW)
                .expect("tab exists");

        assert!(warnings.is_empty());
        let tab = book.tab("BASE").expect("tab");
        assert_eq!(tab.formula(CellRef::new(1, 2)), None);
        assert_eq!(tab.formula(CellRef::new(2, 2)), Some("=A2*10"));
        assert_eq!(tab.formula(CellRef::new(4, 2)), Some("=A4*10"));
        assert_eq!(tab.formula(CellRef::new(5, 2)), None);
    }
}
