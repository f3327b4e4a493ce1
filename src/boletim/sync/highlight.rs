use tracing::{info, instrument, warn};

use crate::boletim::sync::io::{RangeRef, SheetBackend};
use crate::boletim::sync::model::{CellStyle, ColorScheme, SheetPosition, SyncWarning};

const HEADER_ROW: u32 = 1;

/// Marks the header and the first appended row with the strong colour and
/// the rest of the block with the light colour.
///
/// Every call is best-effort: the data is already committed, so failures
/// only produce warnings.
#[instrument(
    level = "info",
    skip_all,
    fields(tab = %tab, start = position.append_start_row, end = position.append_end_row)
)]
pub fn highlight_block<B: SheetBackend + ?Sized>(
    backend: &mut B,
    tab: &str,
    position: &SheetPosition,
    colors: &ColorScheme,
) -> Vec<SyncWarning> {
    let strong = CellStyle {
        background: colors.strong_color,
        bold: true,
    };
    let light = CellStyle {
        background: colors.light_color,
        bold: false,
    };
    let columns = position.column_count;
    let start = position.append_start_row;
    let end = position.append_end_row;

    let mut targets = vec![(RangeRef::rows(HEADER_ROW, HEADER_ROW, columns), strong)];
    if start != HEADER_ROW {
        targets.push((RangeRef::rows(start, start, columns), strong));
    }
    if end > start {
        targets.push((RangeRef::rows(start + 1, end, columns), light));
    }

    let mut warnings = Vec::new();
    for (range, style) in targets {
        match backend.format_range(tab, &range, &style) {
            Ok(()) => info!(%range, bold = style.bold, "range highlighted"),
            Err(error) => {
                warn!(%range, %error, "highlight failed");
                warnings.push(SyncWarning::Format {
                    range: range.to_string(),
                    message: error.to_string(),
                });
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boletim::sync::io::CellRef;
    use crate::boletim::sync::io::memory::{MemorySpreadsheet, MemoryTab};

    #[test]
    fn header_and_first_row_are_strong_rest_light() {
        let mut book = MemorySpreadsheet::new();
        book.add_tab(MemoryTab::new("BASE", 20));
        let colors = ColorScheme::default();
        let position = SheetPosition {
            append_start_row: 11,
            append_end_row: 13,
            column_count: 3,
        };

        let warnings = highlight_block(&mut book, "BASE", &position, &colors);
        assert!(warnings.is_empty());

        let tab = book.tab("BASE").expect("tab");
        let strong = tab.style(CellRef::new(1, 2)).expect("header styled");
        assert_eq!(strong.background, colors.strong_color);
        assert!(strong.bold);
        assert_eq!(tab.style(CellRef::new(11, 0)), Some(strong));
        let light = tab.style(CellRef::new(13, 2)).expect("block styled");
        assert_eq!(light.background, colors.light_color);
        assert!(!light.bold);
        assert_eq!(tab.style(CellRef::new(12, 3)), None);
        assert_eq!(tab.style(CellRef::new(10, 0)), None);
    }

    #[test]
    fn failures_become_warnings() {
        let mut book = MemorySpreadsheet::new();
        let position = SheetPosition {
            append_start_row: 2,
            append_end_row: 2,
            column_count: 1,
        };
        let warnings = highlight_block(&mut book, "missing", &position, &ColorScheme::default());
        assert_eq!(warnings.len(), 2);
        assert!(matches!(&warnings[0], SyncWarning::Format { range, .. } if range == "A1:A1"));
    }
}
