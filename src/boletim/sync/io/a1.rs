use std::fmt;

use crate::boletim::sync::error::{Result, SyncError};

/// Column letters for a zero-based index: 0 → `A`, 25 → `Z`, 26 → `AA`.
pub fn column_letters(index: u32) -> String {
    let mut letters = Vec::new();
    let mut remaining = index + 1;
    while remaining > 0 {
        let offset = ((remaining - 1) % 26) as u8;
        letters.push(char::from(b'A' + offset));
        remaining = (remaining - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Zero-based index for column letters, case-insensitive.
pub fn column_index(letters: &str) -> Result<u32> {
    let trimmed = letters.trim();
    if trimmed.is_empty() || trimmed.len() > 3 || !trimmed.chars().all(|ch| ch.is_ascii_alphabetic())
    {
        return Err(SyncError::InvalidReference(letters.to_string()));
    }
    let index = trimmed.chars().fold(0u32, |acc, ch| {
        acc * 26 + u32::from(ch.to_ascii_uppercase() as u8 - b'A' + 1)
    });
    Ok(index - 1)
}

/// Single cell: 1-based row, zero-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub column: u32,
}

impl CellRef {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.column), self.row)
    }
}

/// Rectangular block, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRef {
    pub first_row: u32,
    pub last_row: u32,
    pub first_column: u32,
    pub last_column: u32,
}

impl RangeRef {
    /// Rows `first_row..=last_row` across the first `columns` columns.
    pub fn rows(first_row: u32, last_row: u32, columns: u32) -> Self {
        Self {
            first_row,
            last_row,
            first_column: 0,
            last_column: columns.saturating_sub(1),
        }
    }

    /// Rows `first_row..=last_row` of a single column.
    pub fn column(column: u32, first_row: u32, last_row: u32) -> Self {
        Self {
            first_row,
            last_row,
            first_column: column,
            last_column: column,
        }
    }

    pub fn start(&self) -> CellRef {
        CellRef::new(self.first_row, self.first_column)
    }

    pub fn row_count(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    pub fn column_count(&self) -> u32 {
        self.last_column - self.first_column + 1
    }

    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        (self.first_row..=self.last_row).flat_map(move |row| {
            (self.first_column..=self.last_column).map(move |column| CellRef::new(row, column))
        })
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            CellRef::new(self.first_row, self.first_column),
            CellRef::new(self.last_row, self.last_column)
        )
    }
}

/// Tab-qualified A1 notation, quoting the tab name.
pub fn qualified(tab: &str, reference: &str) -> String {
    format!("'{}'!{reference}", tab.replace('\'', "''"))
}
