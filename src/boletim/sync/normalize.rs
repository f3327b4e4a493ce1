//! Locale-aware cleanup of raw CSV cells.
//!
//! Exported reports mix Brazilian number formatting (`1.234,56`), Excel
//! text markers (`'037`), stray quotes and invisible characters. Generic
//! columns are coerced to numbers when that is unambiguous; date-like
//! columns are only cleaned so the destination can parse them itself.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::boletim::sync::config::SyncConfig;
use crate::boletim::sync::model::{CellValue, SourceDataset};

const INVISIBLE: [char; 6] = [
    '\u{200b}', '\u{feff}', '\u{a0}', '\u{200e}', '\u{200f}', '\u{202f}',
];

const QUOTES: [char; 14] = [
    '"', '\'', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}', '\u{2039}', '\u{203a}', '\u{ab}',
    '\u{bb}', '`', '\u{b4}', '\u{201a}', '\u{201b}',
];

static TEXT_MARKED_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?\d+(?:[.,]\d+)?$").expect("static pattern"));
static LEADING_ZERO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0\d+$").expect("static pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Only cleaned, never coerced.
    Date,
    Generic,
}

/// Column-aware normalizer.
#[derive(Debug, Clone)]
pub struct Normalizer {
    date_keywords: Vec<String>,
}

impl Normalizer {
    pub fn new<I, S>(date_keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            date_keywords: date_keywords
                .into_iter()
                .map(|keyword| keyword.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(&config.date_keywords)
    }

    pub fn classify(&self, header: &str) -> ColumnKind {
        let header = header.to_lowercase();
        if self
            .date_keywords
            .iter()
            .any(|keyword| header.contains(keyword.as_str()))
        {
            ColumnKind::Date
        } else {
            ColumnKind::Generic
        }
    }

    pub fn normalize_cell(&self, kind: ColumnKind, raw: Option<&str>) -> CellValue {
        let Some(raw) = raw else {
            return CellValue::Empty;
        };
        match kind {
            ColumnKind::Date => clean_date(raw),
            ColumnKind::Generic => normalize_numeric(raw),
        }
    }

    /// Normalizes every cell of the dataset, column by column.
    pub fn normalize_dataset(&self, dataset: &SourceDataset) -> Vec<Vec<CellValue>> {
        let kinds: Vec<ColumnKind> = dataset
            .columns
            .iter()
            .map(|header| self.classify(header))
            .collect();
        let date_columns: Vec<&str> = dataset
            .columns
            .iter()
            .zip(&kinds)
            .filter(|(_, kind)| **kind == ColumnKind::Date)
            .map(|(header, _)| header.as_str())
            .collect();
        if !date_columns.is_empty() {
            debug!(?date_columns, "date-like columns identified");
        }

        dataset
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(index, raw)| {
                        let kind = kinds.get(index).copied().unwrap_or(ColumnKind::Generic);
                        self.normalize_cell(kind, raw.as_deref())
                    })
                    .collect()
            })
            .collect()
    }
}

fn strip_invisible(raw: &str, extra: &[char]) -> String {
    raw.chars()
        .filter(|ch| !INVISIBLE.contains(ch) && !extra.contains(ch))
        .collect()
}

/// Repeatedly removes one edge character from either end while it belongs
/// to `edges`, trimming whitespace after every removal.
fn strip_edges<'a>(mut value: &'a str, edges: &[char]) -> &'a str {
    value = value.trim();
    loop {
        let before = value;
        if let Some(first) = value.chars().next().filter(|ch| edges.contains(ch)) {
            value = value[first.len_utf8()..].trim();
        }
        if let Some(last) = value.chars().next_back().filter(|ch| edges.contains(ch)) {
            value = value[..value.len() - last.len_utf8()].trim();
        }
        if value == before {
            return value;
        }
    }
}

/// Cleans a date-like cell: invisible characters, typographic apostrophes,
/// and edge quotes or commas are removed; the text itself is kept.
pub fn clean_date(raw: &str) -> CellValue {
    let stripped = strip_invisible(raw, &['\u{2018}', '\u{2019}']);
    let mut edges = QUOTES.to_vec();
    edges.push(',');
    let cleaned = strip_edges(&stripped, &edges);
    if cleaned.is_empty() {
        CellValue::Empty
    } else {
        CellValue::Text(cleaned.to_string())
    }
}

/// Coerces locale-formatted numeric text into an integer or float, keeping
/// codes, leading-zero identifiers and anything unparseable as text.
pub fn normalize_numeric(raw: &str) -> CellValue {
    let stripped = strip_invisible(raw, &[]);
    let mut cleaned = strip_edges(&stripped, &QUOTES);
    if cleaned.is_empty() {
        return CellValue::Empty;
    }

    if let Some(rest) = cleaned.strip_prefix('\'') {
        let candidate = rest.trim();
        if TEXT_MARKED_NUMBER.is_match(candidate) {
            cleaned = candidate;
        }
    }

    if cleaned.chars().any(char::is_alphabetic) {
        return CellValue::Text(cleaned.to_string());
    }

    let mut candidate = if cleaned.contains(',') && cleaned.contains('.') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned.replace(',', ".")
    };
    candidate.retain(|ch| !ch.is_whitespace());

    if LEADING_ZERO.is_match(&candidate) {
        return CellValue::Text(cleaned.to_string());
    }

    match candidate.parse::<f64>() {
        Ok(number) if number.is_finite() => canonical_number(number),
        _ => CellValue::Text(cleaned.to_string()),
    }
}

fn canonical_number(number: f64) -> CellValue {
    const I64_LIMIT: f64 = 9_223_372_036_854_775_807.0;
    if number.fract() == 0.0 && number.abs() < I64_LIMIT {
        CellValue::Integer(number as i64)
    } else {
        CellValue::Float(number)
    }
}
