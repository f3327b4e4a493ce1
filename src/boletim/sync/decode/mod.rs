//! CSV decoding through an ordered chain of encoding strategies.
//!
//! Each strategy either yields a [`SourceDataset`] or explains why it gave
//! up; the decoder walks the chain and keeps the first success, so the
//! choice is a pure function of the file's bytes.

pub mod encoding;

use std::fs;
use std::io::Write;
use std::path::Path;

use chardetng::EncodingDetector;
use tracing::{debug, info, instrument, warn};

use crate::boletim::sync::error::{Result, SyncError};
use crate::boletim::sync::model::SourceDataset;

pub use encoding::TextEncoding;

/// Delimiters in priority order; ties on column count go to the earlier one.
pub const DELIMITERS: [u8; 5] = [b';', b',', b'\t', b'|', b':'];

/// Tokens read as missing values.
pub const NULL_TOKENS: [&str; 14] = [
    "N/A", "NULL", "null", "None", "#N/A", "#NULL!", "NaN", "nan", "-NaN", "NA", "n/a", "<NA>",
    "#N/A N/A", "#NA",
];

const SAMPLE_CHARS: usize = 1000;

/// Outcome of a single strategy.
#[derive(Debug)]
pub enum Attempt {
    Decoded(SourceDataset),
    Rejected(String),
}

pub trait DecodeStrategy {
    /// Name reported in progress output and in `DecodeFailed`.
    fn label(&self) -> String;

    fn attempt(&self, bytes: &[u8]) -> Attempt;
}

/// Decodes with one fixed encoding, then sniffs the delimiter and parses.
#[derive(Debug, Clone, Copy)]
pub struct EncodingStrategy {
    encoding: TextEncoding,
}

impl EncodingStrategy {
    pub fn new(encoding: TextEncoding) -> Self {
        Self { encoding }
    }
}

impl DecodeStrategy for EncodingStrategy {
    fn label(&self) -> String {
        self.encoding.label().to_string()
    }

    fn attempt(&self, bytes: &[u8]) -> Attempt {
        match self.encoding.decode(bytes) {
            Some(text) => parse_text(&text, self.encoding.label()),
            None => Attempt::Rejected(format!("malformed {}", self.encoding.label())),
        }
    }
}

/// Last resort: statistical detection, a temporary UTF-8 copy, and a single
/// re-parse of that copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectedEncodingStrategy;

impl DecodeStrategy for DetectedEncodingStrategy {
    fn label(&self) -> String {
        "detected".to_string()
    }

    fn attempt(&self, bytes: &[u8]) -> Attempt {
        let mut detector = EncodingDetector::new();
        detector.feed(bytes, true);
        let (guessed, confident) = detector.guess_assess(None, true);
        if !confident {
            return Attempt::Rejected(format!("low confidence guess {}", guessed.name()));
        }
        let (text, used, _) = guessed.decode(bytes);
        info!(encoding = used.name(), "statistical detector guess");

        let reencoded = match utf8_copy(&text) {
            Ok(copy) => copy,
            Err(error) => return Attempt::Rejected(format!("temporary copy failed: {error}")),
        };
        parse_text(&reencoded, &format!("{} (detected)", used.name()))
    }
}

fn utf8_copy(text: &str) -> std::io::Result<String> {
    let mut temp = tempfile::Builder::new().suffix(".csv").tempfile()?;
    temp.write_all(text.as_bytes())?;
    temp.flush()?;
    fs::read_to_string(temp.path())
}

/// Ordered chain of strategies.
pub struct CsvDecoder {
    strategies: Vec<Box<dyn DecodeStrategy>>,
}

impl Default for CsvDecoder {
    fn default() -> Self {
        let mut strategies: Vec<Box<dyn DecodeStrategy>> = TextEncoding::CASCADE
            .into_iter()
            .map(|encoding| Box::new(EncodingStrategy::new(encoding)) as Box<dyn DecodeStrategy>)
            .collect();
        strategies.push(Box::new(DetectedEncodingStrategy));
        Self { strategies }
    }
}

impl CsvDecoder {
    pub fn with_strategies(strategies: Vec<Box<dyn DecodeStrategy>>) -> Self {
        Self { strategies }
    }

    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn decode_path(&self, path: &Path) -> Result<SourceDataset> {
        let bytes = fs::read(path)?;
        self.decode_bytes(path, &bytes)
    }

    /// Runs the chain over in-memory content; `path` only labels errors.
    pub fn decode_bytes(&self, path: &Path, bytes: &[u8]) -> Result<SourceDataset> {
        let mut attempted = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let label = strategy.label();
            debug!(encoding = %label, "trying encoding");
            match strategy.attempt(bytes) {
                Attempt::Decoded(dataset) => {
                    info!(
                        encoding = %dataset.encoding,
                        delimiter = %dataset.delimiter_label(),
                        rows = dataset.row_count(),
                        columns = dataset.column_count(),
                        "CSV loaded"
                    );
                    return Ok(dataset);
                }
                Attempt::Rejected(reason) => {
                    debug!(encoding = %label, %reason, "encoding rejected");
                    attempted.push(label);
                }
            }
        }
        warn!("no encoding produced a usable table");
        Err(SyncError::DecodeFailed {
            path: path.to_path_buf(),
            attempted,
        })
    }
}

/// Text sampled for delimiter detection: the first line, or the first
/// kilobyte when that line is nearly empty.
fn sample(text: &str) -> &str {
    let first_line = text.split_inclusive('\n').next().unwrap_or("");
    if first_line.trim().chars().count() >= 3 {
        return first_line;
    }
    match text.char_indices().nth(SAMPLE_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Picks the delimiter yielding the most columns with at least two
/// non-empty fields. Falls back to `,`.
pub fn detect_delimiter(sample: &str) -> (u8, usize) {
    let mut best = (b',', 0);
    for delimiter in DELIMITERS {
        let fields: Vec<&str> = sample.split(char::from(delimiter)).collect();
        if fields.len() < 2 || fields.len() <= best.1 {
            continue;
        }
        let non_empty = fields.iter().filter(|field| !field.trim().is_empty()).count();
        if non_empty >= 2 {
            best = (delimiter, fields.len());
        }
    }
    best
}

fn parse_text(text: &str, encoding: &str) -> Attempt {
    if text.contains('\0') {
        return Attempt::Rejected("text contains NUL characters".into());
    }
    let (delimiter, columns) = detect_delimiter(sample(text));
    debug!(delimiter = %char::from(delimiter).escape_default(), columns, "delimiter detected");

    let dataset = match parse_table(text, delimiter, encoding) {
        Ok(dataset) => dataset,
        Err(error) => return Attempt::Rejected(error.to_string()),
    };
    if dataset.rows.is_empty() {
        return Attempt::Rejected("no data rows".into());
    }
    if dataset.column_count() < 2 {
        return Attempt::Rejected("single column table".into());
    }
    Attempt::Decoded(dataset)
}

/// Tolerant parse: quote-aware, short rows padded, over-long rows and
/// unreadable records skipped, blank rows dropped.
pub fn parse_table(text: &str, delimiter: u8, encoding: &str) -> Result<SourceDataset> {
    let text = skip_initial_space(text, char::from(delimiter));
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .quoting(true)
        .double_quote(true)
        .from_reader(text.as_bytes());

    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(error) => {
                debug!(%error, "skipping unreadable record");
                skipped += 1;
                continue;
            }
        };

        if columns.is_none() {
            let names: Vec<String> = record
                .iter()
                .map(|name| name.trim().trim_start_matches('\u{feff}').to_string())
                .collect();
            columns = Some(names);
            continue;
        }
        let width = columns.as_ref().map_or(0, Vec::len);

        if record.len() > width {
            skipped += 1;
            continue;
        }
        let mut row: Vec<Option<String>> = record.iter().map(cell).collect();
        if row.iter().all(Option::is_none) {
            continue;
        }
        row.resize(width, None);
        rows.push(row);
    }

    if skipped > 0 {
        warn!(skipped, "malformed lines skipped");
    }

    Ok(SourceDataset {
        columns: columns.unwrap_or_default(),
        rows,
        encoding: encoding.to_string(),
        delimiter,
    })
}

/// Drops spaces that follow a delimiter outside quotes, so a quoted field
/// written as `; "x;y"` still opens its quotes.
fn skip_initial_space(text: &str, delimiter: char) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quoted = false;
    let mut just_closed = false;
    let mut field_start = true;
    let mut after_delimiter = false;

    for ch in text.chars() {
        if quoted {
            if ch == '"' {
                quoted = false;
                just_closed = true;
            }
            out.push(ch);
            continue;
        }
        if after_delimiter && ch == ' ' {
            continue;
        }
        // `""` inside a quoted field
        quoted = ch == '"' && (field_start || just_closed);
        just_closed = false;
        field_start = ch == delimiter || ch == '\n';
        after_delimiter = ch == delimiter;
        out.push(ch);
    }
    out
}

fn cell(raw: &str) -> Option<String> {
    let value = raw.trim_start_matches(' ');
    if value.trim().is_empty() || NULL_TOKENS.contains(&value.trim()) {
        None
    } else {
        Some(value.to_string())
    }
}
