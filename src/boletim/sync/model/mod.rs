use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Result of validating a service-identity credential file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    /// Location the credential was read from.
    pub path: PathBuf,
    /// Whether every required field is present and the type matches.
    pub valid: bool,
    /// Identity e-mail declared by the credential.
    pub client_email: Option<String>,
    /// Required field → present.
    pub checklist: Vec<(String, bool)>,
}

/// Tabular content decoded from a single CSV file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDataset {
    pub columns: Vec<String>,
    /// Raw cells; `None` marks a null token or a missing trailing field.
    pub rows: Vec<Vec<Option<String>>>,
    pub encoding: String,
    pub delimiter: u8,
}

impl SourceDataset {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Printable form of the delimiter for progress output.
    pub fn delimiter_label(&self) -> String {
        match self.delimiter {
            b'\t' => "\\t".to_string(),
            other => (other as char).to_string(),
        }
    }
}

/// Canonical value produced by the normalizer for a single cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    #[default]
    Empty,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Converts the value into the JSON representation sent to the
    /// spreadsheet service.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Empty => serde_json::Value::String(String::new()),
            CellValue::Integer(value) => serde_json::Value::from(*value),
            CellValue::Float(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(value.to_string())),
            CellValue::Text(value) => serde_json::Value::String(value.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Integer(value) => write!(f, "{value}"),
            CellValue::Float(value) => write!(f, "{value}"),
            CellValue::Text(value) => f.write_str(value),
        }
    }
}

/// Rows occupied by a freshly appended block (1-based, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SheetPosition {
    pub append_start_row: u32,
    pub append_end_row: u32,
    pub column_count: u32,
}

impl SheetPosition {
    pub fn row_count(&self) -> u32 {
        self.append_end_row - self.append_start_row + 1
    }
}

/// Per-column formula to extend onto appended rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaSpec {
    /// Column letters, e.g. `P`.
    pub column: String,
    /// Formula text where `{row}` is replaced by the row number.
    pub template: String,
}

impl FormulaSpec {
    pub const ROW_PLACEHOLDER: &'static str = "{row}";

    pub fn new(column: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            template: template.into(),
        }
    }

    /// Expands the template for a single row.
    pub fn expand(&self, row: u32) -> String {
        self.template
            .replace(Self::ROW_PLACEHOLDER, &row.to_string())
    }
}

/// RGB triple with channels in `0.0..=1.0`, matching the spreadsheet API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

impl Rgb {
    pub const fn new(red: f32, green: f32, blue: f32) -> Self {
        Self { red, green, blue }
    }

    /// Packs the colour as `0xRRGGBB`.
    pub fn to_hex(self) -> u32 {
        let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u32;
        (channel(self.red) << 16) | (channel(self.green) << 8) | channel(self.blue)
    }
}

/// Two-tier highlight colours for appended blocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorScheme {
    pub strong_color: Rgb,
    pub light_color: Rgb,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            strong_color: Rgb::new(0.0, 0.66, 0.35),
            light_color: Rgb::new(0.8, 0.95, 0.85),
        }
    }
}

/// Style applied to a range by the highlight formatter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellStyle {
    pub background: Rgb,
    pub bold: bool,
}

/// Non-fatal problem recorded after the data itself was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum SyncWarning {
    /// Highlight formatting of a range failed.
    Format { range: String, message: String },
    /// A formula column could not be extended.
    Formula { column: String, message: String },
    /// A local workbook could not be saved after formatting.
    Persist { message: String },
}

impl fmt::Display for SyncWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncWarning::Format { range, message } => {
                write!(f, "formatting {range} failed: {message}")
            }
            SyncWarning::Formula { column, message } => {
                write!(f, "formula in column {column} not applied: {message}")
            }
            SyncWarning::Persist { message } => write!(f, "workbook not saved: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_template_substitutes_every_placeholder() {
        let spec = FormulaSpec::new("Q", "=M{row}-K{row}");
        assert_eq!(spec.expand(12), "=M12-K12");
    }

    #[test]
    fn rgb_packs_to_hex() {
        assert_eq!(Rgb::new(1.0, 0.0, 0.0).to_hex(), 0xFF0000);
        assert_eq!(ColorScheme::default().strong_color.to_hex(), 0x00A859);
    }
}
