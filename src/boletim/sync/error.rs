use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type covering the different failure cases that can occur when a CSV
/// report is located, decoded, and pushed into the reporting spreadsheet.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raised when the CSV reader rejects the input outright.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Transport failures talking to the spreadsheet service.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Raised when the service-account assertion cannot be signed.
    #[error("token signing error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Non-success response returned by the spreadsheet or token service.
    #[error("service responded with status {status}: {message}")]
    Api { status: u16, message: String },

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// No credential file with the expected name validated in any location.
    #[error("credential file '{file_name}' not found ({} locations searched)", searched.len())]
    CredentialNotFound {
        file_name: String,
        searched: Vec<PathBuf>,
    },

    /// A credential file was found but is not a usable service identity.
    #[error("invalid credential file {}: {reason}", path.display())]
    CredentialInvalid { path: PathBuf, reason: String },

    /// Every connection attempt failed.
    #[error("could not connect to {resource} after {attempts} attempts: {source}")]
    ConnectionExhausted {
        resource: String,
        attempts: u32,
        #[source]
        source: Box<SyncError>,
    },

    /// No source file matched the requested pattern.
    #[error("no file matching '{pattern}' in {}", directory.display())]
    FileNotFound { pattern: String, directory: PathBuf },

    /// The CSV could not be decoded with any candidate encoding.
    #[error("could not decode {}; encodings tried: {}", path.display(), attempted.join(", "))]
    DecodeFailed {
        path: PathBuf,
        attempted: Vec<String>,
    },

    /// The bulk write into the destination tab failed.
    #[error("write to '{tab}' ({range}) failed: {source}")]
    WriteFailed {
        tab: String,
        range: String,
        #[source]
        source: Box<SyncError>,
    },

    /// Raised when the requested tab does not exist in the resource.
    #[error("tab '{0}' not found")]
    TabNotFound(String),

    /// Raised when a cell or column reference cannot be parsed.
    #[error("invalid cell reference '{0}'")]
    InvalidReference(String),

    /// Raised when the configuration file is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

/// Flat classification handed to presentation layers that only need to know
/// which stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CredentialNotFound,
    CredentialInvalid,
    ConnectionExhausted,
    FileNotFound,
    DecodeFailed,
    WriteFailed,
    Remote,
    Local,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::CredentialNotFound { .. } => ErrorKind::CredentialNotFound,
            SyncError::CredentialInvalid { .. } => ErrorKind::CredentialInvalid,
            SyncError::ConnectionExhausted { .. } => ErrorKind::ConnectionExhausted,
            SyncError::FileNotFound { .. } => ErrorKind::FileNotFound,
            SyncError::DecodeFailed { .. } => ErrorKind::DecodeFailed,
            SyncError::WriteFailed { .. } => ErrorKind::WriteFailed,
            SyncError::Http(_)
            | SyncError::Token(_)
            | SyncError::Api { .. }
            | SyncError::TabNotFound(_) => ErrorKind::Remote,
            _ => ErrorKind::Local,
        }
    }
}
