use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::boletim::sync::config::{SyncConfig, SyncJob};
use crate::boletim::sync::connection::ConnectionManager;
use crate::boletim::sync::credentials::CredentialResolver;
use crate::boletim::sync::decode::CsvDecoder;
use crate::boletim::sync::error::{ErrorKind, Result, SyncError};
use crate::boletim::sync::formula::propagate_formulas;
use crate::boletim::sync::highlight::highlight_block;
use crate::boletim::sync::io::google::{GoogleConnector, GoogleSheets};
use crate::boletim::sync::io::{RangeRef, SheetBackend};
use crate::boletim::sync::locate::resolve_source;
use crate::boletim::sync::model::{FormulaSpec, SheetPosition, SourceDataset, SyncWarning};
use crate::boletim::sync::normalize::Normalizer;
use crate::boletim::sync::write::append_dataset;

/// What to sync and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Existing file path, or a base name resolved by the file locator.
    pub source: String,
    /// Folder searched for `source`; the first existing configured data
    /// folder when unset.
    pub search_dir: Option<PathBuf>,
    pub tab: String,
    pub formulas: Vec<FormulaSpec>,
}

impl SyncRequest {
    pub fn new(source: impl Into<String>, tab: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            search_dir: None,
            tab: tab.into(),
            formulas: Vec::new(),
        }
    }

    pub fn from_job(job: &SyncJob) -> Self {
        Self {
            source: job.file_pattern.clone(),
            search_dir: None,
            tab: job.tab.clone(),
            formulas: job.formulas.clone(),
        }
    }

    pub fn with_search_dir(mut self, directory: impl Into<PathBuf>) -> Self {
        self.search_dir = Some(directory.into());
        self
    }

    pub fn with_formulas(mut self, formulas: Vec<FormulaSpec>) -> Self {
        self.formulas = formulas;
        self
    }
}

/// Summary of a sync whose write committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub source: PathBuf,
    pub tab: String,
    pub encoding: String,
    pub delimiter: String,
    pub position: Option<SheetPosition>,
    pub row_count: usize,
    /// Formatting and formula problems that did not undo the write.
    pub warnings: Vec<SyncWarning>,
}

/// Flat result for presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub report: Option<SyncReport>,
    pub error_kind: Option<ErrorKind>,
    pub message: String,
}

impl From<Result<SyncReport>> for SyncOutcome {
    fn from(result: Result<SyncReport>) -> Self {
        match result {
            Ok(report) => {
                let message = match &report.position {
                    Some(position) => format!(
                        "{} rows appended to '{}' (rows {}-{})",
                        report.row_count,
                        report.tab,
                        position.append_start_row,
                        position.append_end_row
                    ),
                    None => format!("no rows to append to '{}'", report.tab),
                };
                Self {
                    success: true,
                    report: Some(report),
                    error_kind: None,
                    message,
                }
            }
            Err(error) => Self {
                success: false,
                report: None,
                error_kind: Some(error.kind()),
                message: error.to_string(),
            },
        }
    }
}

/// Located and decoded source file, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSource {
    pub path: PathBuf,
    pub dataset: SourceDataset,
}

/// Locates and decodes the request's source file.
#[instrument(level = "info", skip_all, fields(source = %request.source))]
pub fn prepare(config: &SyncConfig, request: &SyncRequest) -> Result<PreparedSource> {
    let path = locate_source(config, request)?;
    let dataset = CsvDecoder::default().decode_path(&path)?;
    info!(
        path = %path.display(),
        rows = dataset.row_count(),
        columns = dataset.column_count(),
        "source decoded"
    );
    Ok(PreparedSource { path, dataset })
}

/// Writes an already decoded source into `request.tab`, then highlights
/// the new block and extends formula columns.
#[instrument(
    level = "info",
    skip_all,
    fields(tab = %request.tab, source = %prepared.path.display())
)]
pub fn sync_prepared<B: SheetBackend + ?Sized>(
    backend: &mut B,
    config: &SyncConfig,
    request: &SyncRequest,
    prepared: PreparedSource,
) -> Result<SyncReport> {
    let PreparedSource { path, dataset } = prepared;
    let normalizer = Normalizer::from_config(config);
    let position = append_dataset(backend, &request.tab, &dataset, &normalizer)?;

    let mut warnings = Vec::new();
    if let Some(position) = &position {
        backend
            .flush()
            .map_err(|source| SyncError::WriteFailed {
                tab: request.tab.clone(),
                range: RangeRef::rows(
                    position.append_start_row,
                    position.append_end_row,
                    position.column_count,
                )
                .to_string(),
                source: Box::new(source),
            })?;

        warnings.extend(highlight_block(backend, &request.tab, position, &config.colors));
        if !request.formulas.is_empty() {
            warnings.extend(propagate_formulas(
                backend,
                &request.tab,
                &request.formulas,
                position,
            ));
        }
        if let Err(error) = backend.flush() {
            warn!(%error, "formatting and formulas were not saved");
            warnings.push(SyncWarning::Persist {
                message: error.to_string(),
            });
        }
    }

    let report = SyncReport {
        source: path,
        tab: request.tab.clone(),
        encoding: dataset.encoding.clone(),
        delimiter: dataset.delimiter_label(),
        position,
        row_count: dataset.row_count(),
        warnings,
    };
    info!(
        rows = report.row_count,
        warnings = report.warnings.len(),
        "sync finished"
    );
    Ok(report)
}

/// Locates, decodes and appends a CSV into a connected backend.
pub fn sync_csv<B: SheetBackend + ?Sized>(
    backend: &mut B,
    config: &SyncConfig,
    request: &SyncRequest,
) -> Result<SyncReport> {
    let prepared = prepare(config, request)?;
    sync_prepared(backend, config, request, prepared)
}

/// Resolves credentials and opens `resource_id` with retries.
#[instrument(level = "info", skip_all, fields(resource = %resource_id))]
pub fn connect_google(config: &SyncConfig, resource_id: &str) -> Result<GoogleSheets> {
    let credentials = CredentialResolver::from_config(&config.credentials).resolve()?;
    let session = ConnectionManager::new(config.retry).connect(
        &GoogleConnector::default(),
        &credentials,
        resource_id,
    )?;
    Ok(GoogleSheets::new(session, resource_id))
}

/// Full sync against a Google spreadsheet: the source is decoded first so
/// a bad file never costs a connection.
#[instrument(level = "info", skip_all, fields(resource = %resource_id, tab = %request.tab))]
pub fn sync_google(
    config: &SyncConfig,
    resource_id: &str,
    request: &SyncRequest,
) -> Result<SyncReport> {
    let prepared = prepare(config, request)?;
    let mut sheets = connect_google(config, resource_id)?;
    sync_prepared(&mut sheets, config, request, prepared)
}

/// Resolved path of the source a request would use, without decoding it.
pub fn locate_source(config: &SyncConfig, request: &SyncRequest) -> Result<PathBuf> {
    let directory = request
        .search_dir
        .clone()
        .unwrap_or_else(|| config.default_data_dir());
    resolve_source(&request.source, &directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boletim::sync::io::CellRef;
    use crate::boletim::sync::io::memory::{MemorySpreadsheet, MemoryTab};
    use crate::boletim::sync::model::CellValue;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn outcome_reports_error_kind() {
        let outcome = SyncOutcome::from(Err(SyncError::FileNotFound {
            pattern: "GENESYS".into(),
            directory: PathBuf::from("dados"),
        }));
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::FileNotFound));
        assert!(outcome.message.contains("GENESYS"));
    }

    #[test]
    fn missing_tab_aborts_before_any_write() {
        let dir = tempdir().expect("temp dir");
        fs::write(dir.path().join("fila.csv"), "a;b\n1;2\n").expect("fixture written");
        let request = SyncRequest::new("fila", "BASE").with_search_dir(dir.path());

        let mut book = MemorySpreadsheet::new();
        let outcome = SyncOutcome::from(sync_csv(&mut book, &SyncConfig::default(), &request));
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Remote));
    }

    #[test]
    fn locator_pattern_resolves_inside_search_dir() {
        let dir = tempdir().expect("temp dir");
        fs::write(dir.path().join("fila (1).csv"), "a;b\n1;2\n").expect("fixture written");
        let request = SyncRequest::new("fila", "BASE").with_search_dir(dir.path());

        let path = locate_source(&SyncConfig::default(), &request).expect("file located");
        assert!(path.ends_with("fila (1).csv"));

        let mut book = MemorySpreadsheet::new();
        book.add_tab(MemoryTab::new("BASE", 100));
        let report = sync_csv(&mut book, &SyncConfig::default(), &request).expect("synced");
        assert_eq!(report.delimiter, ";");
        assert_eq!(report.position.map(|p| p.append_start_row), Some(1));
        let tab = book.tab("BASE").expect("tab");
        assert_eq!(tab.value(CellRef::new(1, 1)), CellValue::Integer(2));
    }
}
