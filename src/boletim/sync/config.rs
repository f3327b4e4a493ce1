//! Explicit configuration value handed to the sync entry points.
//!
//! Every field carries a serde default so a partial JSON file (or no file at
//! all) yields a working configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::boletim::sync::error::{Result, SyncError};
use crate::boletim::sync::model::{ColorScheme, FormulaSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub credentials: CredentialConfig,
    pub retry: RetryPolicy,
    /// Folders searched, in order, when a source pattern has no directory.
    pub data_dirs: Vec<PathBuf>,
    pub colors: ColorScheme,
    /// Header keywords marking a column as date-like.
    pub date_keywords: Vec<String>,
    pub jobs: Vec<SyncJob>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            credentials: CredentialConfig::default(),
            retry: RetryPolicy::default(),
            data_dirs: ["data", "dados", "../dados", "../../dados", ".", ".."]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            colors: ColorScheme::default(),
            date_keywords: [
                "data",
                "date",
                "abertura",
                "fechamento",
                "criado",
                "criação",
                "criacao",
                "modificado",
                "atualizado",
                "hora",
                "timestamp",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            jobs: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Reads a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        let config: SyncConfig = serde_json::from_str(&source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config("retry.max_attempts must be at least 1".into()));
        }
        for job in &self.jobs {
            if job.tab.trim().is_empty() {
                return Err(SyncError::Config(format!("job '{}' has no tab", job.name)));
            }
        }
        Ok(())
    }

    /// First configured data folder that exists, or the current directory.
    pub fn default_data_dir(&self) -> PathBuf {
        self.data_dirs
            .iter()
            .find(|dir| dir.is_dir())
            .cloned()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn job(&self, name: &str) -> Option<&SyncJob> {
        self.jobs.iter().find(|job| job.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    pub file_name: String,
    /// Searched before the built-in locations.
    pub search_dirs: Vec<PathBuf>,
    /// Roots for the recursive fallback walk. Empty means home and the
    /// current directory.
    pub recursive_roots: Vec<PathBuf>,
    /// Project root whose `config` folder is searched first.
    pub project_dir: Option<PathBuf>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            file_name: "credentials.json".to_string(),
            search_dirs: Vec::new(),
            recursive_roots: Vec::new(),
            project_dir: None,
        }
    }
}

/// Bounded retry with attempt-scaled backoff for connection establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub clock_skew_backoff_secs: u64,
    pub base_backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            clock_skew_backoff_secs: 5,
            base_backoff_secs: 2,
        }
    }
}

impl RetryPolicy {
    pub fn clock_skew_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.clock_skew_backoff_secs * u64::from(attempt))
    }

    pub fn base_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.base_backoff_secs * u64::from(attempt))
    }
}

/// A named feed: which file goes to which tab, and which formulas follow it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub name: String,
    pub resource_id: String,
    pub tab: String,
    pub file_pattern: String,
    #[serde(default)]
    pub formulas: Vec<FormulaSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"retry": {"max_attempts": 5}}"#).expect("config parsed");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.clock_skew_backoff_secs, 5);
        assert_eq!(config.credentials.file_name, "credentials.json");
        assert!(config.date_keywords.iter().any(|k| k == "abertura"));
    }

    #[test]
    fn jobs_are_looked_up_by_name() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"jobs": [{"name": "voz", "resource_id": "abc", "tab": "BASE VOZ",
                "file_pattern": "GENESYS VOZ HC",
                "formulas": [{"column": "P", "template": "=TEXT(C{row};\"DD/M\")"}]}]}"#,
        )
        .expect("config parsed");
        let job = config.job("voz").expect("job present");
        assert_eq!(job.formulas[0].expand(7), "=TEXT(C7;\"DD/M\")");
        assert!(config.job("texto").is_none());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut config = SyncConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn backoff_scales_with_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.clock_skew_delay(2), Duration::from_secs(10));
        assert_eq!(policy.base_delay(2), Duration::from_secs(4));
    }
}
