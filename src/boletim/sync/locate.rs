use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use glob::glob;
use regex::Regex;
use tracing::{debug, info, instrument};

use crate::boletim::sync::error::{Result, SyncError};

static DUPLICATE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\d+\)").expect("static pattern"));

/// Strips a trailing `.csv` in any case.
fn base_name(pattern: &str) -> &str {
    let len = pattern.len();
    if len >= 4
        && pattern.is_char_boundary(len - 4)
        && pattern[len - 4..].eq_ignore_ascii_case(".csv")
    {
        &pattern[..len - 4]
    } else {
        pattern
    }
}

/// Glob candidates covering exact names, OS duplicate suffixes such as
/// `report (2).csv`, and upper-case extensions.
pub fn candidate_patterns(pattern: &str) -> Vec<String> {
    let base = glob::Pattern::escape(base_name(pattern));
    vec![
        format!("{base}.csv"),
        format!("{base} (*).csv"),
        format!("*{base}*.csv"),
        format!("{base}.CSV"),
        format!("{base} (*).CSV"),
    ]
}

/// Finds the most recently modified CSV in `directory` matching `pattern`.
#[instrument(
    level = "info",
    skip_all,
    fields(pattern = %pattern, directory = %directory.display())
)]
pub fn locate_latest(pattern: &str, directory: &Path) -> Result<PathBuf> {
    let mut matches: BTreeSet<PathBuf> = BTreeSet::new();
    let escaped_dir = PathBuf::from(glob::Pattern::escape(&directory.to_string_lossy()));

    for candidate in candidate_patterns(pattern) {
        let full_pattern = escaped_dir.join(&candidate);
        let Ok(paths) = glob(&full_pattern.to_string_lossy()) else {
            debug!(pattern = %candidate, "skipping unusable glob");
            continue;
        };
        matches.extend(paths.filter_map(|entry| entry.ok()).filter(|path| path.is_file()));
    }

    if matches.is_empty() {
        debug!("no glob match, scanning directory by similarity");
        matches.extend(similar_files(pattern, directory));
    }

    let newest = matches
        .into_iter()
        .map(|path| (modified(&path), path))
        .max_by(|lhs, rhs| lhs.0.cmp(&rhs.0).then_with(|| rhs.1.cmp(&lhs.1)))
        .map(|(_, path)| path)
        .ok_or_else(|| SyncError::FileNotFound {
            pattern: pattern.to_string(),
            directory: directory.to_path_buf(),
        })?;

    let file_name = newest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if DUPLICATE_SUFFIX.is_match(&file_name) {
        info!(file = %file_name, "duplicate download detected, using newest copy");
    } else {
        info!(file = %file_name, "source file found");
    }
    Ok(newest)
}

/// Uses `source` directly when it names an existing file, otherwise treats
/// it as a pattern for [`locate_latest`].
pub fn resolve_source(source: &str, directory: &Path) -> Result<PathBuf> {
    let direct = Path::new(source);
    if direct.is_file() {
        return Ok(direct.to_path_buf());
    }
    locate_latest(source, directory)
}

fn similar_files(pattern: &str, directory: &Path) -> Vec<PathBuf> {
    let wanted = base_name(pattern).to_lowercase();
    let Ok(entries) = fs::read_dir(directory) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
                return false;
            };
            let Some(stem) = name.strip_suffix(".csv") else {
                return false;
            };
            stem.contains(&wanted) || wanted.contains(stem)
        })
        .collect()
}

fn modified(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(path: &Path, age_secs: u64) {
        let file = File::create(path).expect("file created");
        let stamp = SystemTime::now() - Duration::from_secs(age_secs);
        file.set_modified(stamp).expect("mtime set");
    }

    #[test]
    fn newest_duplicate_wins() {
        let dir = tempdir().expect("temporary directory");
        touch(&dir.path().join("BASE-CRIADO.csv"), 300);
        touch(&dir.path().join("BASE-CRIADO (1).csv"), 200);
        touch(&dir.path().join("BASE-CRIADO (2).csv"), 10);

        let found = locate_latest("BASE-CRIADO.csv", dir.path()).expect("found");
        assert_eq!(found, dir.path().join("BASE-CRIADO (2).csv"));
    }

    #[test]
    fn upper_case_extension_matches() {
        let dir = tempdir().expect("temporary directory");
        touch(&dir.path().join("VOZ HC.CSV"), 5);
        let found = locate_latest("VOZ HC", dir.path()).expect("found");
        assert_eq!(found, dir.path().join("VOZ HC.CSV"));
    }

    #[test]
    fn similarity_scan_is_case_insensitive() {
        let dir = tempdir().expect("temporary directory");
        touch(&dir.path().join("Export_genesys_fila_2024.csv"), 5);
        let found = locate_latest("GENESYS_FILA", dir.path()).expect("found");
        assert_eq!(found, dir.path().join("Export_genesys_fila_2024.csv"));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempdir().expect("temporary directory");
        touch(&dir.path().join("other.txt"), 5);
        assert!(matches!(
            locate_latest("report", dir.path()),
            Err(SyncError::FileNotFound { .. })
        ));
    }

    #[test]
    fn existing_path_is_used_directly() {
        let dir = tempdir().expect("temporary directory");
        let path = dir.path().join("direct.csv");
        touch(&path, 1);
        let resolved =
            resolve_source(&path.to_string_lossy(), Path::new("/nonexistent")).expect("resolved");
        assert_eq!(resolved, path);
    }
}
