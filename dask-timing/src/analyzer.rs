//! Loading stored result files for analysis.

use std::path::PathBuf;

use dask_timing_core::ResultFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Default pattern for `analyze`.
pub const DEFAULT_PATTERN: &str = "timing_results/*.json";

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("Invalid file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Result files matched by a pattern.
#[derive(Debug, Default)]
pub struct LoadedResults {
    /// Successfully parsed files, in path order.
    pub files: Vec<ResultFile>,
    pub paths: Vec<PathBuf>,
    /// Paths that matched but could not be read or parsed.
    pub skipped: Vec<PathBuf>,
}

/// Load every result file matching `pattern`.
///
/// Unreadable or unparseable files are skipped with a warning.
pub fn load_results(pattern: &str) -> Result<LoadedResults, AnalyzeError> {
    let entries = glob::glob(pattern).map_err(|source| AnalyzeError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = Vec::new();
    let mut loaded = LoadedResults::default();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => paths.push(path),
            Ok(_) => {}
            Err(e) => {
                warn!("Skipping {}: {}", e.path().display(), e.error());
                loaded.skipped.push(e.path().to_path_buf());
            }
        }
    }
    paths.sort();

    for path in paths {
        match ResultFile::load(&path) {
            Ok(file) => {
                debug!("Loaded {}", path.display());
                loaded.files.push(file);
                loaded.paths.push(path);
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                loaded.skipped.push(path);
            }
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dask_timing_core::{Parameters, RunSet};
    use std::path::Path;

    fn write_result(dir: &Path, name: &str, workers: usize) {
        let file = ResultFile::new(
            Utc::now(),
            Parameters {
                study: "local".to_string(),
                workers,
                threads: 1,
                runs: 0,
                batch_tasks: 0,
                worker_timeout_secs: 60.0,
                detailed: false,
            },
            RunSet::new(),
            None,
        );
        file.write(&dir.join(name)).unwrap();
    }

    #[test]
    fn test_load_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        write_result(dir.path(), "a.json", 2);
        write_result(dir.path(), "b.json", 4);
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let pattern = format!("{}/*.json", dir.path().display());
        let loaded = load_results(&pattern).unwrap();

        assert_eq!(loaded.files.len(), 2);
        assert_eq!(loaded.files[0].parameters.workers, 2);
        assert_eq!(loaded.files[1].parameters.workers, 4);
        assert_eq!(loaded.skipped, vec![dir.path().join("broken.json")]);
    }

    #[test]
    fn test_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.json", dir.path().display());
        let loaded = load_results(&pattern).unwrap();

        assert!(loaded.files.is_empty());
        assert!(loaded.skipped.is_empty());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = load_results("timing_results/[.json").unwrap_err();
        assert!(err.to_string().contains("Invalid file pattern"));
    }
}
