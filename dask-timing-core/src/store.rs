//! On-disk result files.
//!
//! A [`ResultFile`] is written once per configuration per session. Writes go
//! through a temporary file in the destination directory that is renamed into
//! place, so a reader never observes a half-written file.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::WorkerInfo;
use crate::record::RunSet;
use crate::stats::StatisticsSummary;

/// Errors that can occur reading or writing result files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid result JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to move result into place at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn default_threads() -> usize {
    1
}

fn default_study() -> String {
    "local".to_string()
}

/// Configuration a result set was collected with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    #[serde(default = "default_study")]
    pub study: String,
    pub workers: usize,
    #[serde(default = "default_threads")]
    pub threads: usize,
    pub runs: u32,
    #[serde(default)]
    pub batch_tasks: usize,
    #[serde(default)]
    pub worker_timeout_secs: f64,
    #[serde(default)]
    pub detailed: bool,
}

/// Output of the detailed inspection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDetails {
    /// Cluster creation through all workers registered, in seconds.
    pub setup_time: f64,
    pub scheduler_id: String,
    pub scheduler_address: String,
    pub workers: Vec<WorkerInfo>,
    pub tasks: usize,
    pub task_execution_time: f64,
    pub tasks_per_second: f64,
}

/// A complete result document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFile {
    pub timestamp: DateTime<Utc>,
    pub parameters: Parameters,
    pub results: RunSet,
    #[serde(default)]
    pub statistics: StatisticsSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detailed: Option<ClusterDetails>,
}

impl ResultFile {
    /// Build a result file, deriving statistics from the successful runs.
    pub fn new(
        timestamp: DateTime<Utc>,
        parameters: Parameters,
        results: RunSet,
        detailed: Option<ClusterDetails>,
    ) -> Self {
        let statistics = results.summary();
        Self {
            timestamp,
            parameters,
            results,
            statistics,
            detailed,
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a result file from disk.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Write the result file atomically, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        let json = self.to_json()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source| StoreError::Io {
            path: dir.clone(),
            source,
        };

        std::fs::create_dir_all(&dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| StoreError::Persist {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Default file name: `<study>_w<workers>_t<threads>_<timestamp>.json`.
    pub fn default_file_name(parameters: &Parameters, timestamp: DateTime<Utc>) -> String {
        format!(
            "{}_w{}_t{}_{}.json",
            parameters.study,
            parameters.workers,
            parameters.threads,
            timestamp.format("%Y%m%d_%H%M%S")
        )
    }
}
