//! Configuration loading for dask-timing.
//!
//! Supports loading configuration from TOML files, with sensible defaults
//! for all settings. Command-line flags are layered on top by
//! [`crate::cli::RunArgs::apply_to_config`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Top-level configuration for dask-timing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// What to measure and how often.
    pub study: StudyConfigFile,
    /// How to launch the cluster processes.
    pub cluster: ClusterSettings,
    /// Bounds on every blocking wait.
    pub timeouts: TimeoutConfig,
    /// Where result files go.
    pub output: OutputConfig,
}

/// The `[study]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfigFile {
    /// `local` or `distributed`.
    pub kind: String,
    pub workers: usize,
    pub threads: usize,
    pub runs: u32,
    /// Size of the optional batch phase; 0 skips it.
    pub batch_tasks: usize,
    /// Run the detailed inspection pass after the timed runs.
    pub detailed: bool,
    /// Stop the session at the first failed run.
    pub abort_on_failure: bool,
    /// Pause between runs so the previous cluster is fully gone.
    pub run_interval_ms: u64,
}

/// The `[cluster]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Command prefix that starts a Python interpreter with dask installed.
    pub python_command: Vec<String>,
    /// Command that starts a scheduler (multi-process study).
    pub scheduler_command: Vec<String>,
    /// Command that starts a worker (multi-process study).
    pub worker_command: Vec<String>,
    pub scheduler_host: String,
    pub scheduler_port: u16,
    /// Pass cluster process output through to the terminal.
    pub show_output: bool,
}

/// The `[timeouts]` section, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bridge interpreter start and library import.
    pub bridge_startup_ms: u64,
    /// Scheduler process accepting connections.
    pub scheduler_ready_ms: u64,
    /// All requested workers registered.
    pub worker_ready_ms: u64,
    /// Any single bridge call other than the worker wait.
    pub request_ms: u64,
    /// Grace period between SIGTERM and kill at teardown.
    pub shutdown_grace_ms: u64,
}

/// The `[output]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for automatically named result files.
    pub directory: Option<PathBuf>,
}

impl Default for StudyConfigFile {
    fn default() -> Self {
        Self {
            kind: StudyKind::Local.to_string(),
            workers: 2,
            threads: 1,
            runs: 1,
            batch_tasks: 100,
            detailed: false,
            abort_on_failure: false,
            run_interval_ms: 1_000,
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            python_command: vec!["python3".to_string()],
            scheduler_command: vec!["dask".to_string(), "scheduler".to_string()],
            worker_command: vec!["dask".to_string(), "worker".to_string()],
            scheduler_host: "127.0.0.1".to_string(),
            scheduler_port: 8786,
            show_output: false,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            bridge_startup_ms: 60_000,
            scheduler_ready_ms: 30_000,
            worker_ready_ms: 60_000,
            request_ms: 60_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn bridge_startup(&self) -> Duration {
        Duration::from_millis(self.bridge_startup_ms)
    }

    pub fn scheduler_ready(&self) -> Duration {
        Duration::from_millis(self.scheduler_ready_ms)
    }

    pub fn worker_ready(&self) -> Duration {
        Duration::from_millis(self.worker_ready_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl ClusterSettings {
    /// `tcp://host:port` of the scheduler in the multi-process study.
    pub fn scheduler_address(&self) -> String {
        format!("tcp://{}:{}", self.scheduler_host, self.scheduler_port)
    }
}

/// Which cluster variant a study launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyKind {
    /// Scheduler and workers created together by a local cluster object.
    Local,
    /// Scheduler and each worker as independent processes.
    Distributed,
}

impl StudyKind {
    pub const NAMES: [&'static str; 2] = ["local", "distributed"];

    pub fn as_str(self) -> &'static str {
        match self {
            StudyKind::Local => "local",
            StudyKind::Distributed => "distributed",
        }
    }
}

impl fmt::Display for StudyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StudyKind {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StudyKind::Local),
            "distributed" => Ok(StudyKind::Distributed),
            other => Err(SessionError::UnknownConfiguration(format!(
                "unknown study type '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }
}

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = ".dask-timing.toml";

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration from `path` if it exists, otherwise use defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_or_default(path: &Path) -> Result<Config> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Config::default())
        }
    }

    /// The configured study kind.
    pub fn study_kind(&self) -> Result<StudyKind, SessionError> {
        self.study.kind.parse()
    }
}
