//! Named study configurations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dask_timing_core::{Parameters, ResultFile};

use crate::config::{ClusterSettings, Config, StudyKind, TimeoutConfig};
use crate::error::SessionError;
use crate::launcher::LaunchSettings;

/// Directory used for result files when none is configured.
pub const DEFAULT_OUTPUT_DIR: &str = "timing_results";

/// A predefined set of studies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// 2 workers, 1 run.
    Quick,
    /// 4 workers, 5 runs.
    Standard,
    /// 1, 2, 4 and 8 workers, 3 runs each.
    Scalability,
    /// 4 workers, 3 runs, with the inspection pass.
    Detailed,
    /// Whatever the config file and flags say.
    Custom,
}

impl Preset {
    pub const NAMES: [&'static str; 5] = ["quick", "standard", "scalability", "detailed", "custom"];

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Quick => "quick",
            Preset::Standard => "standard",
            Preset::Scalability => "scalability",
            Preset::Detailed => "detailed",
            Preset::Custom => "custom",
        }
    }

    /// (workers, runs, detailed) for each study of the preset.
    fn shapes(self, config: &Config) -> Vec<(usize, u32, bool)> {
        let detailed = config.study.detailed;
        match self {
            Preset::Quick => vec![(2, 1, detailed)],
            Preset::Standard => vec![(4, 5, detailed)],
            Preset::Scalability => [1, 2, 4, 8].iter().map(|&w| (w, 3, detailed)).collect(),
            Preset::Detailed => vec![(4, 3, true)],
            Preset::Custom => vec![(config.study.workers, config.study.runs, detailed)],
        }
    }

    /// Expand the preset into fully specified studies.
    ///
    /// `output` names an explicit result file and is only allowed when the
    /// preset yields a single study. Otherwise each study gets an
    /// automatically named file under the configured output directory.
    pub fn build(
        self,
        config: &Config,
        output: Option<&Path>,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<StudyConfig>, SessionError> {
        let kind = config.study_kind()?;
        let shapes = self.shapes(config);

        if output.is_some() && shapes.len() > 1 {
            return Err(SessionError::UnknownConfiguration(format!(
                "--output names one file but preset '{}' runs {} configurations; use --output-dir",
                self,
                shapes.len()
            )));
        }
        if config.study.threads == 0 {
            return Err(SessionError::UnknownConfiguration(
                "threads per worker must be at least 1".to_string(),
            ));
        }

        let directory = config
            .output
            .directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        shapes
            .into_iter()
            .map(|(workers, runs, detailed)| {
                if workers == 0 || runs == 0 {
                    return Err(SessionError::UnknownConfiguration(format!(
                        "workers and runs must be at least 1 (got {} workers, {} runs)",
                        workers, runs
                    )));
                }
                let mut study = StudyConfig {
                    kind,
                    workers,
                    threads: config.study.threads,
                    runs,
                    batch_tasks: config.study.batch_tasks,
                    detailed,
                    abort_on_failure: config.study.abort_on_failure,
                    run_interval: Duration::from_millis(config.study.run_interval_ms),
                    output: PathBuf::new(),
                    cluster: config.cluster.clone(),
                    timeouts: config.timeouts.clone(),
                };
                study.output = match output {
                    Some(path) => path.to_path_buf(),
                    None => directory
                        .join(ResultFile::default_file_name(&study.parameters(), timestamp)),
                };
                Ok(study)
            })
            .collect()
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Preset::Quick),
            "standard" => Ok(Preset::Standard),
            "scalability" => Ok(Preset::Scalability),
            "detailed" => Ok(Preset::Detailed),
            "custom" => Ok(Preset::Custom),
            other => Err(SessionError::UnknownConfiguration(format!(
                "unknown preset '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }
}

/// One configuration to measure, fully resolved.
#[derive(Debug, Clone)]
pub struct StudyConfig {
    pub kind: StudyKind,
    pub workers: usize,
    pub threads: usize,
    pub runs: u32,
    pub batch_tasks: usize,
    pub detailed: bool,
    pub abort_on_failure: bool,
    pub run_interval: Duration,
    /// Where the result file goes.
    pub output: PathBuf,
    pub cluster: ClusterSettings,
    pub timeouts: TimeoutConfig,
}

impl StudyConfig {
    /// Parameters as persisted in the result file.
    pub fn parameters(&self) -> Parameters {
        Parameters {
            study: self.kind.to_string(),
            workers: self.workers,
            threads: self.threads,
            runs: self.runs,
            batch_tasks: self.batch_tasks,
            worker_timeout_secs: self.timeouts.worker_ready().as_secs_f64(),
            detailed: self.detailed,
        }
    }

    pub fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            kind: self.kind,
            workers: self.workers,
            threads: self.threads,
            batch_tasks: self.batch_tasks,
            cluster: self.cluster.clone(),
            timeouts: self.timeouts.clone(),
        }
    }
}
