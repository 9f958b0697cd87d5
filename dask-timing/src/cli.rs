//! Command-line interface for dask-timing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::analyzer::DEFAULT_PATTERN;
use crate::config::{Config, StudyKind, DEFAULT_CONFIG_FILE};
use crate::error::SessionError;
use crate::preset::Preset;

#[derive(Debug, Parser)]
#[command(name = "dask-timing")]
#[command(about = "Measure how long Dask clusters take to become usable")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch clusters and time their startup phases
    Run(RunArgs),
    /// Summarize stored result files
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Preset to run: quick, standard, scalability, detailed or custom
    #[arg(long, default_value = "custom")]
    pub preset: String,

    /// Cluster type: local or distributed
    #[arg(long)]
    pub study: Option<String>,

    /// Number of workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Threads per worker
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Number of runs
    #[arg(short, long)]
    pub runs: Option<u32>,

    /// Result file (single-configuration presets only)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory for automatically named result files
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Collect scheduler, worker and throughput details after the runs
    #[arg(long)]
    pub detailed: bool,

    /// Size of the batch phase (0 skips it)
    #[arg(long)]
    pub batch_tasks: Option<usize>,

    /// Seconds to wait for all workers to register
    #[arg(long)]
    pub worker_timeout_secs: Option<f64>,

    /// Stop at the first failed run
    #[arg(long)]
    pub abort_on_failure: bool,

    /// Print results as JSON instead of tables
    #[arg(long)]
    pub json: bool,

    /// Show scheduler, worker and bridge output for debugging
    #[arg(long)]
    pub cluster_output: bool,

    /// Path to config file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Glob pattern of result files
    #[arg(default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// Compare configurations against the fastest one
    #[arg(long)]
    pub compare: bool,

    /// Draw a bar chart of mean time to ready
    #[arg(long)]
    pub plot: bool,

    /// Confidence level for comparisons (0.0-1.0)
    #[arg(long, default_value_t = 0.95)]
    pub confidence_level: f64,

    /// Print the analysis as JSON instead of tables
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// Parse the requested preset.
    ///
    /// Worker and run counts can only be given for the `custom` preset, since
    /// every other preset fixes them.
    pub fn preset(&self) -> Result<Preset, SessionError> {
        let preset: Preset = self.preset.parse()?;
        if preset != Preset::Custom && (self.workers.is_some() || self.runs.is_some()) {
            return Err(SessionError::UnknownConfiguration(format!(
                "preset '{}' fixes workers and runs; use --preset custom with --workers/--runs",
                preset
            )));
        }
        Ok(preset)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI arguments take precedence over config file values.
    /// Only non-None optional values and set flags override the config.
    pub fn apply_to_config(&self, config: &mut Config) -> Result<(), SessionError> {
        if let Some(study) = &self.study {
            let kind: StudyKind = study.parse()?;
            config.study.kind = kind.to_string();
        }

        if let Some(workers) = self.workers {
            config.study.workers = workers;
        }

        if let Some(threads) = self.threads {
            config.study.threads = threads;
        }

        if let Some(runs) = self.runs {
            config.study.runs = runs;
        }

        if let Some(batch_tasks) = self.batch_tasks {
            config.study.batch_tasks = batch_tasks;
        }

        if let Some(secs) = self.worker_timeout_secs {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(SessionError::UnknownConfiguration(format!(
                    "worker timeout must be positive (got {})",
                    secs
                )));
            }
            config.timeouts.worker_ready_ms = (secs * 1000.0).round() as u64;
        }

        if let Some(dir) = &self.output_dir {
            config.output.directory = Some(dir.clone());
        }

        if self.detailed {
            config.study.detailed = true;
        }

        if self.abort_on_failure {
            config.study.abort_on_failure = true;
        }

        if self.cluster_output {
            config.cluster.show_output = true;
        }

        Ok(())
    }
}
