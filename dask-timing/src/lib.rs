//! dask-timing: how long does a Dask cluster take to become usable?
//!
//! This library launches local or multi-process Dask clusters through a
//! supervised Python client bridge, times each startup phase, aggregates
//! repeated runs and stores the results for later analysis.

pub mod aggregator;
pub mod analyzer;
pub mod cli;
pub mod config;
pub mod deps;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod preset;
pub mod timer;

// Re-export core types for convenience
pub use dask_timing_core::protocol;
pub use dask_timing_core::{
    Analysis, AnalysisReport, ClusterDetails, FailureKind, JsonReporter, Phase, ReportError,
    Reporter, ResultFile, RunSet, StatisticalTest, TerminalReporter, TimingRecord, WelchTTest,
    TOTAL_CLUSTER_READY,
};

// Re-export main types from this crate
pub use aggregator::{run_study, Aggregator, Interrupt};
pub use analyzer::{load_results, AnalyzeError, LoadedResults};
pub use cli::{AnalyzeArgs, Cli, Command, RunArgs};
pub use config::{Config, StudyKind};
pub use deps::check_dependencies;
pub use error::SessionError;
pub use launcher::{ClusterLauncher, LaunchError, LaunchSettings, Launcher, ManagedProcess};
pub use preset::{Preset, StudyConfig};
pub use timer::{time_phase, PhaseRecorder, Timed};
