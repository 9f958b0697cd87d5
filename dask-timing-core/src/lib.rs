//! Core types and utilities for dask-timing.
//!
//! This crate holds everything that does not need a running cluster: the
//! timing record model, statistics, the on-disk result format, cross-file
//! analysis and reporting. It also defines the message types spoken with the
//! Python client bridge, so both sides of that protocol live in one place.

pub mod analysis;
pub mod protocol;
pub mod record;
pub mod report;
pub mod stats;
pub mod store;

// Re-export main types for convenience
pub use analysis::{Analysis, ConfigComparison, ConfigGroup, ConfigKey};
pub use protocol::{BridgeRequest, BridgeResponse, SchedulerInfo, WorkerInfo};
pub use record::{FailureKind, Phase, RunFailure, RunSet, TimingRecord, TOTAL_CLUSTER_READY};
pub use report::{AnalysisReport, JsonReporter, ReportError, Reporter, TerminalReporter};
pub use stats::{MetricStats, Side, StatisticalTest, StatisticsSummary, TestResult, WelchTTest};
pub use store::{ClusterDetails, Parameters, ResultFile, StoreError};
