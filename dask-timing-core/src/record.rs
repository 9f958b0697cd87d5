//! Per-run timing records.
//!
//! A [`TimingRecord`] is produced once per cluster lifecycle. Phase durations
//! are stored in a sorted map so that the serialized key order never depends
//! on the order in which phases happened to be inserted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::StatisticsSummary;

/// Metric key for the derived "start of init to first task done" duration.
pub const TOTAL_CLUSTER_READY: &str = "total_cluster_ready";

/// One named, timed step of cluster startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Create the cluster or start the scheduler process.
    ClusterInit,
    /// Connect a client to the scheduler.
    ClientConnect,
    /// Wait until the requested workers are registered.
    WaitForWorkers,
    /// Submit one trivial task and wait for its result.
    FirstTask,
    /// Submit a batch of trivial tasks and gather all results.
    BatchTasks,
}

impl Phase {
    /// All phases, in execution order.
    pub const ALL: [Phase; 5] = [
        Phase::ClusterInit,
        Phase::ClientConnect,
        Phase::WaitForWorkers,
        Phase::FirstTask,
        Phase::BatchTasks,
    ];

    /// The metric key used in records and result files.
    pub fn key(self) -> &'static str {
        match self {
            Phase::ClusterInit => "cluster_init_time",
            Phase::ClientConnect => "client_connect_time",
            Phase::WaitForWorkers => "wait_for_workers_time",
            Phase::FirstTask => "first_task_time",
            Phase::BatchTasks => "batch_tasks_time",
        }
    }

    /// Human readable label for tables.
    pub fn label(self) -> &'static str {
        match self {
            Phase::ClusterInit => "Cluster init",
            Phase::ClientConnect => "Client connect",
            Phase::WaitForWorkers => "Wait for workers",
            Phase::FirstTask => "First task",
            Phase::BatchTasks => "Batch tasks",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Display label for a metric key, falling back to the key itself.
pub fn metric_label(key: &str) -> &str {
    if key == TOTAL_CLUSTER_READY {
        return "Total cluster ready";
    }
    Phase::ALL
        .iter()
        .find(|phase| phase.key() == key)
        .map(|phase| phase.label())
        .unwrap_or(key)
}

/// Sort rank of a metric key: phases in execution order, then the derived
/// total, then anything else.
pub fn metric_rank(key: &str) -> usize {
    if key == TOTAL_CLUSTER_READY {
        return Phase::ALL.len();
    }
    Phase::ALL
        .iter()
        .position(|phase| phase.key() == key)
        .unwrap_or(Phase::ALL.len() + 1)
}

/// Why a run did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Fewer workers than requested registered before the deadline.
    WorkerTimeout,
    /// The scheduler or a worker process could not be launched.
    ClusterStartupFailure,
    /// The client bridge failed or returned an error.
    Bridge,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::WorkerTimeout => "worker timeout",
            FailureKind::ClusterStartupFailure => "cluster startup failure",
            FailureKind::Bridge => "bridge error",
        };
        f.write_str(s)
    }
}

/// Failure marker attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Measurements of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingRecord {
    /// 1-based run index within its run set.
    pub run: u32,
    /// When the run started.
    pub timestamp: DateTime<Utc>,
    /// Metric key to duration in seconds.
    #[serde(flatten)]
    pub timings: BTreeMap<String, f64>,
    pub requested_workers: usize,
    pub threads: usize,
    /// Workers actually registered with the scheduler.
    pub actual_workers: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl TimingRecord {
    /// Whether the run completed every mandatory phase.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Duration of a phase, if it ran.
    pub fn phase(&self, phase: Phase) -> Option<f64> {
        self.timings.get(phase.key()).copied()
    }

    pub fn total_cluster_ready(&self) -> Option<f64> {
        self.timings.get(TOTAL_CLUSTER_READY).copied()
    }
}

/// Records sharing one configuration, in run order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunSet {
    records: Vec<TimingRecord>,
}

impl RunSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed run.
    pub fn push(&mut self, record: TimingRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[TimingRecord] {
        &self.records
    }

    pub fn successful(&self) -> impl Iterator<Item = &TimingRecord> {
        self.records.iter().filter(|r| r.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.successful().count()
    }

    pub fn failure_count(&self) -> usize {
        self.records.len() - self.success_count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Statistics over the successful runs.
    pub fn summary(&self) -> StatisticsSummary {
        StatisticsSummary::from_records(self.successful())
    }
}

impl FromIterator<TimingRecord> for RunSet {
    fn from_iter<I: IntoIterator<Item = TimingRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
