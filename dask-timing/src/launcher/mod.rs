//! Cluster launching and phase timing.
//!
//! A [`ClusterLauncher`] brings up one cluster per call, walks it through
//! the fixed startup phases and always tears it down again. The bridge is
//! started and pinged before the run clock starts, so interpreter startup is
//! never part of any phase.

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use dask_timing_core::{ClusterDetails, FailureKind, Phase, RunFailure, TimingRecord};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::{ClusterSettings, StudyKind, TimeoutConfig};
use crate::timer::{time_phase, PhaseRecorder};

mod bridge;
mod distributed;
mod local;
mod process;

pub use bridge::{ClientBridge, BRIDGE_SCRIPT};
pub use process::ManagedProcess;

use distributed::ProcessGroup;

/// Tasks used by the inspection pass when no batch size is configured.
const DEFAULT_INSPECTION_TASKS: usize = 100;

/// Errors that end a single run.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Fewer workers than requested registered before the deadline.
    #[error("Only {registered} of {requested} workers registered within {timeout_secs}s")]
    WorkerTimeout {
        requested: usize,
        registered: usize,
        timeout_secs: f64,
    },

    /// The scheduler or a worker process could not be started.
    #[error("Cluster startup failed: {0}")]
    ClusterStartupFailure(String),

    /// The client bridge failed or reported an error.
    #[error("Client bridge error: {0}")]
    Bridge(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    /// The failure marker recorded for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            LaunchError::WorkerTimeout { .. } => FailureKind::WorkerTimeout,
            LaunchError::ClusterStartupFailure(_) => FailureKind::ClusterStartupFailure,
            LaunchError::Bridge(_) | LaunchError::Io(_) => FailureKind::Bridge,
        }
    }
}

/// Everything needed to start one cluster.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub kind: StudyKind,
    pub workers: usize,
    pub threads: usize,
    /// Size of the batch phase; 0 skips it.
    pub batch_tasks: usize,
    pub cluster: ClusterSettings,
    pub timeouts: TimeoutConfig,
}

/// Something that can bring up a cluster and time it.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Run one full cluster lifecycle and report what happened.
    ///
    /// Never fails: failures are recorded on the returned record.
    async fn launch(&self, run: u32) -> TimingRecord;

    /// Start one more cluster and collect scheduler, worker and throughput
    /// details.
    async fn inspect(&self) -> Result<ClusterDetails, LaunchError>;
}

/// The live pieces of one cluster.
struct Session {
    kind: StudyKind,
    bridge: ClientBridge,
    processes: ProcessGroup,
}

impl Session {
    async fn open(settings: &LaunchSettings) -> Result<Self, LaunchError> {
        let bridge = ClientBridge::spawn(
            &settings.cluster.python_command,
            settings.cluster.show_output,
            settings.timeouts.bridge_startup(),
            settings.timeouts.request(),
        )
        .await?;
        Ok(Self {
            kind: settings.kind,
            bridge,
            processes: ProcessGroup::new(),
        })
    }

    /// Create the cluster object or scheduler; returns the scheduler address.
    async fn init(&mut self, settings: &LaunchSettings) -> Result<String, LaunchError> {
        match self.kind {
            StudyKind::Local => local::start(&mut self.bridge, settings).await,
            StudyKind::Distributed => self.processes.start_scheduler(settings).await,
        }
    }

    async fn connect(&mut self, address: &str, settings: &LaunchSettings) -> Result<(), LaunchError> {
        self.bridge
            .connect(address, settings.timeouts.request())
            .await
    }

    /// Bring up the workers; returns how many registered.
    async fn add_workers(&mut self, address: &str, settings: &LaunchSettings) -> Result<usize, LaunchError> {
        match self.kind {
            StudyKind::Local => local::add_workers(&mut self.bridge, settings).await,
            StudyKind::Distributed => {
                self.processes.spawn_workers(settings, address)?;
                self.bridge
                    .wait_for_workers(settings.workers, settings.timeouts.worker_ready())
                    .await
            }
        }
    }

    /// Close the client, then stop workers and scheduler.
    async fn shutdown(mut self, settings: &LaunchSettings) {
        let grace = settings.timeouts.shutdown_grace();
        self.bridge.close(grace).await;
        self.processes.terminate(grace).await;
        debug!("Cluster torn down");
    }
}

/// Launches real clusters through the client bridge.
pub struct ClusterLauncher {
    settings: LaunchSettings,
}

impl ClusterLauncher {
    pub fn new(settings: LaunchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    /// Phases 1 to 5. `registered` tracks the realized worker count.
    async fn run_phases(
        &self,
        session: &mut Session,
        recorder: &mut PhaseRecorder,
        registered: &mut usize,
    ) -> Result<(), LaunchError> {
        let settings = &self.settings;

        let address = recorder
            .record(Phase::ClusterInit, session.init(settings))
            .await?;
        recorder
            .record(Phase::ClientConnect, session.connect(&address, settings))
            .await?;
        *registered = recorder
            .record(Phase::WaitForWorkers, session.add_workers(&address, settings))
            .await?;
        recorder
            .record(Phase::FirstTask, session.bridge.submit())
            .await?;
        recorder.mark_ready();

        if settings.batch_tasks > 0 {
            recorder
                .record(Phase::BatchTasks, session.bridge.batch(settings.batch_tasks))
                .await?;
        }
        Ok(())
    }

    async fn inspect_session(&self, session: &mut Session) -> Result<ClusterDetails, LaunchError> {
        let settings = &self.settings;
        let start = Instant::now();
        let address = session.init(settings).await?;
        session.connect(&address, settings).await?;
        session.add_workers(&address, settings).await?;
        let setup_time = start.elapsed().as_secs_f64();

        let info = session.bridge.info().await?;

        let tasks = if settings.batch_tasks > 0 {
            settings.batch_tasks
        } else {
            DEFAULT_INSPECTION_TASKS
        };
        let timed = time_phase(Phase::BatchTasks, session.bridge.batch(tasks)).await;
        timed.outcome?;
        let task_execution_time = timed.elapsed.as_secs_f64();

        Ok(ClusterDetails {
            setup_time,
            scheduler_id: info.id,
            scheduler_address: info.address,
            workers: info.workers,
            tasks,
            task_execution_time,
            tasks_per_second: if task_execution_time > 0.0 {
                tasks as f64 / task_execution_time
            } else {
                0.0
            },
        })
    }
}

#[async_trait]
impl Launcher for ClusterLauncher {
    async fn launch(&self, run: u32) -> TimingRecord {
        let settings = &self.settings;
        let timestamp = Utc::now();
        let mut registered = 0;

        let (timings, result) = match Session::open(settings).await {
            Ok(mut session) => {
                let mut recorder = PhaseRecorder::start();
                let result = self
                    .run_phases(&mut session, &mut recorder, &mut registered)
                    .await;
                if let Err(e) = &result {
                    error!("Run {} failed: {}", run, e);
                }
                session.shutdown(settings).await;
                (recorder.into_timings(), result)
            }
            Err(e) => {
                error!("Run {} failed before the cluster started: {}", run, e);
                (Default::default(), Err(e))
            }
        };

        let failure = match result {
            Ok(()) => {
                info!("Run {} complete: {}/{} workers", run, registered, settings.workers);
                None
            }
            Err(e) => {
                if let LaunchError::WorkerTimeout { registered: n, .. } = &e {
                    registered = *n;
                }
                Some(RunFailure {
                    kind: e.kind(),
                    message: e.to_string(),
                })
            }
        };

        TimingRecord {
            run,
            timestamp,
            timings,
            requested_workers: settings.workers,
            threads: settings.threads,
            actual_workers: registered,
            failure,
        }
    }

    async fn inspect(&self) -> Result<ClusterDetails, LaunchError> {
        let mut session = Session::open(&self.settings).await?;
        let result = self.inspect_session(&mut session).await;
        if let Err(e) = &result {
            error!("Inspection failed: {}", e);
        }
        session.shutdown(&self.settings).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        let err = LaunchError::WorkerTimeout {
            requested: 4,
            registered: 3,
            timeout_secs: 60.0,
        };
        assert_eq!(err.kind(), FailureKind::WorkerTimeout);
        assert_eq!(
            err.to_string(),
            "Only 3 of 4 workers registered within 60s"
        );

        let err = LaunchError::ClusterStartupFailure("scheduler exited".to_string());
        assert_eq!(err.kind(), FailureKind::ClusterStartupFailure);
        assert_eq!(err.to_string(), "Cluster startup failed: scheduler exited");

        let err = LaunchError::Bridge("no response".to_string());
        assert_eq!(err.kind(), FailureKind::Bridge);

        let err = LaunchError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"));
        assert_eq!(err.kind(), FailureKind::Bridge);
    }

    #[tokio::test]
    async fn test_launch_without_interpreter_records_bridge_failure() {
        let mut cluster = ClusterSettings::default();
        cluster.python_command = vec!["/nonexistent/python3".to_string()];
        let launcher = ClusterLauncher::new(LaunchSettings {
            kind: StudyKind::Local,
            workers: 2,
            threads: 1,
            batch_tasks: 0,
            cluster,
            timeouts: TimeoutConfig::default(),
        });

        let record = launcher.launch(1).await;

        assert_eq!(record.run, 1);
        assert!(!record.is_success());
        assert_eq!(record.failure.unwrap().kind, FailureKind::Bridge);
        assert!(record.timings.is_empty());
        assert_eq!(record.actual_workers, 0);
        assert_eq!(record.requested_workers, 2);
    }
}
