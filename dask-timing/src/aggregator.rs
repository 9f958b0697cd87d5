//! Repeated runs of one configuration.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dask_timing_core::{ResultFile, RunSet};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::error::SessionError;
use crate::launcher::Launcher;
use crate::preset::StudyConfig;

/// Fires when the user asks the session to stop.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<Notify>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// An interrupt triggered by Ctrl-C, and on unix also by SIGTERM or SIGHUP.
    ///
    /// Must be called within a tokio runtime. Handlers are installed before
    /// this returns.
    pub fn on_signals() -> Self {
        let interrupt = Self::new();
        let notify = Arc::clone(&interrupt.0);
        let stop = stop_requested();
        tokio::spawn(async move {
            stop.await;
            notify.notify_one();
        });
        interrupt
    }

    pub fn trigger(&self) {
        self.0.notify_one();
    }

    async fn triggered(&self) {
        self.0.notified().await;
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
fn stop_requested() -> impl std::future::Future<Output = ()> + Send + 'static {
    use tokio::signal::unix::{signal, SignalKind};

    let terminate = signal(SignalKind::terminate());
    let hangup = signal(SignalKind::hangup());
    async move {
        match (terminate, hangup) {
            (Ok(mut terminate), Ok(mut hangup)) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = terminate.recv() => info!("Received SIGTERM"),
                    _ = hangup.recv() => info!("Received SIGHUP"),
                }
            }
            (terminate, hangup) => {
                if let Some(e) = terminate.err().or(hangup.err()) {
                    warn!("Cannot listen for SIGTERM/SIGHUP: {}", e);
                }
                ctrl_c().await
            }
        }
    }
}

#[cfg(not(unix))]
fn stop_requested() -> impl std::future::Future<Output = ()> + Send + 'static {
    ctrl_c()
}

/// Runs a launcher a fixed number of times, one run at a time.
pub struct Aggregator<'a> {
    launcher: &'a dyn Launcher,
    runs: u32,
    abort_on_failure: bool,
    run_interval: Duration,
    interrupt: Interrupt,
}

impl<'a> Aggregator<'a> {
    pub fn new(launcher: &'a dyn Launcher, runs: u32) -> Self {
        Self {
            launcher,
            runs,
            abort_on_failure: false,
            run_interval: Duration::from_secs(1),
            interrupt: Interrupt::new(),
        }
    }

    /// Stop at the first failed run instead of recording it and moving on.
    pub fn abort_on_failure(mut self, abort: bool) -> Self {
        self.abort_on_failure = abort;
        self
    }

    /// Pause between consecutive runs.
    pub fn run_interval(mut self, interval: Duration) -> Self {
        self.run_interval = interval;
        self
    }

    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Execute all runs.
    ///
    /// # Errors
    ///
    /// [`SessionError::Interrupted`] if interrupted (the in-flight cluster is
    /// torn down first), [`SessionError::InsufficientRuns`] if no run
    /// succeeded.
    pub async fn run(&self) -> Result<RunSet, SessionError> {
        let mut runs = RunSet::new();

        for run in 1..=self.runs {
            if run > 1 && !self.run_interval.is_zero() {
                tokio::select! {
                    _ = sleep(self.run_interval) => {}
                    _ = self.interrupt.triggered() => {
                        error!("Interrupted between runs");
                        return Err(SessionError::Interrupted);
                    }
                }
            }

            info!("Run {}/{}", run, self.runs);
            let launch = self.launcher.launch(run);
            tokio::pin!(launch);
            let record = tokio::select! {
                record = &mut launch => record,
                _ = self.interrupt.triggered() => {
                    error!("Interrupted during run {}, tearing down the cluster", run);
                    return Err(SessionError::Interrupted);
                }
            };

            let failed = !record.is_success();
            runs.push(record);
            if failed && self.abort_on_failure {
                warn!("Stopping after failed run {} (abort on failure)", run);
                break;
            }
        }

        if runs.success_count() == 0 {
            return Err(SessionError::InsufficientRuns {
                attempted: runs.len(),
            });
        }
        info!(
            "{} of {} runs succeeded",
            runs.success_count(),
            runs.len()
        );
        Ok(runs)
    }
}

/// Run one study end to end and assemble its result file.
///
/// The inspection pass runs after the timed runs when the study asks for it.
/// Its failure is logged and leaves the result without details.
pub async fn run_study(
    study: &StudyConfig,
    launcher: &dyn Launcher,
    timestamp: DateTime<Utc>,
    interrupt: &Interrupt,
) -> Result<ResultFile, SessionError> {
    info!(
        "Timing {} cluster: {} worker(s) x {} thread(s), {} run(s)",
        study.kind, study.workers, study.threads, study.runs
    );

    let runs = Aggregator::new(launcher, study.runs)
        .abort_on_failure(study.abort_on_failure)
        .run_interval(study.run_interval)
        .interrupt(interrupt.clone())
        .run()
        .await?;

    let detailed = if study.detailed {
        info!("Collecting detailed cluster information");
        let inspect = launcher.inspect();
        tokio::pin!(inspect);
        tokio::select! {
            outcome = &mut inspect => match outcome {
                Ok(details) => Some(details),
                Err(e) => {
                    warn!("Detailed inspection failed: {}", e);
                    None
                }
            },
            _ = interrupt.triggered() => {
                error!("Interrupted during inspection, tearing down the cluster");
                return Err(SessionError::Interrupted);
            }
        }
    } else {
        None
    };

    Ok(ResultFile::new(timestamp, study.parameters(), runs, detailed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::launcher::LaunchError;
    use crate::preset::Preset;
    use async_trait::async_trait;
    use dask_timing_core::{
        ClusterDetails, FailureKind, Phase, RunFailure, TimingRecord, TOTAL_CLUSTER_READY,
    };
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Replays a fixed script of outcomes: `Some(ready)` succeeds, `None` fails.
    struct ScriptedLauncher {
        script: Vec<Option<f64>>,
        calls: Mutex<Vec<u32>>,
        inspect_ok: bool,
        hang: bool,
    }

    impl ScriptedLauncher {
        fn new(script: Vec<Option<f64>>) -> Self {
            Self {
                script,
                calls: Mutex::new(Vec::new()),
                inspect_ok: true,
                hang: false,
            }
        }

        fn calls(&self) -> Vec<u32> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Launcher for ScriptedLauncher {
        async fn launch(&self, run: u32) -> TimingRecord {
            self.calls.lock().unwrap().push(run);
            if self.hang {
                std::future::pending::<()>().await;
            }
            let outcome = self.script[(run - 1) as usize];
            let mut timings = BTreeMap::new();
            timings.insert(Phase::ClusterInit.key().to_string(), 0.5);
            let failure = match outcome {
                Some(ready) => {
                    timings.insert(TOTAL_CLUSTER_READY.to_string(), ready);
                    None
                }
                None => Some(RunFailure {
                    kind: FailureKind::WorkerTimeout,
                    message: "Only 1 of 2 workers registered within 60s".to_string(),
                }),
            };
            TimingRecord {
                run,
                timestamp: Utc::now(),
                timings,
                requested_workers: 2,
                threads: 1,
                actual_workers: if failure.is_some() { 1 } else { 2 },
                failure,
            }
        }

        async fn inspect(&self) -> Result<ClusterDetails, LaunchError> {
            if !self.inspect_ok {
                return Err(LaunchError::Bridge("info failed".to_string()));
            }
            Ok(ClusterDetails {
                setup_time: 3.0,
                scheduler_id: "Scheduler-test".to_string(),
                scheduler_address: "tcp://127.0.0.1:8786".to_string(),
                workers: Vec::new(),
                tasks: 100,
                task_execution_time: 0.5,
                tasks_per_second: 200.0,
            })
        }
    }

    fn aggregator(launcher: &ScriptedLauncher, runs: u32) -> Aggregator<'_> {
        Aggregator::new(launcher, runs).run_interval(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_all_runs_succeed() {
        let launcher = ScriptedLauncher::new(vec![Some(3.70), Some(3.75), Some(3.85)]);
        let runs = aggregator(&launcher, 3).run().await.unwrap();

        assert_eq!(runs.len(), 3);
        assert_eq!(launcher.calls(), vec![1, 2, 3]);
        let ready = runs.summary();
        let ready = ready.get(TOTAL_CLUSTER_READY).unwrap();
        assert!((ready.mean - 3.766_666_7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_failed_run_recorded_and_skipped() {
        let launcher = ScriptedLauncher::new(vec![Some(3.0), None, Some(4.0)]);
        let runs = aggregator(&launcher, 3).run().await.unwrap();

        assert_eq!(runs.len(), 3);
        assert_eq!(runs.success_count(), 2);
        assert_eq!(runs.records()[1].actual_workers, 1);
        assert_eq!(runs.summary().get(TOTAL_CLUSTER_READY).unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_abort_on_failure_stops_early() {
        let launcher = ScriptedLauncher::new(vec![Some(3.0), None, Some(4.0)]);
        let runs = aggregator(&launcher, 3)
            .abort_on_failure(true)
            .run()
            .await
            .unwrap();

        assert_eq!(launcher.calls(), vec![1, 2]);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs.success_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_successes_is_insufficient() {
        let launcher = ScriptedLauncher::new(vec![None, None]);
        let err = aggregator(&launcher, 2).run().await.unwrap_err();

        assert!(matches!(err, SessionError::InsufficientRuns { attempted: 2 }));
    }

    #[tokio::test]
    async fn test_interrupt_during_run() {
        let mut launcher = ScriptedLauncher::new(vec![Some(1.0)]);
        launcher.hang = true;
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let err = aggregator(&launcher, 1)
            .interrupt(interrupt)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Interrupted));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hangup_interrupts_run() {
        use nix::sys::signal::{raise, Signal};

        let mut launcher = ScriptedLauncher::new(vec![Some(1.0)]);
        launcher.hang = true;
        let interrupt = Interrupt::on_signals();
        raise(Signal::SIGHUP).unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            aggregator(&launcher, 1).interrupt(interrupt).run(),
        )
        .await
        .expect("SIGHUP should stop the session");
        assert!(matches!(outcome, Err(SessionError::Interrupted)));
    }

    #[tokio::test]
    async fn test_run_study_with_details() {
        let mut config = Config::default();
        config.study.workers = 2;
        config.study.runs = 2;
        config.study.detailed = true;
        config.study.run_interval_ms = 0;
        let study = Preset::Custom.build(&config, None, Utc::now()).unwrap().remove(0);
        let launcher = ScriptedLauncher::new(vec![Some(3.0), Some(3.2)]);

        let result = run_study(&study, &launcher, Utc::now(), &Interrupt::new())
            .await
            .unwrap();

        assert_eq!(result.parameters.workers, 2);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.detailed.unwrap().tasks_per_second, 200.0);
        assert_eq!(result.statistics.get(TOTAL_CLUSTER_READY).unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_run_study_inspection_failure_is_not_fatal() {
        let mut config = Config::default();
        config.study.runs = 1;
        config.study.detailed = true;
        let study = Preset::Custom.build(&config, None, Utc::now()).unwrap().remove(0);
        let mut launcher = ScriptedLauncher::new(vec![Some(3.0)]);
        launcher.inspect_ok = false;

        let result = run_study(&study, &launcher, Utc::now(), &Interrupt::new())
            .await
            .unwrap();

        assert!(result.detailed.is_none());
        assert_eq!(result.results.success_count(), 1);
    }
}
