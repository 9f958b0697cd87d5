//! Wall-clock timing of startup phases.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use dask_timing_core::{Phase, TOTAL_CLUSTER_READY};
use tracing::debug;

/// The outcome of a timed phase together with how long it took.
#[derive(Debug)]
pub struct Timed<T> {
    pub phase: Phase,
    pub elapsed: Duration,
    pub outcome: T,
}

/// Await `work` and measure the wall-clock time it takes.
///
/// The elapsed time is reported whether or not the work succeeded.
pub async fn time_phase<F>(phase: Phase, work: F) -> Timed<F::Output>
where
    F: Future,
{
    let start = Instant::now();
    let outcome = work.await;
    Timed {
        phase,
        elapsed: start.elapsed(),
        outcome,
    }
}

/// Collects the phase durations of a single run.
///
/// Phases that never started get no entry. The derived readiness metric is
/// only added by [`PhaseRecorder::mark_ready`].
#[derive(Debug)]
pub struct PhaseRecorder {
    started: Instant,
    timings: BTreeMap<String, f64>,
}

impl PhaseRecorder {
    /// Start the run clock.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            timings: BTreeMap::new(),
        }
    }

    /// Time `work` as `phase`, keeping the duration even if it fails.
    pub async fn record<F, T, E>(&mut self, phase: Phase, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let timed = time_phase(phase, work).await;
        let secs = timed.elapsed.as_secs_f64();
        debug!(
            "{} took {:.4}s{}",
            phase,
            secs,
            if timed.outcome.is_err() { " (failed)" } else { "" }
        );
        self.timings.insert(phase.key().to_string(), secs);
        timed.outcome
    }

    /// Record the time from the start of the run until now as the total
    /// time to a usable cluster.
    pub fn mark_ready(&mut self) {
        self.timings.insert(
            TOTAL_CLUSTER_READY.to_string(),
            self.started.elapsed().as_secs_f64(),
        );
    }

    pub fn timings(&self) -> &BTreeMap<String, f64> {
        &self.timings
    }

    pub fn into_timings(self) -> BTreeMap<String, f64> {
        self.timings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_time_phase_measures_elapsed() {
        let timed = time_phase(Phase::FirstTask, async {
            sleep(Duration::from_millis(20)).await;
            42
        })
        .await;

        assert_eq!(timed.phase, Phase::FirstTask);
        assert_eq!(timed.outcome, 42);
        assert!(timed.elapsed >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_failed_phase_still_timed() {
        let mut recorder = PhaseRecorder::start();
        let result: Result<(), &str> = recorder
            .record(Phase::WaitForWorkers, async {
                sleep(Duration::from_millis(10)).await;
                Err("timeout")
            })
            .await;

        assert_eq!(result, Err("timeout"));
        let secs = recorder.timings()[Phase::WaitForWorkers.key()];
        assert!(secs >= 0.010);
        assert!(!recorder.timings().contains_key(TOTAL_CLUSTER_READY));
    }

    #[tokio::test]
    async fn test_unstarted_phases_have_no_entry() {
        let mut recorder = PhaseRecorder::start();
        let _: Result<(), ()> = recorder.record(Phase::ClusterInit, async { Ok(()) }).await;
        let _: Result<(), ()> = recorder.record(Phase::ClientConnect, async { Err(()) }).await;

        let timings = recorder.into_timings();
        assert_eq!(timings.len(), 2);
        assert!(!timings.contains_key(Phase::WaitForWorkers.key()));
        assert!(!timings.contains_key(Phase::FirstTask.key()));
    }

    #[tokio::test]
    async fn test_ready_covers_all_phases() {
        let mut recorder = PhaseRecorder::start();
        for phase in [Phase::ClusterInit, Phase::ClientConnect, Phase::FirstTask] {
            let _: Result<(), ()> = recorder
                .record(phase, async {
                    sleep(Duration::from_millis(5)).await;
                    Ok(())
                })
                .await;
        }
        recorder.mark_ready();

        let timings = recorder.into_timings();
        let sum: f64 = [Phase::ClusterInit, Phase::ClientConnect, Phase::FirstTask]
            .iter()
            .map(|p| timings[p.key()])
            .sum();
        assert!(timings[TOTAL_CLUSTER_READY] >= sum);
    }
}
