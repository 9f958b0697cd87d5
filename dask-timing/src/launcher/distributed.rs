//! Multi-process cluster: one scheduler process and one process per worker.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::debug;

use super::process::ManagedProcess;
use super::{LaunchError, LaunchSettings};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_ATTEMPT: Duration = Duration::from_secs(1);

/// The scheduler and worker processes of one run.
#[derive(Default)]
pub(super) struct ProcessGroup {
    scheduler: Option<ManagedProcess>,
    workers: Vec<ManagedProcess>,
}

impl ProcessGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the scheduler and wait until it accepts connections.
    ///
    /// The port must be free beforehand, otherwise a connect could reach some
    /// other process and the readiness check would prove nothing. Returns the
    /// scheduler address.
    pub async fn start_scheduler(&mut self, settings: &LaunchSettings) -> Result<String, LaunchError> {
        let cluster = &settings.cluster;
        ensure_port_free(&cluster.scheduler_host, cluster.scheduler_port)?;

        let mut command = command_for(&cluster.scheduler_command, cluster.show_output)?;
        command.args([
            "--host",
            cluster.scheduler_host.as_str(),
            "--port",
            &cluster.scheduler_port.to_string(),
        ]);

        let process = ManagedProcess::spawn("scheduler", &mut command).map_err(|e| {
            LaunchError::ClusterStartupFailure(format!(
                "Failed to spawn scheduler ({}): {}",
                cluster.scheduler_command.join(" "),
                e
            ))
        })?;
        let scheduler = self.scheduler.insert(process);

        wait_until_accepting(
            scheduler,
            &cluster.scheduler_host,
            cluster.scheduler_port,
            settings.timeouts.scheduler_ready(),
        )
        .await?;
        ensure_running(scheduler)?;
        Ok(cluster.scheduler_address())
    }

    /// Spawn one worker process per requested worker.
    pub fn spawn_workers(&mut self, settings: &LaunchSettings, address: &str) -> Result<(), LaunchError> {
        let cluster = &settings.cluster;
        for i in 0..settings.workers {
            let name = format!("worker-{}", i);
            let mut command = command_for(&cluster.worker_command, cluster.show_output)?;
            command.args([
                address,
                "--nthreads",
                &settings.threads.to_string(),
                "--name",
                &name,
            ]);

            let process = ManagedProcess::spawn(name.clone(), &mut command).map_err(|e| {
                LaunchError::ClusterStartupFailure(format!("Failed to spawn {}: {}", name, e))
            })?;
            self.workers.push(process);
        }
        Ok(())
    }

    /// Stop workers first, then the scheduler.
    pub async fn terminate(&mut self, grace: Duration) {
        for worker in &mut self.workers {
            worker.terminate(grace).await;
        }
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.terminate(grace).await;
        }
    }
}

fn command_for(argv: &[String], show_output: bool) -> Result<Command, LaunchError> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        LaunchError::ClusterStartupFailure("empty cluster command".to_string())
    })?;
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());
    if show_output {
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    } else {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }
    Ok(command)
}

fn ensure_port_free(host: &str, port: u16) -> Result<(), LaunchError> {
    // Dropped straight away; only the bind outcome matters.
    std::net::TcpListener::bind((host, port))
        .map(drop)
        .map_err(|e| {
            LaunchError::ClusterStartupFailure(format!(
                "scheduler port {}:{} is already in use: {}",
                host, port, e
            ))
        })
}

fn ensure_running(scheduler: &mut ManagedProcess) -> Result<(), LaunchError> {
    match scheduler.try_exit_status()? {
        Some(status) => Err(LaunchError::ClusterStartupFailure(format!(
            "scheduler exited ({}) during startup",
            status
        ))),
        None => Ok(()),
    }
}

/// Poll the scheduler port until it accepts a connection.
///
/// Fails immediately if the scheduler process exits first.
async fn wait_until_accepting(
    scheduler: &mut ManagedProcess,
    host: &str,
    port: u16,
    limit: Duration,
) -> Result<(), LaunchError> {
    let start = Instant::now();
    let mut last_error: String;

    loop {
        if let Some(status) = scheduler.try_exit_status()? {
            return Err(LaunchError::ClusterStartupFailure(format!(
                "scheduler exited ({}) before accepting connections",
                status
            )));
        }

        match timeout(CONNECT_ATTEMPT, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => {
                // The answer only counts if our scheduler is still alive.
                ensure_running(scheduler)?;
                debug!(
                    "Scheduler accepting connections on {}:{} after {:.3}s",
                    host,
                    port,
                    start.elapsed().as_secs_f64()
                );
                return Ok(());
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = "connection attempt timed out".to_string(),
        }

        if start.elapsed() >= limit {
            return Err(LaunchError::ClusterStartupFailure(format!(
                "scheduler not accepting connections on {}:{} after {}s. Last error: {}",
                host,
                port,
                limit.as_secs(),
                last_error
            )));
        }
        sleep(POLL_INTERVAL).await;
    }
}
