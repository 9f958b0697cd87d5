//! Ownership of spawned cluster processes.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

/// A child process owned by the launcher.
///
/// Each process runs in its own process group so that anything it forks is
/// torn down with it. Dropping the handle kills the whole group.
pub struct ManagedProcess {
    name: String,
    child: Child,
    pid: Option<u32>,
}

impl ManagedProcess {
    /// Spawn `command`, labelled `name` in diagnostics.
    pub fn spawn(name: impl Into<String>, command: &mut Command) -> io::Result<Self> {
        let name = name.into();
        #[cfg(unix)]
        command.process_group(0);
        command.kill_on_drop(true);

        let child = command.spawn()?;
        let pid = child.id();
        debug!("Started {} (pid {:?})", name, pid);
        Ok(Self { name, child, pid })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status if the process has already exited.
    pub fn try_exit_status(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub(crate) fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Ask the process to stop, killing it if it is still running after
    /// `grace`.
    pub async fn terminate(&mut self, grace: Duration) {
        if !matches!(self.child.try_wait(), Ok(None)) {
            self.kill_group();
            return;
        }

        self.request_stop();
        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!("{} exited with {}", self.name, status),
            Ok(Err(e)) => warn!("Failed to wait for {}: {}", self.name, e),
            Err(_) => {
                warn!(
                    "{} did not exit within {:.1}s, killing it",
                    self.name,
                    grace.as_secs_f64()
                );
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
        // Reap anything the process left behind in its group.
        self.kill_group();
    }

    #[cfg(unix)]
    fn request_stop(&mut self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else { return };
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to {} failed: {}", self.name, e);
            let _ = self.child.start_kill();
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) {
        let _ = self.child.start_kill();
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            debug!("Killing {} on drop", self.name);
            let _ = self.child.start_kill();
        }
        self.kill_group();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let result = ManagedProcess::spawn(
            "missing",
            &mut Command::new("/nonexistent/dask-scheduler"),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_try_exit_status_after_exit() {
        let mut process = ManagedProcess::spawn("true", &mut Command::new("true")).unwrap();
        assert!(process.pid().is_some());
        assert_eq!(process.name(), "true");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = process.try_exit_status().unwrap();
        assert!(status.is_some_and(|s| s.success()));
    }

    #[tokio::test]
    async fn test_terminate_stops_sleeping_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let mut process = ManagedProcess::spawn("sleep", &mut cmd).unwrap();

        let start = Instant::now();
        process.terminate(Duration::from_secs(5)).await;

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(process.try_exit_status().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_terminate_kills_after_grace() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "trap '' TERM; sleep 30"]);
        let mut process = ManagedProcess::spawn("stubborn", &mut cmd).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let start = Instant::now();
        process.terminate(Duration::from_millis(200)).await;

        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(process.try_exit_status().unwrap().is_some());
    }
}
