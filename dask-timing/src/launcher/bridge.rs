//! Supervised Python process that runs cluster client calls.
//!
//! The bridge speaks line-delimited JSON (see [`dask_timing_core::protocol`])
//! on its stdin and stdout. At startup the script moves the response pipe to a
//! private descriptor and points fd 1 at stderr, so nothing the cluster
//! library or its worker subprocesses print can be mistaken for a response.

use std::process::Stdio;
use std::time::Duration;

use dask_timing_core::{BridgeRequest, BridgeResponse, SchedulerInfo};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::process::ManagedProcess;
use super::LaunchError;

/// Extra time granted on top of the worker timeout before the bridge itself
/// is considered unresponsive.
const WAIT_SLACK: Duration = Duration::from_secs(10);

/// Python program run by the bridge interpreter.
pub const BRIDGE_SCRIPT: &str = r#"
import asyncio
import json
import os
import sys

# os.dup returns a non-inheritable descriptor, so spawned workers never see it.
_responses = os.fdopen(os.dup(1), "w")
os.dup2(2, 1)
sys.stdout = sys.stderr

try:
    from dask.distributed import Client, LocalCluster
    IMPORT_ERROR = None
except Exception as exc:
    IMPORT_ERROR = "%s: %s" % (type(exc).__name__, exc)


def reply(**fields):
    _responses.write(json.dumps(fields) + "\n")
    _responses.flush()


def add_one(x):
    return x + 1


def double(x):
    return x * 2


class Bridge:
    def __init__(self):
        self.cluster = None
        self.client = None

    def worker_count(self):
        if self.client is None:
            return 0
        try:
            return len(self.client.nthreads())
        except Exception:
            return 0

    def scheduler_info(self):
        try:
            info = self.client.scheduler_info(n_workers=-1)
        except TypeError:
            info = self.client.scheduler_info()
        workers = []
        for address, worker in info.get("workers", {}).items():
            workers.append({
                "address": address,
                "name": str(worker.get("name", address)),
                "nthreads": int(worker.get("nthreads") or 0),
                "memory_limit": int(worker.get("memory_limit") or 0),
            })
        return {
            "id": str(info.get("id", "")),
            "address": str(info.get("address", "")),
            "workers": workers,
        }

    def shutdown(self):
        if self.client is not None:
            try:
                self.client.close()
            except Exception:
                pass
            self.client = None
        if self.cluster is not None:
            try:
                self.cluster.close()
            except Exception:
                pass
            self.cluster = None

    def handle(self, request):
        op = request.get("op")
        if op == "ping":
            if IMPORT_ERROR is not None:
                return reply(ok=False, error=IMPORT_ERROR)
            return reply(ok=True)
        if op == "start_local":
            self.cluster = LocalCluster(
                n_workers=0,
                threads_per_worker=request["threads"],
                processes=True,
                dashboard_address=None,
            )
            return reply(ok=True, address=self.cluster.scheduler_address)
        if op == "scale":
            self.cluster.scale(request["workers"])
            return reply(ok=True)
        if op == "connect":
            address = request["address"]
            if self.cluster is not None and address == self.cluster.scheduler_address:
                self.client = Client(self.cluster)
            else:
                self.client = Client(address, timeout=request["timeout_secs"])
            return reply(ok=True)
        if op == "wait_for_workers":
            try:
                self.client.wait_for_workers(
                    n_workers=request["workers"], timeout=request["timeout_secs"]
                )
            except (TimeoutError, asyncio.TimeoutError) as exc:
                return reply(
                    ok=False,
                    error="timeout: %s" % exc,
                    workers=self.worker_count(),
                )
            return reply(ok=True, workers=self.worker_count())
        if op == "submit":
            future = self.client.submit(add_one, 1, pure=False)
            return reply(ok=True, value=future.result())
        if op == "batch":
            futures = self.client.map(double, range(request["tasks"]), pure=False)
            self.client.gather(futures)
            return reply(ok=True)
        if op == "info":
            return reply(ok=True, info=self.scheduler_info())
        if op == "close":
            self.shutdown()
            return reply(ok=True)
        return reply(ok=False, error="unknown op: %r" % (op,))


def main():
    bridge = Bridge()
    for line in sys.stdin:
        line = line.strip()
        if not line:
            continue
        try:
            request = json.loads(line)
        except ValueError as exc:
            reply(ok=False, error="invalid request: %s" % exc)
            continue
        try:
            bridge.handle(request)
        except Exception as exc:
            reply(ok=False, error="%s: %s" % (type(exc).__name__, exc))
        if request.get("op") == "close":
            return
    bridge.shutdown()


if __name__ == "__main__":
    main()
"#;

/// Handle to a running bridge interpreter.
pub struct ClientBridge {
    process: ManagedProcess,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    request_timeout: Duration,
}

impl ClientBridge {
    /// Start the bridge with `python_command` and wait until it answers a ping.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Bridge`] if the interpreter cannot be started,
    /// the cluster library cannot be imported, or no answer arrives within
    /// `startup_timeout`.
    pub async fn spawn(
        python_command: &[String],
        show_output: bool,
        startup_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, LaunchError> {
        let (program, args) = python_command
            .split_first()
            .ok_or_else(|| LaunchError::Bridge("python_command is empty".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .args(["-u", "-c", BRIDGE_SCRIPT])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if show_output {
                Stdio::inherit()
            } else {
                Stdio::null()
            });

        let mut process = ManagedProcess::spawn("client bridge", &mut command).map_err(|e| {
            LaunchError::Bridge(format!("Failed to start {}: {}", program, e))
        })?;

        let child = process.child_mut();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LaunchError::Bridge("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LaunchError::Bridge("bridge stdout unavailable".to_string()))?;

        let mut bridge = Self {
            process,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            request_timeout,
        };

        let response = bridge.call(&BridgeRequest::Ping, startup_timeout).await?;
        Self::check(&BridgeRequest::Ping, response)?;
        debug!("Client bridge ready");
        Ok(bridge)
    }

    /// Send one request and read one response, bounded by `limit`.
    async fn call(
        &mut self,
        request: &BridgeRequest,
        limit: Duration,
    ) -> Result<BridgeResponse, LaunchError> {
        let op = request.op();
        let mut line = serde_json::to_string(request)
            .map_err(|e| LaunchError::Bridge(format!("Failed to encode {}: {}", op, e)))?;
        line.push('\n');

        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let reply = match timeout(limit, self.stdout.next_line()).await {
            Ok(Ok(Some(reply))) => reply,
            Ok(Ok(None)) => {
                let status = self.process.try_exit_status().ok().flatten();
                return Err(LaunchError::Bridge(match status {
                    Some(status) => format!("bridge exited ({}) during {}", status, op),
                    None => format!("bridge closed its output during {}", op),
                }));
            }
            Ok(Err(e)) => return Err(LaunchError::Io(e)),
            Err(_) => {
                return Err(LaunchError::Bridge(format!(
                    "no response to {} after {:.1}s",
                    op,
                    limit.as_secs_f64()
                )))
            }
        };

        serde_json::from_str(&reply).map_err(|e| {
            LaunchError::Bridge(format!("invalid response to {}: {} ({})", op, e, reply))
        })
    }

    fn check(request: &BridgeRequest, response: BridgeResponse) -> Result<BridgeResponse, LaunchError> {
        if response.ok {
            Ok(response)
        } else {
            Err(LaunchError::Bridge(format!(
                "{} failed: {}",
                request.op(),
                response.error.as_deref().unwrap_or("unknown error")
            )))
        }
    }

    /// Send a request with the default timeout and fail on an error response.
    async fn request(&mut self, request: BridgeRequest) -> Result<BridgeResponse, LaunchError> {
        let response = self.call(&request, self.request_timeout).await?;
        Self::check(&request, response)
    }

    /// Create a local cluster with no workers; returns the scheduler address.
    pub async fn start_local(&mut self, threads: usize) -> Result<String, LaunchError> {
        let response = self.request(BridgeRequest::StartLocal { threads }).await?;
        response
            .address
            .ok_or_else(|| LaunchError::Bridge("start_local returned no address".to_string()))
    }

    pub async fn scale(&mut self, workers: usize) -> Result<(), LaunchError> {
        self.request(BridgeRequest::Scale { workers }).await?;
        Ok(())
    }

    pub async fn connect(&mut self, address: &str, limit: Duration) -> Result<(), LaunchError> {
        self.request(BridgeRequest::Connect {
            address: address.to_string(),
            timeout_secs: limit.as_secs_f64(),
        })
        .await?;
        Ok(())
    }

    /// Block until `workers` are registered; returns the registered count.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::WorkerTimeout`] with the count that did register
    /// when the deadline passes.
    pub async fn wait_for_workers(
        &mut self,
        workers: usize,
        limit: Duration,
    ) -> Result<usize, LaunchError> {
        let request = BridgeRequest::WaitForWorkers {
            workers,
            timeout_secs: limit.as_secs_f64(),
        };
        let response = self.call(&request, limit + WAIT_SLACK).await?;

        match response {
            BridgeResponse {
                ok: false,
                workers: Some(registered),
                ..
            } => Err(LaunchError::WorkerTimeout {
                requested: workers,
                registered,
                timeout_secs: limit.as_secs_f64(),
            }),
            response => {
                let response = Self::check(&request, response)?;
                Ok(response.workers.unwrap_or(workers))
            }
        }
    }

    /// Run one trivial task to completion.
    pub async fn submit(&mut self) -> Result<(), LaunchError> {
        let response = self.request(BridgeRequest::Submit).await?;
        match response.value {
            Some(2) => Ok(()),
            other => Err(LaunchError::Bridge(format!(
                "first task returned {:?}, expected 2",
                other
            ))),
        }
    }

    /// Run `tasks` trivial tasks and gather every result.
    pub async fn batch(&mut self, tasks: usize) -> Result<(), LaunchError> {
        self.request(BridgeRequest::Batch { tasks }).await?;
        Ok(())
    }

    pub async fn info(&mut self) -> Result<SchedulerInfo, LaunchError> {
        let response = self.request(BridgeRequest::Info).await?;
        response
            .info
            .ok_or_else(|| LaunchError::Bridge("info returned no scheduler data".to_string()))
    }

    /// Close the client and any local cluster, then stop the interpreter.
    pub async fn close(mut self, grace: Duration) {
        if let Err(e) = self.call(&BridgeRequest::Close, grace).await {
            warn!("Client bridge did not close cleanly: {}", e);
        }
        self.process.terminate(grace).await;
    }
}
