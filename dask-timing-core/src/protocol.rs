//! Messages exchanged with the Python client bridge.
//!
//! The bridge reads one JSON request per line on stdin and answers with one
//! JSON response per line on stdout.

use serde::{Deserialize, Serialize};

/// A request sent to the client bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeRequest {
    /// Liveness check; answered once the cluster library is imported.
    Ping,
    /// Create an in-process local cluster with no workers.
    StartLocal { threads: usize },
    /// Scale the local cluster to the given worker count.
    Scale { workers: usize },
    /// Connect a client to a scheduler address.
    Connect { address: String, timeout_secs: f64 },
    /// Block until `workers` are registered or the timeout passes.
    WaitForWorkers { workers: usize, timeout_secs: f64 },
    /// Submit one trivial task and wait for it.
    Submit,
    /// Map a trivial function over `tasks` inputs and gather the results.
    Batch { tasks: usize },
    /// Fetch scheduler and worker metadata.
    Info,
    /// Close the client and any local cluster, then exit.
    Close,
}

impl BridgeRequest {
    /// Short name used in diagnostics.
    pub fn op(&self) -> &'static str {
        match self {
            BridgeRequest::Ping => "ping",
            BridgeRequest::StartLocal { .. } => "start_local",
            BridgeRequest::Scale { .. } => "scale",
            BridgeRequest::Connect { .. } => "connect",
            BridgeRequest::WaitForWorkers { .. } => "wait_for_workers",
            BridgeRequest::Submit => "submit",
            BridgeRequest::Batch { .. } => "batch",
            BridgeRequest::Info => "info",
            BridgeRequest::Close => "close",
        }
    }
}

/// Metadata for one registered worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub address: String,
    pub name: String,
    pub nthreads: usize,
    /// Memory limit in bytes (0 when unlimited).
    #[serde(default)]
    pub memory_limit: u64,
}

/// Scheduler metadata as reported by the cluster library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerInfo {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub workers: Vec<WorkerInfo>,
}

/// A response from the client bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Scheduler address (from `start_local`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Registered worker count (from `wait_for_workers`, also on timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Task result (from `submit`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<SchedulerInfo>,
}

impl BridgeResponse {
    /// Create a successful response with no payload.
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    /// Create a failed response.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_string(&BridgeRequest::WaitForWorkers {
            workers: 4,
            timeout_secs: 60.0,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"op":"wait_for_workers","workers":4,"timeout_secs":60.0}"#
        );

        let json = serde_json::to_string(&BridgeRequest::Submit).unwrap();
        assert_eq!(json, r#"{"op":"submit"}"#);
    }

    #[test]
    fn test_request_op_names_match_tags() {
        let requests = [
            BridgeRequest::Ping,
            BridgeRequest::StartLocal { threads: 1 },
            BridgeRequest::Scale { workers: 2 },
            BridgeRequest::Connect {
                address: "tcp://127.0.0.1:8786".to_string(),
                timeout_secs: 5.0,
            },
            BridgeRequest::Batch { tasks: 100 },
            BridgeRequest::Info,
            BridgeRequest::Close,
        ];
        for request in requests {
            let value = serde_json::to_value(&request).unwrap();
            assert_eq!(value["op"], request.op());
        }
    }

    #[test]
    fn test_timeout_response_parses() {
        let line = r#"{"ok": false, "error": "timeout: only 1 of 2 workers", "workers": 1}"#;
        let response: BridgeResponse = serde_json::from_str(line).unwrap();

        assert!(!response.ok);
        assert_eq!(response.workers, Some(1));
        assert!(response.error.unwrap().starts_with("timeout"));
    }

    #[test]
    fn test_info_response_parses() {
        let line = r#"{"ok": true, "info": {"id": "Scheduler-1", "address": "tcp://127.0.0.1:8786",
            "workers": [{"address": "tcp://127.0.0.1:40001", "name": "worker-0", "nthreads": 2, "memory_limit": 4000000000}]}}"#;
        let response: BridgeResponse = serde_json::from_str(line).unwrap();
        let info = response.info.unwrap();

        assert_eq!(info.workers.len(), 1);
        assert_eq!(info.workers[0].nthreads, 2);
        assert_eq!(info.workers[0].memory_limit, 4_000_000_000);
    }

    #[test]
    fn test_empty_fields_skipped() {
        let json = serde_json::to_string(&BridgeResponse::success()).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);

        let json = serde_json::to_string(&BridgeResponse::failure("boom")).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"boom"}"#);
    }
}
