//! Checks that the cluster library is installed before any timing starts.

use std::process::{Command, Stdio};

use tracing::debug;

use crate::config::{ClusterSettings, StudyKind};
use crate::error::SessionError;

const INSTALL_HINT: &str = "pip install 'dask[distributed]'";
const IMPORT_CHECK: &str = "import dask.distributed; print(dask.distributed.__version__)";

/// Verify the interpreter can import the cluster library and, for the
/// multi-process study, that the scheduler and worker commands run.
pub fn check_dependencies(cluster: &ClusterSettings, kind: StudyKind) -> Result<(), SessionError> {
    let version = run(&cluster.python_command, &["-c", IMPORT_CHECK]).ok_or_else(|| {
        SessionError::DependencyMissing {
            what: format!(
                "dask.distributed (via {})",
                cluster.python_command.join(" ")
            ),
            hint: INSTALL_HINT.to_string(),
        }
    })?;
    debug!("Found dask.distributed {}", version.trim());

    if kind == StudyKind::Distributed {
        for argv in [&cluster.scheduler_command, &cluster.worker_command] {
            run(argv, &["--version"]).ok_or_else(|| SessionError::DependencyMissing {
                what: format!("'{}'", argv.join(" ")),
                hint: INSTALL_HINT.to_string(),
            })?;
        }
    }
    Ok(())
}

/// Run `argv` plus `extra` to completion; stdout on success.
fn run(argv: &[String], extra: &[&str]) -> Option<String> {
    let (program, args) = argv.split_first()?;
    let output = Command::new(program)
        .args(args)
        .args(extra)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        debug!("{} exited with {}", argv.join(" "), output.status);
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}
