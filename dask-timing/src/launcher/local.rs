//! Local cluster: scheduler and workers are created by the bridge itself.

use super::bridge::ClientBridge;
use super::{LaunchError, LaunchSettings};

/// Create the cluster with no workers; returns the scheduler address.
pub(super) async fn start(
    bridge: &mut ClientBridge,
    settings: &LaunchSettings,
) -> Result<String, LaunchError> {
    bridge.start_local(settings.threads).await
}

/// Scale to the requested worker count and wait for registration.
pub(super) async fn add_workers(
    bridge: &mut ClientBridge,
    settings: &LaunchSettings,
) -> Result<usize, LaunchError> {
    bridge.scale(settings.workers).await?;
    bridge
        .wait_for_workers(settings.workers, settings.timeouts.worker_ready())
        .await
}
