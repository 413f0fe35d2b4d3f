use bollard::models::ContainerState;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::docker::{ContainerHandle, Engine};
use crate::error::RunError;

/// How [`remove`] treats engine failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovePolicy {
    /// Report every removal as successful, logging the engine's error.
    pub suppress_errors: bool,
    /// Kill the container first if it is still running.
    pub force: bool,
}

impl From<&Config> for RemovePolicy {
    fn from(config: &Config) -> Self {
        Self {
            suppress_errors: config.suppress_remove_errors,
            force: false,
        }
    }
}

/// Fetch the container's current state.
pub async fn inspect(
    engine: &dyn Engine,
    handle: &ContainerHandle,
) -> Result<(ContainerHandle, ContainerState), RunError> {
    let state = engine
        .inspect_container(&handle.id)
        .await
        .map_err(|e| RunError::engine("ERROR: docker inspect", e))?;
    debug!(
        container = %handle.short_id(),
        status = ?state.status,
        running = ?state.running,
        exit_code = ?state.exit_code,
        "inspected container"
    );
    Ok((handle.clone(), state))
}

/// Stop the container. An already stopped container is reported by the
/// engine as an error and is returned as one.
pub async fn stop(
    engine: &dyn Engine,
    handle: &ContainerHandle,
    timeout_secs: i64,
) -> Result<ContainerHandle, RunError> {
    info!(container = %handle.short_id(), "stopping container");
    engine
        .stop_container(&handle.id, timeout_secs)
        .await
        .map_err(|e| RunError::engine("ERROR: docker stop", e))?;
    Ok(handle.clone())
}

/// Remove the container, honouring `policy`.
pub async fn remove(
    engine: &dyn Engine,
    handle: &ContainerHandle,
    policy: RemovePolicy,
) -> Result<(), RunError> {
    info!(container = %handle.short_id(), "removing container");
    match engine.remove_container(&handle.id, policy.force).await {
        Ok(()) => Ok(()),
        Err(e) if policy.suppress_errors => {
            warn!(container = %handle.short_id(), "ignoring remove error: {e}");
            Ok(())
        }
        Err(e) => Err(RunError::engine("ERROR: docker remove", e)),
    }
}
