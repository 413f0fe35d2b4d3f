use bollard::container::LogOutput;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{Engine, OutputStream};
use super::types::{
    CancelToken, ContainerHandle, ContainerSpec, ExitData, NormalizedSpec, OutputLine, OutputSink,
    RunOutcome,
};
use crate::error::{self, RunError};

const RUN_CONTEXT: &str = "ERROR: docker run";

/// A container that has been created, attached, and started.
#[derive(Debug)]
pub struct Started {
    pub handle: ContainerHandle,
    /// Output drain task; finishes when the container's streams close.
    pub drain: JoinHandle<()>,
}

/// Create a container, attach its output to `sink`, and start it.
///
/// Returns once the engine has acknowledged the start, without waiting for
/// the process to finish. If attach or start fails, the created container is
/// removed before the error is returned.
pub async fn start_attached(
    engine: &dyn Engine,
    spec: &NormalizedSpec,
    sink: OutputSink,
) -> Result<Started, RunError> {
    let id = engine
        .create_container(spec)
        .await
        .map_err(|e| match error::status_code(&e) {
            Some(404) => RunError::user("Image does not exist"),
            _ => RunError::engine(RUN_CONTEXT, e),
        })?;

    let handle = ContainerHandle {
        id,
        name: spec.name.clone(),
        image: spec.image.clone(),
    };
    debug!(container = %handle.short_id(), image = %handle.image, "container created");

    let output = match engine.attach_container(&handle.id).await {
        Ok(output) => output,
        Err(e) => {
            discard(engine, &handle).await;
            return Err(RunError::engine(RUN_CONTEXT, e));
        }
    };

    if let Err(e) = engine.start_container(&handle.id).await {
        discard(engine, &handle).await;
        return Err(RunError::engine(RUN_CONTEXT, e));
    }
    info!(container = %handle.short_id(), image = %handle.image, "container started");

    let drain = tokio::spawn(drain_output(output, sink, handle.short_id().to_string()));
    Ok(Started { handle, drain })
}

/// Run one container to completion.
///
/// Output is streamed to `sink` while the container runs. A non-zero exit
/// status removes the container and fails with [`RunError::User`] carrying
/// the status. Cancelling `cancel` stops and removes the container.
pub async fn run(
    engine: &dyn Engine,
    spec: &ContainerSpec,
    sink: OutputSink,
    cancel: &CancelToken,
    stop_timeout: i64,
) -> Result<RunOutcome, RunError> {
    let normalized = spec.normalized();
    info!(image = %normalized.image, "running container");

    let Started { handle, drain } = start_attached(engine, &normalized, sink).await?;

    let status = tokio::select! {
        status = engine.wait_container(&handle.id) => status,
        _ = cancel.cancelled() => {
            warn!(container = %handle.short_id(), "run cancelled, tearing down");
            if let Err(e) = engine.stop_container(&handle.id, stop_timeout).await {
                debug!(container = %handle.short_id(), "stop during cancel failed: {e}");
            }
            discard(engine, &handle).await;
            drain.abort();
            return Err(RunError::Cancelled);
        }
    };

    let status_code = match status {
        Ok(code) => code,
        Err(e) => {
            warn!(container = %handle.short_id(), "wait failed, removing container: {e}");
            drain.abort();
            discard(engine, &handle).await;
            return Err(RunError::engine(RUN_CONTEXT, e));
        }
    };
    // The attach stream closes when the process exits; let it flush.
    let _ = drain.await;
    info!(container = %handle.short_id(), image = %handle.image, status_code, "finished running");

    if status_code != 0 {
        discard(engine, &handle).await;
        return Err(RunError::User {
            message: format!("{} failed with status {status_code}", handle.image),
            status: Some(status_code),
        });
    }

    Ok(RunOutcome {
        container: handle,
        exit: ExitData { status_code },
    })
}

/// Best-effort forced removal. Failures are only logged.
pub(crate) async fn discard(engine: &dyn Engine, handle: &ContainerHandle) {
    match engine.remove_container(&handle.id, true).await {
        Ok(()) => debug!(container = %handle.short_id(), "container removed"),
        Err(e) if error::is_gone(&e) => {
            debug!(container = %handle.short_id(), "container already gone")
        }
        Err(e) => warn!(container = %handle.short_id(), "failed to remove container: {e}"),
    }
}

async fn drain_output(mut output: OutputStream, sink: OutputSink, container: String) {
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    while let Some(item) = output.next().await {
        let line = match item {
            Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                (false, message)
            }
            Ok(LogOutput::StdErr { message }) => (true, message),
            Ok(LogOutput::StdIn { .. }) => continue,
            Err(e) => {
                warn!(container = %container, "output stream failed: {e}");
                break;
            }
        };

        match (&sink, line) {
            (OutputSink::Stdio, (false, bytes)) => {
                let _ = stdout.write_all(&bytes).await;
            }
            (OutputSink::Stdio, (true, bytes)) => {
                let _ = stderr.write_all(&bytes).await;
            }
            (OutputSink::Channel(tx), (is_err, bytes)) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                let line = if is_err {
                    OutputLine::Stderr(text)
                } else {
                    OutputLine::Stdout(text)
                };
                // Receiver may be dropped; ignore send errors.
                let _ = tx.send(line);
            }
        }
    }

    let _ = stdout.flush().await;
    let _ = stderr.flush().await;
    debug!(container = %container, "output stream closed");
}
