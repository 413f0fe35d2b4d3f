use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::ops::{self, RemovePolicy};
use super::types::{LinkedState, generate_alias, link_for};
use crate::config::Config;
use crate::docker::{
    self, CancelToken, ContainerHandle, ContainerSpec, Engine, LinkedOutcome, OutputSink,
};
use crate::error::{self, CleanupError, RunError};

/// Tracks the current stage and logs each transition.
struct Machine {
    alias: String,
    state: LinkedState,
}

impl Machine {
    fn new(alias: String) -> Self {
        Self {
            alias,
            state: LinkedState::Pending,
        }
    }

    fn advance(&mut self, next: LinkedState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(server = %self.alias, from = %self.state, to = %next, "linked run");
        self.state = next;
    }
}

/// Start `server`, then run `client` linked to it.
///
/// The server's alias is `server.name` or a generated one. The client's
/// links are replaced by a single `<alias>:solver` entry. On success the
/// server keeps running and is handed to the caller. If the client fails,
/// the server is inspected, stopped and removed, and the client's error is
/// returned; cleanup failures are only logged.
///
/// Whenever the server exits, a background task removes it. That task is
/// returned as [`LinkedOutcome::server_watch`]; it is not awaited here.
pub async fn run_linked(
    engine: Arc<dyn Engine>,
    config: &Config,
    server: &ContainerSpec,
    client: &ContainerSpec,
    client_sink: OutputSink,
    cancel: &CancelToken,
) -> Result<LinkedOutcome, RunError> {
    if cancel.is_cancelled() {
        return Err(RunError::Cancelled);
    }

    let alias = server.name.clone().unwrap_or_else(generate_alias);
    let mut machine = Machine::new(alias.clone());

    let mut server_spec = server.normalized();
    server_spec.name = Some(alias.clone());

    // ── Server ───────────────────────────────────────────────────────
    machine.advance(LinkedState::ServerStarting);
    info!(image = %server_spec.image, server = %alias, "starting server container");
    let started = match docker::start_attached(engine.as_ref(), &server_spec, OutputSink::Stdio)
        .await
    {
        Ok(started) => started,
        Err(e) => {
            machine.advance(LinkedState::Failed);
            error!(server = %alias, "server failed to start: {e}");
            return Err(e);
        }
    };
    let server_handle = started.handle;
    machine.advance(LinkedState::ServerStarted);

    let server_watch = tokio::spawn(remove_on_exit(
        Arc::clone(&engine),
        server_handle.clone(),
    ));

    if cancel.is_cancelled() {
        warn!(server = %alias, "cancelled before client start");
        cleanup_server(engine.as_ref(), config, &server_handle, &mut machine).await;
        return Err(RunError::Cancelled);
    }

    // ── Client ───────────────────────────────────────────────────────
    let mut client_spec = client.clone();
    client_spec.links = Some(vec![link_for(&alias)]);

    machine.advance(LinkedState::ClientStarting);
    let client_result = docker::run(
        engine.as_ref(),
        &client_spec,
        client_sink,
        cancel,
        config.stop_timeout_secs(),
    )
    .await;

    match client_result {
        Ok(outcome) => {
            machine.advance(LinkedState::Success);
            info!(server = %alias, client = %outcome.container.short_id(), "linked run finished");
            Ok(LinkedOutcome {
                server: server_handle,
                client: outcome.container,
                server_watch,
            })
        }
        Err(client_err) => {
            error!(server = %alias, image = %client_spec.image, "client run failed: {client_err}");
            cleanup_server(engine.as_ref(), config, &server_handle, &mut machine).await;
            Err(client_err)
        }
    }
}

/// Inspect, stop, then remove the server. Remove runs whatever stop did and
/// kills a server that is still running. Nothing here can fail the caller;
/// every failed step is logged and returned.
async fn cleanup_server(
    engine: &dyn Engine,
    config: &Config,
    server: &ContainerHandle,
    machine: &mut Machine,
) -> Vec<CleanupError> {
    let mut failures = Vec::new();

    machine.advance(LinkedState::CleanupInspecting);
    match ops::inspect(engine, server).await {
        Ok((_, state)) => info!(
            container = %server.short_id(),
            status = ?state.status,
            exit_code = ?state.exit_code,
            "server state before cleanup"
        ),
        Err(source) => failures.push(CleanupError {
            step: "inspect",
            source,
        }),
    }

    machine.advance(LinkedState::CleanupStopping);
    if let Err(source) = ops::stop(engine, server, config.stop_timeout_secs()).await {
        failures.push(CleanupError {
            step: "stop",
            source,
        });
    }

    machine.advance(LinkedState::CleanupRemoving);
    let policy = RemovePolicy {
        force: true,
        ..RemovePolicy::from(config)
    };
    match ops::remove(engine, server, policy).await {
        Ok(()) => {}
        Err(RunError::Engine { source, .. }) if error::is_gone(&source) => {
            debug!(container = %server.short_id(), "server already removed");
        }
        Err(source) => failures.push(CleanupError {
            step: "remove",
            source,
        }),
    }

    machine.advance(LinkedState::Failed);
    for failure in &failures {
        warn!(container = %server.short_id(), "{failure}");
    }
    failures
}

/// Wait for the server to exit, then remove it. Outcome is only logged.
async fn remove_on_exit(engine: Arc<dyn Engine>, server: ContainerHandle) {
    match engine.wait_container(&server.id).await {
        Ok(status_code) => {
            info!(container = %server.short_id(), status_code, "server exited");
        }
        Err(e) if error::is_gone(&e) => {
            debug!(container = %server.short_id(), "server already removed");
            return;
        }
        Err(e) => {
            warn!(container = %server.short_id(), "waiting on server failed: {e}");
            return;
        }
    }
    docker::run::discard(engine.as_ref(), &server).await;
}
