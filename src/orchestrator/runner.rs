use std::path::Path;
use std::sync::Arc;

use bollard::auth::DockerCredentials;
use bollard::models::ContainerState;

use super::linked;
use super::ops::{self, RemovePolicy};
use crate::config::Config;
use crate::docker::{
    self, BollardEngine, BuildParams, CancelToken, ContainerHandle, ContainerSpec, Engine,
    ImageEvent, LinkedOutcome, OutputSink, RunOutcome,
};
use crate::error::RunError;

/// Entry point for every container operation, bound to one engine and one
/// resolved configuration.
#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<dyn Engine>,
    config: Config,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn Engine>, config: Config) -> Self {
        Self { engine, config }
    }

    /// Connect to the daemon named by `config.docker_socket`, or the local
    /// default when unset.
    pub fn connect(config: Config) -> anyhow::Result<Self> {
        use anyhow::Context;

        let engine = BollardEngine::connect(config.docker_socket.as_deref())
            .context("failed to connect to docker")?;
        Ok(Self::new(Arc::new(engine), config))
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run(
        &self,
        spec: &ContainerSpec,
        sink: OutputSink,
        cancel: &CancelToken,
    ) -> Result<RunOutcome, RunError> {
        docker::run(
            self.engine(),
            spec,
            sink,
            cancel,
            self.config.stop_timeout_secs(),
        )
        .await
    }

    pub async fn run_linked(
        &self,
        server: &ContainerSpec,
        client: &ContainerSpec,
        client_sink: OutputSink,
        cancel: &CancelToken,
    ) -> Result<LinkedOutcome, RunError> {
        linked::run_linked(
            Arc::clone(&self.engine),
            &self.config,
            server,
            client,
            client_sink,
            cancel,
        )
        .await
    }

    pub async fn inspect(
        &self,
        handle: &ContainerHandle,
    ) -> Result<(ContainerHandle, ContainerState), RunError> {
        ops::inspect(self.engine(), handle).await
    }

    pub async fn stop(&self, handle: &ContainerHandle) -> Result<ContainerHandle, RunError> {
        ops::stop(self.engine(), handle, self.config.stop_timeout_secs()).await
    }

    pub async fn remove(&self, handle: &ContainerHandle) -> Result<(), RunError> {
        ops::remove(self.engine(), handle, RemovePolicy::from(&self.config)).await
    }

    pub async fn build(&self, code_dir: &Path, params: &BuildParams) -> Result<String, RunError> {
        docker::build(self.engine(), code_dir, params).await
    }

    pub async fn pull(
        &self,
        image: &str,
        auth: Option<DockerCredentials>,
        on_progress: impl FnMut(&ImageEvent),
    ) -> Result<Vec<ImageEvent>, RunError> {
        docker::pull(self.engine(), image, auth, on_progress).await
    }

    pub async fn push(
        &self,
        image: &str,
        auth: Option<DockerCredentials>,
        on_progress: impl FnMut(&ImageEvent),
    ) -> Result<Vec<ImageEvent>, RunError> {
        docker::push(self.engine(), image, auth, on_progress).await
    }
}
