use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bollard::API_DEFAULT_VERSION;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, InspectContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{BuildImageOptions, CreateImageOptions, PushImageOptions};
use bollard::models::{ContainerState, HostConfig};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::debug;

use super::types::NormalizedSpec;

pub type OutputStream = Pin<Box<dyn Stream<Item = Result<LogOutput, DockerError>> + Send>>;
pub type ImageStream<'a> = Pin<Box<dyn Stream<Item = Result<ImageEvent, DockerError>> + Send + 'a>>;

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// One progress or log event from a build, pull, or push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageEvent {
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
    /// Build log text, only set for builds.
    pub stream: Option<String>,
    pub error: Option<String>,
}

/// The container engine's remote API, reduced to the calls this crate makes.
///
/// [`BollardEngine`] talks to a real Docker daemon; tests substitute a
/// recording implementation.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn ping(&self) -> Result<(), DockerError>;

    /// Create a container and return its id.
    async fn create_container(&self, spec: &NormalizedSpec) -> Result<String, DockerError>;

    /// Attach to stdout/stderr. Must be called before start to see all output.
    async fn attach_container(&self, id: &str) -> Result<OutputStream, DockerError>;

    /// Start a created container. Success is the "started" signal.
    async fn start_container(&self, id: &str) -> Result<(), DockerError>;

    /// Block until the container stops and return its exit status.
    async fn wait_container(&self, id: &str) -> Result<i64, DockerError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, DockerError>;

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<(), DockerError>;

    /// Remove a container. `force` kills it first if it is still running.
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError>;

    fn build_image(&self, tag: &str, dockerfile: Option<&str>, context: Bytes) -> ImageStream<'_>;

    fn pull_image(&self, image: &str, auth: Option<DockerCredentials>) -> ImageStream<'_>;

    fn push_image(&self, image: &str, auth: Option<DockerCredentials>) -> ImageStream<'_>;
}

/// [`Engine`] backed by a `bollard` Docker client.
#[derive(Clone)]
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    /// Connect to the daemon at `socket`, or to the platform's local default.
    pub fn connect(socket: Option<&Path>) -> Result<Self, DockerError> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(
                &path.to_string_lossy(),
                CONNECT_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            )?,
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self { docker })
    }
}

/// Translate a normalized spec into the engine's create payload.
pub fn container_config(spec: &NormalizedSpec) -> Config<String> {
    Config {
        image: Some(spec.image.clone()),
        cmd: spec.command.clone(),
        entrypoint: spec.entrypoint.clone(),
        env: spec.env.clone(),
        tty: Some(false),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            links: spec.links.clone(),
            binds: spec.binds.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl Engine for BollardEngine {
    async fn ping(&self) -> Result<(), DockerError> {
        self.docker.ping().await.map(|_| ())
    }

    async fn create_container(&self, spec: &NormalizedSpec) -> Result<String, DockerError> {
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });
        let response = self
            .docker
            .create_container(options, container_config(spec))
            .await?;
        for warning in &response.warnings {
            debug!(container = %response.id, "create warning: {warning}");
        }
        Ok(response.id)
    }

    async fn attach_container(&self, id: &str) -> Result<OutputStream, DockerError> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };
        let results = self.docker.attach_container(id, Some(options)).await?;
        Ok(results.output)
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
    }

    async fn wait_container(&self, id: &str) -> Result<i64, DockerError> {
        let options = WaitContainerOptions {
            condition: "not-running".to_string(),
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        let mut status = 0;
        while let Some(item) = stream.next().await {
            match item {
                Ok(response) => status = response.status_code,
                // bollard reports a non-zero exit as an error carrying the code.
                Err(DockerError::DockerContainerWaitError { code, .. }) => status = code,
                Err(e) => return Err(e),
            }
        }
        Ok(status)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, DockerError> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(info.state.unwrap_or_default())
    }

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<(), DockerError> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: timeout_secs }))
            .await
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await
    }

    fn build_image(&self, tag: &str, dockerfile: Option<&str>, context: Bytes) -> ImageStream<'_> {
        let options = BuildImageOptions {
            t: tag.to_string(),
            dockerfile: dockerfile.unwrap_or("Dockerfile").to_string(),
            rm: true,
            ..Default::default()
        };
        let stream = self
            .docker
            .build_image(options, None, Some(context))
            .map(|item| {
                item.map(|info| ImageEvent {
                    id: info.id,
                    status: info.status,
                    progress: info.progress,
                    stream: info.stream,
                    error: info.error,
                })
            });
        Box::pin(stream)
    }

    fn pull_image(&self, image: &str, auth: Option<DockerCredentials>) -> ImageStream<'_> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let stream = self
            .docker
            .create_image(Some(options), None, auth)
            .map(|item| {
                item.map(|info| ImageEvent {
                    id: info.id,
                    status: info.status,
                    progress: info.progress,
                    stream: None,
                    error: info.error,
                })
            });
        Box::pin(stream)
    }

    fn push_image(&self, image: &str, auth: Option<DockerCredentials>) -> ImageStream<'_> {
        let (name, tag) = split_tag(image);
        let options = PushImageOptions {
            tag: tag.to_string(),
        };
        let stream = self
            .docker
            .push_image(name, Some(options), auth)
            .map(|item| {
                item.map(|info| ImageEvent {
                    id: None,
                    status: info.status,
                    progress: info.progress,
                    stream: None,
                    error: info.error,
                })
            });
        Box::pin(stream)
    }
}

/// Split `repo[:tag]` into its repository and tag, defaulting to `latest`.
/// A colon that belongs to a registry port (`host:5000/repo`) is not a tag.
pub fn split_tag(image: &str) -> (&str, &str) {
    match image.rfind(':') {
        Some(idx) if !image[idx + 1..].contains('/') => (&image[..idx], &image[idx + 1..]),
        _ => (image, "latest"),
    }
}

/// Verify that the engine is reachable.
pub async fn ensure_available(engine: &dyn Engine) -> anyhow::Result<()> {
    use anyhow::Context;

    engine
        .ping()
        .await
        .context("docker daemon is not reachable. Is it running?")
}
