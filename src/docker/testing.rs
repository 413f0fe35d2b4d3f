//! Scriptable in-memory [`Engine`] for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerState, ContainerStateStatusEnum};
use bytes::Bytes;
use tokio::sync::Notify;

use super::engine::{Engine, ImageEvent, ImageStream, OutputStream};
use super::types::{CancelToken, NormalizedSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(NormalizedSpec),
    Attach(String),
    Start(String),
    Wait(String),
    Inspect(String),
    Stop(String),
    Remove(String),
}

/// Behaviour of every container created from one image.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub create_error: Option<u16>,
    pub start_error: Option<u16>,
    pub wait_error: Option<u16>,
    pub inspect_error: Option<u16>,
    pub stop_error: Option<u16>,
    pub remove_error: Option<u16>,
    pub exit_code: i64,
    pub output: Vec<LogOutput>,
    /// When set, `wait` blocks until the gate is notified.
    pub exit_gate: Option<Arc<Notify>>,
    /// Fired once the engine has accepted the start.
    pub cancel_on_start: Option<CancelToken>,
}

#[derive(Default)]
pub struct RecordingEngine {
    scripts: Mutex<HashMap<String, Script>>,
    containers: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<Call>>,
    forced: Mutex<Vec<String>>,
    pub image_events: Mutex<Vec<ImageEvent>>,
}

pub fn server_error(status_code: u16) -> DockerError {
    DockerError::DockerResponseServerError {
        status_code,
        message: format!("scripted {status_code}"),
    }
}

fn fail(code: Option<u16>) -> Result<(), DockerError> {
    match code {
        Some(code) => Err(server_error(code)),
        None => Ok(()),
    }
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, image: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(image.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Ids of containers created from `image`, in creation order.
    pub fn ids_for(&self, image: &str) -> Vec<String> {
        let containers = self.containers.lock().unwrap();
        let mut ids: Vec<_> = containers
            .iter()
            .filter(|(_, img)| img.as_str() == image)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn created_specs(&self) -> Vec<NormalizedSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Ids removed with `force` set.
    pub fn forced_removes(&self) -> Vec<String> {
        self.forced.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn script_for(&self, id: &str) -> Script {
        let image = self
            .containers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default();
        self.scripts
            .lock()
            .unwrap()
            .get(&image)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Engine for RecordingEngine {
    async fn ping(&self) -> Result<(), DockerError> {
        Ok(())
    }

    async fn create_container(&self, spec: &NormalizedSpec) -> Result<String, DockerError> {
        self.record(Call::Create(spec.clone()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&spec.image)
            .cloned()
            .unwrap_or_default();
        fail(script.create_error)?;
        let mut containers = self.containers.lock().unwrap();
        let id = format!("{:04}-{}-container", containers.len(), spec.image);
        containers.insert(id.clone(), spec.image.clone());
        Ok(id)
    }

    async fn attach_container(&self, id: &str) -> Result<OutputStream, DockerError> {
        self.record(Call::Attach(id.to_string()));
        let output = self.script_for(id).output;
        Ok(Box::pin(futures::stream::iter(output.into_iter().map(Ok))))
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.record(Call::Start(id.to_string()));
        let script = self.script_for(id);
        fail(script.start_error)?;
        if let Some(cancel) = script.cancel_on_start {
            cancel.cancel();
        }
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, DockerError> {
        self.record(Call::Wait(id.to_string()));
        let script = self.script_for(id);
        fail(script.wait_error)?;
        if let Some(gate) = script.exit_gate {
            gate.notified().await;
        }
        Ok(script.exit_code)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, DockerError> {
        self.record(Call::Inspect(id.to_string()));
        fail(self.script_for(id).inspect_error)?;
        Ok(ContainerState {
            status: Some(ContainerStateStatusEnum::RUNNING),
            running: Some(true),
            ..Default::default()
        })
    }

    async fn stop_container(&self, id: &str, _timeout_secs: i64) -> Result<(), DockerError> {
        self.record(Call::Stop(id.to_string()));
        fail(self.script_for(id).stop_error)
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError> {
        self.record(Call::Remove(id.to_string()));
        if force {
            self.forced.lock().unwrap().push(id.to_string());
        }
        fail(self.script_for(id).remove_error)
    }

    fn build_image(&self, _tag: &str, _dockerfile: Option<&str>, _context: Bytes) -> ImageStream<'_> {
        self.image_stream()
    }

    fn pull_image(&self, _image: &str, _auth: Option<DockerCredentials>) -> ImageStream<'_> {
        self.image_stream()
    }

    fn push_image(&self, _image: &str, _auth: Option<DockerCredentials>) -> ImageStream<'_> {
        self.image_stream()
    }
}

impl RecordingEngine {
    fn image_stream(&self) -> ImageStream<'_> {
        let events = self.image_events.lock().unwrap().clone();
        Box::pin(futures::stream::iter(events.into_iter().map(Ok)))
    }
}
