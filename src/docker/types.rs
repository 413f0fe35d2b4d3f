use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cooperative cancellation shared by every task of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(CancellationToken);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        self.0.cancelled().await
    }
}

/// A command or entrypoint as supplied by the caller: either a single line
/// that still needs splitting, or an already tokenized list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tokens {
    Line(String),
    List(Vec<String>),
}

impl Tokens {
    /// Split a `Line` on whitespace; a `List` passes through unchanged.
    pub fn into_list(self) -> Vec<String> {
        match self {
            Tokens::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            Tokens::List(list) => list,
        }
    }
}

impl From<&str> for Tokens {
    fn from(line: &str) -> Self {
        Tokens::Line(line.to_string())
    }
}

impl From<Vec<String>> for Tokens {
    fn from(list: Vec<String>) -> Self {
        Tokens::List(list)
    }
}

/// Describes how to run one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Option<Tokens>,
    pub entrypoint: Option<Tokens>,
    pub env: Option<Vec<String>>,
    pub links: Option<Vec<String>>,
    pub binds: Option<Vec<String>>,
    pub name: Option<String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Produce the engine-facing form with `command` and `entrypoint`
    /// reduced to token lists.
    pub fn normalized(&self) -> NormalizedSpec {
        NormalizedSpec {
            image: self.image.clone(),
            command: self.command.clone().map(Tokens::into_list),
            entrypoint: self.entrypoint.clone().map(Tokens::into_list),
            env: self.env.clone(),
            links: self.links.clone(),
            binds: self.binds.clone(),
            name: self.name.clone(),
        }
    }
}

/// A [`ContainerSpec`] whose command and entrypoint are always token lists.
/// This is the only shape the engine layer accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedSpec {
    pub image: String,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub env: Option<Vec<String>>,
    pub links: Option<Vec<String>>,
    pub binds: Option<Vec<String>>,
    pub name: Option<String>,
}

/// Opaque reference to a container created by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: Option<String>,
    pub image: String,
}

impl ContainerHandle {
    /// Short id used in log lines.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

/// Exit information reported by the engine's wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitData {
    pub status_code: i64,
}

impl ExitData {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// Outcome of a successful single-container run.
#[derive(Debug)]
pub struct RunOutcome {
    pub container: ContainerHandle,
    pub exit: ExitData,
}

/// Outcome of a successful linked run.
///
/// The server container is still running and belongs to the caller.
/// `server_watch` is the background task that removes the server once it
/// exits; awaiting it is optional and it never reports an error.
#[derive(Debug)]
pub struct LinkedOutcome {
    pub server: ContainerHandle,
    pub client: ContainerHandle,
    pub server_watch: JoinHandle<()>,
}

/// Streamed output from a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Where a run's output goes.
#[derive(Debug, Clone, Default)]
pub enum OutputSink {
    /// The process's own stdout/stderr.
    #[default]
    Stdio,
    /// A caller-supplied log sink; every chunk is forwarded decoded.
    Channel(mpsc::UnboundedSender<OutputLine>),
}
