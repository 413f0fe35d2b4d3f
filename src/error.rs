use bollard::errors::Error as DockerError;

/// Failure of a run, linked run, or teardown operation.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The engine or its transport reported a failure.
    #[error("{context}: {source}")]
    Engine {
        context: String,
        #[source]
        source: DockerError,
    },

    /// A condition the caller can correct, such as an unknown image or a
    /// container that exited with a non-zero status.
    #[error("{message}")]
    User {
        message: String,
        status: Option<i64>,
    },

    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn engine(context: impl Into<String>, source: DockerError) -> Self {
        Self::Engine {
            context: context.into(),
            source,
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
            status: None,
        }
    }

    /// Exit status carried by a `User` error, if any.
    pub fn status(&self) -> Option<i64> {
        match self {
            Self::User { status, .. } => *status,
            _ => None,
        }
    }
}

/// A failed step of the server cleanup sequence. Only ever logged.
#[derive(Debug, thiserror::Error)]
#[error("cleanup {step} failed: {source}")]
pub struct CleanupError {
    pub step: &'static str,
    #[source]
    pub source: RunError,
}

/// HTTP status code of an engine response error, if the error is one.
pub fn status_code(err: &DockerError) -> Option<u16> {
    match err {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// True for errors meaning the container is already gone or on its way out:
/// 404 "no such container" and 409 "removal already in progress". Other
/// conflicts, such as removing a running container, are real failures.
pub fn is_gone(err: &DockerError) -> bool {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => true,
        DockerError::DockerResponseServerError {
            status_code: 409,
            message,
        } => message.contains("already in progress"),
        _ => false,
    }
}
