//! Run containers, and linked server/client container pairs, against a
//! Docker-compatible engine.

pub mod config;
pub mod docker;
pub mod error;
pub mod orchestrator;

pub use config::Config;
pub use error::{CleanupError, RunError};
pub use orchestrator::Orchestrator;
