// Container lifecycle on top of the engine: teardown operations, the linked
// server/client run, and the `Orchestrator` facade tying them to a config.

pub mod linked;
pub mod ops;
mod runner;
mod types;

pub use linked::run_linked;
pub use ops::{RemovePolicy, inspect, remove, stop};
pub use runner::Orchestrator;
pub use types::{LinkedState, SERVER_LINK_ALIAS, generate_alias, link_for};
