// Engine access: the engine trait, container runs with streamed output,
// image build/pull/push, cancellation.

pub mod engine;
pub mod image;
pub mod run;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use engine::{BollardEngine, Engine, ImageEvent, ensure_available};
pub use image::{BuildParams, build, pull, push};
pub use run::{Started, run, start_attached};
pub use types::{
    CancelToken, ContainerHandle, ContainerSpec, ExitData, LinkedOutcome, NormalizedSpec,
    OutputLine, OutputSink, RunOutcome, Tokens,
};
