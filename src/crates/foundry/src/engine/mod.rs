//! Pipeline execution engine

mod cancel;
mod orchestrator;
mod policy;
mod registry;
mod retry;

pub use cancel::CancelSignal;
pub use orchestrator::Orchestrator;
pub use policy::{PipelinePolicy, Route};
pub use registry::RunRegistry;
pub use retry::{AttemptState, NextAction, RetryPolicy};
