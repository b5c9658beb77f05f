//! Data model shared by the engine, agents and storage

pub mod artifact;
pub mod invocation;
pub mod run;
pub mod selection;
pub mod stage;
pub mod state;
pub mod usage;

pub use artifact::{Artifact, QaVerdict, StateDelta};
pub use invocation::{AgentInvocation, InvocationOutcome, PendingInvocation};
pub use run::{PipelineRun, RunError, RunId, RunStatus, StageTransition, TransitionOutcome};
pub use selection::{ModelRef, ModelSelection};
pub use stage::Stage;
pub use state::ProjectState;
pub use usage::TokenUsage;
