use crate::error::Result;
use crate::models::{AgentInvocation, PipelineRun, ProjectState, RunId};
use async_trait::async_trait;

/// Durable, key-ordered, versioned storage behind the state store
///
/// Versions are keyed by `(project_id, version)` and never rewritten.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Insert `state` as the next version only if the project's latest
    /// stored version equals `expected_latest` (`None` = project must not
    /// exist yet). A mismatch fails with `StateConflict`.
    async fn append_version(&self, state: &ProjectState, expected_latest: Option<u64>) -> Result<()>;

    async fn latest(&self, project_id: &str) -> Result<Option<ProjectState>>;

    async fn get_version(&self, project_id: &str, version: u64) -> Result<Option<ProjectState>>;

    /// Up to `limit` versions starting at `from`, ascending
    async fn versions(&self, project_id: &str, from: u64, limit: usize) -> Result<Vec<ProjectState>>;

    async fn append_invocation(&self, invocation: &AgentInvocation) -> Result<()>;

    /// Invocations of a run in the order they were appended
    async fn invocations(&self, run_id: RunId) -> Result<Vec<AgentInvocation>>;

    /// Insert or replace the run snapshot
    async fn save_run(&self, run: &PipelineRun) -> Result<()>;

    async fn load_run(&self, run_id: RunId) -> Result<Option<PipelineRun>>;
}
