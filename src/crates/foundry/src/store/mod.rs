//! Versioned project state
//!
//! [`ProjectStateStore`] owns the commit path: every commit is validated,
//! serialized per project, and appended as a new version through a
//! compare-and-set on the version number. Nothing is ever overwritten.

mod backend;
mod history;
mod memory;
mod sqlite;

pub use backend::StateBackend;
pub use history::{History, VersionStream};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::{FoundryError, Result};
use crate::models::{AgentInvocation, PipelineRun, ProjectState, RunId, Stage, StateDelta};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_PAGE_SIZE: usize = 16;

pub struct ProjectStateStore {
    backend: Arc<dyn StateBackend>,
    commit_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    page_size: usize,
}

impl ProjectStateStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            backend,
            commit_locks: Mutex::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Store backed by [`MemoryBackend`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Versions fetched per backend read while streaming history
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create version 0 of a project holding only its brief
    pub async fn create(&self, project_id: &str, brief: &str) -> Result<ProjectState> {
        if project_id.trim().is_empty() {
            return Err(FoundryError::Validation("Project id is empty".to_string()));
        }
        let state = ProjectState::initial(project_id, brief);
        self.backend.append_version(&state, None).await.map_err(|e| match e {
            FoundryError::StateConflict { .. } => {
                FoundryError::conflict(project_id, "project already exists")
            }
            other => other,
        })?;
        info!(project_id, "Created project");
        Ok(state)
    }

    /// Latest committed version
    pub async fn get(&self, project_id: &str) -> Result<ProjectState> {
        self.backend
            .latest(project_id)
            .await?
            .ok_or_else(|| FoundryError::NotFound(format!("Project '{}'", project_id)))
    }

    pub async fn get_version(&self, project_id: &str, version: u64) -> Result<ProjectState> {
        self.backend
            .get_version(project_id, version)
            .await?
            .ok_or_else(|| {
                FoundryError::NotFound(format!("Project '{}' version {}", project_id, version))
            })
    }

    /// Append `delta` to `stage` on top of `expected_version`.
    ///
    /// Fails with `StateConflict` if another commit for the project is in
    /// flight or if the head moved past `expected_version`.
    pub async fn commit(
        &self,
        project_id: &str,
        stage: Stage,
        delta: StateDelta,
        expected_version: u64,
    ) -> Result<u64> {
        delta.validate_for(stage)?;

        let lock = self.lock_for(project_id);
        let result = match lock.clone().try_lock_owned() {
            Ok(_guard) => self.append_delta(project_id, stage, delta, expected_version).await,
            Err(_) => {
                warn!(project_id, stage = %stage, "Commit rejected, another commit in flight");
                Err(FoundryError::conflict(project_id, "another commit is in flight"))
            }
        };
        self.release_lock(project_id, lock);
        result
    }

    async fn append_delta(
        &self,
        project_id: &str,
        stage: Stage,
        delta: StateDelta,
        expected_version: u64,
    ) -> Result<u64> {
        let head = self.get(project_id).await?;
        if head.version != expected_version {
            return Err(FoundryError::conflict(
                project_id,
                format!(
                    "expected version {}, latest is {}",
                    expected_version, head.version
                ),
            ));
        }

        let next = head.apply(delta);
        self.backend.append_version(&next, Some(head.version)).await?;
        debug!(project_id, stage = %stage, version = next.version, "Committed delta");
        Ok(next.version)
    }

    /// Every retained version in ascending order
    pub async fn history(&self, project_id: &str) -> Result<History> {
        self.get(project_id).await?;
        Ok(History::new(self.backend.clone(), project_id.to_string(), self.page_size))
    }

    pub async fn record_invocation(&self, invocation: &AgentInvocation) -> Result<()> {
        self.backend.append_invocation(invocation).await
    }

    pub async fn invocations(&self, run_id: RunId) -> Result<Vec<AgentInvocation>> {
        self.backend.invocations(run_id).await
    }

    pub async fn save_run(&self, run: &PipelineRun) -> Result<()> {
        self.backend.save_run(run).await
    }

    pub async fn load_run(&self, run_id: RunId) -> Result<Option<PipelineRun>> {
        self.backend.load_run(run_id).await
    }

    fn lock_for(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.commit_locks
            .lock()
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the project's lock entry once no commit holds or awaits it
    fn release_lock(&self, project_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.commit_locks.lock();
        drop(lock);
        if locks
            .get(project_id)
            .map(|l| Arc::strong_count(l) == 1)
            .unwrap_or(false)
        {
            locks.remove(project_id);
        }
    }
}

impl std::fmt::Debug for ProjectStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectStateStore")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
