//! In-memory backend for tests and ephemeral runs

use super::StateBackend;
use crate::error::{FoundryError, Result};
use crate::models::{AgentInvocation, PipelineRun, ProjectState, RunId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    versions: BTreeMap<(String, u64), ProjectState>,
    invocations: Vec<AgentInvocation>,
    runs: HashMap<RunId, PipelineRun>,
}

impl Inner {
    fn latest_version(&self, project_id: &str) -> Option<u64> {
        self.versions
            .range((project_id.to_string(), 0)..=(project_id.to_string(), u64::MAX))
            .next_back()
            .map(|((_, version), _)| *version)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        *inner = Inner::default();
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn append_version(&self, state: &ProjectState, expected_latest: Option<u64>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let actual = inner.latest_version(&state.project_id);
        if actual != expected_latest {
            return Err(FoundryError::conflict(
                &state.project_id,
                format!("expected latest version {:?}, found {:?}", expected_latest, actual),
            ));
        }
        inner
            .versions
            .insert((state.project_id.clone(), state.version), state.clone());
        Ok(())
    }

    async fn latest(&self, project_id: &str) -> Result<Option<ProjectState>> {
        let inner = self.inner.read().await;
        Ok(inner
            .latest_version(project_id)
            .and_then(|v| inner.versions.get(&(project_id.to_string(), v)))
            .cloned())
    }

    async fn get_version(&self, project_id: &str, version: u64) -> Result<Option<ProjectState>> {
        let inner = self.inner.read().await;
        Ok(inner.versions.get(&(project_id.to_string(), version)).cloned())
    }

    async fn versions(&self, project_id: &str, from: u64, limit: usize) -> Result<Vec<ProjectState>> {
        let inner = self.inner.read().await;
        Ok(inner
            .versions
            .range((project_id.to_string(), from)..=(project_id.to_string(), u64::MAX))
            .take(limit)
            .map(|(_, state)| state.clone())
            .collect())
    }

    async fn append_invocation(&self, invocation: &AgentInvocation) -> Result<()> {
        self.inner.write().await.invocations.push(invocation.clone());
        Ok(())
    }

    async fn invocations(&self, run_id: RunId) -> Result<Vec<AgentInvocation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .invocations
            .iter()
            .filter(|i| i.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn save_run(&self, run: &PipelineRun) -> Result<()> {
        self.inner.write().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<PipelineRun>> {
        Ok(self.inner.read().await.runs.get(&run_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Stage, StateDelta};
    use serde_json::json;

    #[tokio::test]
    async fn test_compare_and_set() {
        let backend = MemoryBackend::new();
        let v0 = ProjectState::initial("p", "brief");
        backend.append_version(&v0, None).await.unwrap();
        assert!(matches!(
            backend.append_version(&v0, None).await,
            Err(FoundryError::StateConflict { .. })
        ));

        let v1 = v0.apply(StateDelta::new(Stage::Idea, json!({"title": "t"})));
        assert!(backend.append_version(&v1, Some(3)).await.is_err());
        backend.append_version(&v1, Some(0)).await.unwrap();
        assert_eq!(backend.latest("p").await.unwrap().map(|s| s.version), Some(1));
    }

    #[tokio::test]
    async fn test_projects_do_not_interleave() {
        let backend = MemoryBackend::new();
        backend.append_version(&ProjectState::initial("a", "x"), None).await.unwrap();
        backend.append_version(&ProjectState::initial("ab", "y"), None).await.unwrap();

        let versions = backend.versions("a", 0, 10).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].brief, "x");
        assert!(backend.latest("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let backend = MemoryBackend::new();
        backend.append_version(&ProjectState::initial("a", "x"), None).await.unwrap();
        backend.clear().await;
        assert!(backend.latest("a").await.unwrap().is_none());
    }
}
