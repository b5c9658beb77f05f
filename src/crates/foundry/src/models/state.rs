use crate::models::{Artifact, QaVerdict, Stage, StateDelta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One committed version of a project's shared state.
///
/// Each stage slot is an append-only list of artifact revisions; a new
/// version only ever adds to it, so every version is a superset of the
/// version before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub project_id: String,

    /// Monotonic per project, 0 for the freshly created project
    pub version: u64,

    /// Project brief the idea stage starts from
    pub brief: String,

    #[serde(default)]
    pub stages: BTreeMap<Stage, Vec<Artifact>>,

    pub committed_at: DateTime<Utc>,
}

impl ProjectState {
    /// Version 0 of a new project
    pub fn initial(project_id: impl Into<String>, brief: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            version: 0,
            brief: brief.into(),
            stages: BTreeMap::new(),
            committed_at: Utc::now(),
        }
    }

    /// Latest revision committed for a stage
    pub fn latest(&self, stage: Stage) -> Option<&Artifact> {
        self.stages.get(&stage).and_then(|revisions| revisions.last())
    }

    pub fn revisions(&self, stage: Stage) -> &[Artifact] {
        self.stages.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has(&self, stage: Stage) -> bool {
        self.latest(stage).is_some()
    }

    /// Number of artifacts across all slots
    pub fn artifact_count(&self) -> usize {
        self.stages.values().map(Vec::len).sum()
    }

    /// Stages holding at least one artifact
    pub fn committed_stages(&self) -> Vec<Stage> {
        Stage::ALL.into_iter().filter(|s| self.has(*s)).collect()
    }

    /// First stage in pipeline order without an artifact
    pub fn first_missing_stage(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| !self.has(*s))
    }

    /// Verdict of the most recent QA evaluation
    pub fn qa_verdict(&self) -> Option<QaVerdict> {
        self.latest(Stage::Qa)
            .and_then(|artifact| QaVerdict::from_document(&artifact.document))
    }

    /// Build the next version with `delta` appended to its stage slot
    pub fn apply(&self, delta: StateDelta) -> ProjectState {
        let version = self.version + 1;
        let mut next = self.clone();
        let slot = next.stages.entry(delta.stage).or_default();
        let revision = slot.len() as u32 + 1;
        slot.push(Artifact::from_delta(delta, revision, version));
        next.version = version;
        next.committed_at = Utc::now();
        next
    }

    /// True when every artifact in `earlier` is present, unchanged, in `self`
    pub fn is_superset_of(&self, earlier: &ProjectState) -> bool {
        earlier.stages.iter().all(|(stage, old)| {
            let new = self.revisions(*stage);
            new.len() >= old.len() && new.iter().zip(old.iter()).all(|(a, b)| a == b)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_appends_revision() {
        let v0 = ProjectState::initial("p1", "todo app");
        let v1 = v0.apply(StateDelta::new(Stage::Idea, json!({"title": "Todo"})));
        let v2 = v1.apply(StateDelta::new(Stage::Backend, json!({"summary": "api"})));
        let v3 = v2.apply(StateDelta::new(Stage::Backend, json!({"summary": "api v2"})));

        assert_eq!(v3.version, 3);
        assert_eq!(v3.revisions(Stage::Backend).len(), 2);
        assert_eq!(v3.latest(Stage::Backend).unwrap().revision, 2);
        assert_eq!(v3.latest(Stage::Backend).unwrap().version, 3);
        assert_eq!(v3.artifact_count(), 3);
        assert!(v3.is_superset_of(&v2));
        assert!(v2.is_superset_of(&v1));
        assert!(!v1.is_superset_of(&v2));
    }

    #[test]
    fn test_first_missing_stage() {
        let v0 = ProjectState::initial("p1", "brief");
        assert_eq!(v0.first_missing_stage(), Some(Stage::Idea));
        let v1 = v0.apply(StateDelta::new(Stage::Idea, json!({"title": "x"})));
        assert_eq!(v1.first_missing_stage(), Some(Stage::Backend));
        assert_eq!(v1.committed_stages(), vec![Stage::Idea]);
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let v1 = ProjectState::initial("p1", "brief")
            .apply(StateDelta::new(Stage::Qa, QaVerdict::pass().to_document()));
        let json = serde_json::to_string(&v1).unwrap();
        let back: ProjectState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v1);
        assert_eq!(back.qa_verdict(), Some(QaVerdict::pass()));
    }
}
