//! In-process index of runs and their cancel signals

use super::CancelSignal;
use crate::models::{PipelineRun, RunId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
struct Entry {
    run: PipelineRun,
    cancel: CancelSignal,
}

#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<RunId, Entry>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, run: PipelineRun, cancel: CancelSignal) {
        self.runs.write().insert(run.id, Entry { run, cancel });
    }

    /// Replace the stored snapshot of a registered run
    pub fn update(&self, run: &PipelineRun) {
        if let Some(entry) = self.runs.write().get_mut(&run.id) {
            entry.run = run.clone();
        }
    }

    pub fn snapshot(&self, run_id: RunId) -> Option<PipelineRun> {
        self.runs.read().get(&run_id).map(|e| e.run.clone())
    }

    pub fn cancel_signal(&self, run_id: RunId) -> Option<CancelSignal> {
        self.runs.read().get(&run_id).map(|e| e.cancel.clone())
    }

    /// Runs that have not reached a terminal status
    pub fn active(&self) -> Vec<RunId> {
        self.runs
            .read()
            .values()
            .filter(|e| !e.run.is_finished())
            .map(|e| e.run.id)
            .collect()
    }

    /// Forget a run; callers fall back to the persisted record
    pub fn remove(&self, run_id: RunId) -> Option<PipelineRun> {
        self.runs.write().remove(&run_id).map(|e| e.run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunStatus, Stage};

    #[test]
    fn test_register_update_snapshot() {
        let registry = RunRegistry::new();
        let mut run = PipelineRun::new("p", 0);
        registry.register(run.clone(), CancelSignal::new());
        assert_eq!(registry.active(), vec![run.id]);

        run.mark_running(Stage::Idea);
        registry.update(&run);
        assert_eq!(registry.snapshot(run.id).unwrap().status, RunStatus::Running);

        run.finish(RunStatus::Succeeded, None);
        registry.update(&run);
        assert!(registry.active().is_empty());

        let removed = registry.remove(run.id).unwrap();
        assert_eq!(removed.status, RunStatus::Succeeded);
        assert!(registry.snapshot(run.id).is_none());
        assert!(registry.cancel_signal(run.id).is_none());
        assert!(registry.remove(run.id).is_none());
    }

    #[test]
    fn test_cancel_signal_is_shared() {
        let registry = RunRegistry::new();
        let run = PipelineRun::new("p", 0);
        let signal = CancelSignal::new();
        registry.register(run.clone(), signal.clone());
        registry.cancel_signal(run.id).unwrap().cancel();
        assert!(signal.is_cancelled());
    }
}
