//! Stage sequencing and the QA repair loop

use crate::config::ExecutionConfig;
use crate::models::{ProjectState, QaVerdict, Stage};

/// Where the pipeline goes after a committed stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Next(Stage),
    /// QA failed with repair budget left; go back to backend
    Repair,
    Succeeded,
    /// QA failed and the repair cap is spent
    Rejected(QaVerdict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelinePolicy {
    pub repair_cap: u32,
    pub rerun_frontend_on_repair: bool,
}

impl PipelinePolicy {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            repair_cap: config.repair_cap,
            rerun_frontend_on_repair: config.rerun_frontend_on_repair,
        }
    }

    /// First stage without an artifact; a complete project is re-evaluated
    pub fn entry(&self, state: &ProjectState) -> Stage {
        state.first_missing_stage().unwrap_or(Stage::Qa)
    }

    /// `qa_failures` counts failing verdicts in this run, including the one
    /// just committed.
    pub fn after_commit(
        &self,
        stage: Stage,
        state: &ProjectState,
        qa_failures: u32,
        repairing: bool,
    ) -> Route {
        match stage {
            Stage::Idea => Route::Next(Stage::Backend),
            Stage::Backend if repairing && !self.rerun_frontend_on_repair => Route::Next(Stage::Qa),
            Stage::Backend => Route::Next(Stage::Frontend),
            Stage::Frontend => Route::Next(Stage::Qa),
            Stage::Qa => match state.qa_verdict() {
                Some(verdict) if verdict.passed => Route::Succeeded,
                _ if qa_failures < self.repair_cap => Route::Repair,
                verdict => Route::Rejected(verdict.unwrap_or_else(|| QaVerdict::fail(Vec::new()))),
            },
        }
    }
}
