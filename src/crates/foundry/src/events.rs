//! Pipeline events for observability
//!
//! Every lifecycle transition of a run is emitted as a [`PipelineEvent`].
//! The [`EventLogger`] writes each event through `tracing` and fans it out
//! to any subscribers.

use crate::error::ErrorKind;
use crate::models::{RunId, RunStatus, Stage};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Events emitted while a pipeline run executes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: RunId,
        project_id: String,
        base_version: u64,
        timestamp: i64,
    },
    StageStarted {
        run_id: RunId,
        stage: Stage,
        timestamp: i64,
    },
    AttemptFailed {
        run_id: RunId,
        stage: Stage,
        attempt: u32,
        model: String,
        kind: ErrorKind,
        timestamp: i64,
    },
    /// The next attempt moves to a different model
    FallbackSelected {
        run_id: RunId,
        stage: Stage,
        from_model: String,
        to_model: String,
        timestamp: i64,
    },
    StageCommitted {
        run_id: RunId,
        stage: Stage,
        version: u64,
        cost_usd: f64,
        timestamp: i64,
    },
    /// QA failed and the run routes back for repair
    RepairScheduled {
        run_id: RunId,
        qa_failures: u32,
        timestamp: i64,
    },
    BudgetWarning {
        run_id: RunId,
        remaining_usd: f64,
        timestamp: i64,
    },
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        total_cost_usd: f64,
        timestamp: i64,
    },
}

fn now() -> i64 {
    Utc::now().timestamp_millis()
}

impl PipelineEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StageStarted { run_id, .. }
            | Self::AttemptFailed { run_id, .. }
            | Self::FallbackSelected { run_id, .. }
            | Self::StageCommitted { run_id, .. }
            | Self::RepairScheduled { run_id, .. }
            | Self::BudgetWarning { run_id, .. }
            | Self::RunFinished { run_id, .. } => *run_id,
        }
    }

    /// Milliseconds since the Unix epoch
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::RunStarted { timestamp, .. }
            | Self::StageStarted { timestamp, .. }
            | Self::AttemptFailed { timestamp, .. }
            | Self::FallbackSelected { timestamp, .. }
            | Self::StageCommitted { timestamp, .. }
            | Self::RepairScheduled { timestamp, .. }
            | Self::BudgetWarning { timestamp, .. }
            | Self::RunFinished { timestamp, .. } => *timestamp,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::RunStarted { project_id, base_version, .. } => {
                format!("Run started for {} at version {}", project_id, base_version)
            }
            Self::StageStarted { stage, .. } => format!("Stage {} started", stage),
            Self::AttemptFailed { stage, attempt, model, kind, .. } => {
                format!("Stage {} attempt {} on {} failed: {}", stage, attempt, model, kind)
            }
            Self::FallbackSelected { stage, from_model, to_model, .. } => {
                format!("Stage {} falling back from {} to {}", stage, from_model, to_model)
            }
            Self::StageCommitted { stage, version, cost_usd, .. } => {
                format!("Stage {} committed as version {} (${:.4})", stage, version, cost_usd)
            }
            Self::RepairScheduled { qa_failures, .. } => {
                format!("QA failed ({}), routing back to backend", qa_failures)
            }
            Self::BudgetWarning { remaining_usd, .. } => {
                format!("Budget running low: ${:.4} remaining", remaining_usd)
            }
            Self::RunFinished { status, total_cost_usd, .. } => {
                format!("Run finished: {} (${:.4})", status, total_cost_usd)
            }
        }
    }

    pub fn run_started(run_id: RunId, project_id: impl Into<String>, base_version: u64) -> Self {
        Self::RunStarted {
            run_id,
            project_id: project_id.into(),
            base_version,
            timestamp: now(),
        }
    }

    pub fn stage_started(run_id: RunId, stage: Stage) -> Self {
        Self::StageStarted { run_id, stage, timestamp: now() }
    }

    pub fn attempt_failed(
        run_id: RunId,
        stage: Stage,
        attempt: u32,
        model: impl Into<String>,
        kind: ErrorKind,
    ) -> Self {
        Self::AttemptFailed {
            run_id,
            stage,
            attempt,
            model: model.into(),
            kind,
            timestamp: now(),
        }
    }

    pub fn fallback_selected(
        run_id: RunId,
        stage: Stage,
        from_model: impl Into<String>,
        to_model: impl Into<String>,
    ) -> Self {
        Self::FallbackSelected {
            run_id,
            stage,
            from_model: from_model.into(),
            to_model: to_model.into(),
            timestamp: now(),
        }
    }

    pub fn stage_committed(run_id: RunId, stage: Stage, version: u64, cost_usd: f64) -> Self {
        Self::StageCommitted {
            run_id,
            stage,
            version,
            cost_usd,
            timestamp: now(),
        }
    }

    pub fn repair_scheduled(run_id: RunId, qa_failures: u32) -> Self {
        Self::RepairScheduled { run_id, qa_failures, timestamp: now() }
    }

    pub fn budget_warning(run_id: RunId, remaining_usd: f64) -> Self {
        Self::BudgetWarning { run_id, remaining_usd, timestamp: now() }
    }

    pub fn run_finished(run_id: RunId, status: RunStatus, total_cost_usd: f64) -> Self {
        Self::RunFinished {
            run_id,
            status,
            total_cost_usd,
            timestamp: now(),
        }
    }
}

/// Logs pipeline events and broadcasts them to subscribers
#[derive(Debug, Clone)]
pub struct EventLogger {
    enabled: bool,
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventLogger {
    pub fn new(enabled: bool) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { enabled, sender }
    }

    pub fn log(&self, event: PipelineEvent) {
        if !self.enabled {
            return;
        }

        tracing::info!(
            run_id = %event.run_id(),
            timestamp = event.timestamp(),
            description = %event.description(),
            "Pipeline event"
        );
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Receive every event logged after this call
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new(true)
    }
}
