use crate::error::{ErrorKind, FoundryError};
use crate::models::{AgentInvocation, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RunId = Uuid;

/// Pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    HaltedBudget,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::HaltedBudget => "halted_budget",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::HaltedBudget)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Last error of a run, as shown to users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    pub stage: Option<Stage>,
}

impl RunError {
    pub fn from_error(error: &FoundryError, stage: Option<Stage>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            stage,
        }
    }
}

/// How a stage pass ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Committed { version: u64 },
    Failed { kind: ErrorKind },
    HaltedBudget,
    Cancelled,
}

/// One entry in a run's ordered stage log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: Stage,
    pub attempts: u32,
    pub cost_usd: f64,
    pub outcome: TransitionOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// One execution of the stage sequence for a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub project_id: String,
    pub status: RunStatus,
    pub current_stage: Option<Stage>,

    /// State version the run started from
    pub base_version: u64,

    /// Latest state version this run committed (or started from)
    pub head_version: u64,

    pub transitions: Vec<StageTransition>,
    pub invocations: Vec<AgentInvocation>,

    /// Failing QA verdicts seen so far
    pub qa_failures: u32,

    pub total_cost_usd: f64,
    pub last_error: Option<RunError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(project_id: impl Into<String>, base_version: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            status: RunStatus::Pending,
            current_stage: None,
            base_version,
            head_version: base_version,
            transitions: Vec::new(),
            invocations: Vec::new(),
            qa_failures: 0,
            total_cost_usd: 0.0,
            last_error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self, stage: Stage) {
        self.status = RunStatus::Running;
        self.current_stage = Some(stage);
        self.updated_at = Utc::now();
    }

    pub fn record_invocation(&mut self, invocation: AgentInvocation) {
        self.total_cost_usd += invocation.cost_usd;
        self.invocations.push(invocation);
        self.updated_at = Utc::now();
    }

    pub fn record_transition(&mut self, transition: StageTransition) {
        if let TransitionOutcome::Committed { version } = transition.outcome {
            self.head_version = version;
        }
        self.transitions.push(transition);
        self.updated_at = Utc::now();
    }

    /// Move to a terminal status. A finished run is never reopened.
    pub fn finish(&mut self, status: RunStatus, error: Option<RunError>) {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        self.status = status;
        self.last_error = error;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Stages this run committed, in commit order
    pub fn committed_stages(&self) -> Vec<Stage> {
        self.transitions
            .iter()
            .filter(|t| matches!(t.outcome, TransitionOutcome::Committed { .. }))
            .map(|t| t.stage)
            .collect()
    }

    /// Invocations made for a given stage
    pub fn invocations_for(&self, stage: Stage) -> impl Iterator<Item = &AgentInvocation> {
        self.invocations.iter().filter(move |i| i.stage == stage)
    }
}
