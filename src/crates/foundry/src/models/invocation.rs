use crate::error::{ErrorKind, FoundryError};
use crate::models::{Artifact, ModelRef, ModelSelection, RunId, Stage, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an agent invocation ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Succeeded,
    Failed { kind: ErrorKind, message: String },
}

/// Finalized record of one agent call. Only produced by [`PendingInvocation`],
/// so a record can never change after it is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInvocation {
    pub id: Uuid,
    pub run_id: RunId,
    pub stage: Stage,

    /// 1-based attempt number within the stage pass
    pub attempt: u32,

    /// Model actually called
    pub model: ModelRef,
    pub selection: ModelSelection,

    /// State version the agent read
    pub input_version: u64,

    pub output: Option<Artifact>,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub outcome: InvocationOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AgentInvocation {
    pub fn succeeded(&self) -> bool {
        self.outcome == InvocationOutcome::Succeeded
    }
}

/// An invocation that has been dispatched but not finalized
#[derive(Debug)]
pub struct PendingInvocation {
    id: Uuid,
    run_id: RunId,
    stage: Stage,
    attempt: u32,
    model: ModelRef,
    selection: ModelSelection,
    input_version: u64,
    started_at: DateTime<Utc>,
}

impl PendingInvocation {
    pub fn begin(
        run_id: RunId,
        stage: Stage,
        attempt: u32,
        model: ModelRef,
        selection: ModelSelection,
        input_version: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            stage,
            attempt,
            model,
            selection,
            input_version,
            started_at: Utc::now(),
        }
    }

    pub fn succeed(self, output: Artifact, usage: TokenUsage, cost_usd: f64) -> AgentInvocation {
        self.finish(Some(output), usage, cost_usd, InvocationOutcome::Succeeded)
    }

    pub fn fail(self, error: &FoundryError, usage: TokenUsage, cost_usd: f64) -> AgentInvocation {
        let outcome = InvocationOutcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        };
        self.finish(None, usage, cost_usd, outcome)
    }

    fn finish(
        self,
        output: Option<Artifact>,
        usage: TokenUsage,
        cost_usd: f64,
        outcome: InvocationOutcome,
    ) -> AgentInvocation {
        AgentInvocation {
            id: self.id,
            run_id: self.run_id,
            stage: self.stage,
            attempt: self.attempt,
            model: self.model,
            selection: self.selection,
            input_version: self.input_version,
            output,
            usage,
            cost_usd,
            outcome,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
