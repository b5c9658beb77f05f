//! Pipeline orchestration
//!
//! The orchestrator is the only component that decides what happens after a
//! failure. It walks the stages in order, reserves budget before every model
//! call, commits validated deltas, and records every invocation.

use super::policy::{PipelinePolicy, Route};
use super::retry::{AttemptState, NextAction, RetryPolicy};
use super::{CancelSignal, RunRegistry};
use crate::agents::{Agent, AgentContext, StageAgent};
use crate::config::{BudgetScope, FoundryConfig};
use crate::error::{FoundryError, Result};
use crate::events::{EventLogger, PipelineEvent};
use crate::models::{
    AgentInvocation, PendingInvocation, PipelineRun, ProjectState, RunError, RunId, RunStatus, Stage,
    StageTransition, StateDelta, TransitionOutcome,
};
use crate::provider::ProviderRegistry;
use crate::router::ModelRouter;
use crate::services::{CostTracker, PricingTable};
use crate::store::ProjectStateStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Drives pipeline runs. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<FoundryConfig>,
    store: Arc<ProjectStateStore>,
    router: ModelRouter,
    agents: AgentContext,
    pricing: PricingTable,
    retry: RetryPolicy,
    pipeline: PipelinePolicy,
    shared_budget: Option<CostTracker>,
    registry: RunRegistry,
    events: EventLogger,
}

/// Attempts and spend of one stage pass, kept even when the pass fails
#[derive(Debug, Default)]
struct StageTally {
    attempts: u32,
    cost_usd: f64,
}

impl Orchestrator {
    pub fn new(
        config: Arc<FoundryConfig>,
        store: Arc<ProjectStateStore>,
        providers: ProviderRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let router = ModelRouter::new(config.models.clone())?;
        let shared_budget = match config.budget.scope {
            BudgetScope::Shared => Some(new_tracker(&config)),
            BudgetScope::PerRun => None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                router,
                agents: AgentContext::new(providers, &config.execution),
                pricing: PricingTable::from_config(&config.budget),
                retry: RetryPolicy::from_config(&config.execution),
                pipeline: PipelinePolicy::from_config(&config.execution),
                shared_budget,
                registry: RunRegistry::new(),
                events: EventLogger::default(),
                store,
                config,
            }),
        })
    }

    pub fn store(&self) -> &Arc<ProjectStateStore> {
        &self.inner.store
    }

    pub fn events(&self) -> &EventLogger {
        &self.inner.events
    }

    pub fn config(&self) -> &FoundryConfig {
        &self.inner.config
    }

    /// Process-wide ledger when the budget scope is `shared`
    pub fn shared_budget(&self) -> Option<&CostTracker> {
        self.inner.shared_budget.as_ref()
    }

    /// Run the pipeline for a project to a terminal status
    pub async fn run(&self, project_id: &str) -> Result<PipelineRun> {
        self.run_with_hint(project_id, None).await
    }

    pub async fn run_with_hint(&self, project_id: &str, task_hint: Option<&str>) -> Result<PipelineRun> {
        let (run, cancel) = self.prepare(project_id).await?;
        Ok(self.execute(run, cancel, task_hint.map(str::to_string)).await)
    }

    /// Start a run in the background
    pub async fn spawn(&self, project_id: &str) -> Result<RunId> {
        self.spawn_with_hint(project_id, None).await
    }

    pub async fn spawn_with_hint(&self, project_id: &str, task_hint: Option<String>) -> Result<RunId> {
        let (run, cancel) = self.prepare(project_id).await?;
        let run_id = run.id;
        let this = self.clone();
        tokio::spawn(async move {
            this.execute(run, cancel, task_hint).await;
        });
        Ok(run_id)
    }

    /// Latest snapshot of a run. Pure read.
    pub async fn status(&self, run_id: RunId) -> Result<PipelineRun> {
        if let Some(run) = self.inner.registry.snapshot(run_id) {
            return Ok(run);
        }
        self.inner
            .store
            .load_run(run_id)
            .await?
            .ok_or_else(|| FoundryError::NotFound(format!("Run {}", run_id)))
    }

    /// Request cancellation. Returns false when the run already finished.
    pub async fn cancel(&self, run_id: RunId) -> Result<bool> {
        let registry = &self.inner.registry;
        match registry.cancel_signal(run_id) {
            Some(signal) => {
                let finished = registry
                    .snapshot(run_id)
                    .map(|run| run.is_finished())
                    .unwrap_or(true);
                Ok(!finished && signal.cancel())
            }
            None => match self.inner.store.load_run(run_id).await? {
                Some(_) => Ok(false),
                None => Err(FoundryError::NotFound(format!("Run {}", run_id))),
            },
        }
    }

    /// Wait until a run reaches a terminal status
    pub async fn wait(&self, run_id: RunId) -> Result<PipelineRun> {
        let mut events = self.inner.events.subscribe();
        loop {
            let run = self.status(run_id).await?;
            if run.is_finished() {
                return Ok(run);
            }
            match events.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return self.status(run_id).await,
            }
        }
    }

    pub fn active_runs(&self) -> Vec<RunId> {
        self.inner.registry.active()
    }

    async fn prepare(&self, project_id: &str) -> Result<(PipelineRun, CancelSignal)> {
        let state = self.inner.store.get(project_id).await?;
        let run = PipelineRun::new(project_id, state.version);
        let cancel = CancelSignal::new();
        self.inner.store.save_run(&run).await?;
        self.inner.registry.register(run.clone(), cancel.clone());
        Ok((run, cancel))
    }

    async fn execute(&self, mut run: PipelineRun, cancel: CancelSignal, task_hint: Option<String>) -> PipelineRun {
        let inner = &self.inner;
        let tracker = match &inner.shared_budget {
            Some(shared) => shared.clone(),
            None => new_tracker(&inner.config),
        };

        info!(run_id = %run.id, project_id = %run.project_id, base_version = run.base_version, "Pipeline run started");
        inner
            .events
            .log(PipelineEvent::run_started(run.id, &run.project_id, run.base_version));

        let outcome = self.drive(&mut run, &cancel, &tracker, task_hint.as_deref()).await;
        let (status, error) = match outcome {
            Ok(()) => (RunStatus::Succeeded, None),
            Err(e) => {
                let status = match e {
                    FoundryError::BudgetExceeded { .. } => RunStatus::HaltedBudget,
                    _ => RunStatus::Failed,
                };
                (status, Some(RunError::from_error(&e, run.current_stage)))
            }
        };

        run.finish(status, error);
        if self.persist(&run).await {
            // Status queries are answered from the stored record from here on
            inner.registry.remove(run.id);
        }
        info!(
            run_id = %run.id,
            status = %run.status,
            total_cost_usd = run.total_cost_usd,
            error = run.last_error.as_ref().map(|e| e.message.as_str()).unwrap_or(""),
            "Pipeline run finished"
        );
        inner
            .events
            .log(PipelineEvent::run_finished(run.id, run.status, run.total_cost_usd));
        run
    }

    /// Stage sequencing state machine
    async fn drive(
        &self,
        run: &mut PipelineRun,
        cancel: &CancelSignal,
        tracker: &CostTracker,
        task_hint: Option<&str>,
    ) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.store.get(&run.project_id).await?;
        let mut stage = inner.pipeline.entry(&state);
        let mut repairing = false;
        let mut budget_warned = false;

        loop {
            if cancel.is_cancelled() {
                run.current_stage = Some(stage);
                return Err(cancelled(stage));
            }

            run.mark_running(stage);
            self.persist(run).await;
            inner.events.log(PipelineEvent::stage_started(run.id, stage));
            info!(run_id = %run.id, stage = %stage, version = state.version, "Stage started");

            let started_at = Utc::now();
            let mut tally = StageTally::default();
            let result = self
                .run_stage(run, stage, &state, cancel, tracker, task_hint, &mut tally)
                .await;
            self.record_transition(run, stage, &tally, started_at, &result).await;
            state = result?;

            inner.events.log(PipelineEvent::stage_committed(
                run.id,
                stage,
                state.version,
                tally.cost_usd,
            ));
            let budget = tracker.snapshot();
            if !budget_warned && budget.usage_percentage() >= inner.config.budget.alert_threshold {
                budget_warned = true;
                inner
                    .events
                    .log(PipelineEvent::budget_warning(run.id, budget.remaining_usd()));
            }

            if stage == Stage::Qa && state.qa_verdict().map(|v| !v.passed).unwrap_or(true) {
                run.qa_failures += 1;
            }

            match inner.pipeline.after_commit(stage, &state, run.qa_failures, repairing) {
                Route::Next(next) => stage = next,
                Route::Repair => {
                    warn!(run_id = %run.id, qa_failures = run.qa_failures, "QA failed, routing back to backend");
                    inner
                        .events
                        .log(PipelineEvent::repair_scheduled(run.id, run.qa_failures));
                    repairing = true;
                    stage = Stage::Backend;
                }
                Route::Succeeded => return Ok(()),
                Route::Rejected(verdict) => {
                    return Err(FoundryError::QaRejected {
                        failures: run.qa_failures,
                        findings: verdict.findings,
                    })
                }
            }
        }
    }

    /// Attempt loop for one stage pass. Returns the committed state.
    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        run: &mut PipelineRun,
        stage: Stage,
        state: &ProjectState,
        cancel: &CancelSignal,
        tracker: &CostTracker,
        task_hint: Option<&str>,
        tally: &mut StageTally,
    ) -> Result<ProjectState> {
        let inner = &self.inner;
        let budget = &inner.config.budget;

        let remaining = tracker.remaining();
        if remaining < budget.min_stage_cost_usd {
            warn!(run_id = %run.id, stage = %stage, remaining_usd = remaining, "Remaining budget below minimum stage cost");
            return Err(FoundryError::BudgetExceeded {
                requested: budget.min_stage_cost_usd,
                remaining,
            });
        }

        let selection = inner.router.select(stage, task_hint)?;
        let agent = StageAgent::for_stage(stage, inner.agents.clone());
        let estimate = budget.stage_estimate(stage);
        let stage_timeout = inner.config.execution.stage_timeout();
        let mut attempts = AttemptState::new(selection.len());
        let mut snapshot = state.clone();
        let mut conflict_replayed = false;

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(stage));
            }

            let attempt = attempts.begin_attempt();
            tally.attempts = attempts.attempts();
            let model = selection
                .model_at(attempts.model_index())
                .unwrap_or(&selection.primary)
                .clone();

            // Nothing is dispatched unless the estimate fits
            let token = tracker.reserve(estimate)?;
            let pending = PendingInvocation::begin(
                run.id,
                stage,
                attempt,
                model.clone(),
                selection.clone(),
                snapshot.version,
            );
            debug!(run_id = %run.id, stage = %stage, attempt, model = %model, "Dispatching agent");

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(cancelled(stage)),
                result = timeout(stage_timeout, agent.execute(&snapshot, &model)) => match result {
                    Ok(result) => result,
                    Err(_) => Err(FoundryError::Timeout {
                        model: model.to_string(),
                        duration_ms: stage_timeout.as_millis() as u64,
                    }),
                },
            };

            match outcome {
                Ok(output) => {
                    let usage = output.usage;
                    let charge = tracker.commit(token, inner.pricing.cost(&model, &usage))?;
                    tally.cost_usd += charge.charged_usd;

                    match self.commit_delta(run, stage, output.delta, &snapshot).await {
                        Ok(next) => {
                            let artifact = next.latest(stage).cloned().ok_or_else(|| {
                                FoundryError::Validation(format!("Committed state has no {} artifact", stage))
                            })?;
                            self.record_invocation(run, pending.succeed(artifact, usage, charge.charged_usd))
                                .await;
                            info!(run_id = %run.id, stage = %stage, version = next.version, cost_usd = charge.charged_usd, "Stage committed");
                            return Ok(next);
                        }
                        Err(e @ FoundryError::StateConflict { .. }) if !conflict_replayed => {
                            warn!(run_id = %run.id, stage = %stage, error = %e, "Commit raced, reloading state");
                            self.record_invocation(run, pending.fail(&e, usage, charge.charged_usd))
                                .await;
                            conflict_replayed = true;
                            attempts.forgive_last();
                            snapshot = inner.store.get(&run.project_id).await?;
                        }
                        Err(e) => {
                            self.record_invocation(run, pending.fail(&e, usage, charge.charged_usd))
                                .await;
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    // Malformed answers still burned tokens
                    let usage = e.usage().copied().unwrap_or_default();
                    let charged = if usage.is_empty() {
                        tracker.release(token)?;
                        0.0
                    } else {
                        tracker.commit(token, inner.pricing.cost(&model, &usage))?.charged_usd
                    };
                    tally.cost_usd += charged;
                    self.record_invocation(run, pending.fail(&e, usage, charged)).await;

                    if matches!(e, FoundryError::Cancelled(_)) {
                        return Err(e);
                    }
                    inner.events.log(PipelineEvent::attempt_failed(
                        run.id,
                        stage,
                        attempt,
                        model.to_string(),
                        e.kind(),
                    ));

                    let previous_index = attempts.model_index();
                    match attempts.on_failure(&inner.retry, &e) {
                        NextAction::Fail => {
                            warn!(run_id = %run.id, stage = %stage, attempt, error = %e, "Stage failed, no retry left");
                            return Err(e);
                        }
                        NextAction::Retry { delay, model_index } => {
                            if model_index != previous_index {
                                let next_model = selection.model_at(model_index).unwrap_or(&selection.primary);
                                warn!(run_id = %run.id, stage = %stage, from = %model, to = %next_model, "Falling back to next model");
                                inner.events.log(PipelineEvent::fallback_selected(
                                    run.id,
                                    stage,
                                    model.to_string(),
                                    next_model.to_string(),
                                ));
                            }
                            warn!(
                                run_id = %run.id,
                                stage = %stage,
                                attempt,
                                retry_limit = inner.retry.retry_limit,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "Attempt failed, will retry"
                            );
                            if !delay.is_zero() {
                                tokio::select! {
                                    _ = cancel.cancelled() => return Err(cancelled(stage)),
                                    _ = sleep(delay) => {}
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn commit_delta(
        &self,
        run: &PipelineRun,
        stage: Stage,
        delta: StateDelta,
        snapshot: &ProjectState,
    ) -> Result<ProjectState> {
        delta.validate_for(stage)?;
        let store = &self.inner.store;
        let version = store.commit(&run.project_id, stage, delta, snapshot.version).await?;
        store.get_version(&run.project_id, version).await
    }

    /// Append to the run record; the invocation log write is best effort
    /// since the run snapshot carries every invocation too
    async fn record_invocation(&self, run: &mut PipelineRun, invocation: AgentInvocation) {
        if let Err(e) = self.inner.store.record_invocation(&invocation).await {
            warn!(
                run_id = %run.id,
                stage = %invocation.stage,
                attempt = invocation.attempt,
                error = %e,
                "Failed to persist invocation record"
            );
        }
        run.record_invocation(invocation);
        self.inner.registry.update(run);
    }

    async fn record_transition(
        &self,
        run: &mut PipelineRun,
        stage: Stage,
        tally: &StageTally,
        started_at: DateTime<Utc>,
        result: &Result<ProjectState>,
    ) {
        let outcome = match result {
            Ok(state) => TransitionOutcome::Committed { version: state.version },
            Err(FoundryError::BudgetExceeded { .. }) => TransitionOutcome::HaltedBudget,
            Err(FoundryError::Cancelled(_)) => TransitionOutcome::Cancelled,
            Err(e) => TransitionOutcome::Failed { kind: e.kind() },
        };
        run.record_transition(StageTransition {
            stage,
            attempts: tally.attempts,
            cost_usd: tally.cost_usd,
            outcome,
            started_at,
            finished_at: Utc::now(),
        });
        self.persist(run).await;
    }

    /// Publish the run snapshot in memory and, best effort, to the backend.
    /// Returns whether the backend accepted it.
    async fn persist(&self, run: &PipelineRun) -> bool {
        self.inner.registry.update(run);
        match self.inner.store.save_run(run).await {
            Ok(()) => true,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "Failed to persist run snapshot");
                false
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("active_runs", &self.inner.registry.active().len())
            .field("budget_scope", &self.inner.config.budget.scope)
            .finish()
    }
}

fn new_tracker(config: &FoundryConfig) -> CostTracker {
    CostTracker::with_limit(config.budget.cost_limit_usd)
        .with_alert_threshold(config.budget.alert_threshold)
}

fn cancelled(stage: Stage) -> FoundryError {
    FoundryError::Cancelled(format!("cancelled during stage {}", stage))
}
