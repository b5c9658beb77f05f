//! End-to-end pipeline runs against a scripted provider

mod common;

use async_trait::async_trait;
use common::*;
use foundry::config::BudgetScope;
use foundry::models::{InvocationOutcome, TransitionOutcome};
use foundry::{
    AgentInvocation, ErrorKind, FoundryError, MemoryBackend, PipelineEvent, PipelineRun,
    ProjectState, ProjectStateStore, ProviderResponse, Result, RunId, RunStatus, Stage,
    StateBackend, StateDelta,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SECOND: &str = "notes";

/// Store with two projects ready to run
async fn two_projects() -> Arc<ProjectStateStore> {
    let store = Arc::new(ProjectStateStore::in_memory());
    store.create(PROJECT, "A todo list web app").await.unwrap();
    store.create(SECOND, "A notes app").await.unwrap();
    store
}

/// Memory backend whose invocation log always fails
struct BrokenInvocationLog(MemoryBackend);

#[async_trait]
impl StateBackend for BrokenInvocationLog {
    async fn append_version(&self, state: &ProjectState, expected_latest: Option<u64>) -> Result<()> {
        self.0.append_version(state, expected_latest).await
    }

    async fn latest(&self, project_id: &str) -> Result<Option<ProjectState>> {
        self.0.latest(project_id).await
    }

    async fn get_version(&self, project_id: &str, version: u64) -> Result<Option<ProjectState>> {
        self.0.get_version(project_id, version).await
    }

    async fn versions(&self, project_id: &str, from: u64, limit: usize) -> Result<Vec<ProjectState>> {
        self.0.versions(project_id, from, limit).await
    }

    async fn append_invocation(&self, _invocation: &AgentInvocation) -> Result<()> {
        Err(FoundryError::Database("invocation log unavailable".to_string()))
    }

    async fn invocations(&self, run_id: RunId) -> Result<Vec<AgentInvocation>> {
        self.0.invocations(run_id).await
    }

    async fn save_run(&self, run: &PipelineRun) -> Result<()> {
        self.0.save_run(run).await
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<PipelineRun>> {
        self.0.load_run(run_id).await
    }
}

#[tokio::test]
async fn test_happy_path_commits_every_stage() {
    let h = harness(test_config(), happy_path()).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(
        run.committed_stages(),
        vec![Stage::Idea, Stage::Backend, Stage::Frontend, Stage::Qa]
    );
    assert_eq!(run.invocations.len(), 4);
    assert!(run.invocations.iter().all(|i| i.succeeded()));
    assert_eq!(run.base_version, 0);
    assert_eq!(run.head_version, 4);
    assert_close(run.total_cost_usd, 1.6);
    assert!(run.last_error.is_none());

    let state = h.store.get(PROJECT).await.unwrap();
    assert_eq!(state.version, 4);
    assert_eq!(state.artifact_count(), 4);
    assert!(state.qa_verdict().unwrap().passed);
    assert_eq!(h.provider.call_count(), 4);
}

#[tokio::test]
async fn test_invocations_are_persisted() {
    let h = harness(test_config(), happy_path()).await;

    let run = h.engine.run(PROJECT).await.unwrap();
    let stored = h.store.invocations(run.id).await.unwrap();

    assert_eq!(stored.len(), 4);
    let stages: Vec<Stage> = stored.iter().map(|i| i.stage).collect();
    assert_eq!(stages, vec![Stage::Idea, Stage::Backend, Stage::Frontend, Stage::Qa]);
    assert_eq!(stored[1].input_version, 1);
    assert_eq!(stored[1].output.as_ref().unwrap().version, 2);
}

#[tokio::test]
async fn test_budget_halts_before_third_stage() {
    let mut config = test_config();
    config.budget.cost_limit_usd = 1.0;
    let h = harness(config, happy_path()).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::HaltedBudget);
    assert_eq!(run.committed_stages(), vec![Stage::Idea, Stage::Backend]);
    assert_close(run.total_cost_usd, 0.8);
    assert_eq!(run.last_error.as_ref().unwrap().kind, ErrorKind::BudgetExceeded);
    assert_eq!(run.transitions.last().unwrap().outcome, TransitionOutcome::HaltedBudget);

    // The frontend agent was never dispatched
    assert_eq!(h.provider.call_count(), 2);
    assert_eq!(run.invocations_for(Stage::Frontend).count(), 0);

    let state = h.store.get(PROJECT).await.unwrap();
    assert_eq!(state.committed_stages(), vec![Stage::Idea, Stage::Backend]);
    assert_eq!(state.version, 2);
}

#[tokio::test]
async fn test_qa_rejection_after_repair_cap() {
    let replies = vec![
        idea(),
        backend(),
        frontend(),
        qa_fail("missing auth"),
        backend(),
        qa_fail("still missing auth"),
    ];
    let h = harness(test_config(), replies).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.qa_failures, 2);
    let error = run.last_error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::QaRejected);
    assert!(error.message.contains("still missing auth"));
    assert_eq!(
        run.committed_stages(),
        vec![
            Stage::Idea,
            Stage::Backend,
            Stage::Frontend,
            Stage::Qa,
            Stage::Backend,
            Stage::Qa
        ]
    );
    assert_eq!(h.provider.call_count(), 6);

    let state = h.store.get(PROJECT).await.unwrap();
    assert_eq!(state.revisions(Stage::Backend).len(), 2);
    assert_eq!(state.revisions(Stage::Frontend).len(), 1);
    assert_eq!(state.revisions(Stage::Qa).len(), 2);
}

#[tokio::test]
async fn test_repair_passes_findings_to_backend() {
    let replies = vec![
        idea(),
        backend(),
        frontend(),
        qa_fail("no input validation"),
        backend(),
        qa_pass(),
    ];
    let h = harness(test_config(), replies).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.qa_failures, 1);
    let repair_call = &h.provider.calls()[4];
    assert!(repair_call.user.contains("no input validation"));
}

#[tokio::test]
async fn test_repair_can_rerun_frontend() {
    let mut config = test_config();
    config.execution.rerun_frontend_on_repair = true;
    let replies = vec![
        idea(),
        backend(),
        frontend(),
        qa_fail("broken layout"),
        backend(),
        frontend(),
        qa_pass(),
    ];
    let h = harness(config, replies).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.committed_stages()[4..], [Stage::Backend, Stage::Frontend, Stage::Qa]);
    assert_eq!(h.provider.remaining(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_limit_bounds_attempts() {
    let mut config = test_config();
    config.models.fallbacks.clear();
    let replies = (0..10).map(|_| Reply::ProviderError).collect();
    let h = harness(config, replies).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.last_error.as_ref().unwrap().kind, ErrorKind::ProviderError);
    assert_eq!(h.provider.call_count(), 3);
    assert_eq!(run.invocations_for(Stage::Idea).count(), 3);

    let transition = run.transitions.last().unwrap();
    assert_eq!(transition.attempts, 3);
    assert_eq!(
        transition.outcome,
        TransitionOutcome::Failed { kind: ErrorKind::ProviderError }
    );
    assert_close(run.total_cost_usd, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_provider_errors_fail_over_to_fallback() {
    let replies = vec![Reply::ProviderError, idea(), backend(), frontend(), qa_pass()];
    let h = harness(test_config(), replies).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    let models = h.provider.models_called();
    assert_eq!(models[0], PRIMARY);
    assert_eq!(models[1], FALLBACK_A);
    // Each stage starts over on the primary
    assert_eq!(models[2], PRIMARY);
}

#[tokio::test]
async fn test_malformed_output_moves_to_next_model() {
    let replies = vec![
        idea(),
        Reply::Text("I'd be happy to help with the backend!".to_string()),
        backend(),
        frontend(),
        qa_pass(),
    ];
    let h = harness(test_config(), replies).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(h.provider.models_called()[1..3], [PRIMARY.to_string(), FALLBACK_A.to_string()]);

    let backend_calls: Vec<_> = run.invocations_for(Stage::Backend).collect();
    assert_eq!(backend_calls.len(), 2);
    assert!(matches!(
        backend_calls[0].outcome,
        InvocationOutcome::Failed { kind: ErrorKind::MalformedOutput, .. }
    ));
    assert_eq!(backend_calls[1].model.to_string(), FALLBACK_A);
    assert_eq!(backend_calls[1].attempt, 2);

    // Tokens burned by the malformed answer are still charged
    assert_close(backend_calls[0].cost_usd, 0.4);
    assert_close(run.total_cost_usd, 2.0);
}

#[tokio::test]
async fn test_malformed_with_no_fallback_left_fails() {
    let mut config = test_config();
    config.models.fallbacks.clear();
    let replies = vec![Reply::Text("no json here".to_string())];
    let h = harness(config, replies).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.last_error.as_ref().unwrap().kind, ErrorKind::MalformedOutput);
    assert_eq!(h.provider.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_retries_same_model() {
    let mut replies = vec![Reply::Hang];
    replies.extend(happy_path());
    let h = harness(test_config(), replies).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    let idea_calls: Vec<_> = run.invocations_for(Stage::Idea).collect();
    assert_eq!(idea_calls.len(), 2);
    assert!(matches!(
        idea_calls[0].outcome,
        InvocationOutcome::Failed { kind: ErrorKind::Timeout, .. }
    ));
    assert_eq!(idea_calls[0].model, idea_calls[1].model);
    assert_close(idea_calls[0].cost_usd, 0.0);
}

#[tokio::test]
async fn test_cancel_mid_stage_releases_reservation() {
    let mut config = test_config();
    config.budget.scope = BudgetScope::Shared;
    config.execution.stage_timeout_secs = 300;
    let h = harness(config, vec![Reply::Hang]).await;

    let run_id = h.engine.spawn(PROJECT).await.unwrap();
    h.provider.called.notified().await;

    assert!(h.engine.cancel(run_id).await.unwrap());
    let run = h.engine.wait(run_id).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.last_error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(run.transitions.last().unwrap().outcome, TransitionOutcome::Cancelled);

    let budget = h.engine.shared_budget().unwrap();
    assert_eq!(budget.outstanding(), 0);
    assert_close(budget.remaining(), 10.0);

    // Cancelling a finished run is a no-op
    assert!(!h.engine.cancel(run_id).await.unwrap());
}

#[tokio::test]
async fn test_status_is_idempotent() {
    let h = harness(test_config(), happy_path()).await;

    let run_id = h.engine.spawn(PROJECT).await.unwrap();
    let finished = h.engine.wait(run_id).await.unwrap();

    let first = h.engine.status(run_id).await.unwrap();
    let second = h.engine.status(run_id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, finished);
    assert!(h.engine.active_runs().is_empty());
}

#[tokio::test]
async fn test_status_of_unknown_run() {
    let h = harness(test_config(), Vec::new()).await;

    let err = h.engine.status(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, FoundryError::NotFound(_)));
}

#[tokio::test]
async fn test_resume_starts_at_first_missing_stage() {
    let mut config = test_config();
    config.budget.cost_limit_usd = 1.0;
    let first = harness(config, happy_path()).await;
    let halted = first.engine.run(PROJECT).await.unwrap();
    assert_eq!(halted.status, RunStatus::HaltedBudget);

    let second = harness_with_store(test_config(), vec![frontend(), qa_pass()], first.store.clone()).await;
    let run = second.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.base_version, 2);
    assert_eq!(run.committed_stages(), vec![Stage::Frontend, Stage::Qa]);
    assert_eq!(second.provider.call_count(), 2);

    let state = second.store.get(PROJECT).await.unwrap();
    assert_eq!(state.revisions(Stage::Idea).len(), 1);
    assert_eq!(state.version, 4);
}

#[tokio::test]
async fn test_commit_conflict_replays_stage_once() {
    let store = Arc::new(ProjectStateStore::in_memory());
    let racer = store.clone();
    let interfering = Reply::custom(move || async move {
        // Another writer lands version 1 while the agent is thinking
        racer
            .commit(
                PROJECT,
                Stage::Idea,
                StateDelta::new(Stage::Idea, json!({"title": "Other", "specification": "elsewhere"})),
                0,
            )
            .await?;
        Ok(ProviderResponse {
            output: json!({"title": "Todo", "specification": "tasks"}).to_string(),
            usage: STAGE_USAGE,
        })
    });
    let mut replies = vec![interfering];
    replies.extend(happy_path());
    let h = harness_with_store(test_config(), replies, store).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    let idea_calls: Vec<_> = run.invocations_for(Stage::Idea).collect();
    assert_eq!(idea_calls.len(), 2);
    assert!(matches!(
        idea_calls[0].outcome,
        InvocationOutcome::Failed { kind: ErrorKind::StateConflict, .. }
    ));
    assert_eq!(idea_calls[1].input_version, 1);

    let state = h.store.get(PROJECT).await.unwrap();
    assert_eq!(state.revisions(Stage::Idea).len(), 2);
    assert_eq!(state.version, 5);
}

#[tokio::test]
async fn test_missing_project_is_not_found() {
    let h = harness(test_config(), Vec::new()).await;

    let err = h.engine.run("nope").await.unwrap_err();
    assert!(matches!(err, FoundryError::NotFound(_)));
}

#[tokio::test]
async fn test_events_trace_the_run() {
    let mut config = test_config();
    config.budget.cost_limit_usd = 1.0;
    let h = harness(config, happy_path()).await;
    let mut events = h.engine.events().subscribe();

    let run = h.engine.run(PROJECT).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
        seen.push(event.unwrap());
    }
    assert!(matches!(seen.first(), Some(PipelineEvent::RunStarted { .. })));
    assert!(seen.iter().any(|e| matches!(e, PipelineEvent::BudgetWarning { .. })));
    match seen.last() {
        Some(PipelineEvent::RunFinished { run_id, status, .. }) => {
            assert_eq!(*run_id, run.id);
            assert_eq!(*status, RunStatus::HaltedBudget);
        }
        other => panic!("unexpected last event: {:?}", other),
    }
}

#[tokio::test]
async fn test_shared_budget_halts_later_run() {
    let mut config = test_config();
    config.budget.scope = BudgetScope::Shared;
    config.budget.cost_limit_usd = 2.0;
    let h = answering_engine(config, two_projects().await);

    let first = h.engine.run(PROJECT).await.unwrap();
    let second = h.engine.run(SECOND).await.unwrap();

    assert_eq!(first.status, RunStatus::Succeeded);
    assert_close(first.total_cost_usd, 1.6);
    assert_eq!(second.status, RunStatus::HaltedBudget);
    assert_eq!(second.committed_stages(), vec![Stage::Idea]);
    assert_close(second.total_cost_usd, 0.4);

    let budget = h.engine.shared_budget().unwrap();
    assert_close(budget.snapshot().spent_usd(), 2.0);
    assert_close(budget.remaining(), 0.0);
    assert_eq!(budget.outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_budget_caps_concurrent_runs() {
    let mut config = test_config();
    config.budget.scope = BudgetScope::Shared;
    config.budget.cost_limit_usd = 2.0;
    let h = answering_engine(config, two_projects().await);

    let a = h.engine.spawn(PROJECT).await.unwrap();
    let b = h.engine.spawn(SECOND).await.unwrap();
    let runs = [h.engine.wait(a).await.unwrap(), h.engine.wait(b).await.unwrap()];

    // Eight stages at $0.40 cannot fit under $2.00
    assert!(runs.iter().any(|r| r.status == RunStatus::HaltedBudget));
    assert!(runs
        .iter()
        .all(|r| matches!(r.status, RunStatus::Succeeded | RunStatus::HaltedBudget)));

    let total: f64 = runs.iter().map(|r| r.total_cost_usd).sum();
    assert!(total <= 2.0 + 1e-9, "spent {total}");
    let committed: usize = runs.iter().map(|r| r.committed_stages().len()).sum();
    assert!(committed <= 5);

    let budget = h.engine.shared_budget().unwrap();
    assert_close(budget.snapshot().spent_usd(), total);
    assert_eq!(budget.outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_per_run_budget_admits_concurrent_runs() {
    let mut config = test_config();
    config.budget.cost_limit_usd = 2.0;
    let h = answering_engine(config, two_projects().await);

    let a = h.engine.spawn(PROJECT).await.unwrap();
    let b = h.engine.spawn(SECOND).await.unwrap();
    let runs = [h.engine.wait(a).await.unwrap(), h.engine.wait(b).await.unwrap()];

    assert!(h.engine.shared_budget().is_none());
    for run in &runs {
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_close(run.total_cost_usd, 1.6);
    }
    assert_eq!(h.provider.call_count(), 8);
}

#[tokio::test]
async fn test_finished_runs_leave_the_registry() {
    let backend = MemoryBackend::new();
    let store = Arc::new(ProjectStateStore::new(Arc::new(backend.clone())));
    store.create(PROJECT, "A todo list web app").await.unwrap();
    let h = answering_engine(test_config(), store);

    let mut finished = Vec::new();
    for _ in 0..3 {
        let run = h.engine.run(PROJECT).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        // Served from the stored record
        assert_eq!(h.engine.status(run.id).await.unwrap(), run);
        finished.push(run.id);
    }
    let spawned = h.engine.spawn(PROJECT).await.unwrap();
    h.engine.wait(spawned).await.unwrap();
    finished.push(spawned);
    assert!(h.engine.active_runs().is_empty());

    backend.clear().await;
    for run_id in finished {
        assert!(matches!(
            h.engine.status(run_id).await,
            Err(FoundryError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_invocation_log_failure_keeps_committed_stages() {
    let store = Arc::new(ProjectStateStore::new(Arc::new(BrokenInvocationLog(
        MemoryBackend::new(),
    ))));
    let h = harness_with_store(test_config(), happy_path(), store).await;

    let run = h.engine.run(PROJECT).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run
        .transitions
        .iter()
        .all(|t| matches!(t.outcome, TransitionOutcome::Committed { .. })));
    assert_eq!(run.invocations.len(), 4);
    assert!(h.store.invocations(run.id).await.unwrap().is_empty());

    // The run snapshot still carries every invocation
    let stored = h.engine.status(run.id).await.unwrap();
    assert_eq!(stored.invocations.len(), 4);
    assert_eq!(h.store.get(PROJECT).await.unwrap().version, 4);
}
