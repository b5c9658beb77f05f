//! Common test utilities: a scripted model provider, config builders and
//! temp databases

#![allow(dead_code)]

use async_trait::async_trait;
use foundry::config::{FallbackModel, ModelPrice, ModelsConfig};
use foundry::{
    FoundryConfig, FoundryError, ModelProvider, ModelRef, Orchestrator, ProjectStateStore,
    PromptPayload, ProviderRegistry, ProviderResponse, Result, SqliteBackend, TokenUsage,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

pub const PROJECT: &str = "demo";
pub const PRIMARY: &str = "scripted:primary";
pub const FALLBACK_A: &str = "scripted:fallback-a";
pub const FALLBACK_B: &str = "scripted:fallback-b";

/// Tokens that cost exactly $0.40 at the test price
pub const STAGE_USAGE: TokenUsage = TokenUsage {
    input_tokens: 400,
    output_tokens: 0,
};

pub type ReplyFuture = Pin<Box<dyn Future<Output = Result<ProviderResponse>> + Send>>;

/// One scripted provider answer, consumed in call order
pub enum Reply {
    Text(String),
    ProviderError,
    /// Never answers; only a timeout or cancellation ends the call
    Hang,
    Custom(Box<dyn FnOnce() -> ReplyFuture + Send>),
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Reply::Text(value.to_string())
    }

    pub fn custom<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ProviderResponse>> + Send + 'static,
    {
        Reply::Custom(Box::new(move || Box::pin(f())))
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub model: ModelRef,
    pub system: String,
    pub user: String,
}

pub struct ScriptedProvider {
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Call>>,
    /// Answer by the calling stage once the script runs out
    answering: bool,
    /// Signalled each time a call starts
    pub called: Notify,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            answering: false,
            called: Notify::new(),
        })
    }

    /// Provider that gives every stage a valid answer, so interleaved runs
    /// can share it
    pub fn answering() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            answering: true,
            called: Notify::new(),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn models_called(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.model.to_string()).collect()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn invoke(&self, model: &ModelRef, prompt: &PromptPayload) -> Result<ProviderResponse> {
        self.calls.lock().push(Call {
            model: model.clone(),
            system: prompt.system.clone(),
            user: prompt.user.clone(),
        });
        self.called.notify_one();

        let scripted = self.script.lock().pop_front();
        let reply = scripted.or_else(|| {
            if self.answering {
                answer_for(&prompt.system)
            } else {
                None
            }
        });
        match reply {
            Some(Reply::Text(output)) => Ok(ProviderResponse {
                output,
                usage: STAGE_USAGE,
            }),
            Some(Reply::ProviderError) => Err(FoundryError::provider(model.to_string(), "503 Service Unavailable")),
            Some(Reply::Hang) => {
                std::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
            Some(Reply::Custom(f)) => f().await,
            None => Err(FoundryError::provider(model.to_string(), "script exhausted")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn idea() -> Reply {
    Reply::json(json!({"title": "Todo", "specification": "Tasks with CRUD and due dates"}))
}

pub fn backend() -> Reply {
    Reply::Text(
        "```json\n{\"summary\": \"REST API\", \"modules\": [{\"path\": \"src/main.rs\", \"content\": \"fn main() {}\"}]}\n```"
            .to_string(),
    )
}

pub fn frontend() -> Reply {
    Reply::json(json!({"summary": "SPA", "modules": [{"path": "index.html", "content": "<main></main>"}]}))
}

pub fn qa_pass() -> Reply {
    Reply::json(json!({"verdict": "pass", "findings": []}))
}

pub fn qa_fail(finding: &str) -> Reply {
    Reply::json(json!({"verdict": "fail", "findings": [finding]}))
}

/// Valid reply for the stage whose system prompt this is
fn answer_for(system: &str) -> Option<Reply> {
    if system.contains("product architect") {
        Some(idea())
    } else if system.contains("backend engineer") {
        Some(backend())
    } else if system.contains("frontend engineer") {
        Some(frontend())
    } else if system.contains("QA reviewer") {
        Some(qa_pass())
    } else {
        None
    }
}

pub fn happy_path() -> Vec<Reply> {
    vec![idea(), backend(), frontend(), qa_pass()]
}

/// Scripted models priced so every stage costs $0.40, generous budget,
/// short backoff
pub fn test_config() -> FoundryConfig {
    let mut config = FoundryConfig::default();
    config.models = ModelsConfig {
        primary: PRIMARY.to_string(),
        fallbacks: vec![
            FallbackModel { model: FALLBACK_B.to_string(), priority: 2 },
            FallbackModel { model: FALLBACK_A.to_string(), priority: 1 },
        ],
        stages: BTreeMap::new(),
        hints: BTreeMap::new(),
    };
    config.providers = BTreeMap::new();

    config.budget.cost_limit_usd = 10.0;
    config.budget.default_stage_estimate_usd = 0.40;
    config.budget.min_stage_cost_usd = 0.01;
    for model in [PRIMARY, FALLBACK_A, FALLBACK_B] {
        config.budget.pricing.insert(
            model.to_string(),
            ModelPrice {
                cost_per_input_token: 0.001,
                cost_per_output_token: 0.0,
            },
        );
    }

    config.execution.retry_limit = 3;
    config.execution.initial_backoff_ms = 10;
    config.execution.max_backoff_ms = 100;
    config.execution.stage_timeout_secs = 5;
    config
}

pub struct Harness {
    pub engine: Orchestrator,
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<ProjectStateStore>,
}

/// In-memory engine with the `demo` project already created
pub async fn harness(config: FoundryConfig, replies: Vec<Reply>) -> Harness {
    let store = Arc::new(ProjectStateStore::in_memory());
    harness_with_store(config, replies, store).await
}

pub async fn harness_with_store(
    config: FoundryConfig,
    replies: Vec<Reply>,
    store: Arc<ProjectStateStore>,
) -> Harness {
    if store.get(PROJECT).await.is_err() {
        store
            .create(PROJECT, "A todo list web app")
            .await
            .expect("Failed to create project");
    }
    let provider = ScriptedProvider::new(replies);
    let engine = engine_for(config, store.clone(), provider.clone());
    Harness { engine, provider, store }
}

/// Engine over `store` driven by a provider that answers every stage
pub fn answering_engine(config: FoundryConfig, store: Arc<ProjectStateStore>) -> Harness {
    let provider = ScriptedProvider::answering();
    let engine = engine_for(config, store.clone(), provider.clone());
    Harness { engine, provider, store }
}

pub fn engine_for(
    config: FoundryConfig,
    store: Arc<ProjectStateStore>,
    provider: Arc<ScriptedProvider>,
) -> Orchestrator {
    let mut providers = ProviderRegistry::new();
    providers.register("scripted", provider);
    Orchestrator::new(Arc::new(config), store, providers).expect("Failed to build orchestrator")
}

/// SQLite-backed store in a fresh temp directory
pub async fn setup_sqlite_store() -> (TempDir, Arc<ProjectStateStore>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let backend = SqliteBackend::open(temp_dir.path().join("foundry.db"))
        .await
        .expect("Failed to open test database");
    (temp_dir, Arc::new(ProjectStateStore::new(Arc::new(backend))))
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
