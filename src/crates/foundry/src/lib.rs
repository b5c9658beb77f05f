//! # Foundry - Budgeted multi-agent build pipeline
//!
//! Foundry drives a fixed sequence of LLM-backed agents (idea, backend,
//! frontend, QA) over a shared, versioned project state, under a hard spend
//! ceiling, with model fallback and bounded retries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use foundry::{FoundryConfig, Orchestrator, ProjectStateStore, ProviderRegistry};
//! use std::sync::Arc;
//!
//! # async fn example() -> foundry::Result<()> {
//! let config = Arc::new(FoundryConfig::default());
//! let store = Arc::new(ProjectStateStore::in_memory());
//! let providers = ProviderRegistry::from_config(&config.providers)?;
//!
//! store.create("todo", "A todo list web app").await?;
//! let engine = Orchestrator::new(config, store, providers)?;
//! let run = engine.run("todo").await?;
//! println!("{} (${:.4})", run.status, run.total_cost_usd);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The [`Orchestrator`] is the only component that decides between retry,
//! fallback and halt. Agents and providers report failures, the
//! [`CostTracker`] refuses spend, and the [`ProjectStateStore`] rejects
//! racing commits; everything flows back to the orchestrator.

pub mod agents;
pub mod config;
pub mod db;
pub mod engine;
pub mod events;
pub mod logging;
pub mod models;
pub mod provider;
pub mod router;
pub mod services;
pub mod store;
pub mod version;

mod error;

pub use error::{ErrorKind, FoundryError, Result};

pub use agents::{Agent, AgentContext, AgentOutput, StageAgent};
pub use config::{load_config, ConfigLoader, FoundryConfig};
pub use db::Database;
pub use engine::{CancelSignal, Orchestrator};
pub use events::{EventLogger, PipelineEvent};
pub use models::{
    AgentInvocation, Artifact, ModelRef, ModelSelection, PipelineRun, ProjectState, QaVerdict,
    RunId, RunStatus, Stage, StateDelta, TokenUsage,
};
pub use provider::{ModelProvider, PromptPayload, ProviderRegistry, ProviderResponse};
pub use router::ModelRouter;
pub use services::{CostTracker, PricingTable, ReservationToken};
pub use store::{MemoryBackend, ProjectStateStore, SqliteBackend, StateBackend};
pub use version::{full_version as version_info, short_version};
