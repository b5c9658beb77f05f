//! Error types for Foundry
//!
//! Every failure surfaced by providers, agents, the cost tracker and the
//! state store is a [`FoundryError`]. Only the orchestrator decides whether
//! an error is retried, routed to a fallback model, or ends the run.

use crate::models::TokenUsage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Foundry operations
pub type Result<T> = std::result::Result<T, FoundryError>;

/// Main error type for Foundry operations
#[derive(Debug, Error)]
pub enum FoundryError {
    /// Network, authentication or rate-limit failure from a model provider
    #[error("Provider error ({model}): {message}")]
    Provider { model: String, message: String },

    /// The model answered, but the answer failed schema validation.
    /// Tokens were still consumed, so the usage travels with the error.
    #[error("Malformed output from {model}: {reason}")]
    MalformedOutput {
        model: String,
        reason: String,
        usage: TokenUsage,
    },

    /// Model invocation exceeded its deadline
    #[error("Invocation of {model} timed out after {duration_ms}ms")]
    Timeout { model: String, duration_ms: u64 },

    /// A reservation would push spend past the ceiling
    #[error("Budget exceeded: requested ${requested:.4}, remaining ${remaining:.4}")]
    BudgetExceeded { requested: f64, remaining: f64 },

    /// Concurrent commit against the same project
    #[error("State conflict for project {project_id}: {message}")]
    StateConflict { project_id: String, message: String },

    /// A delta or input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// QA kept rejecting the product until the repair cap ran out
    #[error("QA rejected the product after {failures} evaluation(s): {}", findings.join("; "))]
    QaRejected { failures: u32, findings: Vec<String> },

    /// The run was cancelled externally
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage backend error
    #[error("Database error: {0}")]
    Database(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Serializable error taxonomy recorded on runs and invocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProviderError,
    MalformedOutput,
    Timeout,
    BudgetExceeded,
    StateConflict,
    Validation,
    QaRejected,
    Cancelled,
    Config,
    NotFound,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderError => "provider_error",
            Self::MalformedOutput => "malformed_output",
            Self::Timeout => "timeout",
            Self::BudgetExceeded => "budget_exceeded",
            Self::StateConflict => "state_conflict",
            Self::Validation => "validation",
            Self::QaRejected => "qa_rejected",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
            Self::NotFound => "not_found",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FoundryError {
    /// Taxonomy value for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider { .. } => ErrorKind::ProviderError,
            Self::MalformedOutput { .. } => ErrorKind::MalformedOutput,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            Self::StateConflict { .. } => ErrorKind::StateConflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::QaRejected { .. } => ErrorKind::QaRejected,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Database(_) | Self::Io(_) | Self::Serde(_) => {
                ErrorKind::Storage
            }
        }
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::Timeout { .. } | Self::MalformedOutput { .. }
        )
    }

    /// Failures that point at the model rather than the infrastructure
    pub fn implicates_model(&self) -> bool {
        matches!(self, Self::MalformedOutput { .. })
    }

    /// Token usage that was consumed despite the failure
    pub fn usage(&self) -> Option<&TokenUsage> {
        match self {
            Self::MalformedOutput { usage, .. } => Some(usage),
            _ => None,
        }
    }

    pub fn provider(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn malformed(model: impl Into<String>, reason: impl Into<String>, usage: TokenUsage) -> Self {
        Self::MalformedOutput {
            model: model.into(),
            reason: reason.into(),
            usage,
        }
    }

    pub fn conflict(project_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StateConflict {
            project_id: project_id.into(),
            message: message.into(),
        }
    }
}
