//! Configuration schema

use crate::error::{FoundryError, Result};
use crate::models::{ModelRef, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main Foundry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FoundryConfig {
    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Provider endpoints keyed by the provider half of `provider:model`
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Model routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Default primary model (`provider:model`)
    pub primary: String,

    /// Fallbacks, tried in ascending `priority`
    pub fallbacks: Vec<FallbackModel>,

    /// Per-stage overrides
    pub stages: BTreeMap<Stage, StageModels>,

    /// Task hint → primary model override
    pub hints: BTreeMap<String, String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            primary: "openai:gpt-4o".to_string(),
            fallbacks: vec![FallbackModel {
                model: "openrouter:anthropic/claude-3.5-sonnet".to_string(),
                priority: 1,
            }],
            stages: BTreeMap::new(),
            hints: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackModel {
    pub model: String,
    #[serde(default)]
    pub priority: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageModels {
    pub primary: Option<String>,
    pub fallbacks: Option<Vec<FallbackModel>>,
}

/// How far a budget reaches across runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    /// Every run gets a fresh ceiling
    PerRun,
    /// All runs in the process draw from one ceiling
    Shared,
}

/// Budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Spend ceiling in USD
    pub cost_limit_usd: f64,

    pub scope: BudgetScope,

    /// Halt before a stage when less than this remains
    pub min_stage_cost_usd: f64,

    /// Reservation made before each attempt unless overridden per stage
    pub default_stage_estimate_usd: f64,

    pub stage_estimates_usd: BTreeMap<Stage, f64>,

    /// Usage percentage at which spend is logged as a warning
    pub alert_threshold: f64,

    /// Price overrides keyed by `provider:model`
    pub pricing: BTreeMap<String, ModelPrice>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            cost_limit_usd: 5.0,
            scope: BudgetScope::PerRun,
            min_stage_cost_usd: 0.01,
            default_stage_estimate_usd: 0.25,
            stage_estimates_usd: BTreeMap::new(),
            alert_threshold: 80.0,
            pricing: BTreeMap::new(),
        }
    }
}

impl BudgetConfig {
    pub fn stage_estimate(&self, stage: Stage) -> f64 {
        self.stage_estimates_usd
            .get(&stage)
            .copied()
            .unwrap_or(self.default_stage_estimate_usd)
    }
}

/// Cost per token in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub cost_per_input_token: f64,
    pub cost_per_output_token: f64,
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Total attempts per stage pass
    pub retry_limit: u32,

    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,

    /// Consecutive provider errors on one model before moving to the next
    pub failover_after: u32,

    /// Deadline for one agent invocation
    pub stage_timeout_secs: u64,

    /// Failing QA verdicts tolerated before the run fails
    pub repair_cap: u32,

    /// Re-run frontend between a backend repair and QA
    pub rerun_frontend_on_repair: bool,

    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            failover_after: 1,
            stage_timeout_secs: 300,
            repair_cap: 2,
            rerun_frontend_on_repair: false,
            max_tokens: 4096,
            temperature: 0.2,
        }
    }
}

impl ExecutionConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

/// OpenAI-compatible provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,

    /// API key; `${VAR}` is expanded from the environment at load time
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    120
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "openai".to_string(),
        ProviderConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: Some("${OPENAI_API_KEY}".to_string()),
            timeout_secs: default_provider_timeout(),
        },
    );
    providers.insert(
        "openrouter".to_string(),
        ProviderConfig {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: Some("${OPENROUTER_API_KEY}".to_string()),
            timeout_secs: default_provider_timeout(),
        },
    );
    providers.insert(
        "ollama".to_string(),
        ProviderConfig {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: None,
            timeout_secs: 600,
        },
    );
    providers
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path (relative to ~/.foundry or absolute)
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "foundry.db".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "foundry=debug,sqlx=warn"
    pub level: String,

    /// "compact", "pretty" or "json"
    pub format: String,

    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            ansi: true,
        }
    }
}

impl FoundryConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let budget = &self.budget;
        if !budget.cost_limit_usd.is_finite() || budget.cost_limit_usd <= 0.0 {
            return Err(FoundryError::Config(format!(
                "budget.cost_limit_usd must be positive, got {}",
                budget.cost_limit_usd
            )));
        }
        let estimates = std::iter::once(budget.default_stage_estimate_usd)
            .chain(budget.stage_estimates_usd.values().copied())
            .chain(std::iter::once(budget.min_stage_cost_usd));
        for value in estimates {
            if !value.is_finite() || value < 0.0 {
                return Err(FoundryError::Config(format!(
                    "budget estimates must be non-negative, got {}",
                    value
                )));
            }
        }

        let exec = &self.execution;
        if exec.retry_limit == 0 {
            return Err(FoundryError::Config(
                "execution.retry_limit must be at least 1".to_string(),
            ));
        }
        if exec.repair_cap == 0 {
            return Err(FoundryError::Config(
                "execution.repair_cap must be at least 1".to_string(),
            ));
        }
        if exec.backoff_multiplier < 1.0 {
            return Err(FoundryError::Config(
                "execution.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if exec.failover_after == 0 {
            return Err(FoundryError::Config(
                "execution.failover_after must be at least 1".to_string(),
            ));
        }

        self.models.primary.parse::<ModelRef>()?;
        for fallback in &self.models.fallbacks {
            fallback.model.parse::<ModelRef>()?;
        }
        for stage in self.models.stages.values() {
            if let Some(primary) = &stage.primary {
                primary.parse::<ModelRef>()?;
            }
            for fallback in stage.fallbacks.iter().flatten() {
                fallback.model.parse::<ModelRef>()?;
            }
        }
        for model in self.models.hints.values() {
            model.parse::<ModelRef>()?;
        }

        Ok(())
    }

    /// Expand `${VAR}` references in provider credentials and URLs
    pub fn resolve_env_vars(&mut self) {
        for provider in self.providers.values_mut() {
            provider.base_url = expand_env_var(&provider.base_url);
            if let Some(key) = provider.api_key.as_deref() {
                let expanded = expand_env_var(key);
                // An unresolved reference means no credential
                provider.api_key = if expanded.starts_with("${") {
                    None
                } else {
                    Some(expanded)
                };
            }
        }
    }

    /// Copy safe to print: provider credentials are masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for provider in config.providers.values_mut() {
            if provider.api_key.is_some() {
                provider.api_key = Some(REDACTED.to_string());
            }
        }
        config
    }

    /// Resolved database path; relative paths live under ~/.foundry
    pub fn database_path(&self) -> Result<PathBuf> {
        let path = PathBuf::from(&self.database.path);
        if path.is_absolute() {
            return Ok(path);
        }
        let home = dirs::home_dir()
            .ok_or_else(|| FoundryError::Config("Failed to get home directory".to_string()))?;
        Ok(home.join(".foundry").join(path))
    }
}

const REDACTED: &str = "***";

fn expand_env_var(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}
