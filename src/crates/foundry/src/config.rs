//! Configuration management for Foundry
//!
//! Layers, later wins:
//! 1. Built-in defaults
//! 2. User-level: ~/.foundry/foundry.toml
//! 3. Project-level: ./.foundry/foundry.toml
//! 4. Environment: `PRIMARY_MODEL`, `COST_LIMIT_USD`, `FOUNDRY_LOG`
//!
//! The engine takes the result as an immutable `Arc<FoundryConfig>`.

mod loader;
mod schema;

pub use loader::{apply_env_overrides, ConfigLoader};
pub use schema::{
    BudgetConfig, BudgetScope, DatabaseConfig, ExecutionConfig, FallbackModel, FoundryConfig,
    LoggingConfig, ModelPrice, ModelsConfig, ProviderConfig, StageModels,
};

use crate::Result;

/// Load configuration from all layers and validate it
pub async fn load_config() -> Result<FoundryConfig> {
    let loader = ConfigLoader::new()?;
    loader.load().await
}
