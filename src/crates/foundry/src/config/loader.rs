//! Layered configuration loader

use crate::config::schema::FoundryConfig;
use crate::error::{FoundryError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Loads and merges configuration files and environment overrides
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: PathBuf,
}

impl ConfigLoader {
    /// Loader for ~/.foundry/foundry.toml and ./.foundry/foundry.toml
    pub fn new() -> Result<Self> {
        let user_config_path = dirs::home_dir().map(|home| home.join(".foundry").join("foundry.toml"));
        let project_config_path = std::env::current_dir()?.join(".foundry").join("foundry.toml");
        Ok(Self {
            user_config_path,
            project_config_path,
        })
    }

    /// Loader with explicit file locations
    pub fn with_paths(user_config_path: Option<PathBuf>, project_config_path: PathBuf) -> Self {
        Self {
            user_config_path,
            project_config_path,
        }
    }

    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_config_path.as_deref()
    }

    pub fn project_config_path(&self) -> &Path {
        &self.project_config_path
    }

    /// Merge defaults, user file, project file and process environment
    pub async fn load(&self) -> Result<FoundryConfig> {
        self.load_with_env(|key| std::env::var(key).ok()).await
    }

    /// Same as [`load`](Self::load) with an injectable environment
    pub async fn load_with_env<F>(&self, env: F) -> Result<FoundryConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        let layers = self
            .user_config_path
            .iter()
            .chain(std::iter::once(&self.project_config_path));
        for path in layers {
            match Self::read_layer(path).await? {
                Some(layer) => {
                    debug!(path = %path.display(), "Loaded config layer");
                    merge_values(&mut merged, layer);
                }
                None => debug!(path = %path.display(), "Config layer not present"),
            }
        }

        let mut config: FoundryConfig = merged
            .try_into()
            .map_err(|e| FoundryError::Config(format!("Failed to parse config: {}", e)))?;

        apply_env_overrides(&mut config, env)?;
        config.resolve_env_vars();
        config.validate()?;

        info!(
            primary_model = %config.models.primary,
            cost_limit_usd = config.budget.cost_limit_usd,
            "Configuration loaded"
        );
        Ok(config)
    }

    async fn read_layer(path: &Path) -> Result<Option<toml::Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| FoundryError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let value = toml::from_str::<toml::Value>(&content)
            .map_err(|e| FoundryError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Ok(Some(value))
    }
}

/// Apply `PRIMARY_MODEL`, `COST_LIMIT_USD` and `FOUNDRY_LOG`
pub fn apply_env_overrides<F>(config: &mut FoundryConfig, env: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(primary) = env("PRIMARY_MODEL").filter(|v| !v.trim().is_empty()) {
        debug!(primary = %primary, "PRIMARY_MODEL override");
        config.models.primary = primary.trim().to_string();
    }
    if let Some(limit) = env("COST_LIMIT_USD").filter(|v| !v.trim().is_empty()) {
        config.budget.cost_limit_usd = limit.trim().parse::<f64>().map_err(|_| {
            FoundryError::Config(format!("COST_LIMIT_USD is not a number: {}", limit))
        })?;
    }
    if let Some(level) = env("FOUNDRY_LOG").filter(|v| !v.trim().is_empty()) {
        config.logging.level = level;
    }
    Ok(())
}

/// Deep-merge `overlay` into `base`; tables merge, everything else replaces
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
