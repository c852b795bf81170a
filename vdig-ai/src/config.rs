//! Runtime configuration for vdig-ai
//!
//! Builds the engine settings and the generation model registry from the
//! bootstrap TOML. Model API keys resolve with ENV -> TOML priority so keys
//! can stay out of the config file.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};
use vdig_common::config::{ModelConfig, TomlConfig};

use crate::services::fetcher::FetchPolicy;

/// Broadcast capacity of the task event bus
pub const EVENT_CAPACITY: usize = 256;

/// Engine tuning resolved from `[engine]` and `[platform]`
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_concurrent: usize,
    pub max_stage_retries: u32,
    pub stage_retry_delay: Duration,
    pub fetch: FetchPolicy,
    /// Public site URL used to build per-part references
    pub site_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_toml(&TomlConfig::default())
    }
}

impl EngineSettings {
    pub fn from_toml(config: &TomlConfig) -> Self {
        let engine = config.engine.clone().normalized();
        Self {
            max_concurrent: engine.max_concurrent,
            max_stage_retries: engine.max_stage_retries,
            stage_retry_delay: Duration::from_millis(engine.stage_retry_delay_ms),
            fetch: FetchPolicy::from(&engine),
            site_url: config.platform.site_url.clone(),
        }
    }
}

/// Environment variable overriding the API key of model `name`
///
/// `VDIG_MODEL_<NAME>_API_KEY`, with `name` upper-cased and every
/// non-alphanumeric character replaced by `_`.
pub fn model_key_env_var(name: &str) -> String {
    let normalized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("VDIG_MODEL_{}_API_KEY", normalized)
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve a model's API key: environment first, then TOML
pub fn resolve_api_key(model: &ModelConfig) -> String {
    let var = model_key_env_var(&model.name);
    if let Ok(key) = std::env::var(&var) {
        if is_valid_key(&key) {
            if is_valid_key(&model.api_key) {
                warn!(model = %model.name, "API key set in both {} and TOML, using environment", var);
            }
            return key.trim().to_string();
        }
    }
    model.api_key.trim().to_string()
}

/// Configured generation backends, addressable by name
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelConfig>,
}

impl ModelRegistry {
    /// Build from explicit configs; a repeated name keeps its first definition
    pub fn new(models: Vec<ModelConfig>) -> Self {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(models.len());
        for model in models {
            if model.name.trim().is_empty() {
                warn!("Ignoring model entry without a name");
                continue;
            }
            if !seen.insert(model.name.clone()) {
                warn!(model = %model.name, "Duplicate model name ignored");
                continue;
            }
            kept.push(model);
        }
        Self { models: kept }
    }

    /// Build from `[[models]]`, applying environment key overrides
    pub fn from_toml(config: &TomlConfig) -> Self {
        let models = config
            .models
            .iter()
            .cloned()
            .map(|mut model| {
                model.api_key = resolve_api_key(&model);
                if !is_valid_key(&model.api_key) {
                    warn!(
                        model = %model.name,
                        "No API key for model (set {} or api_key in TOML)",
                        model_key_env_var(&model.name)
                    );
                }
                model
            })
            .collect();
        let registry = Self::new(models);
        info!(models = ?registry.names(), "Generation models loaded");
        registry
    }

    pub fn get(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Storage root, created when missing
pub fn ensure_root_folder(config: &TomlConfig) -> vdig_common::Result<PathBuf> {
    let root = config.resolved_root_folder();
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        info!(path = %root.display(), "Created root folder");
    }
    Ok(root)
}
