//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::routing::{DoublyRobustConfig, OffsetTreeConfig, PriorConfig, RouterConfig};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "PATHFINDER_CONFIG_DIR";

/// Keys accepted by [`Config::get`] and [`Config::set`]
pub const CONFIG_KEYS: &[&str] = &[
    "router.enabled",
    "router.cold_start_trials",
    "router.persist_every",
    "router.state_path",
    "priors.prior_confidence",
    "priors.min_cross_tenant_samples",
    "priors.cross_tenant_ttl_seconds",
    "priors.cache_ttl_seconds",
    "priors.store_timeout_ms",
    "priors.max_prior_strength",
    "priors.store_path",
    "priors.benchmarks_path",
    "doubly_robust.alpha",
    "doubly_robust.dim",
    "doubly_robust.learning_rate",
    "doubly_robust.max_importance_weight",
    "doubly_robust.features",
    "offset_tree.max_depth",
    "offset_tree.min_samples_split",
    "offset_tree.split_threshold",
    "offset_tree.exploration",
];

const NOT_SET: &str = "(not set)";

/// Pathfinder configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub router: RouterConfig,
    pub priors: PriorConfig,
    pub doubly_robust: DoublyRobustConfig,
    pub offset_tree: OffsetTreeConfig,
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("pathfinder")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file, or defaults if absent
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.router.persist_every == 0 {
            return Err(anyhow!("router.persist_every must be at least 1"));
        }

        let priors = &self.priors;
        if !(0.0..=1.0).contains(&priors.prior_confidence) {
            return Err(anyhow!("priors.prior_confidence must be between 0.0 and 1.0"));
        }
        if priors.store_timeout_ms == 0 {
            return Err(anyhow!("priors.store_timeout_ms must be positive"));
        }
        if !priors.max_prior_strength.is_finite() || priors.max_prior_strength < 0.0 {
            return Err(anyhow!("priors.max_prior_strength must be non-negative"));
        }

        let dr = &self.doubly_robust;
        if !dr.alpha.is_finite() || dr.alpha < 0.0 {
            return Err(anyhow!("doubly_robust.alpha must be non-negative"));
        }
        if dr.dim == 0 {
            return Err(anyhow!("doubly_robust.dim must be at least 1"));
        }
        if !(dr.learning_rate > 0.0 && dr.learning_rate <= 1.0) {
            return Err(anyhow!("doubly_robust.learning_rate must be in (0.0, 1.0]"));
        }
        if !dr.max_importance_weight.is_finite() || dr.max_importance_weight <= 0.0 {
            return Err(anyhow!("doubly_robust.max_importance_weight must be positive"));
        }
        if dr.features.len() > dr.dim {
            return Err(anyhow!(
                "doubly_robust.features lists {} names but dim is {}",
                dr.features.len(),
                dr.dim
            ));
        }

        let tree = &self.offset_tree;
        if tree.max_depth > 32 {
            return Err(anyhow!("offset_tree.max_depth must be at most 32"));
        }
        if tree.min_samples_split < 2 {
            return Err(anyhow!("offset_tree.min_samples_split must be at least 2"));
        }
        if !tree.split_threshold.is_finite() || tree.split_threshold < 0.0 {
            return Err(anyhow!("offset_tree.split_threshold must be non-negative"));
        }
        if !tree.exploration.is_finite() || tree.exploration < 0.0 {
            return Err(anyhow!("offset_tree.exploration must be non-negative"));
        }

        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let value = match key {
            "router.enabled" => self.router.enabled.to_string(),
            "router.cold_start_trials" => self.router.cold_start_trials.to_string(),
            "router.persist_every" => self.router.persist_every.to_string(),
            "router.state_path" => display_path(&self.router.state_path),

            "priors.prior_confidence" => self.priors.prior_confidence.to_string(),
            "priors.min_cross_tenant_samples" => self.priors.min_cross_tenant_samples.to_string(),
            "priors.cross_tenant_ttl_seconds" => self.priors.cross_tenant_ttl_seconds.to_string(),
            "priors.cache_ttl_seconds" => self.priors.cache_ttl_seconds.to_string(),
            "priors.store_timeout_ms" => self.priors.store_timeout_ms.to_string(),
            "priors.max_prior_strength" => self.priors.max_prior_strength.to_string(),
            "priors.store_path" => display_path(&self.priors.store_path),
            "priors.benchmarks_path" => display_path(&self.priors.benchmarks_path),

            "doubly_robust.alpha" => self.doubly_robust.alpha.to_string(),
            "doubly_robust.dim" => self.doubly_robust.dim.to_string(),
            "doubly_robust.learning_rate" => self.doubly_robust.learning_rate.to_string(),
            "doubly_robust.max_importance_weight" => {
                self.doubly_robust.max_importance_weight.to_string()
            }
            "doubly_robust.features" => display_list(&self.doubly_robust.features),

            "offset_tree.max_depth" => self.offset_tree.max_depth.to_string(),
            "offset_tree.min_samples_split" => self.offset_tree.min_samples_split.to_string(),
            "offset_tree.split_threshold" => self.offset_tree.split_threshold.to_string(),
            "offset_tree.exploration" => self.offset_tree.exploration.to_string(),

            _ => return Err(unknown_key(key)),
        };
        Ok(value)
    }

    /// Set a configuration value by key
    ///
    /// The change is applied only if the resulting configuration validates.
    /// Path keys are cleared with an empty value or `none`.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut updated = self.clone();
        updated.apply(key, value.trim())?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "router.enabled" => self.router.enabled = parse(key, value)?,
            "router.cold_start_trials" => self.router.cold_start_trials = parse(key, value)?,
            "router.persist_every" => self.router.persist_every = parse(key, value)?,
            "router.state_path" => self.router.state_path = parse_path(value),

            "priors.prior_confidence" => self.priors.prior_confidence = parse(key, value)?,
            "priors.min_cross_tenant_samples" => {
                self.priors.min_cross_tenant_samples = parse(key, value)?
            }
            "priors.cross_tenant_ttl_seconds" => {
                self.priors.cross_tenant_ttl_seconds = parse(key, value)?
            }
            "priors.cache_ttl_seconds" => self.priors.cache_ttl_seconds = parse(key, value)?,
            "priors.store_timeout_ms" => self.priors.store_timeout_ms = parse(key, value)?,
            "priors.max_prior_strength" => self.priors.max_prior_strength = parse(key, value)?,
            "priors.store_path" => self.priors.store_path = parse_path(value),
            "priors.benchmarks_path" => self.priors.benchmarks_path = parse_path(value),

            "doubly_robust.alpha" => self.doubly_robust.alpha = parse(key, value)?,
            "doubly_robust.dim" => self.doubly_robust.dim = parse(key, value)?,
            "doubly_robust.learning_rate" => self.doubly_robust.learning_rate = parse(key, value)?,
            "doubly_robust.max_importance_weight" => {
                self.doubly_robust.max_importance_weight = parse(key, value)?
            }
            "doubly_robust.features" => self.doubly_robust.features = parse_list(value),

            "offset_tree.max_depth" => self.offset_tree.max_depth = parse(key, value)?,
            "offset_tree.min_samples_split" => {
                self.offset_tree.min_samples_split = parse(key, value)?
            }
            "offset_tree.split_threshold" => self.offset_tree.split_threshold = parse(key, value)?,
            "offset_tree.exploration" => self.offset_tree.exploration = parse(key, value)?,

            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        CONFIG_KEYS
            .iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults by removing the config file
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))
}

fn parse_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| NOT_SET.to_string())
}

fn parse_list(value: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !names.iter().any(|known| known == name) {
            names.push(name.to_string());
        }
    }
    names
}

fn display_list(names: &[String]) -> String {
    if names.is_empty() {
        NOT_SET.to_string()
    } else {
        names.join(",")
    }
}

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow!(
        "Unknown configuration key: {}. Use `pathfinder config list` to see available keys.",
        key
    )
}
