//! CLI configuration loading and merging.
//!
//! Configuration precedence:
//! 1. CLI arguments (handled by clap)
//! 2. `RETOUCH_MODEL_ROOT` environment variable
//! 3. Explicit `--config` file, or local `./retouch.toml`
//! 4. Global config file (`~/.retouch/config.toml`)
//! 5. Defaults

use anyhow::{Context, Result};
use retouch_models::{CacheConfig, ServiceConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the model root.
pub const MODEL_ROOT_ENV: &str = "RETOUCH_MODEL_ROOT";

/// CLI configuration file contents. Every field is optional so files merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub model_root: Option<PathBuf>,

    /// Model used when `--model` is not given
    #[serde(default)]
    pub default_model: Option<String>,

    #[serde(default)]
    pub weight_extension: Option<String>,

    /// Backend that loads checkpoints (`passthrough`)
    #[serde(default)]
    pub backend: Option<String>,

    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub cache: Option<CacheConfig>,
}

impl CliConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map_or_else(|_| PathBuf::from("."), PathBuf::from)
            .join(".retouch")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from("retouch.toml")
    }

    /// Discover and load configuration files.
    ///
    /// The global file is read first; `explicit` (or the local file when no
    /// explicit path is given) overrides it. A missing default file is not an
    /// error, a missing explicit one is.
    pub fn discover_and_load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let global_path = Self::default_global_path();
        if global_path.is_file() {
            config.merge(Self::load_from_file(&global_path)?);
        }

        match explicit {
            Some(path) => config.merge(Self::load_from_file(path)?),
            None => {
                let local_path = Self::default_local_path();
                if local_path.is_file() {
                    config.merge(Self::load_from_file(&local_path)?);
                }
            }
        }

        Ok(config)
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: Self) {
        if other.model_root.is_some() {
            self.model_root = other.model_root;
        }
        if other.default_model.is_some() {
            self.default_model = other.default_model;
        }
        if other.weight_extension.is_some() {
            self.weight_extension = other.weight_extension;
        }
        if other.backend.is_some() {
            self.backend = other.backend;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        if other.cache.is_some() {
            self.cache = other.cache;
        }
    }

    /// Build the service configuration, applying the environment and the
    /// `--model-root` flag on top of the files.
    pub fn service_config(
        &self,
        model_root_flag: Option<PathBuf>,
        env_model_root: Option<PathBuf>,
    ) -> ServiceConfig {
        let defaults = ServiceConfig::default();
        ServiceConfig {
            model_root: model_root_flag
                .or(env_model_root)
                .or_else(|| self.model_root.clone())
                .unwrap_or(defaults.model_root),
            default_model: self.default_model.clone(),
            weight_extension: self.weight_extension.clone().unwrap_or(defaults.weight_extension),
            cache: self.cache.clone().unwrap_or(defaults.cache),
        }
    }
}

/// `RETOUCH_MODEL_ROOT`, if set and non-empty.
pub fn env_model_root() -> Option<PathBuf> {
    std::env::var_os(MODEL_ROOT_ENV).filter(|v| !v.is_empty()).map(PathBuf::from)
}
