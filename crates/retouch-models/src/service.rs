//! Operations exposed to a serving boundary (HTTP handler, CLI, ...).
//!
//! The boundary owns one [`InferenceService`] for the life of the process;
//! there is no global cache.

use image::{DynamicImage, RgbImage};
use retouch_checkpoints::{
    Checkpoint, CheckpointResolver, DEFAULT_WEIGHT_EXTENSION, ModelListing, ModelRoot,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheConfig, CacheConfigError, CacheStats, ModelCache};
use crate::config::{ConfigBuilder, InferenceConfig, RawParams};
use crate::error::InferenceError;
use crate::factory::ModelLoader;
use crate::pipeline::InferencePipeline;

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory holding one subdirectory per model.
    #[serde(default = "default_model_root")]
    pub model_root: PathBuf,
    /// Model served when a request does not name one.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Extension of generator weight files.
    #[serde(default = "default_weight_extension")]
    pub weight_extension: String,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_model_root() -> PathBuf {
    PathBuf::from("./checkpoints")
}

fn default_weight_extension() -> String {
    DEFAULT_WEIGHT_EXTENSION.to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_root: default_model_root(),
            default_model: None,
            weight_extension: default_weight_extension(),
            cache: CacheConfig::default(),
        }
    }
}

/// Liveness report. Carries cache keys and counters, never handles.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    /// `ok`, or `degraded` when the model root is missing.
    pub status: &'static str,
    pub model_root: PathBuf,
    pub loaded_configs: Vec<LoadedConfig>,
    pub stats: CacheStats,
}

/// One resident cache key, as reported by [`InferenceService::health`].
#[derive(Debug, Clone, Serialize)]
pub struct LoadedConfig {
    pub fingerprint: String,
    pub config: InferenceConfig,
}

/// The inference core behind one serving boundary.
#[derive(Debug, Clone)]
pub struct InferenceService {
    config: ServiceConfig,
    root: ModelRoot,
    resolver: CheckpointResolver,
    pipeline: InferencePipeline,
}

impl InferenceService {
    /// # Errors
    /// Returns `CacheConfigError` if the cache configuration is invalid.
    pub fn new(
        config: ServiceConfig,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self, CacheConfigError> {
        let root = ModelRoot::new(&config.model_root);
        let resolver = CheckpointResolver::new(&config.weight_extension);
        let cache = ModelCache::new(config.cache.clone(), root.clone(), resolver.clone())?;

        let builder = config.default_model.as_deref().map_or_else(ConfigBuilder::new, |model| {
            ConfigBuilder::new().with_default_model(model)
        });
        let pipeline = InferencePipeline::new(builder, cache, loader);

        info!(
            model_root = %config.model_root.display(),
            default_model = config.default_model.as_deref().unwrap_or("-"),
            extension = %resolver.extension(),
            "Inference service ready"
        );
        Ok(Self { config, root, resolver, pipeline })
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn pipeline(&self) -> &InferencePipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        self.pipeline.cache()
    }

    /// Every servable model with its selectors. An empty root lists nothing.
    pub fn resolve_model_listing(&self) -> Result<Vec<ModelListing>, InferenceError> {
        let listing = retouch_checkpoints::resolve_model_listing(&self.root, &self.resolver)?;
        debug!(models = listing.len(), "Resolved model listing");
        Ok(listing)
    }

    /// Checkpoints of `model`, `latest` first, then tags, then epochs descending.
    pub fn list_checkpoints(&self, model: &str) -> Result<Vec<Checkpoint>, InferenceError> {
        self.ensure_root()?;
        let model_dir = self.root.model_dir(model)?;
        Ok(self.resolver.list_checkpoints(&model_dir)?)
    }

    /// Resolve `selector` for `model` without loading anything.
    pub fn resolve_checkpoint(
        &self,
        model: &str,
        selector: &str,
    ) -> Result<Checkpoint, InferenceError> {
        self.ensure_root()?;
        let model_dir = self.root.model_dir(model)?;
        Ok(self.resolver.resolve(&model_dir, selector)?)
    }

    pub async fn infer(
        &self,
        image: &DynamicImage,
        params: &RawParams,
    ) -> Result<RgbImage, InferenceError> {
        self.pipeline.infer(image, params).await
    }

    pub async fn infer_bytes(
        &self,
        bytes: &[u8],
        params: &RawParams,
    ) -> Result<RgbImage, InferenceError> {
        self.pipeline.infer_bytes(bytes, params).await
    }

    #[must_use]
    pub fn health(&self) -> Health {
        let cache = self.cache();
        Health {
            status: if self.root.root().is_dir() { "ok" } else { "degraded" },
            model_root: self.root.root().to_path_buf(),
            loaded_configs: cache
                .loaded_configs()
                .into_iter()
                .map(|config| LoadedConfig { fingerprint: config.fingerprint(), config })
                .collect(),
            stats: cache.get_stats(),
        }
    }

    /// Release every resident model.
    pub fn shutdown(&self) {
        self.cache().shutdown();
    }

    fn ensure_root(&self) -> Result<(), InferenceError> {
        if self.root.root().is_dir() {
            Ok(())
        } else {
            Err(InferenceError::ModelRootNotFound {
                detail: self.root.root().display().to_string(),
            })
        }
    }
}
