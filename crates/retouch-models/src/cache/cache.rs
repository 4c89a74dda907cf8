//! ModelCache implementation with single-flight loading and optional LRU eviction.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use retouch_checkpoints::{CheckpointError, CheckpointResolver, ModelRoot};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::config::{CacheConfig, CacheConfigError};
use super::types::{CacheStats, LoadedModel};
use crate::config::InferenceConfig;
use crate::error::InferenceError;
use crate::factory::ModelLoader;

type LoadResult = Result<Arc<LoadedModel>, InferenceError>;
type PendingLoad = Shared<BoxFuture<'static, LoadResult>>;

enum Slot {
    /// A load is in flight; every caller awaits the same shared future.
    Loading(PendingLoad),
    Ready(ResidentModel),
}

struct ResidentModel {
    model: Arc<LoadedModel>,
    last_used: Instant,
}

struct Inner {
    slots: RwLock<HashMap<InferenceConfig, Slot>>,
    stats: RwLock<CacheStats>,
    config: CacheConfig,
    root: ModelRoot,
    resolver: CheckpointResolver,
}

/// Model cache keyed by [`InferenceConfig`].
///
/// - A hit returns the resident model without touching the filesystem.
/// - A miss resolves the checkpoint and invokes the loader exactly once; callers
///   that arrive while that load is in flight wait for it and share its result,
///   success or failure.
/// - A failed load clears its key so the next request retries from scratch.
/// - Loads run as detached tasks: a caller that stops waiting does not cancel
///   the load for anyone else.
///
/// Cloning the cache is cheap and yields a handle to the same storage.
#[derive(Clone)]
pub struct ModelCache {
    inner: Arc<Inner>,
}

impl ModelCache {
    /// Create a new model cache resolving checkpoints under `root`.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(
        config: CacheConfig,
        root: ModelRoot,
        resolver: CheckpointResolver,
    ) -> Result<Self, CacheConfigError> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                slots: RwLock::new(HashMap::new()),
                stats: RwLock::new(CacheStats::default()),
                config,
                root,
                resolver,
            }),
        })
    }

    /// Get the model for `config`, loading it through `loader` on first use.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns the resolver's error (`ModelDirectoryNotFound`,
    /// `CheckpointNotFound`, ...) or `ModelLoadFailed` if the loader fails.
    pub async fn get_or_load(
        &self,
        config: InferenceConfig,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Arc<LoadedModel>, InferenceError> {
        let pending = {
            let mut slots = self.inner.slots_mut();
            match slots.get_mut(&config) {
                Some(Slot::Ready(resident)) => {
                    resident.last_used = Instant::now();
                    self.inner.stats_mut().total_hits += 1;
                    debug!(
                        fingerprint = %config.fingerprint(),
                        model = %config.model_name(),
                        "Cache hit"
                    );
                    return Ok(Arc::clone(&resident.model));
                }
                Some(Slot::Loading(pending)) => {
                    self.inner.stats_mut().total_coalesced += 1;
                    debug!(fingerprint = %config.fingerprint(), "Joining in-flight load");
                    pending.clone()
                }
                None => {
                    self.inner.stats_mut().total_misses += 1;
                    debug!(
                        fingerprint = %config.fingerprint(),
                        model = %config.model_name(),
                        "Cache miss, loading model"
                    );
                    let pending = Inner::spawn_load(&self.inner, config.clone(), loader);
                    slots.insert(config, Slot::Loading(pending.clone()));
                    pending
                }
            }
        };

        pending.await
    }

    /// Configs of every resident model, ordered by fingerprint.
    ///
    /// Loads still in flight are not included.
    #[must_use]
    pub fn loaded_configs(&self) -> Vec<InferenceConfig> {
        let slots = self.inner.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut configs: Vec<_> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(config, _)| config.clone())
            .collect();
        configs.sort_by_cached_key(InferenceConfig::fingerprint);
        configs
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn get_stats(&self) -> CacheStats {
        let mut result = self.inner.stats.read().unwrap_or_else(PoisonError::into_inner).clone();
        result.cache_size = self.inner.resident_count();
        result
    }

    /// Drop every resident model.
    ///
    /// Each handle is released once the requests still using it finish.
    /// Loads in flight are not cancelled; call this after the serving
    /// boundary has stopped accepting requests.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut slots = self.inner.slots_mut();
            let ready: Vec<_> = slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
                .map(|(config, _)| config.clone())
                .collect();
            ready.into_iter().filter_map(|config| slots.remove(&config)).collect()
        };
        self.inner.stats_mut().cache_size = 0;
        info!(released = drained.len(), "Model cache shut down");
    }

    /// Get the cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Directory layout the cache resolves checkpoints in.
    #[must_use]
    pub fn root(&self) -> &ModelRoot {
        &self.inner.root
    }

    #[must_use]
    pub fn resolver(&self) -> &CheckpointResolver {
        &self.inner.resolver
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("config", &self.inner.config)
            .field("root", &self.inner.root)
            .field("stats", &self.get_stats())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn slots_mut(&self) -> RwLockWriteGuard<'_, HashMap<InferenceConfig, Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats_mut(&self) -> RwLockWriteGuard<'_, CacheStats> {
        self.stats.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn resident_count(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Start the single load for `config` as a detached task.
    ///
    /// The task records its own outcome in the slot map, so the result is kept
    /// even if every waiter has gone away.
    fn spawn_load(
        this: &Arc<Self>,
        config: InferenceConfig,
        loader: Arc<dyn ModelLoader>,
    ) -> PendingLoad {
        let inner = Arc::clone(this);
        let outer_key = config.clone();
        let task = tokio::spawn(async move {
            let root = inner.root.clone();
            let resolver = inner.resolver.clone();
            let key = config.clone();

            let result = tokio::task::spawn_blocking(move || {
                load_blocking(&root, &resolver, &config, loader.as_ref())
            })
            .await
            .unwrap_or_else(|e| {
                Err(InferenceError::load_failed(&key, format!("load task failed: {e}")))
            });

            inner.finish_load(&key, &result);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(InferenceError::load_failed(&outer_key, format!("load task failed: {e}")))
            })
        }
        .boxed()
        .shared()
    }

    fn finish_load(&self, key: &InferenceConfig, result: &LoadResult) {
        let mut slots = self.slots_mut();
        let mut stats = self.stats_mut();

        match result {
            Ok(model) => {
                if let Some(max) = self.config.max_resident_models {
                    while resident_len(&slots) >= max {
                        let Some(victim) = least_recently_used(&slots) else { break };
                        slots.remove(&victim);
                        stats.total_evictions += 1;
                        info!(
                            model = %victim.model_name(),
                            fingerprint = %victim.fingerprint(),
                            "Evicted LRU model from cache"
                        );
                    }
                }

                let resident =
                    ResidentModel { model: Arc::clone(model), last_used: Instant::now() };
                slots.insert(key.clone(), Slot::Ready(resident));
                stats.total_loads += 1;
                info!(
                    model = %key.model_name(),
                    selector = %model.checkpoint().selector,
                    fingerprint = %key.fingerprint(),
                    model_id = %model.model_id(),
                    "Model cached"
                );
            }
            Err(err) => {
                // Only the in-flight marker is cleared; resident entries for
                // other configs are untouched.
                if matches!(slots.get(key), Some(Slot::Loading(_))) {
                    slots.remove(key);
                }
                stats.total_load_failures += 1;
                warn!(
                    fingerprint = %key.fingerprint(),
                    kind = err.kind(),
                    detail = err.detail().unwrap_or_default(),
                    "Model load failed: {err}"
                );
            }
        }

        stats.cache_size = resident_len(&slots);
    }
}

fn load_blocking(
    root: &ModelRoot,
    resolver: &CheckpointResolver,
    config: &InferenceConfig,
    loader: &dyn ModelLoader,
) -> LoadResult {
    let model_dir = root.model_dir(config.model_name())?;
    let checkpoint = resolver.resolve(&model_dir, config.selector()).map_err(|e| match e {
        CheckpointError::ModelDirectoryNotFound { .. } if !root.root().is_dir() => {
            CheckpointError::RootNotFound { root: root.root().to_path_buf() }
        }
        other => other,
    })?;

    info!(
        model = %config.model_name(),
        requested = %config.selector(),
        resolved = %checkpoint.selector,
        "Loading model"
    );
    let started = Instant::now();
    let handle = loader.load(&checkpoint, config).map_err(|e| {
        InferenceError::load_failed(config, format!("{}: {e}", checkpoint.path.display()))
    })?;
    info!(
        model = %config.model_name(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Model loaded"
    );

    Ok(Arc::new(LoadedModel::new(config.clone(), checkpoint, handle)))
}

fn resident_len(slots: &HashMap<InferenceConfig, Slot>) -> usize {
    slots.values().filter(|slot| matches!(slot, Slot::Ready(_))).count()
}

fn least_recently_used(slots: &HashMap<InferenceConfig, Slot>) -> Option<InferenceConfig> {
    slots
        .iter()
        .filter_map(|(config, slot)| match slot {
            Slot::Ready(resident) => Some((config, resident.last_used)),
            Slot::Loading(_) => None,
        })
        .min_by_key(|(_, last_used)| *last_used)
        .map(|(config, _)| config.clone())
}
