//! Core data types for model caching.

use chrono::{DateTime, Utc};
use retouch_abstraction::{ImageTensor, ModelError, ModelHandle};
use retouch_checkpoints::Checkpoint;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::InferenceConfig;

/// A loaded model owned by the cache.
///
/// Callers receive an `Arc<LoadedModel>` for the duration of one request.
/// The handle is released when the last reference goes away, which happens
/// after the cache has dropped its entry (eviction or shutdown) and every
/// in-flight forward pass on it has finished.
pub struct LoadedModel {
    config: InferenceConfig,
    checkpoint: Checkpoint,
    handle: Box<dyn ModelHandle>,
    loaded_at: DateTime<Utc>,
    /// FIFO gate for handles that cannot run concurrent forward passes.
    forward_gate: Arc<Mutex<()>>,
}

impl LoadedModel {
    pub(crate) fn new(
        config: InferenceConfig,
        checkpoint: Checkpoint,
        handle: Box<dyn ModelHandle>,
    ) -> Self {
        Self {
            config,
            checkpoint,
            handle,
            loaded_at: Utc::now(),
            forward_gate: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// The checkpoint this model was materialized from.
    #[must_use]
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        self.handle.model_id()
    }

    #[must_use]
    pub fn input_channels(&self) -> usize {
        self.handle.input_channels()
    }

    /// Run one forward pass on a blocking thread.
    ///
    /// Handles that do not support concurrent use are entered one caller at
    /// a time, in arrival order. The turn is held by the blocking task, so a
    /// cancelled caller keeps the gate closed until its pass returns.
    ///
    /// # Errors
    /// Returns the backend's `ModelError`, or `ModelError::ForwardError` if the
    /// blocking task panicked.
    pub async fn forward(self: Arc<Self>, input: ImageTensor) -> Result<ImageTensor, ModelError> {
        let turn = if self.handle.supports_concurrent_forward() {
            None
        } else {
            Some(Arc::clone(&self.forward_gate).lock_owned().await)
        };

        let model = Arc::clone(&self);
        tokio::task::spawn_blocking(move || {
            let _turn = turn;
            model.handle.forward(&input)
        })
        .await
        .map_err(|e| ModelError::ForwardError(format!("forward task failed: {e}")))?
    }
}

impl Drop for LoadedModel {
    fn drop(&mut self) {
        self.handle.release();
        info!(
            model = %self.config.model_name(),
            selector = %self.checkpoint.selector,
            fingerprint = %self.config.fingerprint(),
            "Released model"
        );
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("model_id", &self.handle.model_id())
            .field("config", &self.config)
            .field("checkpoint", &self.checkpoint.path)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Requests served from an already-loaded model.
    pub total_hits: u64,
    /// Requests that started a new load.
    pub total_misses: u64,
    /// Requests that joined a load already in flight.
    pub total_coalesced: u64,
    /// Loads that completed successfully.
    pub total_loads: u64,
    /// Loads that failed (resolution or backend).
    pub total_load_failures: u64,
    /// Models evicted to respect `max_resident_models`.
    pub total_evictions: u64,
    /// Current number of resident models.
    pub cache_size: usize,
}
