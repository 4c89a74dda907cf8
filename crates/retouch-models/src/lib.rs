//! Inference serving core for Retouch.
//!
//! This crate turns loose request parameters and an input image into a
//! transformed image, using generator checkpoints stored on disk:
//!
//! - **config**: canonical, hashable `InferenceConfig` built from raw parameters
//! - **cache**: one loaded model per config, with single-flight loading
//! - **factory**: backend selection and the `ModelLoader` contract
//! - **pipeline**: preprocess → forward → postprocess
//! - **service**: the operations exposed to a serving boundary

pub mod cache;
pub mod config;
pub mod error;
pub mod factory;
pub mod pipeline;
pub mod service;

use retouch_abstraction::{ImageTensor, ModelError, ModelHandle};
use retouch_checkpoints::Checkpoint;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub use cache::{CacheConfig, CacheConfigError, CacheStats, LoadedModel, ModelCache};
pub use config::{
    ConfigBuilder, Direction, InferenceConfig, MAX_IMAGE_SIDE, Normalization, PreprocessMode,
    RawParams,
};
pub use error::InferenceError;
pub use factory::{BackendKind, GeneratorArch, ModelFactory, ModelLoader};
pub use pipeline::InferencePipeline;
pub use service::{Health, InferenceService, LoadedConfig, ServiceConfig};

/// Identity network: returns its input unchanged.
///
/// Loading still validates that the checkpoint file is readable and
/// non-empty, so resolution and cache behavior can be exercised end to end
/// without a numeric backend.
#[derive(Debug)]
pub struct PassthroughModel {
    id: String,
    released: AtomicBool,
}

impl PassthroughModel {
    /// Load a passthrough "network" from `checkpoint`.
    ///
    /// # Errors
    /// Returns `ModelError::LoadError` if the weight file cannot be read or is empty.
    pub fn load(checkpoint: &Checkpoint, arch: GeneratorArch) -> Result<Self, ModelError> {
        let mut file = std::fs::File::open(&checkpoint.path)
            .map_err(|e| ModelError::LoadError(format!("{}: {e}", checkpoint.path.display())))?;
        let mut first_byte = [0_u8; 1];
        let read = file
            .read(&mut first_byte)
            .map_err(|e| ModelError::LoadError(format!("{}: {e}", checkpoint.path.display())))?;
        if read == 0 {
            return Err(ModelError::LoadError(format!(
                "{}: empty weight file",
                checkpoint.path.display()
            )));
        }

        let id = format!("{}@{}/{}", checkpoint.model_name(), checkpoint.selector, arch.as_str());
        info!(model_id = %id, "Passthrough model loaded");
        Ok(Self { id, released: AtomicBool::new(false) })
    }
}

impl ModelHandle for PassthroughModel {
    fn forward(&self, input: &ImageTensor) -> Result<ImageTensor, ModelError> {
        if self.released.load(Ordering::Acquire) {
            return Err(ModelError::Released);
        }
        debug!(model_id = %self.id, shape = ?input.shape(), "PassthroughModel forward");
        Ok(input.clone())
    }

    fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}
