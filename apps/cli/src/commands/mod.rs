//! Command implementations for the Retouch CLI.

pub mod checkpoints;
pub mod health;
pub mod infer;
pub mod models;

use anyhow::{Context, Result};
use retouch_models::{InferenceError, InferenceService, ModelFactory, ServiceConfig};
use std::sync::Arc;
use tracing::error;

pub use infer::InferArgs;

/// Backend used when neither the config file nor a flag names one.
pub const DEFAULT_BACKEND: &str = "passthrough";

/// Build the service every command runs against.
pub fn build_service(config: &ServiceConfig, backend: &str) -> Result<InferenceService> {
    let factory = ModelFactory::from_name(backend)
        .with_context(|| format!("Unknown backend '{backend}'"))?;
    InferenceService::new(config.clone(), Arc::new(factory)).context("Invalid cache configuration")
}

/// Convert a core error for the terminal, logging its diagnostic detail.
pub fn report(err: InferenceError) -> anyhow::Error {
    if let Some(detail) = err.detail() {
        error!(kind = err.kind(), detail, "{err}");
    }
    anyhow::Error::new(err)
}
