//! Configuration for the model cache.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for the model cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of loaded models kept resident.
    ///
    /// `None` keeps every loaded model for the life of the process; with a
    /// bound, the least-recently-used model is evicted to make room.
    #[serde(default)]
    pub max_resident_models: Option<usize>,
}

/// Errors that can occur during cache configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheConfigError {
    /// Invalid max resident models (must be > 0 when set).
    #[error("Invalid max resident models: must be greater than 0")]
    InvalidMaxResidentModels,
}

impl CacheConfig {
    /// A cache bounded to `max` resident models.
    #[must_use]
    pub const fn bounded(max: usize) -> Self {
        Self { max_resident_models: Some(max) }
    }

    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.max_resident_models == Some(0) {
            return Err(CacheConfigError::InvalidMaxResidentModels);
        }
        Ok(())
    }
}
