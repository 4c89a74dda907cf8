//! Error taxonomy of the inference core.

use retouch_abstraction::ModelError;
use retouch_checkpoints::CheckpointError;
use serde::Serialize;
use thiserror::Error;

use crate::config::InferenceConfig;

/// Errors surfaced to the serving boundary.
///
/// Every variant names the offending identifier (config field, model, selector).
/// Filesystem paths and backend messages only ever travel in `detail`, which is
/// meant for diagnostic logs rather than end users.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InferenceError {
    /// A request parameter could not be coerced or is out of range.
    #[error("Invalid config field '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    /// The configured model root does not exist.
    #[error("Model root not found")]
    ModelRootNotFound { detail: String },

    /// No directory exists for the requested model.
    #[error("Model '{model}' not found")]
    ModelDirectoryNotFound { model: String },

    /// The model exists but no checkpoint matches the selector.
    #[error("No checkpoint for model '{model}' matches selector '{selector}'")]
    CheckpointNotFound { model: String, selector: String },

    /// The input image could not be decoded or converted.
    #[error("Unsupported image: {reason}")]
    UnsupportedImage { reason: String },

    /// The checkpoint exists but could not be materialized.
    #[error("Failed to load model '{model}' at selector '{selector}'")]
    ModelLoadFailed { model: String, selector: String, detail: String },

    /// The backend raised during the forward pass.
    #[error("Inference failed for model '{model}'")]
    InferenceFailed { model: String, detail: String },

    /// Reading a model directory failed for a reason other than absence.
    #[error("Storage error while reading model '{model}'")]
    Storage { model: String, detail: String },
}

impl InferenceError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig { field: field.to_string(), reason: reason.into() }
    }

    pub(crate) fn unsupported_image(reason: impl Into<String>) -> Self {
        Self::UnsupportedImage { reason: reason.into() }
    }

    pub(crate) fn load_failed(config: &InferenceConfig, detail: impl Into<String>) -> Self {
        Self::ModelLoadFailed {
            model: config.model_name().to_string(),
            selector: config.selector().to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn inference_failed(config: &InferenceConfig, error: &ModelError) -> Self {
        Self::InferenceFailed { model: config.model_name().to_string(), detail: error.to_string() }
    }

    /// Stable, machine-readable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "invalid_config",
            Self::ModelRootNotFound { .. } => "model_root_not_found",
            Self::ModelDirectoryNotFound { .. } => "model_directory_not_found",
            Self::CheckpointNotFound { .. } => "checkpoint_not_found",
            Self::UnsupportedImage { .. } => "unsupported_image",
            Self::ModelLoadFailed { .. } => "model_load_failed",
            Self::InferenceFailed { .. } => "inference_failed",
            Self::Storage { .. } => "storage",
        }
    }

    /// Whether the caller caused the error (4xx-equivalent) rather than the system.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::ModelDirectoryNotFound { .. }
                | Self::CheckpointNotFound { .. }
                | Self::UnsupportedImage { .. }
        )
    }

    /// Diagnostic detail for logs, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::ModelRootNotFound { detail }
            | Self::ModelLoadFailed { detail, .. }
            | Self::InferenceFailed { detail, .. }
            | Self::Storage { detail, .. } => Some(detail),
            _ => None,
        }
    }
}

impl From<CheckpointError> for InferenceError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::RootNotFound { root } => {
                Self::ModelRootNotFound { detail: root.display().to_string() }
            }
            CheckpointError::ModelDirectoryNotFound { model, .. } => {
                Self::ModelDirectoryNotFound { model }
            }
            CheckpointError::CheckpointNotFound { model, selector } => {
                Self::CheckpointNotFound { model, selector }
            }
            CheckpointError::Io { path, source } => Self::Storage {
                model: path
                    .file_name()
                    .map_or_else(String::new, |n| n.to_string_lossy().into_owned()),
                detail: format!("{}: {source}", path.display()),
            },
        }
    }
}
