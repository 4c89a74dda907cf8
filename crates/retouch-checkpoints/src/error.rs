use std::path::PathBuf;
use thiserror::Error;

pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("model root not found: {}", root.display())]
    RootNotFound { root: PathBuf },

    #[error("model directory not found for model '{model}'")]
    ModelDirectoryNotFound { model: String, path: PathBuf },

    #[error("no checkpoint for model '{model}' matches selector '{selector}'")]
    CheckpointNotFound { model: String, selector: String },

    #[error("failed to scan {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
