use crate::error::{CheckpointError, CheckpointResult};
use std::path::{Component, Path, PathBuf};

/// Filesystem layout of trained models.
///
/// One subdirectory per model name, each holding
/// `<selector>_net_G<suffix>.<ext>` weight files:
/// `<root>/<model_name>/latest_net_G.pth`
#[derive(Debug, Clone)]
pub struct ModelRoot {
    root: PathBuf,
}

impl ModelRoot {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the checkpoints of `model_name`.
    ///
    /// The name must be a single plain path component; anything that could
    /// escape the root (`..`, separators, absolute paths) is reported as a
    /// missing model directory.
    pub fn model_dir(&self, model_name: &str) -> CheckpointResult<PathBuf> {
        let mut components = Path::new(model_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(model_name)),
            _ => Err(CheckpointError::ModelDirectoryNotFound {
                model: model_name.to_string(),
                path: self.root.join(model_name),
            }),
        }
    }

    /// Names of every model subdirectory, sorted.
    pub fn model_names(&self) -> CheckpointResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::RootNotFound { root: self.root.clone() });
            }
            Err(e) => return Err(CheckpointError::io(&self.root, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CheckpointError::io(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            // Non UTF-8 directory names cannot be requested by name anyway.
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
