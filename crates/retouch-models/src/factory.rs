//! Model factory for materializing model handles from checkpoints.
//!
//! Backend selection is a tagged-variant lookup on [`BackendKind`]; each
//! backend then decides whether it can build the requested generator
//! architecture.

use crate::PassthroughModel;
use crate::config::InferenceConfig;
use retouch_abstraction::{ModelError, ModelHandle};
use retouch_checkpoints::Checkpoint;
use std::str::FromStr;
use tracing::{debug, error};

/// Anything that can turn a resolved checkpoint into a ready-to-run handle.
///
/// Called at most once per distinct config by the model cache, on a blocking
/// thread; implementations may do file I/O and slow backend initialization.
pub trait ModelLoader: Send + Sync {
    /// # Errors
    /// Returns a `ModelError` if the checkpoint cannot be materialized.
    fn load(
        &self,
        checkpoint: &Checkpoint,
        config: &InferenceConfig,
    ) -> Result<Box<dyn ModelHandle>, ModelError>;
}

impl<F> ModelLoader for F
where
    F: Fn(&Checkpoint, &InferenceConfig) -> Result<Box<dyn ModelHandle>, ModelError> + Send + Sync,
{
    fn load(
        &self,
        checkpoint: &Checkpoint,
        config: &InferenceConfig,
    ) -> Result<Box<dyn ModelHandle>, ModelError> {
        self(checkpoint, config)
    }
}

/// Backend enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Identity network for wiring and smoke tests.
    Passthrough,
}

impl FromStr for BackendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "passthrough" | "identity" | "mock" => Ok(Self::Passthrough),
            _ => Err(()),
        }
    }
}

/// Generator architectures a checkpoint can be built into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorArch {
    Unet256,
    Unet128,
    Resnet9Blocks,
    Resnet6Blocks,
}

impl GeneratorArch {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unet256 => "unet_256",
            Self::Unet128 => "unet_128",
            Self::Resnet9Blocks => "resnet_9blocks",
            Self::Resnet6Blocks => "resnet_6blocks",
        }
    }
}

impl FromStr for GeneratorArch {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unet_256" => Ok(Self::Unet256),
            "unet_128" => Ok(Self::Unet128),
            "resnet_9blocks" => Ok(Self::Resnet9Blocks),
            "resnet_6blocks" => Ok(Self::Resnet6Blocks),
            other => Err(ModelError::IncompatibleArchitecture(other.to_string())),
        }
    }
}

/// Factory for creating model handles.
#[derive(Debug, Clone, Copy)]
pub struct ModelFactory {
    kind: BackendKind,
}

impl ModelFactory {
    #[must_use]
    pub const fn new(kind: BackendKind) -> Self {
        Self { kind }
    }

    /// Creates a factory from a backend name.
    ///
    /// # Errors
    /// Returns a `ModelError` if the backend name is unrecognized.
    pub fn from_name(name: &str) -> Result<Self, ModelError> {
        let kind = BackendKind::from_str(name).map_err(|()| {
            error!(backend = %name, "Unrecognized backend");
            ModelError::LoadError(format!("Unrecognized backend: {name}"))
        })?;
        Ok(Self::new(kind))
    }

    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        self.kind
    }
}

impl ModelLoader for ModelFactory {
    fn load(
        &self,
        checkpoint: &Checkpoint,
        config: &InferenceConfig,
    ) -> Result<Box<dyn ModelHandle>, ModelError> {
        let arch = GeneratorArch::from_str(config.architecture())?;
        debug!(
            backend = ?self.kind,
            arch = arch.as_str(),
            checkpoint = %checkpoint.path.display(),
            "Creating model handle"
        );

        match self.kind {
            BackendKind::Passthrough => Ok(Box::new(PassthroughModel::load(checkpoint, arch)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBuilder, RawParams};
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn checkpoint_in(dir: &TempDir, name: &str, bytes: &[u8]) -> Checkpoint {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        Checkpoint {
            model_dir: dir.path().to_path_buf(),
            selector: "latest".to_string(),
            path,
            modified: Utc::now(),
        }
    }

    fn config_with(arch: &str) -> InferenceConfig {
        let params: RawParams = json!({ "netG": arch }).as_object().unwrap().clone();
        ConfigBuilder::new().with_default_model("m").build(&params).unwrap()
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!(BackendKind::from_str("passthrough"), Ok(BackendKind::Passthrough));
        assert_eq!(BackendKind::from_str("Identity"), Ok(BackendKind::Passthrough));
        assert_eq!(BackendKind::from_str("MOCK"), Ok(BackendKind::Passthrough));
        assert_eq!(BackendKind::from_str("torch"), Err(()));
    }

    #[test]
    fn test_factory_from_unknown_name() {
        assert!(ModelFactory::from_name("torch").is_err());
    }

    #[test]
    fn test_factory_loads_known_architecture() {
        let dir = TempDir::new().unwrap();
        let checkpoint = checkpoint_in(&dir, "latest_net_G.pth", b"weights");
        let factory = ModelFactory::new(BackendKind::Passthrough);

        let handle = factory.load(&checkpoint, &config_with("resnet_9blocks")).unwrap();
        assert!(handle.model_id().contains("resnet_9blocks"));
    }

    #[test]
    fn test_factory_rejects_unknown_architecture() {
        let dir = TempDir::new().unwrap();
        let checkpoint = checkpoint_in(&dir, "latest_net_G.pth", b"weights");
        let factory = ModelFactory::new(BackendKind::Passthrough);

        let err = factory.load(&checkpoint, &config_with("unet_512")).err().unwrap();
        assert_eq!(err, ModelError::IncompatibleArchitecture("unet_512".to_string()));
    }

    #[test]
    fn test_closures_are_loaders() {
        let dir = TempDir::new().unwrap();
        let checkpoint = checkpoint_in(&dir, "latest_net_G.pth", b"weights");
        let loader =
            |_: &Checkpoint, _: &InferenceConfig| -> Result<Box<dyn ModelHandle>, ModelError> {
                Err(ModelError::LoadError("nope".to_string()))
            };

        assert!(loader.load(&checkpoint, &config_with("unet_256")).is_err());
    }
}
