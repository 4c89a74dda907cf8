use crate::checkpoint::LATEST;
use crate::error::{CheckpointError, CheckpointResult};
use crate::layout::ModelRoot;
use crate::resolver::CheckpointResolver;
use serde::Serialize;
use tracing::debug;

/// A discovered model and the selectors it can be served with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelListing {
    pub model_name: String,
    /// Selectors in listing order (`latest`, tags, epochs descending).
    pub available_selectors: Vec<String>,
    /// `latest` when a latest file exists, otherwise what `latest` resolves to.
    pub default_selector: String,
}

/// Discover every servable model under `root`.
///
/// An empty root is a valid, empty listing. Model directories that hold no
/// generator checkpoint are skipped.
pub fn resolve_model_listing(
    root: &ModelRoot,
    resolver: &CheckpointResolver,
) -> CheckpointResult<Vec<ModelListing>> {
    let mut out = Vec::new();

    for model_name in root.model_names()? {
        let model_dir = root.model_dir(&model_name)?;
        let checkpoints = match resolver.list_checkpoints(&model_dir) {
            Ok(checkpoints) => checkpoints,
            Err(CheckpointError::CheckpointNotFound { .. }) => {
                debug!(model = %model_name, "Skipping model directory without checkpoints");
                continue;
            }
            Err(e) => return Err(e),
        };

        let available_selectors: Vec<String> =
            checkpoints.into_iter().map(|c| c.selector).collect();
        let default_selector = if available_selectors.iter().any(|s| s == LATEST) {
            LATEST.to_string()
        } else {
            resolver.resolve(&model_dir, LATEST)?.selector
        };

        out.push(ModelListing { model_name, available_selectors, default_selector });
    }

    Ok(out)
}
