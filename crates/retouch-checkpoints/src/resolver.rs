//! Selector → checkpoint file resolution.
//!
//! The filesystem is the source of truth: every call rescans the model
//! directory, because checkpoints are written by an external training process
//! while the service is running.

use crate::checkpoint::{
    Checkpoint, LATEST, SelectorKind, cmp_digits, model_name_of, parse_selector,
};
use crate::error::{CheckpointError, CheckpointResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Default extension of generator weight files.
pub const DEFAULT_WEIGHT_EXTENSION: &str = "pth";

/// Finds generator checkpoints inside a model directory.
#[derive(Debug, Clone)]
pub struct CheckpointResolver {
    extension: String,
}

impl Default for CheckpointResolver {
    fn default() -> Self {
        Self::new(DEFAULT_WEIGHT_EXTENSION)
    }
}

impl CheckpointResolver {
    /// Create a resolver for weight files with the given extension (`pth`, `.safetensors`, ...).
    #[must_use]
    pub fn new(extension: &str) -> Self {
        Self { extension: extension.trim_start_matches('.').to_string() }
    }

    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Resolve `selector` to exactly one checkpoint in `model_dir`.
    ///
    /// First match wins:
    /// 1. a file whose selector is literally `selector`;
    /// 2. for `latest`, a `latest_net_G*` file;
    /// 3. for `latest` without such a file, the greatest numeric epoch, or if no
    ///    selector is numeric, the most recently modified weight file;
    /// 4. otherwise `CheckpointNotFound`.
    pub fn resolve(&self, model_dir: &Path, selector: &str) -> CheckpointResult<Checkpoint> {
        let model = model_name_of(model_dir);
        let not_found = || CheckpointError::CheckpointNotFound {
            model: model.clone(),
            selector: selector.to_string(),
        };

        let candidates = self.scan(model_dir)?;
        if candidates.is_empty() {
            return Err(not_found());
        }

        if let Some(exact) = preferred_for(&candidates, selector) {
            debug!(
                model = %model,
                selector = %selector,
                file = %exact.file_name(),
                "Resolved checkpoint by exact selector"
            );
            return Ok(exact.clone());
        }

        // Step 2 is covered by step 1 once the selector is `latest`; what is left
        // is the fallback for directories that never wrote a rolling marker.
        if selector != LATEST {
            return Err(not_found());
        }

        if let Some(newest_epoch) = greatest_epoch(&candidates) {
            debug!(
                model = %model,
                selector = %newest_epoch.selector,
                "No latest checkpoint; using greatest numeric epoch"
            );
            return Ok(newest_epoch.clone());
        }

        let most_recent = candidates
            .iter()
            .max_by(|a, b| {
                a.modified
                    .cmp(&b.modified)
                    .then_with(|| b.file_name().cmp(a.file_name()))
            })
            .ok_or_else(not_found)?;
        warn!(
            model = %model,
            selector = %most_recent.selector,
            "No latest or numeric checkpoint; falling back to most recently modified file"
        );
        Ok(most_recent.clone())
    }

    /// Every selector available in `model_dir`, one checkpoint per selector.
    ///
    /// Ordered `latest` first, then non-numeric tags, then numeric epochs
    /// descending; ties are broken by file name.
    pub fn list_checkpoints(&self, model_dir: &Path) -> CheckpointResult<Vec<Checkpoint>> {
        let candidates = self.scan(model_dir)?;
        if candidates.is_empty() {
            return Err(CheckpointError::CheckpointNotFound {
                model: model_name_of(model_dir),
                selector: "*".to_string(),
            });
        }

        let mut by_selector: BTreeMap<String, Checkpoint> = BTreeMap::new();
        for checkpoint in candidates {
            match by_selector.get(&checkpoint.selector) {
                Some(existing) if !checkpoint.preferred_over(existing) => {}
                _ => {
                    by_selector.insert(checkpoint.selector.clone(), checkpoint);
                }
            }
        }

        let mut listed: Vec<Checkpoint> = by_selector.into_values().collect();
        listed.sort_by(Checkpoint::listing_cmp);
        Ok(listed)
    }

    /// All weight files in `model_dir` that carry the generator marker.
    fn scan(&self, model_dir: &Path) -> CheckpointResult<Vec<Checkpoint>> {
        let entries = match std::fs::read_dir(model_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::ModelDirectoryNotFound {
                    model: model_name_of(model_dir),
                    path: model_dir.to_path_buf(),
                });
            }
            Err(e) => return Err(CheckpointError::io(model_dir, e)),
        };

        let absolute_dir =
            std::path::absolute(model_dir).map_err(|e| CheckpointError::io(model_dir, e))?;
        let mut found = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| CheckpointError::io(model_dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(selector) = parse_selector(&file_name, &self.extension) else {
                continue;
            };

            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            found.push(Checkpoint {
                model_dir: absolute_dir.clone(),
                selector: selector.to_string(),
                path: absolute_dir.join(&file_name),
                modified: DateTime::<Utc>::from(modified),
            });
        }

        debug!(dir = %model_dir.display(), count = found.len(), "Scanned model directory");
        Ok(found)
    }
}

fn preferred_for<'a>(candidates: &'a [Checkpoint], selector: &str) -> Option<&'a Checkpoint> {
    candidates
        .iter()
        .filter(|c| c.selector == selector)
        .reduce(|best, c| if c.preferred_over(best) { c } else { best })
}

fn greatest_epoch(candidates: &[Checkpoint]) -> Option<&Checkpoint> {
    candidates
        .iter()
        .filter_map(|c| match c.kind() {
            SelectorKind::Epoch(digits) => Some((digits, c)),
            _ => None,
        })
        .reduce(|best, next| {
            let by_value = cmp_digits(next.0, best.0);
            let wins = by_value.is_gt() || (by_value.is_eq() && next.1.preferred_over(best.1));
            if wins { next } else { best }
        })
        .map(|(_, c)| c)
}
