//! Retouch Checkpoints
//!
//! Filesystem-backed checkpoint discovery for trained image-to-image models:
//! - Resolving a selector (`latest`, an epoch, a tag) to one weight file (`CheckpointResolver`)
//! - Enumerating the selectors a model directory offers
//! - Listing every servable model under a model root

pub mod checkpoint;
pub mod error;
pub mod layout;
pub mod registry;
pub mod resolver;

pub use checkpoint::{Checkpoint, GENERATOR_MARKER, LATEST, SelectorKind, parse_selector};
pub use error::{CheckpointError, CheckpointResult};
pub use layout::ModelRoot;
pub use registry::{ModelListing, resolve_model_listing};
pub use resolver::{CheckpointResolver, DEFAULT_WEIGHT_EXTENSION};
