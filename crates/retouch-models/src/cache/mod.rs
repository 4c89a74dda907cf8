//! Model caching keyed by inference configuration.
//!
//! Each distinct [`InferenceConfig`](crate::InferenceConfig) maps to at most
//! one loaded network. Concurrent first requests for the same config share a
//! single load.

pub mod cache;
pub mod config;
pub mod types;

pub use cache::ModelCache;
pub use config::{CacheConfig, CacheConfigError};
pub use types::{CacheStats, LoadedModel};
