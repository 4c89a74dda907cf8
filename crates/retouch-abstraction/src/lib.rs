//! Model abstraction layer for Retouch.
//!
//! This module defines the contract every numeric backend has to satisfy: a
//! loaded [`ModelHandle`] that maps one [`ImageTensor`] to another. The
//! serving core never looks inside a handle beyond this trait.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error raised by a numeric backend.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// The checkpoint could not be materialized into a network.
    #[error("Load Error: {0}")]
    LoadError(String),

    /// The backend has no network for the requested architecture tag.
    #[error("Incompatible architecture: {0}")]
    IncompatibleArchitecture(String),

    /// The forward pass raised.
    #[error("Forward Error: {0}")]
    ForwardError(String),

    /// A tensor did not have the shape the operation requires.
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Human-readable description of the expected shape.
        expected: String,
        /// The shape that was actually seen.
        actual: String,
    },

    /// The handle was used after `release()`.
    #[error("Model handle already released")]
    Released,
}

/// Channel/height/width of an image tensor once the batch dimension is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDims {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

/// A dense `f32` tensor in NCHW (or CHW) layout.
///
/// Pixel tensors produced by the pipeline always carry a leading singleton
/// batch dimension: `[1, C, H, W]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl ImageTensor {
    /// Wrap `data` with the given shape.
    ///
    /// # Errors
    /// Returns `ModelError::ShapeMismatch` if the element count does not match
    /// the product of `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ModelError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ModelError::ShapeMismatch {
                expected: format!("{expected} elements for {shape:?}"),
                actual: format!("{} elements", data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    /// A tensor of the given shape filled with `value`.
    #[must_use]
    pub fn filled(shape: Vec<usize>, value: f32) -> Self {
        let len = shape.iter().product();
        Self { shape, data: vec![value; len] }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Interpret the tensor as a single image.
    ///
    /// Accepts `[1, C, H, W]` and `[C, H, W]`; anything else (including a
    /// batch larger than one) yields `None`.
    #[must_use]
    pub fn image_dims(&self) -> Option<ImageDims> {
        match *self.shape.as_slice() {
            [1, channels, height, width] | [channels, height, width] => {
                Some(ImageDims { channels, height, width })
            }
            _ => None,
        }
    }
}

/// A loaded, ready-to-run image-to-image network.
///
/// Handles must be `Send + Sync`; a backend that cannot run two forward
/// passes at once reports it through [`ModelHandle::supports_concurrent_forward`]
/// and the cache serializes calls for it.
pub trait ModelHandle: Send + Sync {
    /// Run the network on a `[1, C, H, W]` tensor normalized to `[-1, 1]`.
    ///
    /// The output has the same spatial dimensions as the input.
    ///
    /// # Errors
    /// Returns a `ModelError` if the backend raises during the pass.
    fn forward(&self, input: &ImageTensor) -> Result<ImageTensor, ModelError>;

    /// Free memory/device resources held by the network.
    ///
    /// Called once by the owning cache entry before it is dropped.
    fn release(&self) {}

    /// Number of channels the network expects on its input (1 or 3).
    fn input_channels(&self) -> usize {
        3
    }

    /// Whether `forward` may be invoked concurrently on this handle.
    fn supports_concurrent_forward(&self) -> bool {
        true
    }

    /// Returns an identifier of the loaded network, for logs.
    fn model_id(&self) -> &str;
}
