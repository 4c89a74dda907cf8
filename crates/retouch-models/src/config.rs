//! Canonical inference configuration and the builder that produces it from
//! loosely-typed request parameters.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::InferenceError;

/// Loosely-typed request parameters, as decoded from a request body.
pub type RawParams = serde_json::Map<String, Value>;

pub const DEFAULT_SELECTOR: &str = "latest";
pub const DEFAULT_ARCHITECTURE: &str = "unet_256";
pub const DEFAULT_LOAD_SIZE: u32 = 1024;
pub const DEFAULT_CROP_SIZE: u32 = 1024;
/// Largest accepted `load_size` / `crop_size`, in pixels per side.
pub const MAX_IMAGE_SIDE: u32 = 4096;

/// Which of the two paired image domains is the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Direction {
    #[default]
    AtoB,
    BtoA,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AtoB => "AtoB",
            Self::BtoA => "BtoA",
        }
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atob" => Ok(Self::AtoB),
            "btoa" => Ok(Self::BtoA),
            _ => Err(()),
        }
    }
}

/// Normalization layer the generator was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    Batch,
    Instance,
    None,
}

impl Normalization {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Instance => "instance",
            Self::None => "none",
        }
    }
}

impl FromStr for Normalization {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "instance" => Ok(Self::Instance),
            "none" => Ok(Self::None),
            _ => Err(()),
        }
    }
}

/// Geometric preprocessing applied before the image is tensorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessMode {
    /// Resize to `load_size` square, then center crop/pad to `crop_size`.
    #[default]
    ResizeAndCrop,
    /// Resize to `load_size` square.
    Resize,
    /// Center crop/pad to `crop_size` without resizing.
    Crop,
    /// Keep the aspect ratio; only round each side to a multiple of 4.
    None,
}

impl PreprocessMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResizeAndCrop => "resize_and_crop",
            Self::Resize => "resize",
            Self::Crop => "crop",
            Self::None => "none",
        }
    }
}

impl FromStr for PreprocessMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resize_and_crop" => Ok(Self::ResizeAndCrop),
            "resize" => Ok(Self::Resize),
            "crop" => Ok(Self::Crop),
            "none" => Ok(Self::None),
            _ => Err(()),
        }
    }
}

/// Fully-resolved, immutable description of one servable model configuration.
///
/// Structural equality is the model cache key: a changed parameter is a
/// different config, never an edit of a cached one. Fields are private so a
/// config can only come out of [`ConfigBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InferenceConfig {
    model_name: String,
    selector: String,
    direction: Direction,
    architecture: String,
    normalization: Normalization,
    load_size: u32,
    crop_size: u32,
    preprocess: PreprocessMode,
    no_dropout: bool,
}

impl InferenceConfig {
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    #[must_use]
    pub const fn normalization(&self) -> Normalization {
        self.normalization
    }

    #[must_use]
    pub const fn load_size(&self) -> u32 {
        self.load_size
    }

    #[must_use]
    pub const fn crop_size(&self) -> u32 {
        self.crop_size
    }

    #[must_use]
    pub const fn preprocess(&self) -> PreprocessMode {
        self.preprocess
    }

    #[must_use]
    pub const fn no_dropout(&self) -> bool {
        self.no_dropout
    }

    /// Short content hash of the config, stable across processes.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        hex::encode(hasher.finalize())[..12].to_string()
    }
}

impl fmt::Display for InferenceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} [{} {} {} {}/{} {} dropout={}]",
            self.model_name,
            self.selector,
            self.direction.as_str(),
            self.architecture,
            self.normalization.as_str(),
            self.load_size,
            self.crop_size,
            self.preprocess.as_str(),
            !self.no_dropout,
        )
    }
}

/// Builds [`InferenceConfig`] values from raw request parameters.
///
/// Recognized keys (aliases in parentheses): `model_name` (`name`),
/// `selector` (`epoch`), `direction`, `architecture` (`netG`),
/// `normalization` (`norm`), `load_size`, `crop_size`, `preprocess`,
/// `no_dropout`. Unknown keys are ignored and `null` counts as absent.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    default_model: Option<String>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Model used when the request does not name one.
    #[must_use]
    pub fn with_default_model(mut self, model_name: impl Into<String>) -> Self {
        self.default_model = Some(model_name.into());
        self
    }

    /// Normalize `params` into a config.
    ///
    /// # Errors
    /// Returns `InferenceError::InvalidConfig` naming the first offending field.
    pub fn build(&self, params: &RawParams) -> Result<InferenceConfig, InferenceError> {
        let model_name = match lookup(params, "model_name", &["name"]) {
            Some(value) => coerce_string("model_name", value)?,
            None => self
                .default_model
                .clone()
                .ok_or_else(|| InferenceError::invalid("model_name", "no model requested"))?,
        };

        let selector = lookup(params, "selector", &["epoch"])
            .map(|v| coerce_string("selector", v))
            .transpose()?
            .unwrap_or_else(|| DEFAULT_SELECTOR.to_string());

        let direction = lookup(params, "direction", &[])
            .map(|v| coerce_enum::<Direction>("direction", v, "expected AtoB or BtoA"))
            .transpose()?
            .unwrap_or_default();

        let architecture = lookup(params, "architecture", &["netG"])
            .map(|v| coerce_string("architecture", v).map(|s| s.to_ascii_lowercase()))
            .transpose()?
            .unwrap_or_else(|| DEFAULT_ARCHITECTURE.to_string());

        let normalization = lookup(params, "normalization", &["norm"])
            .map(|v| {
                coerce_enum::<Normalization>("normalization", v, "expected batch, instance or none")
            })
            .transpose()?
            .unwrap_or_default();

        let load_size = lookup(params, "load_size", &[])
            .map(|v| coerce_size("load_size", v))
            .transpose()?
            .unwrap_or(DEFAULT_LOAD_SIZE);

        let crop_size = lookup(params, "crop_size", &[])
            .map(|v| coerce_size("crop_size", v))
            .transpose()?
            .unwrap_or(DEFAULT_CROP_SIZE);

        let preprocess = lookup(params, "preprocess", &[])
            .map(|v| {
                coerce_enum::<PreprocessMode>(
                    "preprocess",
                    v,
                    "expected resize_and_crop, resize, crop or none",
                )
            })
            .transpose()?
            .unwrap_or_default();

        let no_dropout = lookup(params, "no_dropout", &[])
            .map(|v| coerce_bool("no_dropout", v))
            .transpose()?
            .unwrap_or(true);

        Ok(InferenceConfig {
            model_name,
            selector,
            direction,
            architecture,
            normalization,
            load_size,
            crop_size,
            preprocess,
            no_dropout,
        })
    }
}

/// First non-null value under the canonical key, then under each alias.
fn lookup<'a>(params: &'a RawParams, key: &str, aliases: &[&str]) -> Option<&'a Value> {
    std::iter::once(key)
        .chain(aliases.iter().copied())
        .filter_map(|k| params.get(k))
        .find(|v| !v.is_null())
}

fn coerce_string(field: &str, value: &Value) -> Result<String, InferenceError> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(u), _, _) => u.to_string(),
            (None, Some(i), _) => i.to_string(),
            (None, None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
            _ => return Err(InferenceError::invalid(field, format!("cannot use {n} here"))),
        },
        other => {
            return Err(InferenceError::invalid(field, format!("expected a string, got {other}")));
        }
    };

    if text.is_empty() {
        return Err(InferenceError::invalid(field, "must not be empty"));
    }
    Ok(text)
}

fn coerce_size(field: &str, value: &Value) -> Result<u32, InferenceError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite() && f.fract() == 0.0)
    .ok_or_else(|| {
        InferenceError::invalid(field, format!("expected a positive integer, got {value}"))
    })?;

    if number <= 0.0 {
        return Err(InferenceError::invalid(field, "must be positive"));
    }
    if number > f64::from(MAX_IMAGE_SIDE) {
        return Err(InferenceError::invalid(field, format!("must be at most {MAX_IMAGE_SIDE}")));
    }
    Ok(number as u32)
}

fn coerce_bool(field: &str, value: &Value) -> Result<bool, InferenceError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(InferenceError::invalid(field, format!("expected a boolean, got {value}"))),
        },
        _ => Err(InferenceError::invalid(field, format!("expected a boolean, got {value}"))),
    }
}

fn coerce_enum<T: FromStr>(
    field: &str,
    value: &Value,
    expected: &str,
) -> Result<T, InferenceError> {
    value
        .as_str()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| InferenceError::invalid(field, format!("{expected}, got {value}")))
}
