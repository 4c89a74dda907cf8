//! Image → tensor → model → tensor → image.
//!
//! Pixel values map to the generator's `[-1, 1]` domain with
//! `v' = v / 127.5 - 1` and back with `v = clamp((v' + 1) / 2 * 255, 0, 255)`.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage};
use retouch_abstraction::{ImageTensor, ModelError};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::cache::ModelCache;
use crate::config::{ConfigBuilder, InferenceConfig, PreprocessMode, RawParams};
use crate::error::InferenceError;
use crate::factory::ModelLoader;

/// Resampling filter for every resize (bicubic).
const RESAMPLE: FilterType = FilterType::CatmullRom;

/// Map an 8-bit channel value into `[-1, 1]`.
#[must_use]
pub fn normalize(value: u8) -> f32 {
    f32::from(value) / 127.5 - 1.0
}

/// Map a network output value back to 8 bits, clamping out-of-range values.
#[must_use]
pub fn denormalize(value: f32) -> u8 {
    ((value + 1.0) / 2.0 * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Decode PNG/JPEG/BMP bytes.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, InferenceError> {
    image::load_from_memory(bytes).map_err(|e| InferenceError::unsupported_image(e.to_string()))
}

/// Apply the geometric preprocessing selected by `config`.
///
/// Crop and pad are centered; padding is black.
#[must_use]
pub fn preprocess(image: &RgbImage, config: &InferenceConfig) -> RgbImage {
    let (load, crop) = (config.load_size(), config.crop_size());
    match config.preprocess() {
        PreprocessMode::ResizeAndCrop => center_fit(&resize(image, load, load), crop),
        PreprocessMode::Resize => resize(image, load, load),
        PreprocessMode::Crop => center_fit(image, crop),
        PreprocessMode::None => {
            let (width, height) = image.dimensions();
            resize(image, nearest_multiple_of_4(width), nearest_multiple_of_4(height))
        }
    }
}

fn resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, RESAMPLE)
}

/// Center `image` on a black `size × size` canvas, cropping what does not fit.
fn center_fit(image: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut canvas = RgbImage::new(size, size);
    let x = (i64::from(size) - i64::from(width)) / 2;
    let y = (i64::from(size) - i64::from(height)) / 2;
    imageops::replace(&mut canvas, image, x, y);
    canvas
}

fn nearest_multiple_of_4(side: u32) -> u32 {
    (side.saturating_add(2) / 4 * 4).max(4)
}

/// Pack `image` into a `[1, C, H, W]` tensor with `channels` of 1 (luma) or 3 (RGB).
pub fn image_to_tensor(image: &RgbImage, channels: usize) -> Result<ImageTensor, ModelError> {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);
    let plane = width * height;

    let data = match channels {
        3 => {
            let mut data = vec![0.0_f32; 3 * plane];
            for (i, pixel) in image.pixels().enumerate() {
                for (c, value) in pixel.0.iter().enumerate() {
                    data[c * plane + i] = normalize(*value);
                }
            }
            data
        }
        1 => imageops::grayscale(image).pixels().map(|p| normalize(p.0[0])).collect(),
        other => {
            return Err(ModelError::ShapeMismatch {
                expected: "1 or 3 input channels".to_string(),
                actual: format!("{other} channels"),
            });
        }
    };

    ImageTensor::new(vec![1, channels, height, width], data)
}

/// Unpack a `[1, C, H, W]` (or `[C, H, W]`) tensor into an RGB image.
///
/// A single channel is replicated into R, G and B.
pub fn tensor_to_image(tensor: &ImageTensor) -> Result<RgbImage, ModelError> {
    let dims = tensor.image_dims().ok_or_else(|| ModelError::ShapeMismatch {
        expected: "[1, C, H, W]".to_string(),
        actual: format!("{:?}", tensor.shape()),
    })?;
    if dims.channels != 1 && dims.channels != 3 {
        return Err(ModelError::ShapeMismatch {
            expected: "1 or 3 output channels".to_string(),
            actual: format!("{} channels", dims.channels),
        });
    }

    let (width, height) = (dims.width as u32, dims.height as u32);
    let plane = dims.width * dims.height;
    let data = tensor.data();
    let channel_of = |c: usize| if dims.channels == 1 { 0 } else { c };

    Ok(ImageBuffer::from_fn(width, height, |x, y| {
        let i = y as usize * dims.width + x as usize;
        Rgb([0, 1, 2].map(|c| denormalize(data[channel_of(c) * plane + i])))
    }))
}

/// End-to-end inference over a shared [`ModelCache`].
#[derive(Clone)]
pub struct InferencePipeline {
    builder: ConfigBuilder,
    cache: ModelCache,
    loader: Arc<dyn ModelLoader>,
}

impl InferencePipeline {
    #[must_use]
    pub fn new(builder: ConfigBuilder, cache: ModelCache, loader: Arc<dyn ModelLoader>) -> Self {
        Self { builder, cache, loader }
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    #[must_use]
    pub fn builder(&self) -> &ConfigBuilder {
        &self.builder
    }

    /// Run one image through the model selected by `params`.
    ///
    /// `image` is only read; grayscale and alpha inputs are converted to RGB
    /// first. The result has the preprocessed geometry.
    pub async fn infer(
        &self,
        image: &DynamicImage,
        params: &RawParams,
    ) -> Result<RgbImage, InferenceError> {
        let config = self.builder.build(params)?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(InferenceError::unsupported_image(format!("image is {width}x{height}")));
        }
        let rgb = image.to_rgb8();

        let model = self.cache.get_or_load(config.clone(), Arc::clone(&self.loader)).await?;
        let started = Instant::now();

        let channels = model.input_channels();
        let prepare_config = config.clone();
        let input = tokio::task::spawn_blocking(move || {
            image_to_tensor(&preprocess(&rgb, &prepare_config), channels)
        })
        .await
        .map_err(|e| ModelError::ForwardError(format!("preprocess task failed: {e}")))
        .and_then(|tensor| tensor)
        .map_err(|e| InferenceError::inference_failed(&config, &e))?;

        let input_dims = input.image_dims();
        let output = Arc::clone(&model)
            .forward(input)
            .await
            .map_err(|e| InferenceError::inference_failed(&config, &e))?;

        let output_dims = output.image_dims();
        let same_geometry = matches!(
            (input_dims, output_dims),
            (Some(i), Some(o)) if (i.height, i.width) == (o.height, o.width)
        );
        if !same_geometry {
            return Err(InferenceError::inference_failed(
                &config,
                &ModelError::ShapeMismatch {
                    expected: format!("{input_dims:?}"),
                    actual: format!("{:?}", output.shape()),
                },
            ));
        }

        let result =
            tensor_to_image(&output).map_err(|e| InferenceError::inference_failed(&config, &e))?;
        debug!(
            model = %config.model_name(),
            fingerprint = %config.fingerprint(),
            width = result.width(),
            height = result.height(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Inference complete"
        );
        Ok(result)
    }

    /// Decode `bytes` and run [`infer`](Self::infer).
    pub async fn infer_bytes(
        &self,
        bytes: &[u8],
        params: &RawParams,
    ) -> Result<RgbImage, InferenceError> {
        let image = decode_image(bytes)?;
        self.infer(&image, params).await
    }
}

impl std::fmt::Debug for InferencePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferencePipeline")
            .field("builder", &self.builder)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::factory::{BackendKind, ModelFactory};
    use image::{GrayImage, Luma};
    use retouch_abstraction::ModelHandle;
    use retouch_checkpoints::{Checkpoint, CheckpointResolver, ModelRoot};
    use serde_json::json;
    use tempfile::TempDir;

    fn params(value: serde_json::Value) -> RawParams {
        value.as_object().unwrap().clone()
    }

    fn config(value: serde_json::Value) -> InferenceConfig {
        ConfigBuilder::new().with_default_model("facades").build(&params(value)).unwrap()
    }

    fn pipeline_with(loader: Arc<dyn ModelLoader>) -> (TempDir, InferencePipeline) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("facades")).unwrap();
        std::fs::write(dir.path().join("facades/latest_net_G.pth"), b"weights").unwrap();
        let cache = ModelCache::new(
            CacheConfig::default(),
            ModelRoot::new(dir.path()),
            CheckpointResolver::default(),
        )
        .unwrap();
        let builder = ConfigBuilder::new().with_default_model("facades");
        let pipeline = InferencePipeline::new(builder, cache, loader);
        (dir, pipeline)
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8])
        })
    }

    /// Handle with a fixed input channel count and a scripted output.
    struct ScriptedModel {
        channels: usize,
        output: fn(&ImageTensor) -> ImageTensor,
    }

    impl ModelHandle for ScriptedModel {
        fn forward(&self, input: &ImageTensor) -> Result<ImageTensor, ModelError> {
            Ok((self.output)(input))
        }

        fn input_channels(&self) -> usize {
            self.channels
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }

    fn scripted(channels: usize, output: fn(&ImageTensor) -> ImageTensor) -> Arc<dyn ModelLoader> {
        Arc::new(
            move |_: &Checkpoint, _: &InferenceConfig| -> Result<Box<dyn ModelHandle>, ModelError> {
                Ok(Box::new(ScriptedModel { channels, output }))
            },
        )
    }

    #[test]
    fn test_normalize_round_trip_every_value() {
        for v in 0..=255_u8 {
            let back = denormalize(normalize(v));
            assert!(back.abs_diff(v) <= 1, "{v} came back as {back}");
        }
        assert!((normalize(0) + 1.0).abs() < f32::EPSILON);
        assert!((normalize(255) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_denormalize_clamps() {
        assert_eq!(denormalize(-3.0), 0);
        assert_eq!(denormalize(3.0), 255);
        assert_eq!(denormalize(0.0), 128);
    }

    #[test]
    fn test_resize_and_crop_geometry() {
        let out = preprocess(
            &gradient(300, 200),
            &config(json!({"load_size": 256, "crop_size": 224})),
        );
        assert_eq!(out.dimensions(), (224, 224));
    }

    #[test]
    fn test_resize_geometry() {
        let out = preprocess(
            &gradient(300, 200),
            &config(json!({"load_size": 64, "preprocess": "resize"})),
        );
        assert_eq!(out.dimensions(), (64, 64));
    }

    #[test]
    fn test_crop_pads_with_black_and_crops_centered() {
        let white = RgbImage::from_pixel(10, 6, Rgb([255, 255, 255]));
        let out = preprocess(&white, &config(json!({"crop_size": 8, "preprocess": "crop"})));

        assert_eq!(out.dimensions(), (8, 8));
        for x in 0..8 {
            assert_eq!(out.get_pixel(x, 0), &Rgb([0, 0, 0]));
            assert_eq!(out.get_pixel(x, 7), &Rgb([0, 0, 0]));
            for y in 1..7 {
                assert_eq!(out.get_pixel(x, y), &Rgb([255, 255, 255]));
            }
        }
    }

    #[test]
    fn test_crop_takes_the_center() {
        let image = gradient(12, 12);
        let out = preprocess(&image, &config(json!({"crop_size": 4, "preprocess": "crop"})));
        assert_eq!(out.get_pixel(0, 0), image.get_pixel(4, 4));
    }

    #[test]
    fn test_none_rounds_to_multiple_of_4() {
        let none = config(json!({"preprocess": "none"}));
        assert_eq!(preprocess(&gradient(10, 6), &none).dimensions(), (12, 8));
        assert_eq!(preprocess(&gradient(13, 3), &none).dimensions(), (12, 4));
        assert_eq!(preprocess(&gradient(1, 1), &none).dimensions(), (4, 4));

        let exact = gradient(16, 8);
        assert_eq!(preprocess(&exact, &none), exact);
    }

    #[test]
    fn test_tensor_layout_is_planar() {
        let image = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        });
        let tensor = image_to_tensor(&image, 3).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
        assert_eq!(tensor.data(), &[1.0, -1.0, -1.0, -1.0, -1.0, 1.0]);
    }

    #[test]
    fn test_single_channel_output_is_replicated() {
        let tensor = ImageTensor::new(vec![1, 1, 1, 2], vec![-1.0, 1.0]).unwrap();
        let image = tensor_to_image(&tensor).unwrap();
        assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_rejects_unusual_channel_counts() {
        let tensor = ImageTensor::filled(vec![1, 4, 2, 2], 0.0);
        assert!(matches!(tensor_to_image(&tensor), Err(ModelError::ShapeMismatch { .. })));
        assert!(image_to_tensor(&gradient(2, 2), 2).is_err());
    }

    #[test]
    fn test_decode_garbage_is_unsupported() {
        let err = decode_image(b"definitely not a png").unwrap_err();
        assert_eq!(err.kind(), "unsupported_image");
    }

    #[tokio::test]
    async fn test_passthrough_inference_preserves_pixels() {
        let factory: Arc<dyn ModelLoader> = Arc::new(ModelFactory::new(BackendKind::Passthrough));
        let (_dir, pipeline) = pipeline_with(factory);
        let input = DynamicImage::ImageRgb8(gradient(16, 12));
        let before = input.clone();

        let output = pipeline.infer(&input, &params(json!({"preprocess": "none"}))).await.unwrap();

        assert_eq!(&output, before.as_rgb8().unwrap());
        assert_eq!(input, before);
    }

    #[tokio::test]
    async fn test_grayscale_input_is_promoted() {
        let factory: Arc<dyn ModelLoader> = Arc::new(ModelFactory::new(BackendKind::Passthrough));
        let (_dir, pipeline) = pipeline_with(factory);
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([90])));

        let output = pipeline.infer(&gray, &params(json!({"preprocess": "none"}))).await.unwrap();
        assert!(output.pixels().all(|p| *p == Rgb([90, 90, 90])));
    }

    #[tokio::test]
    async fn test_infer_bytes_decodes_png() {
        let factory: Arc<dyn ModelLoader> = Arc::new(ModelFactory::new(BackendKind::Passthrough));
        let (_dir, pipeline) = pipeline_with(factory);
        let mut png = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(gradient(8, 8))
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();

        let output = pipeline
            .infer_bytes(png.get_ref(), &params(json!({"load_size": 4, "crop_size": 4})))
            .await
            .unwrap();
        assert_eq!(output.dimensions(), (4, 4));
    }

    #[tokio::test]
    async fn test_one_channel_model_gets_luma() {
        let (_dir, pipeline) = pipeline_with(scripted(1, |input| {
            assert_eq!(input.shape()[1], 1);
            input.clone()
        }));
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([200, 200, 200])));

        let output = pipeline.infer(&image, &params(json!({"preprocess": "none"}))).await.unwrap();
        assert!(output.pixels().all(|p| *p == Rgb([200, 200, 200])));
    }

    #[tokio::test]
    async fn test_output_geometry_mismatch_is_inference_failure() {
        let (_dir, pipeline) =
            pipeline_with(scripted(3, |_| ImageTensor::filled(vec![1, 3, 2, 2], 0.0)));
        let image = DynamicImage::ImageRgb8(gradient(8, 8));

        let err =
            pipeline.infer(&image, &params(json!({"preprocess": "none"}))).await.unwrap_err();
        assert!(matches!(
            err,
            InferenceError::InferenceFailed { ref model, .. } if model == "facades"
        ));
    }

    #[tokio::test]
    async fn test_invalid_params_fail_before_loading() {
        let (_dir, pipeline) = pipeline_with(scripted(3, ImageTensor::clone));
        let image = DynamicImage::ImageRgb8(gradient(8, 8));

        let err = pipeline.infer(&image, &params(json!({"crop_size": -1}))).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_config");
        assert!(pipeline.cache().loaded_configs().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_crop_is_rejected_before_loading() {
        let (_dir, pipeline) = pipeline_with(scripted(3, ImageTensor::clone));
        let image = DynamicImage::ImageRgb8(gradient(8, 8));
        let oversized = params(json!({"crop_size": 4_000_000_000_u64, "preprocess": "crop"}));

        let err = pipeline.infer(&image, &oversized).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_config");
        assert!(err.is_user_error());
        assert_eq!(pipeline.cache().get_stats().total_misses, 0);
    }

    #[tokio::test]
    async fn test_empty_image_is_unsupported() {
        let (_dir, pipeline) = pipeline_with(scripted(3, ImageTensor::clone));
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 0));

        let err = pipeline.infer(&image, &RawParams::new()).await.unwrap_err();
        assert_eq!(err.kind(), "unsupported_image");
    }
}
