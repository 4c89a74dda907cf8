//! End-to-end tests for the inference service.

use image::{DynamicImage, Rgb, RgbImage};
use retouch_abstraction::{ImageTensor, ModelError, ModelHandle};
use retouch_checkpoints::Checkpoint;
use retouch_models::{
    BackendKind, CacheConfig, InferenceConfig, InferenceError, InferenceService, ModelFactory,
    ModelLoader, RawParams, ServiceConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

fn params(value: serde_json::Value) -> RawParams {
    value.as_object().unwrap().clone()
}

fn write_checkpoint(root: &TempDir, model: &str, file: &str) {
    let dir = root.path().join(model);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), b"weights").unwrap();
}

fn service(root: &TempDir, loader: Arc<dyn ModelLoader>, cache: CacheConfig) -> InferenceService {
    let config = ServiceConfig {
        model_root: root.path().to_path_buf(),
        default_model: Some("portrait_retouch_reverse".to_string()),
        cache,
        ..ServiceConfig::default()
    };
    InferenceService::new(config, loader).unwrap()
}

fn passthrough(root: &TempDir, cache: CacheConfig) -> InferenceService {
    service(root, Arc::new(ModelFactory::new(BackendKind::Passthrough)), cache)
}

fn photo() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(20, 12, |x, y| {
        Rgb([(x * 12) as u8, (y * 20) as u8, 77])
    }))
}

#[tokio::test]
async fn test_passthrough_end_to_end() {
    let root = TempDir::new().unwrap();
    write_checkpoint(&root, "portrait_retouch_reverse", "latest_net_G.pth");
    let service = passthrough(&root, CacheConfig::default());

    let output = service
        .infer(&photo(), &params(json!({"load_size": 32, "crop_size": 16})))
        .await
        .unwrap();
    assert_eq!(output.dimensions(), (16, 16));

    let output = service.infer(&photo(), &params(json!({"preprocess": "none"}))).await.unwrap();
    assert_eq!(&output, photo().as_rgb8().unwrap());

    let stats = service.health().stats;
    assert_eq!(stats.total_loads, 2);
}

#[tokio::test]
async fn test_new_epochs_are_picked_up_while_serving() {
    let root = TempDir::new().unwrap();
    write_checkpoint(&root, "facades", "5_net_G.pth");
    let service = passthrough(&root, CacheConfig::default());

    let listing = service.resolve_model_listing().unwrap();
    assert_eq!(listing[0].default_selector, "5");

    write_checkpoint(&root, "facades", "10_net_G.pth");
    let listing = service.resolve_model_listing().unwrap();
    assert_eq!(listing[0].available_selectors, ["10", "5"]);
    assert_eq!(listing[0].default_selector, "10");

    let output = service
        .infer(&photo(), &params(json!({"name": "facades", "epoch": 10, "preprocess": "none"})))
        .await;
    assert!(output.is_ok());
}

#[tokio::test]
async fn test_error_kinds_reach_the_caller() {
    let root = TempDir::new().unwrap();
    write_checkpoint(&root, "facades", "latest_net_G.pth");
    let service = passthrough(&root, CacheConfig::default());

    let err = service.infer(&photo(), &params(json!({"load_size": "big"}))).await.unwrap_err();
    assert!(matches!(
        err,
        InferenceError::InvalidConfig { ref field, .. } if field == "load_size"
    ));

    let oversized = params(json!({"model_name": "facades", "crop_size": 4_000_000_000_u64}));
    let err = service.infer(&photo(), &oversized).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_config");

    let err = service.infer(&photo(), &RawParams::new()).await.unwrap_err();
    assert_eq!(
        err,
        InferenceError::ModelDirectoryNotFound { model: "portrait_retouch_reverse".to_string() }
    );

    let err = service
        .infer(&photo(), &params(json!({"model_name": "facades", "epoch": "999"})))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        InferenceError::CheckpointNotFound {
            model: "facades".to_string(),
            selector: "999".to_string()
        }
    );

    let err = service
        .infer(&photo(), &params(json!({"model_name": "facades", "netG": "unet_512"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "model_load_failed");
    assert!(!err.is_user_error());

    let err = service
        .infer_bytes(b"GIF89a", &params(json!({"model_name": "facades"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unsupported_image");

    // Failures never leave a resident entry behind.
    assert!(service.health().loaded_configs.is_empty());
}

/// Identity handle that refuses concurrent use and records overlap.
struct ExclusiveModel {
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    delay: Duration,
}

impl ModelHandle for ExclusiveModel {
    fn forward(&self, input: &ImageTensor) -> Result<ImageTensor, ModelError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(input.clone())
    }

    fn supports_concurrent_forward(&self) -> bool {
        false
    }

    fn model_id(&self) -> &str {
        "exclusive"
    }
}

fn exclusive_loader(
    loads: &Arc<AtomicUsize>,
    max_active: &Arc<AtomicUsize>,
    delay: Duration,
) -> Arc<dyn ModelLoader> {
    let loads = Arc::clone(loads);
    let max_active = Arc::clone(max_active);
    Arc::new(
        move |_: &Checkpoint, _: &InferenceConfig| -> Result<Box<dyn ModelHandle>, ModelError> {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ExclusiveModel {
                active: Arc::new(AtomicUsize::new(0)),
                max_active: Arc::clone(&max_active),
                delay,
            }))
        },
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exclusive_handles_are_serialized() {
    let root = TempDir::new().unwrap();
    write_checkpoint(&root, "portrait_retouch_reverse", "latest_net_G.pth");

    let loads = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let loader = exclusive_loader(&loads, &max_active, Duration::from_millis(20));
    let service = service(&root, loader, CacheConfig::default());

    let requests: Vec<_> = (0..6)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service.infer(&photo(), &params(json!({"preprocess": "none"}))).await
            })
        })
        .collect();
    for request in futures::future::join_all(requests).await {
        assert!(request.unwrap().is_ok());
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_request_does_not_open_exclusive_handle() {
    let root = TempDir::new().unwrap();
    write_checkpoint(&root, "portrait_retouch_reverse", "latest_net_G.pth");

    let loads = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let loader = exclusive_loader(&loads, &max_active, Duration::from_millis(300));
    let service = service(&root, loader, CacheConfig::default());
    let none = params(json!({"preprocess": "none"}));

    // Warm the cache so both requests go straight to the forward gate.
    service.infer(&photo(), &none).await.unwrap();

    let cancelled = {
        let service = service.clone();
        let none = none.clone();
        tokio::spawn(async move { service.infer(&photo(), &none).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancelled.abort();

    assert!(service.infer(&photo(), &none).await.is_ok());
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bounded_cache_keeps_serving() {
    let root = TempDir::new().unwrap();
    write_checkpoint(&root, "facades", "latest_net_G.pth");
    write_checkpoint(&root, "maps", "latest_net_G.pth");
    let service = passthrough(&root, CacheConfig::bounded(1));

    for model in ["facades", "maps", "facades"] {
        service
            .infer(&photo(), &params(json!({"model_name": model, "preprocess": "none"})))
            .await
            .unwrap();
    }

    let health = service.health();
    assert_eq!(health.loaded_configs.len(), 1);
    assert_eq!(health.loaded_configs[0].config.model_name(), "facades");
    assert_eq!(health.stats.total_evictions, 2);
    assert_eq!(health.stats.total_loads, 3);
}
