//! Infer command implementation.

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use retouch_models::{RawParams, ServiceConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use super::{build_service, report};

/// Arguments of `retouch infer`.
#[derive(Args, Debug)]
pub struct InferArgs {
    /// Input images (PNG, JPEG or BMP)
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output directory (created if missing)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Model name (defaults to the configured default model)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Checkpoint selector: latest, an epoch number, or a tag
    #[arg(short, long)]
    pub epoch: Option<String>,

    /// Translation direction (AtoB, BtoA)
    #[arg(long)]
    pub direction: Option<String>,

    /// Generator architecture (unet_256, unet_128, resnet_9blocks, resnet_6blocks)
    #[arg(long)]
    pub netg: Option<String>,

    /// Normalization layer (batch, instance, none)
    #[arg(long)]
    pub norm: Option<String>,

    #[arg(long)]
    pub load_size: Option<u32>,

    #[arg(long)]
    pub crop_size: Option<u32>,

    /// Preprocessing (resize_and_crop, resize, crop, none)
    #[arg(long)]
    pub preprocess: Option<String>,

    /// Extra request parameter as key=value (value parsed as JSON when possible)
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

impl InferArgs {
    /// Request parameters equivalent to these flags.
    pub fn raw_params(&self) -> Result<RawParams> {
        let mut params = RawParams::new();
        for entry in &self.params {
            let (key, value) = parse_param(entry)?;
            params.insert(key, value);
        }

        let flags = [
            ("model_name", self.model.clone().map(Value::from)),
            ("selector", self.epoch.clone().map(Value::from)),
            ("direction", self.direction.clone().map(Value::from)),
            ("architecture", self.netg.clone().map(Value::from)),
            ("normalization", self.norm.clone().map(Value::from)),
            ("load_size", self.load_size.map(Value::from)),
            ("crop_size", self.crop_size.map(Value::from)),
            ("preprocess", self.preprocess.clone().map(Value::from)),
        ];
        for (key, value) in flags {
            if let Some(value) = value {
                params.insert(key.to_string(), value);
            }
        }

        Ok(params)
    }
}

fn parse_param(entry: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = entry.split_once('=') else {
        bail!("Invalid --param '{entry}': expected KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid --param '{entry}': empty key");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// `<output>/<stem>_fake.png`
fn output_path(output_dir: &Path, input: &Path) -> PathBuf {
    let stem = input.file_stem().map_or_else(|| "image".into(), |s| s.to_string_lossy());
    output_dir.join(format!("{stem}_fake.png"))
}

/// Execute the infer command.
pub async fn execute(config: &ServiceConfig, backend: &str, args: InferArgs) -> Result<()> {
    let params = args.raw_params()?;
    let service = build_service(config, backend)?;
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory {}", args.output.display()))?;

    let started = Instant::now();
    let mut failed = 0_usize;
    for input in &args.inputs {
        match run_one(&service, &params, input, &args.output).await {
            Ok(written) => {
                println!("  {} {} -> {}", "✓".green(), input.display(), written.display());
            }
            Err(e) => {
                failed += 1;
                warn!(input = %input.display(), "Inference failed");
                println!("  {} {}: {e:#}", "✗".red(), input.display());
            }
        }
    }

    service.shutdown();
    info!(
        images = args.inputs.len(),
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Batch complete"
    );

    if failed > 0 {
        bail!("{failed} of {} image(s) failed", args.inputs.len());
    }
    Ok(())
}

async fn run_one(
    service: &retouch_models::InferenceService,
    params: &RawParams,
    input: &Path,
    output_dir: &Path,
) -> Result<PathBuf> {
    let bytes =
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let image = service.infer_bytes(&bytes, params).await.map_err(report)?;

    let destination = output_path(output_dir, input);
    image
        .save(&destination)
        .with_context(|| format!("Failed to write {}", destination.display()))?;
    Ok(destination)
}
