//! Retouch CLI - serve image-to-image generator checkpoints from disk.
//!
//! This CLI provides a `retouch` command for inspecting trained models and
//! running them over local images.

mod commands;
mod config;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{InferArgs, checkpoints, health, infer, models};
use config::CliConfig;

/// Retouch CLI - paired image translation inference
#[derive(Parser, Debug)]
#[command(
    name = "retouch",
    author,
    version,
    about = "Retouch - serve pix2pix-style generator checkpoints",
    long_about = "Retouch resolves generator checkpoints under a model root, loads each \
                  distinct\nconfiguration once, and runs images through it."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Model root directory (overrides RETOUCH_MODEL_ROOT and config files)
    #[arg(short = 'r', long, global = true)]
    model_root: Option<PathBuf>,

    /// Configuration file (defaults to ./retouch.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List servable models
    ///
    /// Shows every model directory under the model root that holds at least
    /// one generator checkpoint, with its selectors and default selector.
    Models {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the checkpoints of one model
    Checkpoints {
        /// Model name (directory under the model root)
        model: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run images through a model
    ///
    /// Each input is written to `<output>/<stem>_fake.png`. All inputs share
    /// one loaded model.
    Infer(InferArgs),

    /// Report model root and cache status
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cli_config = CliConfig::discover_and_load(args.config.as_deref())?;

    // Initialize tracing
    let level = args
        .log_level
        .as_deref()
        .or(cli_config.log_level.as_deref())
        .map_or(Level::INFO, parse_level);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // If no command provided, show help
    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let service_config = cli_config.service_config(args.model_root, config::env_model_root());
    let backend = cli_config.backend.as_deref().unwrap_or(commands::DEFAULT_BACKEND);

    match command {
        Command::Models { json } => models::execute(&service_config, backend, json)?,
        Command::Checkpoints { model, json } => {
            checkpoints::execute(&service_config, backend, &model, json)?;
        }
        Command::Infer(infer_args) => infer::execute(&service_config, backend, infer_args).await?,
        Command::Health { json } => health::execute(&service_config, backend, json)?,
    }

    Ok(())
}
