//! Health command implementation.

use anyhow::Result;
use colored::Colorize;
use retouch_models::ServiceConfig;

use super::build_service;

/// Execute the health command.
pub fn execute(config: &ServiceConfig, backend: &str, json: bool) -> Result<()> {
    let service = build_service(config, backend)?;
    let health = service.health();

    if json {
        println!("{}", serde_json::to_string_pretty(&health)?);
        return Ok(());
    }

    let status = if health.status == "ok" { health.status.green() } else { health.status.yellow() };
    println!("Status:       {status}");
    println!("Model root:   {}", health.model_root.display());
    println!("Backend:      {backend}");
    println!(
        "Cache limit:  {}",
        config
            .cache
            .max_resident_models
            .map_or_else(|| "unbounded".to_string(), |max| max.to_string())
    );
    println!("Loaded:       {}", health.loaded_configs.len());
    Ok(())
}
