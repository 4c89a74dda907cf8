//! Checkpoints command implementation.

use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Color, Table};
use retouch_checkpoints::LATEST;
use retouch_models::ServiceConfig;
use serde_json::json;

use super::{build_service, report};

/// Execute the checkpoints command.
pub fn execute(config: &ServiceConfig, backend: &str, model: &str, json: bool) -> Result<()> {
    let service = build_service(config, backend)?;
    let checkpoints = service.list_checkpoints(model).map_err(report)?;
    let latest = service.resolve_checkpoint(model, LATEST).map_err(report)?;

    if json {
        let output = json!({
            "model_name": model,
            "latest_resolves_to": latest.selector,
            "checkpoints": checkpoints,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Checkpoints for '{model}' ({})", checkpoints.len()).bold().cyan());
    println!();

    let mut table = Table::new();
    table.set_header(vec!["Selector", "File", "Modified"]);
    for checkpoint in &checkpoints {
        let selector = if checkpoint.path == latest.path {
            Cell::new(format!("{} *", checkpoint.selector)).fg(Color::Green)
        } else {
            Cell::new(&checkpoint.selector)
        };
        table.add_row(vec![
            selector,
            Cell::new(checkpoint.file_name()),
            Cell::new(checkpoint.modified.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    println!("{table}");
    println!("  {} 'latest' resolves to {}", "*".green(), latest.selector.green());
    Ok(())
}
