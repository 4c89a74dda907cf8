//! Models command implementation.

use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Color, Table};
use retouch_models::ServiceConfig;

use super::{build_service, report};

/// Execute the models command.
pub fn execute(config: &ServiceConfig, backend: &str, json: bool) -> Result<()> {
    let service = build_service(config, backend)?;
    let listing = service.resolve_model_listing().map_err(report)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Models ({})", listing.len()).bold().cyan());
    println!("  Root: {}", config.model_root.display().to_string().dimmed());
    println!();

    if listing.is_empty() {
        println!("  {}", "No models with checkpoints found.".dimmed());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Model", "Default", "Selectors"]);
    for model in &listing {
        table.add_row(vec![
            Cell::new(&model.model_name).fg(Color::Cyan),
            Cell::new(&model.default_selector).fg(Color::Green),
            Cell::new(model.available_selectors.join(", ")),
        ]);
    }

    println!("{table}");
    Ok(())
}
