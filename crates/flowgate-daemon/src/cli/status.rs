//! System status command.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

/// Show data locations, registered workflows, and registered tools.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let engine = state.engine.get_status().await;
    let tools = state.registry.kinds();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "watch_root": state.watch_root().display().to_string(),
            "workflows_dir": state.workflows_dir().display().to_string(),
            "engine": engine,
            "tools": tools,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Flowgate v{}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("  {}", style("── Paths ──").dim());
    println!("  Data:      {}", state.data_dir.display());
    println!("  Watch:     {}", state.watch_root().display());
    println!("  Workflows: {}", state.workflows_dir().display());
    println!();

    println!("  {}", style("── Workflows ──").dim());
    if engine.workflows.is_empty() {
        println!("  {}", style("No workflow files found.").dim());
    } else {
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL_CONDENSED);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("Name").fg(Color::White),
            Cell::new("Pattern").fg(Color::White),
            Cell::new("Owner").fg(Color::White),
            Cell::new("Actions").fg(Color::White),
        ]);
        for workflow in &engine.workflows {
            let owner = match &workflow.owner {
                Some(owner) => Cell::new(owner),
                None => Cell::new("ungated").fg(Color::DarkGrey),
            };
            table.add_row(vec![
                Cell::new(&workflow.name).fg(Color::Cyan),
                Cell::new(workflow.trigger.pattern()),
                owner,
                Cell::new(workflow.action_count),
            ]);
        }
        println!("{table}");
    }
    println!();

    println!("  {}", style("── Tools ──").dim());
    if tools.is_empty() {
        println!("  {}", style("None registered.").dim());
    } else {
        println!("  {}", tools.join(", "));
    }
    println!();

    Ok(())
}
