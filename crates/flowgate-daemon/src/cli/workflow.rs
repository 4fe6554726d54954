//! Workflow file commands: validate a file, run a loaded workflow once.

use std::path::Path;

use anyhow::{Result, bail};
use console::style;
use flowgate_core::workflow::definition::load_workflow_file;
use flowgate_types::workflow::{RunOutcome, RunStatus, validate_definition};

use crate::cli::WorkflowCommand;
use crate::state::AppState;

pub async fn handle(state: &AppState, command: WorkflowCommand, json: bool) -> Result<()> {
    match command {
        WorkflowCommand::Validate { path } => validate(&path, json),
        WorkflowCommand::Trigger { name, path } => trigger(state, &name, &path, json).await,
    }
}

fn validate(path: &Path, json: bool) -> Result<()> {
    let file = load_workflow_file(path)?;
    let definition = file.to_definition();
    validate_definition(&definition)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&file)?);
        return Ok(());
    }

    println!(
        "  {} {} is valid",
        style("✓").green(),
        style(&file.name).cyan()
    );
    println!(
        "    trigger: {} '{}'",
        file.trigger.kind(),
        file.trigger.pattern()
    );
    for (index, action) in file.actions.iter().enumerate() {
        println!("    {}. {}", index + 1, action.kind.as_str());
    }
    if file.owner.is_none() {
        println!("    {}", style("no owner: actions are not gated").dim());
    }
    Ok(())
}

async fn trigger(state: &AppState, name: &str, path: &Path, json: bool) -> Result<()> {
    let Some(workflow) = state.engine.workflow_by_name(name) else {
        bail!(
            "no workflow named '{name}' in {}",
            state.workflows_dir().display()
        );
    };
    let resource = std::path::absolute(path)?;
    let outcome = state.engine.trigger(workflow.id, &resource).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    if !outcome.is_completed() {
        bail!("workflow '{name}' did not complete");
    }
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    match &outcome.status {
        RunStatus::Completed => {
            println!(
                "  {} {} completed: {} action(s), {} skipped, {}ms",
                style("✓").green(),
                style(&outcome.workflow_name).cyan(),
                outcome.actions_completed,
                outcome.actions_skipped,
                outcome.duration_ms
            );
            println!("    final resource: {}", outcome.final_resource.display());
        }
        RunStatus::Failed {
            action_index,
            action_kind,
            reason,
        } => {
            println!(
                "  {} {} failed at action #{} ({}): {}",
                style("✗").red(),
                style(&outcome.workflow_name).cyan(),
                action_index + 1,
                action_kind,
                style(reason).red()
            );
        }
    }
}
