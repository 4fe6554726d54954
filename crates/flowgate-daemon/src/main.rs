//! Flowgate daemon entry point.
//!
//! Binary name: `flowgated`
//!
//! Parses CLI arguments, loads config, initializes tracing, wires the gate
//! and workflow engine, then dispatches to the requested command.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use flowgate_infra::config::{load_config_file, load_global_config};
use flowgate_infra::filesystem::resolve_data_dir;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(resolve_data_dir);
    let mut config = match &cli.config {
        Some(path) => load_config_file(path).await,
        None => load_global_config(&data_dir).await,
    };

    // -v/-vv override the configured filter; RUST_LOG still wins over both.
    match cli.verbose {
        0 => {}
        1 => config.logging.filter = "info,flowgate=debug".to_string(),
        _ => config.logging.filter = "trace".to_string(),
    }
    flowgate_observe::init_tracing(&config.logging)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli, data_dir, config).await;
    flowgate_observe::shutdown_tracing();
    result
}

async fn dispatch(
    cli: Cli,
    data_dir: std::path::PathBuf,
    config: flowgate_types::config::GlobalConfig,
) -> anyhow::Result<()> {
    let state = AppState::init(data_dir, config).await?;

    match cli.command {
        Commands::Run => cli::run::run(&state, cli.json).await,
        Commands::Status => cli::status::status(&state, cli.json).await,
        Commands::Workflow { action } => cli::workflow::handle(&state, action, cli.json).await,
        Commands::Identity { action } => cli::identity::handle(&state, action, cli.json).await,
    }
}
