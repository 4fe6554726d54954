//! CLI command definitions for the `flowgated` binary.
//!
//! `flowgated run` is the long-lived daemon; the other subcommands are
//! one-shot administration against the same data directory.

pub mod identity;
pub mod run;
pub mod status;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// File-arrival automation workflows behind a usage-quota gate.
#[derive(Parser)]
#[command(name = "flowgated", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory (config.toml, database, default inbox/output/workflows).
    #[arg(long, global = true, env = "FLOWGATE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Explicit config file instead of `<data_dir>/config.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for debug, -vv for trace). Overrides the configured filter.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch for file arrivals and run workflows until interrupted.
    Run,

    /// Show registered workflows and tool registry contents.
    Status,

    /// Workflow file utilities.
    Workflow {
        #[command(subcommand)]
        action: WorkflowCommand,
    },

    /// Manage gated identities (register, suspend, reactivate, show).
    Identity {
        #[command(subcommand)]
        action: IdentityCommand,
    },
}

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Parse and validate a workflow file without registering it.
    Validate {
        /// Path to a `.yaml` workflow file.
        path: PathBuf,
    },

    /// Run a loaded workflow once against a file, as if it had just arrived.
    Trigger {
        /// Workflow name.
        name: String,

        /// Resource to run the pipeline on.
        path: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum IdentityCommand {
    /// Register an identity at a tier.
    Register {
        identity: String,

        /// Tier name (free, premium, enterprise).
        #[arg(long, default_value = "free")]
        tier: String,

        /// Premium expiry as RFC 3339 (e.g. 2026-12-31T00:00:00Z).
        #[arg(long)]
        expires: Option<String>,
    },

    /// Suspend an identity; every gated action is denied until reactivated.
    Suspend { identity: String },

    /// Reactivate a suspended identity.
    Activate { identity: String },

    /// Show tier, usage, and reset times.
    Show { identity: String },

    /// Check whether an identity may run an action or tool right now.
    Check {
        identity: String,

        /// Action kind or transform tool name.
        key: String,
    },

    /// List all registered identities.
    #[command(alias = "ls")]
    List,
}
