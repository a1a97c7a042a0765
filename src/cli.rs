//! CLI argument parsing via clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// A coding agent for the terminal with reversible file edits. Works with any
/// OpenAI-compatible API.
#[derive(Debug, Parser)]
#[command(
    name = "mender",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("MENDER_BUILD_GIT_HASH"), ")"),
    args_conflicts_with_subcommands = true
)]
pub struct Args {
    /// Prompt to send. If provided, runs in one-shot mode and exits.
    pub prompt: Option<String>,

    /// Path to config file (default: ./mender.toml or ~/.config/mender/mender.toml).
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Override model name.
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Override API base URL.
    #[arg(long = "base-url")]
    pub base_url: Option<String>,

    /// Session id to resume or create; `last` resumes the most recent one.
    #[arg(short = 's', long = "session")]
    pub session: Option<String>,

    /// Run terminal commands without asking for approval.
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,

    /// Disable color output.
    #[arg(long = "no-color")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect, revert or accept file changes made by the agent.
    Changes {
        #[command(subcommand)]
        action: ChangesAction,
    },
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum ChangesAction {
    /// List files with pending changes.
    List,
    /// Show the individual changes recorded for one file.
    Show { id: String },
    /// Revert a whole file, or one change with `--change`.
    Undo {
        id: String,
        #[arg(long = "change")]
        change: Option<String>,
    },
    /// Keep the current content and stop tracking.
    Accept {
        #[arg(required_unless_present = "all")]
        id: Option<String>,
        #[arg(long = "all", conflicts_with = "id")]
        all: bool,
    },
}
