//! CLI argument parsing for the freshen workflow.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "freshen",
    version,
    about = "Automated flake input and derived-hash updates",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Update(UpdateArgs),
}

/// Run a named update task against a local repository.
#[derive(Parser, Debug)]
#[command(about = "Run a local update task")]
pub struct UpdateArgs {
    /// Name of the update task to run
    #[arg(long)]
    pub name: String,

    /// Path of the repository root (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub repo_path: Option<PathBuf>,

    /// Always run all build and test steps, even if no inputs changed
    #[arg(long)]
    pub check: bool,
}
