use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use freshen::cli::{Command, RootArgs, UpdateArgs};
use freshen::config::read_config;
use freshen::flake::NixFlake;
use freshen::publish::{CommitPublisher, SummaryPublisher};
use freshen::update::UpdateRunner;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = RootArgs::parse();
    match args.command {
        Command::Update(args) => cmd_update(args),
    }
}

fn cmd_update(args: UpdateArgs) -> Result<()> {
    let repo_path = match args.repo_path {
        Some(path) => path,
        None => env::current_dir().context("determine current directory")?,
    };
    tracing::info!(repo = %repo_path.display(), task = %args.name, "running update task");
    validate_repo_path(&repo_path)?;

    let config_path = repo_path.join("freshen.json");
    let config = read_config(&config_path)?;

    let flake = NixFlake::new(&repo_path)?;
    let runner = UpdateRunner::new(&config, &flake, &repo_path);
    let result = runner.run_task(&args.name, args.check)?;

    SummaryPublisher.publish(&repo_path, &result)?;
    Ok(())
}

fn validate_repo_path(repo_path: &Path) -> Result<()> {
    let flake_file = repo_path.join("flake.nix");
    if !flake_file.is_file() {
        return Err(anyhow!(
            "check repo path: {} does not look like a flake root (missing flake.nix)",
            repo_path.display()
        ));
    }
    Ok(())
}
