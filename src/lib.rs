//! Automated maintenance of pinned flake inputs and the hashes derived
//! from them.
//!
//! The entry point is [`update::UpdateRunner`], which executes named update
//! tasks from a `freshen.json` configuration: refreshing flake inputs,
//! re-deriving stored hashes from nix's hash-mismatch diagnostics, running
//! update scripts in scratch copies of the repo, and confirming the result
//! with verification builds.

pub mod changes;
pub mod cli;
pub mod config;
pub mod error;
pub mod flake;
pub mod mismatch;
pub mod publish;
pub mod script;
pub mod update;
pub mod worktree;
