//! `freshen.json` configuration schema.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top level of `freshen.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FreshenConfig {
    #[serde(default)]
    pub update_tasks: Vec<UpdateTask>,
}

/// One named update task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTask {
    /// Name of the update task.
    pub name: String,
    /// Attr path of the confirming main build; empty to skip it.
    #[serde(default, rename = "attr_path")]
    pub main_attr_path: String,
    /// Flake inputs the build uses.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Derived hashes that need rewriting when the flake inputs move.
    #[serde(default)]
    pub derived_hashes: Vec<DerivedHash>,
    /// Update scripts to execute, each against a scratch copy of the repo.
    #[serde(default)]
    pub update_scripts: Vec<UpdateScript>,
    /// Attr paths that verify the update by building successfully.
    #[serde(default)]
    pub tests: Vec<TestBuild>,
    /// Names of other update tasks that must complete before this one.
    #[serde(default)]
    pub required_update_tasks: Vec<String>,
}

/// A derived hash kept in sync by probing a deliberately failing build.
#[derive(Debug, Clone, Deserialize)]
pub struct DerivedHash {
    /// Attr path that produces a forced hash mismatch when built.
    pub attr_path: String,
    /// File storing the hash as a JSON string, relative to the repo root.
    pub filename: String,
    #[serde(default)]
    pub run_mode: RunMode,
}

/// An executable built from the flake that rewrites repo files in place.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateScript {
    /// Attr path whose build output contains the script.
    pub attr_path: String,
    /// Command path relative to the root of the script's build output.
    pub executable: String,
    /// Arguments passed to the executable, if any.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub run_mode: RunMode,
}

/// A build whose success verifies an update.
#[derive(Debug, Clone, Deserialize)]
pub struct TestBuild {
    pub attr_path: String,
    /// Turn off the nix sandbox, e.g. for network access.
    #[serde(default)]
    pub disable_sandbox: bool,
}

/// When a derived-hash or update-script entry runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Only when one of the task's flake inputs picked up a new revision.
    #[default]
    OnFlakeInputChange,
    /// On every task run, regardless of input changes.
    Always,
}

pub fn read_config(path: &Path) -> Result<FreshenConfig> {
    let buf = fs::read(path).map_err(|err| Error::io("read", path, err))?;
    serde_json::from_slice(&buf).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_task() {
        let raw = r#"{
            "update_tasks": [
                {
                    "name": "deps",
                    "attr_path": "pkg",
                    "inputs": ["nixpkgs"],
                    "derived_hashes": [
                        {"attr_path": "pkgHash", "filename": "hashes/pkg.json"},
                        {"attr_path": "vendorHash", "filename": "hashes/vendor.json", "run_mode": "always"}
                    ],
                    "update_scripts": [
                        {"attr_path": "bump", "executable": "bin/bump", "args": ["--minor"]}
                    ],
                    "tests": [
                        {"attr_path": "checks.integration", "disable_sandbox": true}
                    ],
                    "required_update_tasks": ["base"]
                }
            ]
        }"#;
        let config: FreshenConfig = serde_json::from_str(raw).expect("parse");
        assert_eq!(config.update_tasks.len(), 1);
        let task = &config.update_tasks[0];
        assert_eq!(task.name, "deps");
        assert_eq!(task.main_attr_path, "pkg");
        assert_eq!(task.inputs, vec!["nixpkgs"]);
        assert_eq!(task.derived_hashes[0].run_mode, RunMode::OnFlakeInputChange);
        assert_eq!(task.derived_hashes[1].run_mode, RunMode::Always);
        assert_eq!(task.update_scripts[0].args, vec!["--minor"]);
        assert_eq!(task.update_scripts[0].run_mode, RunMode::OnFlakeInputChange);
        assert!(task.tests[0].disable_sandbox);
        assert_eq!(task.required_update_tasks, vec!["base"]);
    }

    #[test]
    fn optional_fields_default() {
        let raw = r#"{"update_tasks": [{"name": "minimal"}]}"#;
        let config: FreshenConfig = serde_json::from_str(raw).expect("parse");
        let task = &config.update_tasks[0];
        assert_eq!(task.main_attr_path, "");
        assert!(task.inputs.is_empty());
        assert!(task.derived_hashes.is_empty());
        assert!(task.update_scripts.is_empty());
        assert!(task.tests.is_empty());
        assert!(task.required_update_tasks.is_empty());
    }

    #[test]
    fn unknown_run_mode_is_rejected() {
        let raw = r#"{"attr_path": "x", "filename": "y", "run_mode": "weekly"}"#;
        assert!(serde_json::from_str::<DerivedHash>(raw).is_err());
    }
}
