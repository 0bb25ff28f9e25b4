//! Runs update scripts against a scratch copy of the repo and harvests the
//! files they modify.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use walkdir::WalkDir;

use crate::changes::UpdateResult;
use crate::config::UpdateScript;
use crate::error::{Error, Result};
use crate::worktree::WorktreeBaseline;

/// Run one update script and copy the files it changed back into the repo.
///
/// The script only ever executes inside a scratch copy of `flake_root`, so a
/// misbehaving script cannot corrupt the working tree beyond the changes the
/// differ observes and copies back. The scratch directory is removed on all
/// exit paths.
pub fn run_update_script(
    script_output: &Path,
    script: &UpdateScript,
    flake_root: &Path,
) -> Result<UpdateResult> {
    let scratch = tempfile::tempdir()
        .map_err(|err| Error::io("create scratch dir in", std::env::temp_dir(), err))?;
    let scratch_root = scratch.path();

    copy_tree_excluding(flake_root, scratch_root, &flake_root.join(".git"))?;
    let baseline = WorktreeBaseline::prepare(scratch_root)?;

    let executable = script_output.join(&script.executable);
    let status = Command::new(&executable)
        .args(&script.args)
        .current_dir(scratch_root)
        .stdin(Stdio::null())
        .status()
        .map_err(|err| Error::ScriptExecution {
            executable: executable.clone(),
            detail: err.to_string(),
        })?;
    if !status.success() {
        return Err(Error::ScriptExecution {
            executable,
            detail: format!("exited with {status}"),
        });
    }

    let mut out = UpdateResult::new();
    for changed in baseline.changed_files()? {
        tracing::info!(file = %changed, "copying updated file");
        let from = scratch_root.join(&changed);
        let to = flake_root.join(&changed);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::io("create", parent, err))?;
        }
        fs::copy(&from, &to).map_err(|err| Error::io("copy", &from, err))?;
        out.add_path(changed);
    }
    Ok(out)
}

/// Recursively copy `from` into `to`, skipping the single exact path `skip`
/// (the repo's own version-control metadata).
fn copy_tree_excluding(from: &Path, to: &Path, skip: &Path) -> Result<()> {
    let walker = WalkDir::new(from)
        .into_iter()
        .filter_entry(|entry| entry.path() != skip);
    for entry in walker {
        let entry = entry.map_err(|err| Error::io("walk", from, err.into()))?;
        let rel = match entry.path().strip_prefix(from) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let dest = to.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest).map_err(|err| Error::io("create", &dest, err))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest).map_err(|err| Error::io("copy", entry.path(), err))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<()> {
    let target = fs::read_link(from).map_err(|err| Error::io("read link", from, err))?;
    std::os::unix::fs::symlink(&target, to).map_err(|err| Error::io("create link", to, err))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|err| Error::io("copy", from, err))
}
