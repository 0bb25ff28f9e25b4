//! Working-copy diffing over a throwaway git repository.
//!
//! Update scripts rewrite files in place, so detecting their effect is a
//! content-level diff problem. The differ initializes a fresh repository in
//! the target directory and stages everything; whatever an external process
//! modifies afterwards shows up in the status. Only ever point this at
//! scratch copies: any pre-existing `.git` under the root is destroyed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Snapshot of a directory's files at baseline time.
pub struct WorktreeBaseline {
    root: PathBuf,
    git_bin: PathBuf,
}

impl WorktreeBaseline {
    /// Initialize a fresh repository under `root` and stage every current
    /// file, capturing the "before" state.
    pub fn prepare(root: &Path) -> Result<Self> {
        let git_bin = which::which("git").map_err(|_| Error::GitNotFound)?;
        let git_dir = root.join(".git");
        if git_dir.exists() {
            fs::remove_dir_all(&git_dir).map_err(|err| Error::io("remove", &git_dir, err))?;
        }
        let baseline = Self {
            root: root.to_path_buf(),
            git_bin,
        };
        baseline.run(&["init", "--quiet"])?;
        baseline.run(&["add", "--all"])?;
        Ok(baseline)
    }

    /// Paths (relative to the root) whose content differs from the staged
    /// baseline.
    ///
    /// Only in-place modifications are reported; files created, deleted, or
    /// renamed after the baseline are intentionally ignored, matching the
    /// update-script contract of rewriting files in place.
    pub fn changed_files(&self) -> Result<Vec<String>> {
        // The NUL-separated record format carries paths verbatim; the
        // line-oriented one C-quotes anything non-ASCII.
        let status = self.run_captured(&["status", "--porcelain", "-z"])?;
        let mut changed = Vec::new();
        let mut records = status.split('\0');
        while let Some(record) = records.next() {
            if record.is_empty() {
                continue;
            }
            // Record format: index char, worktree char, space, path.
            let mut chars = record.chars();
            let index = chars.next();
            let worktree = chars.next();
            let rest = chars.as_str();
            // Rename and copy records carry the origin path as a second
            // NUL-separated field.
            if matches!(index, Some('R') | Some('C')) {
                records.next();
            }
            if worktree == Some('M') {
                if let Some(path) = rest.strip_prefix(' ') {
                    changed.push(path.to_string());
                }
            }
        }
        Ok(changed)
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let status = Command::new(&self.git_bin)
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .status()
            .map_err(|err| Error::Git {
                command: args.join(" "),
                detail: err.to_string(),
            })?;
        if !status.success() {
            return Err(Error::Git {
                command: args.join(" "),
                detail: format!("exited with {status}"),
            });
        }
        Ok(())
    }

    fn run_captured(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.git_bin)
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| Error::Git {
                command: args.join(" "),
                detail: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::Git {
                command: args.join(" "),
                detail: format!("exited with {}", output.status),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    #[test]
    fn reports_only_modified_files() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path();
        fs::write(root.join("keep.txt"), "unchanged").expect("write");
        fs::write(root.join("edit.txt"), "before").expect("write");
        fs::create_dir(root.join("sub")).expect("mkdir");
        fs::write(root.join("sub/nested.txt"), "before").expect("write");
        fs::write(root.join("remove.txt"), "doomed").expect("write");

        let baseline = WorktreeBaseline::prepare(root).expect("prepare baseline");

        fs::write(root.join("edit.txt"), "after").expect("rewrite");
        fs::write(root.join("sub/nested.txt"), "after").expect("rewrite");
        fs::write(root.join("created.txt"), "new").expect("write");
        fs::remove_file(root.join("remove.txt")).expect("remove");

        let mut changed = baseline.changed_files().expect("diff");
        changed.sort();
        assert_eq!(changed, vec!["edit.txt", "sub/nested.txt"]);
    }

    #[test]
    fn non_ascii_paths_are_reported_verbatim() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path();
        fs::write(root.join("café.md"), "before").expect("write");
        fs::write(root.join("with space.txt"), "before").expect("write");

        let baseline = WorktreeBaseline::prepare(root).expect("prepare baseline");
        fs::write(root.join("café.md"), "after").expect("rewrite");
        fs::write(root.join("with space.txt"), "after").expect("rewrite");

        let mut changed = baseline.changed_files().expect("diff");
        changed.sort();
        assert_eq!(changed, vec!["café.md", "with space.txt"]);
    }

    #[test]
    fn unchanged_tree_has_no_diff() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::write(dir.path().join("a.txt"), "stable").expect("write");
        let baseline = WorktreeBaseline::prepare(dir.path()).expect("prepare baseline");
        assert!(baseline.changed_files().expect("diff").is_empty());
    }

    #[test]
    fn stale_metadata_is_replaced() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path();
        fs::create_dir(root.join(".git")).expect("mkdir");
        fs::write(root.join(".git/garbage"), "not a repo").expect("write");
        fs::write(root.join("file.txt"), "before").expect("write");

        let baseline = WorktreeBaseline::prepare(root).expect("prepare baseline");
        fs::write(root.join("file.txt"), "after").expect("rewrite");
        assert_eq!(baseline.changed_files().expect("diff"), vec!["file.txt"]);
    }
}
