//! Change-set accounting for update tasks.

use std::collections::BTreeSet;

/// Set of repo-relative paths modified by an update task.
///
/// Results are created per task invocation and unioned up the prerequisite
/// chain; downstream commit logic consumes the final set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    paths: BTreeSet<String>,
}

impl UpdateResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn union(&mut self, other: UpdateResult) {
        self.paths.extend(other.paths);
    }

    pub fn add_path(&mut self, path: impl Into<String>) {
        self.paths.insert(path.into());
    }

    pub fn add_paths<I>(&mut self, paths: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        for path in paths {
            self.add_path(path);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Changed paths in stable (sorted) order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}
