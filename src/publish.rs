//! Downstream consumers of a task's change set.

use std::path::Path;

use crate::changes::UpdateResult;
use crate::error::Result;

/// Ships the files a task changed, for example as a commit on a remote
/// branch. The orchestrator imposes nothing beyond handing over the repo
/// root and the changed-path set.
pub trait CommitPublisher {
    fn publish(&self, repo_root: &Path, result: &UpdateResult) -> Result<()>;
}

/// Publisher that only reports what changed.
pub struct SummaryPublisher;

impl CommitPublisher for SummaryPublisher {
    fn publish(&self, repo_root: &Path, result: &UpdateResult) -> Result<()> {
        if result.is_empty() {
            tracing::info!(repo = %repo_root.display(), "no files changed");
            return Ok(());
        }
        for path in result.paths() {
            tracing::info!(repo = %repo_root.display(), file = %path, "file changed");
        }
        Ok(())
    }
}
