//! Git safety: make sure the agents' edits can be rolled back.

use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::process::Command;
use tracing::{info, warn};

use crate::EngineError;

/// Prefix of the rollback tags created before a run.
pub const TAG_PREFIX: &str = "autorun/";

/// Checks that a workspace is a git work tree and tags its current state.
#[derive(Debug, Clone)]
pub struct GitGuard {
    workspace: PathBuf,
}

impl GitGuard {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Verify the work tree and create the rollback tag; returns the tag name.
    pub async fn protect(&self) -> Result<String, EngineError> {
        let inside = self.git(&["rev-parse", "--is-inside-work-tree"]).await?;
        if inside.trim() != "true" {
            return Err(EngineError::GitSafety(format!(
                "{} is not inside a git work tree",
                self.workspace.display()
            )));
        }

        let status = self.git(&["status", "--porcelain"]).await?;
        let dirty = status.lines().filter(|l| !l.trim().is_empty()).count();
        if dirty > 0 {
            warn!(workspace = %self.workspace.display(), files = dirty, "Workspace has uncommitted changes");
        }

        let tag = format!("{}{}", TAG_PREFIX, Local::now().format("%Y%m%d-%H%M%S"));
        self.git(&["tag", &tag]).await?;
        info!(workspace = %self.workspace.display(), tag = %tag, "Created rollback tag");
        Ok(tag)
    }

    async fn git(&self, args: &[&str]) -> Result<String, EngineError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workspace)
            .output()
            .await
            .map_err(|e| EngineError::GitSafety(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            return Err(EngineError::GitSafety(format!(
                "git {} failed in {}: {}",
                args.join(" "),
                self.workspace.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        let guard = GitGuard::new(dir.path());
        assert!(matches!(guard.protect().await, Err(EngineError::GitSafety(_))));
    }

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .args(["-c", "user.name=autorun", "-c", "user.email=autorun@localhost"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?} failed", args);
        String::from_utf8(output.stdout).unwrap()
    }

    #[tokio::test]
    async fn test_tags_clean_repository() {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "--quiet"]);
        std::fs::write(dir.path().join("README"), "demo\n").unwrap();
        git(dir.path(), &["add", "README"]);
        git(dir.path(), &["commit", "--quiet", "-m", "initial"]);

        let tag = GitGuard::new(dir.path()).protect().await.unwrap();
        assert!(tag.starts_with(TAG_PREFIX));
        assert_eq!(tag.len(), TAG_PREFIX.len() + "20260101-120000".len());

        let tags = git(dir.path(), &["tag", "--list", "autorun/*"]);
        assert_eq!(tags.trim(), tag);
    }

    #[tokio::test]
    async fn test_rejects_missing_directory() {
        let guard = GitGuard::new("/nonexistent/autorun/workspace");
        assert!(matches!(guard.protect().await, Err(EngineError::GitSafety(_))));
    }
}
