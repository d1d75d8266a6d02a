//! Repository checkout

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::filesys::dir::Dir;

/// Head commit of a fresh checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadCommit {
    pub hash: String,
    pub message: String,
}

/// Fetches a branch of a repository into an empty directory
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        repository_url: &str,
        branch: &str,
        target: &Dir,
    ) -> Result<HeadCommit, EngineError>;
}

/// Shallow clones through the `git` binary
#[derive(Debug, Clone)]
pub struct GitFetcher {
    git_bin: String,
}

impl GitFetcher {
    pub fn new(git_bin: impl Into<String>) -> Self {
        Self {
            git_bin: git_bin.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.git_bin);
        // Never block on a credential prompt
        command.env("GIT_TERMINAL_PROMPT", "0");
        command.kill_on_drop(true);
        command
    }

    async fn git_output(&self, target: &Dir, args: &[&str]) -> Result<String, EngineError> {
        let output = self
            .command()
            .arg("-C")
            .arg(target.path())
            .args(args)
            .output()
            .await
            .map_err(|e| EngineError::CloneError(format!("Failed to run git: {}", e)))?;

        if !output.status.success() {
            return Err(EngineError::CloneError(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(
        &self,
        repository_url: &str,
        branch: &str,
        target: &Dir,
    ) -> Result<HeadCommit, EngineError> {
        info!("Cloning {} (branch: {})", repository_url, branch);

        let output = self
            .command()
            .args(["clone", "--depth", "1", "--single-branch", "--branch", branch, "--"])
            .arg(repository_url)
            .arg(target.path())
            .output()
            .await
            .map_err(|e| EngineError::CloneError(format!("Failed to run git clone: {}", e)))?;

        if !output.status.success() {
            return Err(EngineError::CloneError(format!(
                "git clone of {} ({}) failed: {}",
                repository_url,
                branch,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let hash = self.git_output(target, &["rev-parse", "HEAD"]).await?;
        let message = self.git_output(target, &["log", "-1", "--format=%B"]).await?;
        let head = HeadCommit {
            hash: hash.trim().to_string(),
            message: message.trim_end().to_string(),
        };

        debug!("Checked out {} at {}", repository_url, head.hash);
        Ok(head)
    }
}
