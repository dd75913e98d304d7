//! Git committer. Stages everything and commits, allowing empty commits.

use async_trait::async_trait;
use ralph_core::error::RunnerError;
use ralph_core::port::Committer;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy)]
pub struct GitCommitter;

impl GitCommitter {
    pub fn new() -> Self {
        Self
    }

    async fn git(&self, working_dir: &Path, args: &[&str]) -> Result<String, RunnerError> {
        debug!(args = ?args, "Running git");
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(working_dir);
        #[cfg(unix)]
        cmd.process_group(0);
        let output = cmd
            .output()
            .await
            .map_err(|e| RunnerError::SpawnFailed {
                command: format!("git {}", args.join(" ")),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RunnerError::CommitFailed(format!(
                "git {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Committer for GitCommitter {
    async fn commit(&self, working_dir: &Path, message: &str) -> Result<String, RunnerError> {
        self.git(working_dir, &["add", "-A"]).await?;
        self.git(working_dir, &["commit", "--allow-empty", "-m", message])
            .await?;
        let sha = self.git(working_dir, &["rev-parse", "HEAD"]).await?;
        info!(sha = %sha, "Committed");
        Ok(sha)
    }
}
