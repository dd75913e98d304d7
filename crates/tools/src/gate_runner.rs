//! Quality gate runner: one shell command, fully captured.

use async_trait::async_trait;
use ralph_core::error::RunnerError;
use ralph_core::port::{AgentOutput, GateRunner};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

use crate::shell::{exit_code, shell_command};

#[derive(Debug, Default, Clone, Copy)]
pub struct ShellGateRunner;

impl ShellGateRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GateRunner for ShellGateRunner {
    async fn run_shell(&self, command: &str, working_dir: &Path) -> Result<AgentOutput, RunnerError> {
        debug!(command = %command, "Running gate");
        let started = Instant::now();

        let output = shell_command(command, working_dir)
            .output()
            .await
            .map_err(|e| RunnerError::SpawnFailed {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let code = exit_code(output.status);
        if code != 0 {
            warn!(command = %command, exit_code = code, "Gate failed");
        }

        Ok(AgentOutput {
            exit_code: code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
