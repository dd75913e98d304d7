//! Ports: the side-effect boundaries the dispatch loop drives.
//!
//! Each trait has a process-backed implementation in `ralph-tools` or
//! `ralph-store`, and tests swap in scripted ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::Capabilities;
use crate::error::{RunnerError, StoreError};
use crate::story::Prd;
use crate::thread::Thread;

/// Everything needed to run one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    /// Shell command line for the agent CLI
    pub command: String,

    /// Prompt written to the agent's stdin
    pub prompt: String,

    pub working_dir: PathBuf,

    /// Extra environment (`RALPH_ITERATION`, `RALPH_STORY_ID`, ...)
    pub env: BTreeMap<String, String>,

    pub capabilities: Capabilities,
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl AgentOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined, for gate reports.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Runs an external coding agent.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// A non-zero exit is a normal `Ok` result. `Err` means the process could
    /// not be run to completion at all.
    async fn run_agent(&self, invocation: &AgentInvocation) -> Result<AgentOutput, RunnerError>;
}

/// Runs a quality gate command.
#[async_trait]
pub trait GateRunner: Send + Sync {
    async fn run_shell(&self, command: &str, working_dir: &Path) -> Result<AgentOutput, RunnerError>;
}

/// Records the working tree in version control.
#[async_trait]
pub trait Committer: Send + Sync {
    /// Commit everything and return the new revision id.
    async fn commit(&self, working_dir: &Path, message: &str) -> Result<String, RunnerError>;
}

/// Durable storage for a thread and its derived files.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Load the persisted thread, `None` if there is none yet.
    async fn load(&self) -> Result<Option<Thread>, StoreError>;

    /// Persist the full thread. Must be atomic with respect to crashes.
    async fn save(&self, thread: &Thread) -> Result<(), StoreError>;

    /// Write the PRD with current pass flags where the user can see it.
    async fn write_prd(&self, prd: &Prd) -> Result<(), StoreError>;
}
