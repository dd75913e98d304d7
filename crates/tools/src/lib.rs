//! Process-backed port implementations for Ralph.
//!
//! Everything here shells out: the coding agent, the quality gates, and git.

pub mod agent_runner;
pub mod gate_runner;
pub mod git;
pub mod shell;

pub use agent_runner::ShellAgentRunner;
pub use gate_runner::ShellGateRunner;
pub use git::GitCommitter;
