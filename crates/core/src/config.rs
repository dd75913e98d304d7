//! The loop configuration captured in `thread_started`.
//!
//! This is the immutable, per-thread configuration. Loading it from a file is
//! the job of the `ralph-config` crate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::phase::Role;

/// Configuration fixed for the lifetime of a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Iteration budget for the whole run
    pub max_iterations: u32,

    /// Verification commands, evaluated in order
    #[serde(default)]
    pub quality_gates: Vec<QualityGate>,

    /// Pause between completed iterations
    #[serde(default)]
    pub inter_iteration_delay_ms: u64,

    /// Commit the working tree when a story passes
    #[serde(default)]
    pub commit_on_pass: bool,

    /// Template for the single-agent prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    /// Ask a human before committing a passing story
    #[serde(default)]
    pub require_approval_before_commit: bool,

    /// Escalate to a human after this many failures in a row on one story
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,

    /// Single-agent identity
    #[serde(default)]
    pub agent: AgentIdentity,

    /// Present when running the six-phase multi-agent topology
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_agent: Option<MultiAgentConfig>,

    /// Passed through to the agent runner untouched
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            quality_gates: vec![],
            inter_iteration_delay_ms: 0,
            commit_on_pass: true,
            prompt_template: None,
            require_approval_before_commit: false,
            max_consecutive_failures: None,
            agent: AgentIdentity::default(),
            multi_agent: None,
            capabilities: Capabilities::default(),
        }
    }
}

impl LoopConfig {
    pub fn is_multi_agent(&self) -> bool {
        self.multi_agent.is_some()
    }

    /// The agent that plays the given role; single-agent mode always uses `agent`.
    pub fn agent_for(&self, role: Option<Role>) -> &AgentIdentity {
        match (&self.multi_agent, role) {
            (Some(multi), Some(Role::AgentA)) => &multi.agent_a,
            (Some(multi), Some(Role::AgentB)) => &multi.agent_b,
            _ => &self.agent,
        }
    }
}

/// An external verification command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGate {
    pub name: String,
    pub command: String,

    /// A failure of this gate does not block the iteration
    #[serde(default)]
    pub continue_on_fail: bool,
}

/// The two agents of the multi-agent topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiAgentConfig {
    pub agent_a: AgentIdentity,
    pub agent_b: AgentIdentity,
}

/// Which agent to run and, optionally, exactly how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub name: String,

    /// Shell command override; the prompt is written to its stdin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: None,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// The shell command used to launch this agent.
    pub fn resolved_command(&self) -> String {
        if let Some(command) = &self.command {
            return command.clone();
        }
        match self.name.as_str() {
            "claude" => "claude --print --dangerously-skip-permissions".into(),
            "codex" => "codex exec --full-auto -".into(),
            "opencode" => "opencode run".into(),
            "amp" => "amp --execute".into(),
            other => other.to_string(),
        }
    }
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self::new("claude")
    }
}

/// What the agent process is allowed to do. Enforcement belongs to the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default = "default_true")]
    pub network: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writable_paths: Vec<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            network: true,
            writable_paths: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_agents_resolve_to_commands() {
        assert!(AgentIdentity::new("claude").resolved_command().starts_with("claude"));
        assert_eq!(AgentIdentity::new("my-agent").resolved_command(), "my-agent");
        assert_eq!(
            AgentIdentity::new("claude").with_command("cat").resolved_command(),
            "cat"
        );
    }

    #[test]
    fn agent_for_role_uses_multi_agent_identities() {
        let config = LoopConfig {
            multi_agent: Some(MultiAgentConfig {
                agent_a: AgentIdentity::new("claude"),
                agent_b: AgentIdentity::new("codex"),
            }),
            ..LoopConfig::default()
        };
        assert_eq!(config.agent_for(Some(Role::AgentA)).name, "claude");
        assert_eq!(config.agent_for(Some(Role::AgentB)).name, "codex");
        assert_eq!(LoopConfig::default().agent_for(Some(Role::AgentB)).name, "claude");
    }

    #[test]
    fn config_json_defaults() {
        let config: LoopConfig = serde_json::from_str(r#"{"max_iterations": 3}"#).unwrap();
        assert_eq!(config.max_iterations, 3);
        assert!(config.quality_gates.is_empty());
        assert!(!config.commit_on_pass);
        assert!(config.capabilities.network);
        assert_eq!(config.agent.name, "claude");
    }
}
