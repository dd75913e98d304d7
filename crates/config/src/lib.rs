//! Configuration loading, validation, and management for Ralph.
//!
//! Loads configuration from `.ralph/config.toml` in the working directory
//! with environment variable overrides. Validated once at startup, then
//! frozen into the [`LoopConfig`] recorded by `thread_started`.

use ralph_core::config::{AgentIdentity, Capabilities, LoopConfig, MultiAgentConfig, QualityGate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".ralph/config.toml";

/// The root configuration structure.
///
/// Maps directly to `.ralph/config.toml`. Scalars come first so the
/// serialized TOML keeps them above the tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Iteration budget for a run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Pause between completed iterations, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub inter_iteration_delay_ms: u64,

    /// Commit the working tree when a story passes
    #[serde(default = "default_true")]
    pub commit_on_pass: bool,

    /// Ask a human before committing a passing story
    #[serde(default)]
    pub require_approval_before_commit: bool,

    /// Ask a human after this many failures in a row on one story (0 = never)
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Inline template or path to a template file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    #[serde(default)]
    pub agent: AgentConfig,

    /// Enables the six-phase two-agent topology when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_agent: Option<MultiAgentSection>,

    #[serde(default)]
    pub capabilities: Capabilities,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    /// Verification commands, evaluated in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality_gates: Vec<QualityGate>,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_delay_ms() -> u64 {
    2000
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

/// Single-agent settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Known agent name ("claude", "codex", "opencode", "amp") or any command
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Full shell command; overrides the name's built-in command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

fn default_agent_name() -> String {
    "claude".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            command: None,
        }
    }
}

/// `[multi_agent]`: agent A plans and reviews, agent B asks and executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiAgentSection {
    pub agent_a: String,
    pub agent_b: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_a: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_b: Option<String>,
}

/// Where Ralph keeps its files, relative to the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_prd_path")]
    pub prd: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".ralph")
}
fn default_prd_path() -> PathBuf {
    PathBuf::from(".ralph/prd.json")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            prd: default_prd_path(),
        }
    }
}

/// Agent process settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Kill an agent that runs longer than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_timeout_secs: Option<u64>,

    /// Stream agent output to the terminal
    #[serde(default = "default_true")]
    pub echo_output: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            agent_timeout_secs: None,
            echo_output: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            inter_iteration_delay_ms: default_delay_ms(),
            commit_on_pass: true,
            require_approval_before_commit: false,
            max_consecutive_failures: default_max_consecutive_failures(),
            prompt_template: None,
            agent: AgentConfig::default(),
            multi_agent: None,
            capabilities: Capabilities::default(),
            paths: PathsConfig::default(),
            runner: RunnerConfig::default(),
            quality_gates: vec![],
        }
    }
}

impl AppConfig {
    /// Load from `path` and apply environment overrides:
    /// - `RALPH_MAX_ITERATIONS`
    /// - `RALPH_AGENT` (clears any configured command)
    /// - `RALPH_AGENT_COMMAND`
    /// - `RALPH_STATE_DIR`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`AppConfig::load`]).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("RALPH_MAX_ITERATIONS") {
            self.max_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "RALPH_MAX_ITERATIONS must be a positive integer, got '{raw}'"
                ))
            })?;
        }
        if let Some(name) = lookup("RALPH_AGENT") {
            self.agent = AgentConfig {
                name,
                command: None,
            };
        }
        if let Some(command) = lookup("RALPH_AGENT_COMMAND") {
            self.agent.command = Some(command);
        }
        if let Some(dir) = lookup("RALPH_STATE_DIR") {
            self.paths.state_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "agent.name must not be empty".into(),
            ));
        }

        for (i, gate) in self.quality_gates.iter().enumerate() {
            if gate.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "quality_gates[{i}] ({}) has an empty command",
                    gate.name
                )));
            }
        }

        if let Some(multi) = &self.multi_agent {
            if multi.agent_a.trim().is_empty() || multi.agent_b.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "multi_agent.agent_a and multi_agent.agent_b must both be set".into(),
                ));
            }
        }

        Ok(())
    }

    /// Freeze into the per-thread [`LoopConfig`].
    ///
    /// A `prompt_template` naming an existing file (relative to
    /// `working_dir`) is replaced by that file's contents.
    pub fn to_loop_config(&self, working_dir: &Path) -> Result<LoopConfig, ConfigError> {
        let prompt_template = match &self.prompt_template {
            Some(template) => Some(resolve_template(template, working_dir)?),
            None => None,
        };

        let multi_agent = self.multi_agent.as_ref().map(|m| MultiAgentConfig {
            agent_a: AgentIdentity {
                name: m.agent_a.clone(),
                command: m.command_a.clone(),
            },
            agent_b: AgentIdentity {
                name: m.agent_b.clone(),
                command: m.command_b.clone(),
            },
        });

        Ok(LoopConfig {
            max_iterations: self.max_iterations,
            quality_gates: self.quality_gates.clone(),
            inter_iteration_delay_ms: self.inter_iteration_delay_ms,
            commit_on_pass: self.commit_on_pass,
            prompt_template,
            require_approval_before_commit: self.require_approval_before_commit,
            max_consecutive_failures: (self.max_consecutive_failures > 0)
                .then_some(self.max_consecutive_failures),
            agent: AgentIdentity {
                name: self.agent.name.clone(),
                command: self.agent.command.clone(),
            },
            multi_agent,
            capabilities: self.capabilities.clone(),
        })
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let body = toml::to_string_pretty(&Self::default()).unwrap_or_default();
        format!(
            "# Ralph configuration\n\
             #\n\
             # Quality gates run in order after the agent succeeds:\n\
             #\n\
             # [[quality_gates]]\n\
             # name = \"test\"\n\
             # command = \"cargo test\"\n\
             # continue_on_fail = false\n\n\
             {body}"
        )
    }
}

fn resolve_template(template: &str, working_dir: &Path) -> Result<String, ConfigError> {
    // Inline templates contain newlines or placeholders; only short strings can be paths
    if template.contains('\n') || template.contains("{{") {
        return Ok(template.to_string());
    }
    let path = working_dir.join(template);
    if !path.is_file() {
        return Ok(template.to_string());
    }
    std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
        path,
        reason: e.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
