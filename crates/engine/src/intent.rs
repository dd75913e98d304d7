//! Intents: the reducer's decisions. Never persisted.

use ralph_core::event::{HumanInputReason, TerminationReason};
use ralph_core::phase::{Phase, Role};

/// The next action for the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Run the agent (or one phase's agent) on a story
    RunAgent(AgentTask),

    /// Run exactly one quality gate
    RunGate {
        iteration: u32,
        story_id: String,
        gate_index: usize,
    },

    /// Commit the working tree for a verified story
    Commit { iteration: u32, story_id: String },

    /// Record the story as passing and close the iteration
    MarkPassed {
        iteration: u32,
        story_id: String,
        committed: bool,
    },

    /// Stop and ask the operator
    RequestHumanInput {
        iteration: u32,
        story_id: String,
        reason: HumanInputReason,
        prompt: String,
        phase: Option<Phase>,
    },

    /// End the run
    Complete { reason: TerminationReason },

    /// Close the open iteration as failed, then pause before the next one
    WaitDelay {
        iteration: u32,
        story_id: String,
        failure: String,
    },
}

/// One agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTask {
    pub iteration: u32,
    pub story_id: String,

    /// True when this run opens a new iteration; false when it continues
    /// the open one.
    pub begins_iteration: bool,

    /// Set in multi-agent mode
    pub phase: Option<PhaseTask>,

    /// Operator answer being carried into the prompt after a resume
    pub human_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTask {
    pub phase: Phase,
    pub role: Role,

    /// 1 on the first run of this phase in the iteration
    pub attempt: u32,

    /// Latest output of each earlier phase in this iteration, oldest first
    pub prior_outputs: Vec<(Phase, String)>,
}

impl Intent {
    /// Snake-case name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::RunAgent(_) => "run_agent",
            Intent::RunGate { .. } => "run_gate",
            Intent::Commit { .. } => "commit",
            Intent::MarkPassed { .. } => "mark_passed",
            Intent::RequestHumanInput { .. } => "request_human_input",
            Intent::Complete { .. } => "complete",
            Intent::WaitDelay { .. } => "wait_delay",
        }
    }
}
