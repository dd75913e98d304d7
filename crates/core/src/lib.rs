//! # Ralph Core
//!
//! Domain types, ports, and error definitions for the Ralph agent loop.
//! A run is an append-only [`Thread`] of [`ThreadEvent`]s; every piece of
//! run state is a projection over that list.
//!
//! Side effects (agents, gates, commits, persistence) sit behind the traits
//! in [`port`]. Implementations live in their respective crates.

pub mod config;
pub mod error;
pub mod event;
pub mod markers;
pub mod phase;
pub mod port;
pub mod projection;
pub mod story;
pub mod thread;

// Re-export key types at crate root for ergonomics
pub use config::{AgentIdentity, Capabilities, LoopConfig, MultiAgentConfig, QualityGate};
pub use error::{Error, PrdError, Result, RunnerError, StoreError, ThreadError};
pub use event::{
    EventBus, EventKind, EventType, HumanInputReason, TerminationReason, ThreadEvent, ThreadMeta,
};
pub use markers::{COMPLETION_MARKER, detect_human_input_request, has_completion_signal};
pub use phase::{Phase, Role};
pub use port::{AgentInvocation, AgentOutput, AgentRunner, Committer, GateRunner, ThreadStore};
pub use projection::{
    GateResult, IterationResult, PromptContextOptions, RunStatus, StateSnapshot, current_config,
    current_prd, derive_iterations, format_iteration_block, progress_transcript,
    serialize_for_prompt, snapshot_state, truncate_keep_tail,
};
pub use story::{Prd, Story};
pub use thread::{HumanInputRequest, OpenIteration, PhaseRecord, THREAD_SCHEMA, Thread};
