//! The Ralph loop.
//!
//! [`reducer::determine_next_step`] looks at a thread and decides what to do
//! next; [`dispatch::DispatchLoop`] does it, appends the outcome, persists,
//! and asks again.

pub mod dispatch;
pub mod intent;
pub mod phases;
pub mod prompt;
pub mod reducer;

pub use dispatch::{DispatchLoop, RunOutcome};
pub use intent::{AgentTask, Intent, PhaseTask};
pub use prompt::PromptBuilder;
pub use reducer::determine_next_step;
