//! Thread events, the immutable records that make up a run.
//!
//! Every event is `{type, timestamp, data}` on disk. In Rust the payload is a
//! sum type with one variant per kind, so the reducer's match is exhaustive.
//! An [`EventBus`] lets observers follow a run as events are appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::LoopConfig;
use crate::phase::{Phase, Role};
use crate::story::Prd;

/// One appended record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEvent {
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub kind: EventKind,
}

impl ThreadEvent {
    /// Stamp an event with the current time.
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn at(timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self { timestamp, kind }
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }
}

/// Event payloads, adjacently tagged as `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    ThreadStarted {
        prd: Prd,
        config: LoopConfig,
        meta: ThreadMeta,
    },

    IterationStarted {
        iteration: u32,
        story_id: String,
        story_title: String,
    },

    AgentDispatched {
        iteration: u32,
        story_id: String,
        agent: String,
        command: String,
    },

    AgentCompleted {
        iteration: u32,
        story_id: String,
        exit_code: i32,
        stdout: String,
        #[serde(default)]
        stderr: String,
        #[serde(default)]
        duration_ms: u64,
    },

    PhaseStarted {
        iteration: u32,
        story_id: String,
        phase: Phase,
        role: Role,
        agent: String,
        attempt: u32,
    },

    PhaseCompleted {
        iteration: u32,
        story_id: String,
        phase: Phase,
        role: Role,
        exit_code: i32,
        stdout: String,
        #[serde(default)]
        stderr: String,
        #[serde(default)]
        duration_ms: u64,
    },

    GateStarted {
        iteration: u32,
        gate_index: usize,
        name: String,
    },

    GateCompleted {
        iteration: u32,
        gate_index: usize,
        name: String,
        passed: bool,
        exit_code: i32,
        #[serde(default)]
        output: String,
        #[serde(default)]
        continue_on_fail: bool,
        #[serde(default)]
        duration_ms: u64,
    },

    StoryPassed {
        iteration: u32,
        story_id: String,
        committed: bool,
    },

    CommitCompleted {
        iteration: u32,
        story_id: String,
        sha: String,
        message: String,
    },

    IterationCompleted {
        iteration: u32,
        story_id: String,
        all_gates_passed: bool,
        #[serde(default)]
        committed: bool,
        #[serde(default)]
        story_passed: bool,
    },

    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iteration: Option<u32>,
        context: String,
        message: String,
        recoverable: bool,
    },

    HumanInputRequested {
        iteration: u32,
        story_id: String,
        reason: HumanInputReason,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<Phase>,
    },

    HumanInputReceived {
        response: String,
    },

    ThreadCompleted {
        reason: TerminationReason,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::ThreadStarted { .. } => EventType::ThreadStarted,
            EventKind::IterationStarted { .. } => EventType::IterationStarted,
            EventKind::AgentDispatched { .. } => EventType::AgentDispatched,
            EventKind::AgentCompleted { .. } => EventType::AgentCompleted,
            EventKind::PhaseStarted { .. } => EventType::PhaseStarted,
            EventKind::PhaseCompleted { .. } => EventType::PhaseCompleted,
            EventKind::GateStarted { .. } => EventType::GateStarted,
            EventKind::GateCompleted { .. } => EventType::GateCompleted,
            EventKind::StoryPassed { .. } => EventType::StoryPassed,
            EventKind::CommitCompleted { .. } => EventType::CommitCompleted,
            EventKind::IterationCompleted { .. } => EventType::IterationCompleted,
            EventKind::Error { .. } => EventType::Error,
            EventKind::HumanInputRequested { .. } => EventType::HumanInputRequested,
            EventKind::HumanInputReceived { .. } => EventType::HumanInputReceived,
            EventKind::ThreadCompleted { .. } => EventType::ThreadCompleted,
        }
    }
}

/// The closed set of event types, without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ThreadStarted,
    IterationStarted,
    AgentDispatched,
    AgentCompleted,
    PhaseStarted,
    PhaseCompleted,
    GateStarted,
    GateCompleted,
    StoryPassed,
    CommitCompleted,
    IterationCompleted,
    Error,
    HumanInputRequested,
    HumanInputReceived,
    ThreadCompleted,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ThreadStarted => "thread_started",
            EventType::IterationStarted => "iteration_started",
            EventType::AgentDispatched => "agent_dispatched",
            EventType::AgentCompleted => "agent_completed",
            EventType::PhaseStarted => "phase_started",
            EventType::PhaseCompleted => "phase_completed",
            EventType::GateStarted => "gate_started",
            EventType::GateCompleted => "gate_completed",
            EventType::StoryPassed => "story_passed",
            EventType::CommitCompleted => "commit_completed",
            EventType::IterationCompleted => "iteration_completed",
            EventType::Error => "error",
            EventType::HumanInputRequested => "human_input_requested",
            EventType::HumanInputReceived => "human_input_received",
            EventType::ThreadCompleted => "thread_completed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run metadata recorded in `thread_started`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMeta {
    pub run_id: String,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub created_by: String,
    /// Where this run mirrors the PRD; resumes keep writing there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_path: Option<PathBuf>,
}

impl ThreadMeta {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            working_dir: working_dir.into(),
            created_by: concat!("ralph/", env!("CARGO_PKG_VERSION")).to_string(),
            prd_path: None,
        }
    }

    pub fn with_prd_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.prd_path = Some(path.into());
        self
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    AllPassed,
    MaxIterations,
    CompletionSignal,
    HumanInput,
    Paused,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::AllPassed => "all_passed",
            TerminationReason::MaxIterations => "max_iterations",
            TerminationReason::CompletionSignal => "completion_signal",
            TerminationReason::HumanInput => "human_input",
            TerminationReason::Paused => "paused",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the loop is asking a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanInputReason {
    /// The agent emitted a `<request-input>` marker
    AgentRequest,
    /// Too many failures in a row on the same story
    ConsecutiveFailures,
    /// `require_approval_before_commit` is set
    ApprovalRequired,
    /// The AAR cycle repeated; review before committing
    AarReview,
}

impl HumanInputReason {
    /// Reasons whose response is a yes/no decision on the current iteration.
    pub fn is_approval(self) -> bool {
        matches!(self, HumanInputReason::ApprovalRequired | HumanInputReason::AarReview)
    }
}

/// A broadcast-based bus carrying appended thread events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// The dispatch loop publishes; the CLI subscribes to print progress.
pub struct EventBus {
    sender: broadcast::Sender<Arc<ThreadEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: ThreadEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ThreadEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_type_timestamp_data() {
        let event = ThreadEvent::now(EventKind::StoryPassed {
            iteration: 2,
            story_id: "US-001".into(),
            committed: true,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "story_passed");
        assert_eq!(value["data"]["story_id"], "US-001");
        assert!(value["timestamp"].is_string());

        let back: ThreadEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn meta_prd_path_is_optional_on_the_wire() {
        let meta = ThreadMeta::new("/work");
        let value = serde_json::to_value(&meta).unwrap();
        assert!(value.get("prd_path").is_none());

        let older: ThreadMeta = serde_json::from_value(serde_json::json!({
            "run_id": "r1",
            "working_dir": "/work"
        }))
        .unwrap();
        assert_eq!(older.prd_path, None);

        let meta = meta.with_prd_path("/work/docs/prd.json");
        let back: ThreadMeta = serde_json::from_value(serde_json::to_value(&meta).unwrap()).unwrap();
        assert_eq!(back.prd_path.as_deref(), Some(std::path::Path::new("/work/docs/prd.json")));
    }

    #[test]
    fn event_type_matches_wire_name() {
        let event = ThreadEvent::now(EventKind::ThreadCompleted {
            reason: TerminationReason::Paused,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.event_type().as_str());
        assert_eq!(value["data"]["reason"], "paused");
    }

    #[test]
    fn approval_reasons() {
        assert!(HumanInputReason::ApprovalRequired.is_approval());
        assert!(HumanInputReason::AarReview.is_approval());
        assert!(!HumanInputReason::AgentRequest.is_approval());
    }

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(ThreadEvent::now(EventKind::HumanInputReceived {
            response: "go ahead".into(),
        }));

        let event = rx.recv().await.unwrap();
        match &event.kind {
            EventKind::HumanInputReceived { response } => assert_eq!(response, "go ahead"),
            other => panic!("Expected HumanInputReceived, got {other:?}"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(ThreadEvent::now(EventKind::ThreadCompleted {
            reason: TerminationReason::AllPassed,
        }));
    }
}
