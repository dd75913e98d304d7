//! The Thread: an append-only event log that is the single source of truth.
//!
//! Appending is the only mutation. All run state (which stories passed, what
//! iteration is open, which phase ran last) is answered by scanning events.

use serde::{Deserialize, Serialize};

use crate::config::LoopConfig;
use crate::error::ThreadError;
use crate::event::{EventKind, EventType, HumanInputReason, ThreadEvent, ThreadMeta};
use crate::phase::{Phase, Role};
use crate::story::Prd;

/// Schema tag written at the top of `thread.json`.
pub const THREAD_SCHEMA: &str = "ralph.thread.v1";

/// An append-only sequence of events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    schema: String,
    events: Vec<ThreadEvent>,
}

/// The iteration that has started but not completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenIteration {
    pub iteration: u32,
    pub story_id: String,
}

/// A `phase_completed` record from the open iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRecord<'a> {
    pub phase: Phase,
    pub role: Role,
    pub exit_code: i32,
    pub stdout: &'a str,
}

impl PhaseRecord<'_> {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// The most recent `human_input_requested`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanInputRequest {
    pub iteration: u32,
    pub story_id: String,
    pub reason: HumanInputReason,
    pub prompt: String,
    pub phase: Option<Phase>,
}

impl Thread {
    /// Start a new thread seeded with a single `thread_started` event.
    pub fn create(prd: Prd, config: LoopConfig, meta: ThreadMeta) -> Self {
        Self {
            schema: THREAD_SCHEMA.to_string(),
            events: vec![ThreadEvent::now(EventKind::ThreadStarted { prd, config, meta })],
        }
    }

    /// Build a thread from an existing event list, validating its shape.
    pub fn from_events(events: Vec<ThreadEvent>) -> Result<Self, ThreadError> {
        let thread = Self {
            schema: THREAD_SCHEMA.to_string(),
            events,
        };
        thread.validate()?;
        Ok(thread)
    }

    /// Check the invariants every persisted thread must satisfy.
    pub fn validate(&self) -> Result<(), ThreadError> {
        if self.schema != THREAD_SCHEMA {
            return Err(ThreadError::UnsupportedSchema {
                found: self.schema.clone(),
                expected: THREAD_SCHEMA.to_string(),
            });
        }
        let first = self.events.first().ok_or(ThreadError::Empty)?;
        if first.event_type() != EventType::ThreadStarted {
            return Err(ThreadError::NotStarted(first.event_type().to_string()));
        }
        Ok(())
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn events(&self) -> &[ThreadEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Return a new thread with `event` appended. `self` is left untouched.
    pub fn append(&self, event: ThreadEvent) -> Thread {
        let mut events = self.events.clone();
        events.push(event);
        Thread {
            schema: self.schema.clone(),
            events,
        }
    }

    /// Consuming form of [`Thread::append`] for callers that own the thread.
    pub fn into_appended(mut self, event: ThreadEvent) -> Thread {
        self.events.push(event);
        self
    }

    pub fn last_event(&self) -> Option<&ThreadEvent> {
        self.events.last()
    }

    pub fn last_event_of_type(&self, event_type: EventType) -> Option<&ThreadEvent> {
        self.events.iter().rev().find(|e| e.event_type() == event_type)
    }

    /// The payload of the seeding `thread_started` event.
    pub fn started(&self) -> Option<(&Prd, &LoopConfig, &ThreadMeta)> {
        match self.events.first().map(|e| &e.kind) {
            Some(EventKind::ThreadStarted { prd, config, meta }) => Some((prd, config, meta)),
            _ => None,
        }
    }

    pub fn completed_iteration_count(&self) -> u32 {
        self.events
            .iter()
            .filter(|e| e.event_type() == EventType::IterationCompleted)
            .count() as u32
    }

    fn last_iteration_started_index(&self) -> Option<usize> {
        self.events
            .iter()
            .rposition(|e| e.event_type() == EventType::IterationStarted)
    }

    /// The open iteration if there is one, otherwise the next untouched one.
    pub fn current_iteration_number(&self) -> u32 {
        let Some(idx) = self.last_iteration_started_index() else {
            return 1;
        };
        let EventKind::IterationStarted { iteration, .. } = &self.events[idx].kind else {
            return 1;
        };
        if self.open_iteration().is_some() {
            *iteration
        } else {
            iteration + 1
        }
    }

    /// The started-but-not-completed iteration, if any.
    pub fn open_iteration(&self) -> Option<OpenIteration> {
        let idx = self.last_iteration_started_index()?;
        let closed = self.events[idx..]
            .iter()
            .any(|e| e.event_type() == EventType::IterationCompleted);
        if closed {
            return None;
        }
        match &self.events[idx].kind {
            EventKind::IterationStarted {
                iteration,
                story_id,
                ..
            } => Some(OpenIteration {
                iteration: *iteration,
                story_id: story_id.clone(),
            }),
            _ => None,
        }
    }

    /// Events after the open iteration's `iteration_started`; empty when none is open.
    pub fn current_iteration_events(&self) -> &[ThreadEvent] {
        match (self.open_iteration(), self.last_iteration_started_index()) {
            (Some(_), Some(idx)) => &self.events[idx + 1..],
            _ => &[],
        }
    }

    /// Failures in a row for `story_id`, counted backwards over completed
    /// iterations until a success or a different story breaks the streak.
    pub fn consecutive_failures(&self, story_id: &str) -> u32 {
        let mut streak = 0;
        for event in self.events.iter().rev() {
            if let EventKind::IterationCompleted {
                story_id: sid,
                story_passed,
                ..
            } = &event.kind
            {
                if sid != story_id || *story_passed {
                    break;
                }
                streak += 1;
            }
        }
        streak
    }

    /// Story ids that have a `story_passed` event.
    pub fn passed_story_ids(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::StoryPassed { story_id, .. } => Some(story_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Completed phases of the open iteration, in order.
    pub fn current_iteration_phases(&self) -> Vec<PhaseRecord<'_>> {
        self.current_iteration_events()
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::PhaseCompleted {
                    phase,
                    role,
                    exit_code,
                    stdout,
                    ..
                } => Some(PhaseRecord {
                    phase: *phase,
                    role: *role,
                    exit_code: *exit_code,
                    stdout: stdout.as_str(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn last_completed_phase(&self) -> Option<PhaseRecord<'_>> {
        self.current_iteration_phases().last().copied()
    }

    /// How many times `phase` completed (successfully or not) in the open iteration.
    pub fn phase_completion_count(&self, phase: Phase) -> u32 {
        self.current_iteration_phases()
            .iter()
            .filter(|p| p.phase == phase)
            .count() as u32
    }

    /// True when every gate that ran in the open iteration passed.
    pub fn current_iteration_gates_passed(&self) -> bool {
        self.current_iteration_events().iter().all(|e| match &e.kind {
            EventKind::GateCompleted { passed, .. } => *passed,
            _ => true,
        })
    }

    /// True when the open iteration produced a `commit_completed`.
    pub fn current_iteration_committed(&self) -> bool {
        self.current_iteration_events()
            .iter()
            .any(|e| e.event_type() == EventType::CommitCompleted)
    }

    pub fn last_human_input_request(&self) -> Option<HumanInputRequest> {
        self.events.iter().rev().find_map(|e| match &e.kind {
            EventKind::HumanInputRequested {
                iteration,
                story_id,
                reason,
                prompt,
                phase,
            } => Some(HumanInputRequest {
                iteration: *iteration,
                story_id: story_id.clone(),
                reason: *reason,
                prompt: prompt.clone(),
                phase: *phase,
            }),
            _ => None,
        })
    }

    /// Prepare a persisted thread for another run.
    ///
    /// - `human_input_requested` (optionally followed by `thread_completed`):
    ///   the completed marker is dropped and `response` is appended as
    ///   `human_input_received`. A response is required.
    /// - `thread_completed{paused}`: the marker is dropped.
    /// - anything else is returned unchanged.
    pub fn prepare_resume(&self, response: Option<&str>) -> Result<Thread, ThreadError> {
        let n = self.events.len();
        let last = self.events.last().map(|e| &e.kind);
        let before_last = n.checked_sub(2).map(|i| self.events[i].event_type());

        let awaiting_input = match last {
            Some(EventKind::HumanInputRequested { .. }) => Some(n),
            Some(EventKind::ThreadCompleted { .. })
                if before_last == Some(EventType::HumanInputRequested) =>
            {
                Some(n - 1)
            }
            _ => None,
        };

        if let Some(keep) = awaiting_input {
            let response = response.ok_or(ThreadError::ResponseRequired)?;
            let mut events = self.events[..keep].to_vec();
            events.push(ThreadEvent::now(EventKind::HumanInputReceived {
                response: response.to_string(),
            }));
            return Ok(Thread {
                schema: self.schema.clone(),
                events,
            });
        }

        if let Some(EventKind::ThreadCompleted {
            reason: crate::event::TerminationReason::Paused,
        }) = last
        {
            return Ok(Thread {
                schema: self.schema.clone(),
                events: self.events[..n - 1].to_vec(),
            });
        }

        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TerminationReason;
    use crate::story::Story;

    fn prd() -> Prd {
        Prd {
            project: "demo".into(),
            description: String::new(),
            stories: vec![Story {
                id: "US-001".into(),
                title: "First".into(),
                description: String::new(),
                acceptance_criteria: vec![],
                priority: 1,
                passes: false,
                notes: None,
            }],
        }
    }

    fn thread() -> Thread {
        Thread::create(prd(), LoopConfig::default(), ThreadMeta::new("/tmp/work"))
    }

    fn ev(kind: EventKind) -> ThreadEvent {
        ThreadEvent::now(kind)
    }

    fn started(iteration: u32) -> ThreadEvent {
        ev(EventKind::IterationStarted {
            iteration,
            story_id: "US-001".into(),
            story_title: "First".into(),
        })
    }

    fn completed(iteration: u32, story_id: &str, passed: bool) -> ThreadEvent {
        ev(EventKind::IterationCompleted {
            iteration,
            story_id: story_id.into(),
            all_gates_passed: passed,
            committed: false,
            story_passed: passed,
        })
    }

    #[test]
    fn create_seeds_thread_started() {
        let t = thread();
        assert_eq!(t.len(), 1);
        assert_eq!(t.schema(), THREAD_SCHEMA);
        assert_eq!(t.last_event().unwrap().event_type(), EventType::ThreadStarted);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn append_is_pure() {
        let t = thread();
        let before = t.clone();
        let e = started(1);
        let t2 = t.append(e.clone());

        assert_eq!(t, before);
        assert_eq!(t2.len(), t.len() + 1);
        assert_eq!(&t2.events()[..t.len()], t.events());
        assert_eq!(t2.last_event(), Some(&e));
    }

    #[test]
    fn iteration_numbering() {
        let t = thread();
        assert_eq!(t.current_iteration_number(), 1);
        assert!(t.open_iteration().is_none());

        let t = t.append(started(1));
        assert_eq!(t.current_iteration_number(), 1);
        assert_eq!(t.open_iteration().unwrap().iteration, 1);

        let t = t.append(completed(1, "US-001", false));
        assert_eq!(t.current_iteration_number(), 2);
        assert_eq!(t.completed_iteration_count(), 1);
        assert!(t.open_iteration().is_none());
        assert!(t.current_iteration_events().is_empty());
    }

    #[test]
    fn consecutive_failures_stop_at_other_story_or_success() {
        let t = thread()
            .append(completed(1, "US-001", false))
            .append(completed(2, "US-002", false))
            .append(completed(3, "US-001", false))
            .append(completed(4, "US-001", false));
        assert_eq!(t.consecutive_failures("US-001"), 2);
        assert_eq!(t.consecutive_failures("US-002"), 0);

        let t = t.append(completed(5, "US-001", true));
        assert_eq!(t.consecutive_failures("US-001"), 0);
    }

    #[test]
    fn phase_helpers_are_scoped_to_open_iteration() {
        let phase_done = |phase: Phase, exit_code: i32| {
            ev(EventKind::PhaseCompleted {
                iteration: 1,
                story_id: "US-001".into(),
                phase,
                role: phase.role(),
                exit_code,
                stdout: format!("{phase} output"),
                stderr: String::new(),
                duration_ms: 1,
            })
        };
        let t = thread()
            .append(started(1))
            .append(phase_done(Phase::Brainstorm, 1))
            .append(phase_done(Phase::Brainstorm, 0))
            .append(phase_done(Phase::Clarify, 0));

        assert_eq!(t.phase_completion_count(Phase::Brainstorm), 2);
        assert_eq!(t.current_iteration_phases().len(), 3);
        assert_eq!(t.last_completed_phase().unwrap().phase, Phase::Clarify);

        let t = t.append(completed(1, "US-001", false));
        assert_eq!(t.phase_completion_count(Phase::Brainstorm), 0);
        assert!(t.last_completed_phase().is_none());
    }

    #[test]
    fn resume_replaces_completed_with_response() {
        let t = thread()
            .append(started(1))
            .append(ev(EventKind::HumanInputRequested {
                iteration: 1,
                story_id: "US-001".into(),
                reason: HumanInputReason::AgentRequest,
                prompt: "Which DB?".into(),
                phase: None,
            }))
            .append(ev(EventKind::ThreadCompleted {
                reason: TerminationReason::HumanInput,
            }));

        assert_eq!(t.prepare_resume(None), Err(ThreadError::ResponseRequired));

        let resumed = t.prepare_resume(Some("Postgres")).unwrap();
        assert_eq!(resumed.len(), t.len());
        match &resumed.last_event().unwrap().kind {
            EventKind::HumanInputReceived { response } => assert_eq!(response, "Postgres"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            resumed.events()[resumed.len() - 2].event_type(),
            EventType::HumanInputRequested
        );
    }

    #[test]
    fn resume_drops_paused_marker_only() {
        let paused = thread().append(ev(EventKind::ThreadCompleted {
            reason: TerminationReason::Paused,
        }));
        let resumed = paused.prepare_resume(None).unwrap();
        assert_eq!(resumed.len(), 1);

        let done = thread().append(ev(EventKind::ThreadCompleted {
            reason: TerminationReason::AllPassed,
        }));
        assert_eq!(done.prepare_resume(Some("ignored")).unwrap(), done);
    }

    #[test]
    fn validation_rejects_bad_shapes() {
        assert_eq!(Thread::from_events(vec![]), Err(ThreadError::Empty));
        let err = Thread::from_events(vec![started(1)]).unwrap_err();
        assert_eq!(err, ThreadError::NotStarted("iteration_started".into()));

        let json = serde_json::json!({"schema": "other.v2", "events": []});
        let t: Thread = serde_json::from_value(json).unwrap();
        assert!(matches!(t.validate(), Err(ThreadError::UnsupportedSchema { .. })));
    }

    #[test]
    fn thread_json_roundtrip_keeps_order() {
        let t = thread().append(started(1)).append(completed(1, "US-001", true));
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains(r#""schema":"ralph.thread.v1""#));
        let back: Thread = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
