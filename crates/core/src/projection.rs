//! Derived state: pure functions over a thread's events.
//!
//! Nothing here is stored; every view is recomputed from the event list.
//! At the expected scale (tens of iterations) a full rescan per call is cheap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::config::LoopConfig;
use crate::event::{EventKind, TerminationReason};
use crate::phase::Phase;
use crate::story::Prd;
use crate::thread::Thread;

/// The base PRD with every story that has a `story_passed` event marked as passing.
pub fn current_prd(thread: &Thread) -> Prd {
    let Some((prd, _, _)) = thread.started() else {
        return Prd::default();
    };
    prd.with_passed(thread.passed_story_ids())
}

/// The configuration captured at `thread_started`.
pub fn current_config(thread: &Thread) -> LoopConfig {
    thread
        .started()
        .map(|(_, config, _)| config.clone())
        .unwrap_or_default()
}

/// One gate run inside an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub passed: bool,
    pub exit_code: i32,
    pub output: String,
    pub continue_on_fail: bool,
}

/// Everything that happened between `iteration_started` and `iteration_completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationResult {
    pub iteration: u32,
    pub story_id: String,
    pub story_title: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Exit code of the last agent or phase run in the span
    pub exit_code: Option<i32>,

    /// Stdout of the last agent or phase run in the span
    pub agent_output: Option<String>,

    pub phases: Vec<Phase>,
    pub gates: Vec<GateResult>,
    pub committed: bool,
    pub commit_sha: Option<String>,
    pub all_gates_passed: bool,
    pub story_passed: bool,
    pub errors: Vec<String>,
}

impl IterationResult {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Build one result per iteration span. A trailing open span is included
/// with `completed_at = None`.
pub fn derive_iterations(thread: &Thread) -> Vec<IterationResult> {
    let mut results = Vec::new();
    let mut current: Option<IterationResult> = None;

    for event in thread.events() {
        match &event.kind {
            EventKind::IterationStarted {
                iteration,
                story_id,
                story_title,
            } => {
                if let Some(open) = current.take() {
                    results.push(open);
                }
                current = Some(IterationResult {
                    iteration: *iteration,
                    story_id: story_id.clone(),
                    story_title: story_title.clone(),
                    started_at: event.timestamp,
                    completed_at: None,
                    exit_code: None,
                    agent_output: None,
                    phases: vec![],
                    gates: vec![],
                    committed: false,
                    commit_sha: None,
                    all_gates_passed: false,
                    story_passed: false,
                    errors: vec![],
                });
            }
            kind => {
                let Some(result) = current.as_mut() else {
                    continue;
                };
                match kind {
                    EventKind::AgentCompleted {
                        exit_code, stdout, ..
                    } => {
                        result.exit_code = Some(*exit_code);
                        result.agent_output = Some(stdout.clone());
                    }
                    EventKind::PhaseCompleted {
                        phase,
                        exit_code,
                        stdout,
                        ..
                    } => {
                        result.phases.push(*phase);
                        result.exit_code = Some(*exit_code);
                        result.agent_output = Some(stdout.clone());
                    }
                    EventKind::GateCompleted {
                        name,
                        passed,
                        exit_code,
                        output,
                        continue_on_fail,
                        ..
                    } => result.gates.push(GateResult {
                        name: name.clone(),
                        passed: *passed,
                        exit_code: *exit_code,
                        output: output.clone(),
                        continue_on_fail: *continue_on_fail,
                    }),
                    EventKind::CommitCompleted { sha, .. } => {
                        result.committed = true;
                        result.commit_sha = Some(sha.clone());
                    }
                    EventKind::Error { message, .. } => result.errors.push(message.clone()),
                    EventKind::IterationCompleted {
                        all_gates_passed,
                        committed,
                        story_passed,
                        ..
                    } => {
                        result.completed_at = Some(event.timestamp);
                        result.all_gates_passed = *all_gates_passed;
                        result.committed |= *committed;
                        result.story_passed = *story_passed;
                        if let Some(done) = current.take() {
                            results.push(done);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(open) = current {
        results.push(open);
    }
    results
}

/// Render one completed iteration as a transcript block.
pub fn format_iteration_block(result: &IterationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "## Iteration {} - {}: {}",
        result.iteration,
        result.story_id,
        one_line(&result.story_title)
    );
    let _ = writeln!(out, "Started: {}", result.started_at.to_rfc3339());
    if let Some(done) = result.completed_at {
        let _ = writeln!(out, "Completed: {}", done.to_rfc3339());
    }
    if !result.phases.is_empty() {
        let phases: Vec<&str> = result.phases.iter().map(|p| p.as_str()).collect();
        let _ = writeln!(out, "Phases: {}", phases.join(" -> "));
    }
    match result.exit_code {
        Some(code) => {
            let _ = writeln!(out, "Agent exit code: {code}");
        }
        None => {
            let _ = writeln!(out, "Agent exit code: n/a");
        }
    }
    if !result.gates.is_empty() {
        let gates: Vec<String> = result
            .gates
            .iter()
            .map(|g| format!("{} {}", g.name, if g.passed { "PASS" } else { "FAIL" }))
            .collect();
        let _ = writeln!(out, "Gates: {}", gates.join(", "));
    }
    if let Some(sha) = &result.commit_sha {
        let _ = writeln!(out, "Commit: {sha}");
    }
    for error in &result.errors {
        let _ = writeln!(out, "Error: {}", one_line(error));
    }
    let _ = writeln!(
        out,
        "Result: {}",
        if result.story_passed { "PASSED" } else { "FAILED" }
    );
    out.push_str("---\n");
    out
}

/// Keeps every block header at the start of its own line.
fn one_line(text: &str) -> String {
    text.lines().map(str::trim).collect::<Vec<_>>().join(" ")
}

/// Human-readable log with one block per completed iteration.
pub fn progress_transcript(thread: &Thread) -> String {
    derive_iterations(thread)
        .iter()
        .filter(|r| r.is_complete())
        .map(format_iteration_block)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Bounds for [`serialize_for_prompt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptContextOptions {
    pub max_iterations: usize,
    pub max_errors: usize,
    pub max_failure_chars: usize,
}

impl Default for PromptContextOptions {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_errors: 6,
            max_failure_chars: 500,
        }
    }
}

/// Keep at most `max` characters, dropping the oldest (leading) ones.
pub fn truncate_keep_tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max).collect();
    format!("...{tail}")
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Bounded XML-like summary of recent history for agent context.
///
/// Totals are always written next to the shown counts, so truncated history
/// is explicit.
pub fn serialize_for_prompt(thread: &Thread, opts: &PromptContextOptions) -> String {
    let iterations: Vec<IterationResult> = derive_iterations(thread)
        .into_iter()
        .filter(|r| r.is_complete())
        .collect();
    let errors: Vec<(Option<u32>, &str, &str, bool)> = thread
        .events()
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::Error {
                iteration,
                context,
                message,
                recoverable,
            } => Some((*iteration, context.as_str(), message.as_str(), *recoverable)),
            _ => None,
        })
        .collect();

    let shown_iterations = &iterations[iterations.len().saturating_sub(opts.max_iterations)..];
    let shown_errors = &errors[errors.len().saturating_sub(opts.max_errors)..];

    let mut out = String::new();
    let _ = writeln!(
        out,
        "<thread-context iterations_total=\"{}\" iterations_shown=\"{}\" errors_total=\"{}\" errors_shown=\"{}\">",
        iterations.len(),
        shown_iterations.len(),
        errors.len(),
        shown_errors.len()
    );

    for result in shown_iterations {
        let _ = writeln!(
            out,
            "  <iteration n=\"{}\" story=\"{}\" result=\"{}\">",
            result.iteration,
            escape_xml(&result.story_id),
            if result.story_passed { "passed" } else { "failed" }
        );
        for gate in &result.gates {
            if gate.passed {
                let _ = writeln!(out, "    <gate name=\"{}\" passed=\"true\"/>", escape_xml(&gate.name));
            } else {
                let _ = writeln!(
                    out,
                    "    <gate name=\"{}\" passed=\"false\">{}</gate>",
                    escape_xml(&gate.name),
                    escape_xml(&truncate_keep_tail(&gate.output, opts.max_failure_chars))
                );
            }
        }
        if !result.story_passed && result.gates.iter().all(|g| g.passed) {
            if let (Some(code), Some(output)) = (result.exit_code, &result.agent_output) {
                if code != 0 {
                    let _ = writeln!(
                        out,
                        "    <agent exit_code=\"{code}\">{}</agent>",
                        escape_xml(&truncate_keep_tail(output, opts.max_failure_chars))
                    );
                }
            }
        }
        if let Some(sha) = &result.commit_sha {
            let _ = writeln!(out, "    <commit sha=\"{}\"/>", escape_xml(sha));
        }
        out.push_str("  </iteration>\n");
    }

    if !shown_errors.is_empty() {
        out.push_str("  <errors>\n");
        for (iteration, context, message, recoverable) in shown_errors {
            let iteration = iteration.map(|i| i.to_string()).unwrap_or_default();
            let _ = writeln!(
                out,
                "    <error iteration=\"{iteration}\" context=\"{}\" recoverable=\"{recoverable}\">{}</error>",
                escape_xml(context),
                escape_xml(&truncate_keep_tail(message, opts.max_failure_chars))
            );
        }
        out.push_str("  </errors>\n");
    }

    out.push_str("</thread-context>");
    out
}

/// The legacy `state.json` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub run_id: String,
    pub prd: Prd,
    pub config: LoopConfig,
    pub iterations: Vec<IterationResult>,
    pub current_iteration: u32,
    pub completed_iterations: u32,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
}

/// Project the thread into the backward-compatible snapshot.
///
/// The termination reason is the one persisted on `thread_completed`.
pub fn snapshot_state(thread: &Thread) -> StateSnapshot {
    let first = thread.events().first().map(|e| e.timestamp).unwrap_or_else(Utc::now);
    let last = thread.last_event().map(|e| e.timestamp).unwrap_or(first);
    let run_id = thread
        .started()
        .map(|(_, _, meta)| meta.run_id.clone())
        .unwrap_or_default();

    let termination = thread.last_event().and_then(|e| match &e.kind {
        EventKind::ThreadCompleted { reason } => Some((*reason, e.timestamp)),
        _ => None,
    });

    StateSnapshot {
        run_id,
        prd: current_prd(thread),
        config: current_config(thread),
        iterations: derive_iterations(thread),
        current_iteration: thread.current_iteration_number(),
        completed_iterations: thread.completed_iteration_count(),
        status: if termination.is_some() {
            RunStatus::Completed
        } else {
            RunStatus::Running
        },
        termination_reason: termination.map(|(reason, _)| reason),
        started_at: first,
        updated_at: last,
        completed_at: termination.map(|(_, at)| at),
    }
}
