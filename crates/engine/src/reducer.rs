//! The reducer, a pure transition table keyed on the thread's last event.
//!
//! `determine_next_step` never performs I/O and never reads the clock, so the
//! same event sequence always yields the same [`Intent`].

use ralph_core::config::LoopConfig;
use ralph_core::event::{EventKind, HumanInputReason, TerminationReason};
use ralph_core::markers::{detect_human_input_request, has_completion_signal};
use ralph_core::phase::Phase;
use ralph_core::projection::current_prd;
use ralph_core::thread::Thread;

use crate::intent::{AgentTask, Intent, PhaseTask};
use crate::phases::{AdvisoryRecovery, aar_cycle_repeated, prior_phase_outputs, recover_advisory_failure};

/// First words that turn an approval response into a rejection.
const REJECTION_WORDS: [&str; 7] = ["no", "nope", "reject", "rejected", "deny", "denied", "decline"];

/// Decide the next action for `thread`.
pub fn determine_next_step(thread: &Thread, config: &LoopConfig) -> Intent {
    let Some(last) = thread.last_event() else {
        return continue_run(thread, config, None);
    };

    match &last.kind {
        EventKind::ThreadStarted { .. } => continue_run(thread, config, None),

        EventKind::IterationStarted {
            iteration,
            story_id,
            ..
        } => run_agent(thread, config, *iteration, story_id, false, Phase::first(), None),

        EventKind::AgentCompleted {
            iteration,
            story_id,
            exit_code,
            stdout,
            ..
        } => after_agent(thread, config, *iteration, story_id, *exit_code, stdout),

        EventKind::PhaseCompleted {
            iteration,
            story_id,
            phase,
            exit_code,
            stdout,
            ..
        } => after_phase(thread, config, *iteration, story_id, *phase, *exit_code, stdout),

        EventKind::GateCompleted {
            iteration,
            gate_index,
            name,
            passed,
            exit_code,
            continue_on_fail,
            ..
        } => {
            let story_id = open_story(thread);
            if !passed && !continue_on_fail {
                return Intent::WaitDelay {
                    iteration: *iteration,
                    story_id,
                    failure: format!("gate '{name}' failed with exit code {exit_code}"),
                };
            }
            if gate_index + 1 < config.quality_gates.len() {
                return Intent::RunGate {
                    iteration: *iteration,
                    story_id,
                    gate_index: gate_index + 1,
                };
            }
            approval_chain(config, *iteration, story_id)
        }

        EventKind::CommitCompleted {
            iteration,
            story_id,
            ..
        } => Intent::MarkPassed {
            iteration: *iteration,
            story_id: story_id.clone(),
            committed: true,
        },

        EventKind::StoryPassed { .. } | EventKind::IterationCompleted { .. } => {
            continue_run(thread, config, None)
        }

        EventKind::HumanInputRequested { .. } => Intent::Complete {
            reason: TerminationReason::HumanInput,
        },

        EventKind::HumanInputReceived { response } => after_human_input(thread, config, response),

        EventKind::ThreadCompleted { reason } => Intent::Complete { reason: *reason },

        EventKind::Error { message, .. } => defer(thread, config, message.clone()),
        EventKind::GateStarted { name, .. } => {
            defer(thread, config, format!("interrupted while running gate '{name}'"))
        }
        EventKind::PhaseStarted { phase, .. } => {
            defer(thread, config, format!("interrupted during the {phase} phase"))
        }
        EventKind::AgentDispatched { .. } => {
            defer(thread, config, "interrupted while the agent was running".to_string())
        }
    }
}

/// Check the budget, then pick the next story or finish.
///
/// An iteration left open by a crash is closed before the next one starts, so
/// it counts against the budget too.
fn continue_run(thread: &Thread, config: &LoopConfig, human_response: Option<String>) -> Intent {
    let dangling = u32::from(thread.open_iteration().is_some());
    if thread.completed_iteration_count() + dangling >= config.max_iterations {
        return Intent::Complete {
            reason: TerminationReason::MaxIterations,
        };
    }
    begin_next_story(thread, config, human_response)
}

fn begin_next_story(thread: &Thread, config: &LoopConfig, human_response: Option<String>) -> Intent {
    let prd = current_prd(thread);
    let Some(story) = prd.select_next_story() else {
        return Intent::Complete {
            reason: TerminationReason::AllPassed,
        };
    };

    // A dangling open iteration is closed by the dispatch loop first
    let iteration = match thread.open_iteration() {
        Some(open) => open.iteration + 1,
        None => thread.current_iteration_number(),
    };
    run_agent(thread, config, iteration, &story.id, true, Phase::first(), human_response)
}

fn run_agent(
    thread: &Thread,
    config: &LoopConfig,
    iteration: u32,
    story_id: &str,
    begins_iteration: bool,
    phase: Phase,
    human_response: Option<String>,
) -> Intent {
    let phase = config.is_multi_agent().then(|| {
        if begins_iteration {
            PhaseTask {
                phase,
                role: phase.role(),
                attempt: 1,
                prior_outputs: vec![],
            }
        } else {
            PhaseTask {
                phase,
                role: phase.role(),
                attempt: thread.phase_completion_count(phase) + 1,
                prior_outputs: prior_phase_outputs(thread),
            }
        }
    });

    Intent::RunAgent(AgentTask {
        iteration,
        story_id: story_id.to_string(),
        begins_iteration,
        phase,
        human_response,
    })
}

fn after_agent(
    thread: &Thread,
    config: &LoopConfig,
    iteration: u32,
    story_id: &str,
    exit_code: i32,
    stdout: &str,
) -> Intent {
    if has_completion_signal(stdout) {
        return Intent::Complete {
            reason: TerminationReason::CompletionSignal,
        };
    }
    if let Some(question) = detect_human_input_request(stdout) {
        return Intent::RequestHumanInput {
            iteration,
            story_id: story_id.to_string(),
            reason: HumanInputReason::AgentRequest,
            prompt: question,
            phase: None,
        };
    }
    if exit_code != 0 {
        let failure = format!("agent exited with code {exit_code}");
        return fail_or_escalate(thread, config, iteration, story_id, None, failure);
    }
    work_succeeded(config, iteration, story_id.to_string())
}

/// Fail the iteration, or ask for guidance once the story's failure streak
/// reaches `max_consecutive_failures`.
///
/// `phase` is the execution phase to retry after the operator answers.
fn fail_or_escalate(
    thread: &Thread,
    config: &LoopConfig,
    iteration: u32,
    story_id: &str,
    phase: Option<Phase>,
    failure: String,
) -> Intent {
    let streak = thread.consecutive_failures(story_id);
    if let Some(max) = config.max_consecutive_failures {
        if streak >= max {
            return Intent::RequestHumanInput {
                iteration,
                story_id: story_id.to_string(),
                reason: HumanInputReason::ConsecutiveFailures,
                prompt: format!(
                    "Story {story_id} has failed {} times in a row. \
                     Reply with guidance to retry it.",
                    streak + 1
                ),
                phase,
            };
        }
    }
    Intent::WaitDelay {
        iteration,
        story_id: story_id.to_string(),
        failure,
    }
}

fn after_phase(
    thread: &Thread,
    config: &LoopConfig,
    iteration: u32,
    story_id: &str,
    phase: Phase,
    exit_code: i32,
    stdout: &str,
) -> Intent {
    if let Some(question) = detect_human_input_request(stdout) {
        return Intent::RequestHumanInput {
            iteration,
            story_id: story_id.to_string(),
            reason: HumanInputReason::AgentRequest,
            prompt: question,
            phase: Some(phase),
        };
    }
    if phase.is_execution() && has_completion_signal(stdout) {
        return Intent::Complete {
            reason: TerminationReason::CompletionSignal,
        };
    }

    if exit_code != 0 {
        if phase.is_execution() {
            let failure = format!("{phase} phase exited with code {exit_code}");
            return fail_or_escalate(thread, config, iteration, story_id, Some(phase), failure);
        }
        let next = match recover_advisory_failure(thread, phase) {
            AdvisoryRecovery::Retry => phase,
            AdvisoryRecovery::Advance(next) => next,
        };
        return run_agent(thread, config, iteration, story_id, false, next, None);
    }

    if phase == Phase::IncorporateAar && aar_cycle_repeated(thread) {
        return Intent::RequestHumanInput {
            iteration,
            story_id: story_id.to_string(),
            reason: HumanInputReason::AarReview,
            prompt: format!(
                "The after-action review for {story_id} ran more than once. \
                 Review the changes, then reply to approve or 'reject' to fail the iteration."
            ),
            phase: Some(phase),
        };
    }

    match phase.next() {
        Some(next) => run_agent(thread, config, iteration, story_id, false, next, None),
        None => work_succeeded(config, iteration, story_id.to_string()),
    }
}

/// The agent side of the iteration is done: verify, then commit.
fn work_succeeded(config: &LoopConfig, iteration: u32, story_id: String) -> Intent {
    if config.quality_gates.is_empty() {
        approval_chain(config, iteration, story_id)
    } else {
        Intent::RunGate {
            iteration,
            story_id,
            gate_index: 0,
        }
    }
}

fn approval_chain(config: &LoopConfig, iteration: u32, story_id: String) -> Intent {
    if config.require_approval_before_commit {
        return Intent::RequestHumanInput {
            iteration,
            prompt: format!(
                "Story {story_id} passed verification. \
                 Reply 'yes' to commit it or 'no' to reject."
            ),
            story_id,
            reason: HumanInputReason::ApprovalRequired,
            phase: None,
        };
    }
    commit_chain(config, iteration, story_id)
}

fn commit_chain(config: &LoopConfig, iteration: u32, story_id: String) -> Intent {
    if config.commit_on_pass {
        Intent::Commit {
            iteration,
            story_id,
        }
    } else {
        Intent::MarkPassed {
            iteration,
            story_id,
            committed: false,
        }
    }
}

/// Only the response's first whole word counts, so "now" or "nothing" approve.
fn is_rejection(response: &str) -> bool {
    let Some(first) = response
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
    else {
        return false;
    };
    let first = first.to_lowercase();
    REJECTION_WORDS.contains(&first.as_str())
}

fn after_human_input(thread: &Thread, config: &LoopConfig, response: &str) -> Intent {
    let request = thread.last_human_input_request();
    let Some(open) = thread.open_iteration() else {
        return continue_run(thread, config, Some(response.to_string()));
    };

    match request {
        Some(request) if request.reason.is_approval() => {
            if is_rejection(response) {
                return Intent::WaitDelay {
                    iteration: open.iteration,
                    story_id: open.story_id,
                    failure: format!("rejected by operator: {}", response.trim()),
                };
            }
            match request.reason {
                HumanInputReason::AarReview => {
                    work_succeeded(config, open.iteration, open.story_id)
                }
                _ => commit_chain(config, open.iteration, open.story_id),
            }
        }
        request => {
            let response = Some(response.to_string());
            if !config.is_multi_agent() {
                return run_agent(thread, config, open.iteration, &open.story_id, false, Phase::first(), response);
            }
            let resume_at = match request {
                // Guidance after repeated failures retries the failed phase
                Some(r) if r.reason == HumanInputReason::ConsecutiveFailures => {
                    Some(r.phase.unwrap_or(Phase::first()))
                }
                Some(r) => r.phase.map_or(Some(Phase::first()), Phase::next),
                None => Some(Phase::first()),
            };
            match resume_at {
                Some(phase) => {
                    run_agent(thread, config, open.iteration, &open.story_id, false, phase, response)
                }
                None => work_succeeded(config, open.iteration, open.story_id),
            }
        }
    }
}

/// The caller stopped mid-step: fail the open iteration, or move on if none.
fn defer(thread: &Thread, config: &LoopConfig, failure: String) -> Intent {
    match thread.open_iteration() {
        Some(open) => Intent::WaitDelay {
            iteration: open.iteration,
            story_id: open.story_id,
            failure,
        },
        None => continue_run(thread, config, None),
    }
}

fn open_story(thread: &Thread) -> String {
    thread
        .open_iteration()
        .map(|open| open.story_id)
        .unwrap_or_default()
}
