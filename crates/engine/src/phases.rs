//! Multi-agent phase machine helpers layered on the reducer.

use ralph_core::phase::Phase;
use ralph_core::projection::truncate_keep_tail;
use ralph_core::thread::Thread;

/// Per-phase character budget for outputs handed to later phases.
pub const PHASE_CONTEXT_CHARS: usize = 4000;

/// Attempts an advisory phase gets before it is skipped.
pub const ADVISORY_ATTEMPTS: u32 = 2;

/// Latest output of each phase completed in the open iteration, in order of
/// that latest completion, each capped to [`PHASE_CONTEXT_CHARS`].
pub fn prior_phase_outputs(thread: &Thread) -> Vec<(Phase, String)> {
    let mut seen: Vec<Phase> = Vec::new();
    let mut latest: Vec<(Phase, String)> = Vec::new();
    for record in thread.current_iteration_phases().iter().rev() {
        if seen.contains(&record.phase) {
            continue;
        }
        seen.push(record.phase);
        latest.push((
            record.phase,
            truncate_keep_tail(record.stdout, PHASE_CONTEXT_CHARS),
        ));
    }
    latest.reverse();
    latest
}

/// What to do after an advisory phase failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisoryRecovery {
    /// Run the same phase again
    Retry,
    /// Give up on the phase and move on
    Advance(Phase),
}

pub fn recover_advisory_failure(thread: &Thread, failed: Phase) -> AdvisoryRecovery {
    if thread.phase_completion_count(failed) < ADVISORY_ATTEMPTS {
        return AdvisoryRecovery::Retry;
    }
    let executed = thread
        .current_iteration_phases()
        .iter()
        .any(|p| p.phase == Phase::Execute);
    if executed {
        // Jumping back to execute here would loop execute <-> aar
        AdvisoryRecovery::Advance(failed.next().unwrap_or(Phase::IncorporateAar))
    } else {
        AdvisoryRecovery::Advance(Phase::Execute)
    }
}

/// True when `aar` had to run more than once before `incorporate_aar`.
pub fn aar_cycle_repeated(thread: &Thread) -> bool {
    thread.phase_completion_count(Phase::Aar) > 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_core::config::LoopConfig;
    use ralph_core::event::{EventKind, ThreadEvent, ThreadMeta};
    use ralph_core::story::Prd;

    fn open() -> Thread {
        Thread::create(Prd::default(), LoopConfig::default(), ThreadMeta::new(".")).into_appended(
            ThreadEvent::now(EventKind::IterationStarted {
                iteration: 1,
                story_id: "US-001".into(),
                story_title: "T".into(),
            }),
        )
    }

    fn phase_done(thread: Thread, phase: Phase, exit_code: i32, stdout: &str) -> Thread {
        thread.into_appended(ThreadEvent::now(EventKind::PhaseCompleted {
            iteration: 1,
            story_id: "US-001".into(),
            phase,
            role: phase.role(),
            exit_code,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 1,
        }))
    }

    #[test]
    fn prior_outputs_keep_latest_per_phase() {
        let t = phase_done(open(), Phase::Brainstorm, 1, "first try");
        let t = phase_done(t, Phase::Brainstorm, 0, "ideas");
        let t = phase_done(t, Phase::Clarify, 0, "questions");

        let outputs = prior_phase_outputs(&t);
        assert_eq!(
            outputs,
            vec![
                (Phase::Brainstorm, "ideas".to_string()),
                (Phase::Clarify, "questions".to_string())
            ]
        );
    }

    #[test]
    fn prior_outputs_are_capped() {
        let long = format!("{}END", "x".repeat(10_000));
        let t = phase_done(open(), Phase::Plan, 0, &long);
        let outputs = prior_phase_outputs(&t);
        assert!(outputs[0].1.chars().count() <= PHASE_CONTEXT_CHARS + 3);
        assert!(outputs[0].1.ends_with("END"));
    }

    #[test]
    fn advisory_failure_retries_once_then_jumps_to_execute() {
        let t = phase_done(open(), Phase::Clarify, 1, "");
        assert_eq!(recover_advisory_failure(&t, Phase::Clarify), AdvisoryRecovery::Retry);

        let t = phase_done(t, Phase::Clarify, 1, "");
        assert_eq!(
            recover_advisory_failure(&t, Phase::Clarify),
            AdvisoryRecovery::Advance(Phase::Execute)
        );
    }

    #[test]
    fn failed_aar_after_execute_moves_forward() {
        let t = phase_done(open(), Phase::Execute, 0, "done");
        let t = phase_done(t, Phase::Aar, 1, "");
        let t = phase_done(t, Phase::Aar, 1, "");
        assert_eq!(
            recover_advisory_failure(&t, Phase::Aar),
            AdvisoryRecovery::Advance(Phase::IncorporateAar)
        );
        assert!(aar_cycle_repeated(&t));
    }
}
