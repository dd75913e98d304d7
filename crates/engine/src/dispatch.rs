//! The dispatch loop, the only place side effects happen.
//!
//! Each turn: ask the reducer for an [`Intent`], perform its one effect,
//! append the resulting event(s), persist after every append. Effect failures
//! become `error` events; only persistence failures escape.

use ralph_core::config::LoopConfig;
use ralph_core::error::Result;
use ralph_core::event::{EventBus, EventKind, HumanInputReason, TerminationReason, ThreadEvent};
use ralph_core::phase::Phase;
use ralph_core::port::{AgentInvocation, AgentRunner, Committer, GateRunner, ThreadStore};
use ralph_core::projection::{current_config, current_prd};
use ralph_core::thread::{OpenIteration, Thread};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::intent::{AgentTask, Intent};
use crate::prompt::PromptBuilder;
use crate::reducer::determine_next_step;

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub thread: Thread,
    pub reason: TerminationReason,
}

/// Drives a thread to a terminal state.
pub struct DispatchLoop {
    agent: Arc<dyn AgentRunner>,
    gates: Arc<dyn GateRunner>,
    committer: Arc<dyn Committer>,
    store: Arc<dyn ThreadStore>,

    /// Directory the agent, gates, and git run in
    working_dir: PathBuf,

    /// Observers of appended events
    event_bus: Option<Arc<EventBus>>,

    /// Checked only at iteration boundaries
    cancel: CancellationToken,
}

impl DispatchLoop {
    pub fn new(
        agent: Arc<dyn AgentRunner>,
        gates: Arc<dyn GateRunner>,
        committer: Arc<dyn Committer>,
        store: Arc<dyn ThreadStore>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            agent,
            gates,
            committer,
            store,
            working_dir: working_dir.into(),
            event_bus: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Publish every appended event to `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Use `token` as the pause signal.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A handle that pauses the run at the next iteration boundary.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until the reducer says `complete`.
    ///
    /// `thread` may be fresh or resumed; it is persisted before the first step.
    /// A thread that fails validation is refused without touching the store.
    pub async fn run(&self, thread: Thread) -> Result<RunOutcome> {
        thread.validate()?;
        let config = current_config(&thread);
        let prompts = PromptBuilder::new(&config);
        let mut thread = thread;
        self.store.save(&thread).await?;

        info!(
            store = self.store.name(),
            events = thread.len(),
            max_iterations = config.max_iterations,
            multi_agent = config.is_multi_agent(),
            "Dispatch loop started"
        );

        loop {
            let intent = determine_next_step(&thread, &config);
            debug!(intent = intent.kind(), "Next step");

            thread = match intent {
                Intent::RunAgent(task) => {
                    if task.begins_iteration {
                        thread = self.close_dangling_iteration(thread).await?;
                        if thread.completed_iteration_count() > 0 {
                            self.pause_between_iterations(config.inter_iteration_delay_ms)
                                .await;
                        }
                        if self.cancel.is_cancelled() {
                            info!("Pause requested; stopping at iteration boundary");
                            return self.finish(thread, TerminationReason::Paused).await;
                        }
                        thread = self.begin_iteration(thread, &task).await?;
                    }
                    self.run_agent(thread, &config, &prompts, task).await?
                }

                Intent::RunGate {
                    iteration,
                    story_id: _,
                    gate_index,
                } => self.run_gate(thread, &config, iteration, gate_index).await?,

                Intent::Commit {
                    iteration,
                    story_id,
                } => self.commit(thread, iteration, story_id).await?,

                Intent::MarkPassed {
                    iteration,
                    story_id,
                    committed,
                } => self.mark_passed(thread, iteration, story_id, committed).await?,

                Intent::RequestHumanInput {
                    iteration,
                    story_id,
                    reason,
                    prompt,
                    phase,
                } => {
                    self.request_human_input(thread, iteration, story_id, reason, prompt, phase)
                        .await?
                }

                Intent::WaitDelay {
                    iteration,
                    story_id,
                    failure,
                } => {
                    warn!(iteration, story = %story_id, failure = %failure, "Iteration failed");
                    let committed = thread.current_iteration_committed();
                    self.append(
                        thread,
                        EventKind::IterationCompleted {
                            iteration,
                            story_id,
                            all_gates_passed: false,
                            committed,
                            story_passed: false,
                        },
                    )
                    .await?
                }

                Intent::Complete { reason } => return self.finish(thread, reason).await,
            };
        }
    }

    /// Append, persist, then publish.
    async fn append(&self, thread: Thread, kind: EventKind) -> Result<Thread> {
        let event = ThreadEvent::now(kind);
        let thread = thread.into_appended(event.clone());
        self.store.save(&thread).await?;
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
        Ok(thread)
    }

    async fn finish(&self, thread: Thread, reason: TerminationReason) -> Result<RunOutcome> {
        if let Some(EventKind::ThreadCompleted { reason: persisted }) =
            thread.last_event().map(|e| &e.kind)
        {
            let reason = *persisted;
            return Ok(RunOutcome { thread, reason });
        }
        let thread = if matches!(
            thread.last_event().map(|e| &e.kind),
            Some(EventKind::StoryPassed { .. })
        ) {
            self.close_dangling_iteration(thread).await?
        } else {
            thread
        };
        let thread = self
            .append(thread, EventKind::ThreadCompleted { reason })
            .await?;
        info!(
            reason = %reason,
            iterations = thread.completed_iteration_count(),
            "Run finished"
        );
        Ok(RunOutcome { thread, reason })
    }

    /// Close an iteration left open by a crash, keeping a recorded pass.
    async fn close_dangling_iteration(&self, thread: Thread) -> Result<Thread> {
        let Some(OpenIteration {
            iteration,
            story_id,
        }) = thread.open_iteration()
        else {
            return Ok(thread);
        };
        let story_passed = thread
            .current_iteration_events()
            .iter()
            .any(|e| matches!(e.kind, EventKind::StoryPassed { .. }));
        let all_gates_passed = story_passed && thread.current_iteration_gates_passed();
        let committed = thread.current_iteration_committed();

        warn!(iteration, story = %story_id, story_passed, "Closing interrupted iteration");
        self.append(
            thread,
            EventKind::IterationCompleted {
                iteration,
                story_id,
                all_gates_passed,
                committed,
                story_passed,
            },
        )
        .await
    }

    async fn pause_between_iterations(&self, delay_ms: u64) {
        if delay_ms == 0 {
            return;
        }
        debug!(delay_ms, "Waiting before next iteration");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            _ = self.cancel.cancelled() => {
                debug!("Delay interrupted by pause");
            }
        }
    }

    async fn begin_iteration(&self, thread: Thread, task: &AgentTask) -> Result<Thread> {
        let story_title = current_prd(&thread)
            .story(&task.story_id)
            .map(|s| s.title.clone())
            .unwrap_or_default();
        info!(
            iteration = task.iteration,
            story = %task.story_id,
            title = %story_title,
            "Starting iteration"
        );
        self.append(
            thread,
            EventKind::IterationStarted {
                iteration: task.iteration,
                story_id: task.story_id.clone(),
                story_title,
            },
        )
        .await
    }

    async fn run_agent(
        &self,
        thread: Thread,
        config: &LoopConfig,
        prompts: &PromptBuilder,
        task: AgentTask,
    ) -> Result<Thread> {
        let prd = current_prd(&thread);
        let Some(story) = prd.story(&task.story_id).cloned() else {
            return self
                .append(
                    thread,
                    EventKind::Error {
                        iteration: Some(task.iteration),
                        context: "dispatch".into(),
                        message: format!("story {} is not in the PRD", task.story_id),
                        recoverable: false,
                    },
                )
                .await;
        };

        let role = task.phase.as_ref().map(|p| p.role);
        let agent = config.agent_for(role);
        let command = agent.resolved_command();

        let started = match &task.phase {
            Some(phase) => EventKind::PhaseStarted {
                iteration: task.iteration,
                story_id: task.story_id.clone(),
                phase: phase.phase,
                role: phase.role,
                agent: agent.name.clone(),
                attempt: phase.attempt,
            },
            None => EventKind::AgentDispatched {
                iteration: task.iteration,
                story_id: task.story_id.clone(),
                agent: agent.name.clone(),
                command: command.clone(),
            },
        };
        let thread = self.append(thread, started).await?;

        let mut env = BTreeMap::from([
            ("RALPH_ITERATION".to_string(), task.iteration.to_string()),
            ("RALPH_STORY_ID".to_string(), task.story_id.clone()),
            ("RALPH_MAX_ITERATIONS".to_string(), config.max_iterations.to_string()),
        ]);
        if let Some(phase) = &task.phase {
            env.insert("RALPH_PHASE".into(), phase.phase.as_str().into());
            env.insert("RALPH_ROLE".into(), phase.role.as_str().into());
        }

        let invocation = AgentInvocation {
            command,
            prompt: prompts.build(&thread, &prd, &story, &task),
            working_dir: self.working_dir.clone(),
            env,
            capabilities: config.capabilities.clone(),
        };

        info!(
            iteration = task.iteration,
            story = %task.story_id,
            agent = %agent.name,
            phase = task.phase.as_ref().map(|p| p.phase.as_str()).unwrap_or("-"),
            "Dispatching agent"
        );

        let kind = match self.agent.run_agent(&invocation).await {
            Ok(output) => match &task.phase {
                Some(phase) => EventKind::PhaseCompleted {
                    iteration: task.iteration,
                    story_id: task.story_id.clone(),
                    phase: phase.phase,
                    role: phase.role,
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration_ms: output.duration_ms,
                },
                None => EventKind::AgentCompleted {
                    iteration: task.iteration,
                    story_id: task.story_id.clone(),
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration_ms: output.duration_ms,
                },
            },
            Err(e) => {
                warn!(error = %e, "Agent invocation failed");
                EventKind::Error {
                    iteration: Some(task.iteration),
                    context: match &task.phase {
                        Some(phase) => format!("phase:{}", phase.phase),
                        None => "agent".into(),
                    },
                    message: e.to_string(),
                    recoverable: true,
                }
            }
        };
        self.append(thread, kind).await
    }

    async fn run_gate(
        &self,
        thread: Thread,
        config: &LoopConfig,
        iteration: u32,
        gate_index: usize,
    ) -> Result<Thread> {
        let Some(gate) = config.quality_gates.get(gate_index).cloned() else {
            return self
                .append(
                    thread,
                    EventKind::Error {
                        iteration: Some(iteration),
                        context: "gate".into(),
                        message: format!("no quality gate at index {gate_index}"),
                        recoverable: false,
                    },
                )
                .await;
        };

        let thread = self
            .append(
                thread,
                EventKind::GateStarted {
                    iteration,
                    gate_index,
                    name: gate.name.clone(),
                },
            )
            .await?;

        let kind = match self.gates.run_shell(&gate.command, &self.working_dir).await {
            Ok(output) => {
                let passed = output.success();
                info!(gate = %gate.name, passed, exit_code = output.exit_code, "Gate finished");
                EventKind::GateCompleted {
                    iteration,
                    gate_index,
                    name: gate.name.clone(),
                    passed,
                    exit_code: output.exit_code,
                    output: output.combined(),
                    continue_on_fail: gate.continue_on_fail,
                    duration_ms: output.duration_ms,
                }
            }
            Err(e) => {
                warn!(gate = %gate.name, error = %e, "Gate could not run");
                EventKind::Error {
                    iteration: Some(iteration),
                    context: format!("gate:{}", gate.name),
                    message: e.to_string(),
                    recoverable: true,
                }
            }
        };
        self.append(thread, kind).await
    }

    async fn commit(&self, thread: Thread, iteration: u32, story_id: String) -> Result<Thread> {
        let prd = current_prd(&thread);
        let title = prd
            .story(&story_id)
            .map(|s| s.title.as_str())
            .unwrap_or_default();
        let message = format!("feat: {story_id} - {title}");

        match self.committer.commit(&self.working_dir, &message).await {
            Ok(sha) => {
                self.store
                    .write_prd(&prd.with_passed([story_id.as_str()]))
                    .await?;
                info!(story = %story_id, sha = %sha, "Story committed");
                self.append(
                    thread,
                    EventKind::CommitCompleted {
                        iteration,
                        story_id,
                        sha,
                        message,
                    },
                )
                .await
            }
            Err(e) => {
                warn!(story = %story_id, error = %e, "Commit failed");
                self.append(
                    thread,
                    EventKind::Error {
                        iteration: Some(iteration),
                        context: "commit".into(),
                        message: e.to_string(),
                        recoverable: true,
                    },
                )
                .await
            }
        }
    }

    async fn mark_passed(
        &self,
        thread: Thread,
        iteration: u32,
        story_id: String,
        committed: bool,
    ) -> Result<Thread> {
        let prd = current_prd(&thread).with_passed([story_id.as_str()]);
        self.store.write_prd(&prd).await?;

        let all_gates_passed = thread.current_iteration_gates_passed();
        let thread = self
            .append(
                thread,
                EventKind::StoryPassed {
                    iteration,
                    story_id: story_id.clone(),
                    committed,
                },
            )
            .await?;
        info!(
            story = %story_id,
            passed = prd.passed_count(),
            total = prd.stories.len(),
            "Story passed"
        );
        self.append(
            thread,
            EventKind::IterationCompleted {
                iteration,
                story_id,
                all_gates_passed,
                committed,
                story_passed: true,
            },
        )
        .await
    }

    async fn request_human_input(
        &self,
        thread: Thread,
        iteration: u32,
        story_id: String,
        reason: HumanInputReason,
        prompt: String,
        phase: Option<Phase>,
    ) -> Result<Thread> {
        info!(story = %story_id, ?reason, "Waiting for human input: {prompt}");
        self.append(
            thread,
            EventKind::HumanInputRequested {
                iteration,
                story_id,
                reason,
                prompt,
                phase,
            },
        )
        .await
    }
}
