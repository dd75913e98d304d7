//! Subcommand implementations and the wiring they share.

pub mod init;
pub mod resume;
pub mod run;
pub mod status;

use anyhow::Context;
use ralph_config::AppConfig;
use ralph_core::event::{EventBus, EventKind, TerminationReason, ThreadEvent};
use ralph_core::projection::current_prd;
use ralph_core::thread::Thread;
use ralph_engine::{DispatchLoop, RunOutcome};
use ralph_store::FileThreadStore;
use ralph_tools::{GitCommitter, ShellAgentRunner, ShellGateRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// The loaded configuration and the directory the run operates on.
pub struct Workspace {
    pub config: AppConfig,
    pub root: PathBuf,
}

impl Workspace {
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let root = std::env::current_dir().context("Cannot determine the working directory")?;
        let config = AppConfig::load(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
        Ok(Self { config, root })
    }

    /// `path` relative to the workspace root (absolute paths pass through).
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    pub fn prd_path(&self) -> PathBuf {
        self.resolve(&self.config.paths.prd)
    }

    pub fn store(&self, prd_path: &Path) -> FileThreadStore {
        FileThreadStore::new(self.resolve(&self.config.paths.state_dir)).with_prd_path(prd_path)
    }

    /// Drive `thread` to a terminal state. Ctrl-C pauses at the next
    /// iteration boundary.
    pub async fn drive(&self, store: FileThreadStore, thread: Thread) -> anyhow::Result<RunOutcome> {
        let mut agent = ShellAgentRunner::new().with_echo(self.config.runner.echo_output);
        if let Some(secs) = self.config.runner.agent_timeout_secs {
            agent = agent.with_timeout(Duration::from_secs(secs));
        }

        let bus = Arc::new(EventBus::default());
        let reporter = tokio::spawn(report_progress(bus.subscribe()));

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received; pausing after the current iteration");
                    cancel.cancel();
                }
            })
        };

        let result = DispatchLoop::new(
            Arc::new(agent),
            Arc::new(ShellGateRunner::new()),
            Arc::new(GitCommitter::new()),
            Arc::new(store),
            self.root.clone(),
        )
        .with_event_bus(bus)
        .with_cancel(cancel)
        .run(thread)
        .await;

        interrupt.abort();
        // The loop (and with it the bus sender) is gone, so the reporter drains and exits
        let _ = reporter.await;

        let outcome = result.context("Run aborted")?;
        print_outcome(&outcome);
        Ok(outcome)
    }
}

/// True when the persisted run can still be resumed.
pub fn is_unfinished(thread: &Thread) -> bool {
    match thread.last_event().map(|e| &e.kind) {
        Some(EventKind::ThreadCompleted { reason }) => {
            matches!(reason, TerminationReason::Paused | TerminationReason::HumanInput)
        }
        _ => true,
    }
}

async fn report_progress(mut events: broadcast::Receiver<Arc<ThreadEvent>>) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event.kind),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Progress output fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_event(kind: &EventKind) {
    match kind {
        EventKind::IterationStarted {
            iteration,
            story_id,
            story_title,
        } => println!("\n▶ Iteration {iteration}: {story_id} - {story_title}"),
        EventKind::PhaseStarted {
            phase,
            agent,
            attempt,
            ..
        } => println!("  ↳ {phase} ({agent}, attempt {attempt})"),
        EventKind::GateCompleted { name, passed, .. } => {
            let mark = if *passed { "✅" } else { "❌" };
            println!("  {mark} gate {name}");
        }
        EventKind::CommitCompleted { sha, .. } => {
            let short: String = sha.chars().take(8).collect();
            println!("  📝 Committed {short}");
        }
        EventKind::StoryPassed { story_id, .. } => println!("✅ {story_id} passed"),
        EventKind::IterationCompleted {
            iteration,
            story_passed: false,
            ..
        } => println!("⚠️  Iteration {iteration} failed"),
        EventKind::Error {
            context, message, ..
        } => println!("❌ {context}: {message}"),
        _ => {}
    }
}

fn print_outcome(outcome: &RunOutcome) {
    let prd = current_prd(&outcome.thread);
    println!("\n🏁 Run finished: {}", outcome.reason);
    println!("   Stories passed: {}/{}", prd.passed_count(), prd.stories.len());
    println!("   Iterations:     {}", outcome.thread.completed_iteration_count());

    match outcome.reason {
        TerminationReason::HumanInput => {
            if let Some(request) = outcome.thread.last_human_input_request() {
                println!("\n❓ {}", request.prompt);
                println!("   Answer with: ralph resume --response \"...\"");
            }
        }
        TerminationReason::Paused => println!("   Continue with: ralph resume"),
        _ => {}
    }
}
