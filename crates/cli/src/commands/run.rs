//! `ralph run`: start a new run over the PRD.

use anyhow::{Context, bail};
use ralph_core::event::ThreadMeta;
use ralph_core::port::ThreadStore;
use ralph_core::story::Prd;
use ralph_core::thread::Thread;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{Workspace, is_unfinished};

/// Command-line overrides for a new run.
pub struct RunArgs {
    pub prd: Option<PathBuf>,
    pub max_iterations: Option<u32>,
    pub agent: Option<String>,
    pub fresh: bool,
}

pub async fn run(config_path: &Path, args: RunArgs) -> anyhow::Result<()> {
    let mut workspace = Workspace::load(config_path)?;
    if let Some(max) = args.max_iterations {
        workspace.config.max_iterations = max;
    }
    if let Some(agent) = args.agent {
        workspace.config.agent.name = agent;
        workspace.config.agent.command = None;
    }
    workspace.config.validate()?;

    let prd_path = match &args.prd {
        Some(path) => workspace.resolve(path),
        None => workspace.prd_path(),
    };
    let prd = Prd::load(&prd_path)?;

    let store = workspace.store(&prd_path);
    if let Some(existing) = store.load().await? {
        if is_unfinished(&existing) && !args.fresh {
            bail!(
                "An unfinished run exists in {}. Continue it with `ralph resume`, \
                 or pass --fresh to discard it.",
                store.state_dir().display()
            );
        }
        info!(events = existing.len(), "Replacing previous run");
    }

    let loop_config = workspace
        .config
        .to_loop_config(&workspace.root)
        .context("Invalid prompt template")?;

    println!("🦀 Ralph: {}", prd.project);
    println!(
        "   {} stories, {} already passing, up to {} iterations",
        prd.stories.len(),
        prd.passed_count(),
        loop_config.max_iterations
    );

    let meta = ThreadMeta::new(&workspace.root).with_prd_path(&prd_path);
    let thread = Thread::create(prd, loop_config, meta);
    workspace.drive(store, thread).await?;
    Ok(())
}
