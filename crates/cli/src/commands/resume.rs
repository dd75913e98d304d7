//! `ralph resume`: continue a paused run or answer a pending question.

use anyhow::{Context, bail};
use ralph_core::port::ThreadStore;

use super::{Workspace, is_unfinished};

pub async fn run(config_path: &std::path::Path, response: Option<String>) -> anyhow::Result<()> {
    let workspace = Workspace::load(config_path)?;
    let store = workspace.store(&workspace.prd_path());

    let Some(thread) = store.load().await? else {
        bail!("No run found in {}. Start one with `ralph run`.", store.state_dir().display());
    };

    // Keep mirroring to the PRD the run was started with
    let prd_path = thread
        .started()
        .and_then(|(_, _, meta)| meta.prd_path.clone())
        .unwrap_or_else(|| workspace.prd_path());
    let store = workspace.store(&prd_path);
    if !is_unfinished(&thread) {
        println!("Nothing to resume: the last run has already finished.");
        return Ok(());
    }

    let thread = thread
        .prepare_resume(response.as_deref())
        .context("Cannot resume; answer the pending question with --response")?;
    workspace.drive(store, thread).await?;
    Ok(())
}
