//! `ralph status`: show the persisted run.

use ralph_core::event::TerminationReason;
use ralph_core::port::ThreadStore;
use ralph_core::projection::{PromptContextOptions, RunStatus, serialize_for_prompt, snapshot_state};

use super::Workspace;

pub async fn run(config_path: &std::path::Path, json: bool) -> anyhow::Result<()> {
    let workspace = Workspace::load(config_path)?;
    let store = workspace.store(&workspace.prd_path());

    let Some(thread) = store.load().await? else {
        println!("No run found in {}", store.state_dir().display());
        println!("Start one with `ralph run`.");
        return Ok(());
    };
    let snapshot = snapshot_state(&thread);

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("🦀 Ralph Status");
    println!("==============");
    println!("  Run:          {}", snapshot.run_id);
    println!("  Project:      {}", snapshot.prd.project);
    match (snapshot.status, snapshot.termination_reason) {
        (RunStatus::Completed, Some(reason)) => println!("  Status:       finished ({reason})"),
        _ => println!("  Status:       running"),
    }
    println!(
        "  Iterations:   {} completed of {}",
        snapshot.completed_iterations, snapshot.config.max_iterations
    );
    if let Some(last) = thread.last_event() {
        println!("  Last event:   {} at {}", last.event_type().as_str(), last.timestamp);
    }

    println!("\n  Stories:");
    for story in &snapshot.prd.stories {
        let mark = if story.passes { "✅" } else { "⬜" };
        println!("    {mark} {} - {} (priority {})", story.id, story.title, story.priority);
    }

    if !snapshot.iterations.is_empty() {
        println!("\n  Iterations:");
        for it in &snapshot.iterations {
            let result = match (it.is_complete(), it.story_passed) {
                (false, _) => "in progress",
                (true, true) => "passed",
                (true, false) => "failed",
            };
            println!("    #{} {} {result}", it.iteration, it.story_id);
        }
    }

    if snapshot.termination_reason == Some(TerminationReason::HumanInput) {
        if let Some(request) = thread.last_human_input_request() {
            println!("\n  ❓ Waiting for input: {}", request.prompt);
            println!("     Answer with: ralph resume --response \"...\"");
        }
    } else if snapshot.termination_reason == Some(TerminationReason::Paused) {
        println!("\n  Paused. Continue with: ralph resume");
    }

    println!("\n  Prompt context:");
    println!("{}", serialize_for_prompt(&thread, &PromptContextOptions::default()));
    Ok(())
}
