//! End-to-end tests for the `ralph` binary.
//!
//! Each test works in a fresh temp directory with shell-script agents and
//! real shell quality gates. Commits are disabled so git is not required.

#![cfg(unix)]

use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};

const STATE_DIR: &str = ".ralph";

// ── Helpers ──────────────────────────────────────────────────────────────

fn ralph(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ralph"))
        .args(args)
        .current_dir(dir)
        .env_remove("RALPH_MAX_ITERATIONS")
        .env_remove("RALPH_AGENT")
        .env_remove("RALPH_AGENT_COMMAND")
        .env_remove("RALPH_STATE_DIR")
        .env_remove("RALPH_CONFIG")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to launch ralph")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn write_config(dir: &Path, body: &str) {
    std::fs::create_dir_all(dir.join(STATE_DIR)).unwrap();
    std::fs::write(dir.join(STATE_DIR).join("config.toml"), body).unwrap();
}

fn write_prd(dir: &Path, ids: &[&str]) {
    let stories: Vec<Value> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            serde_json::json!({
                "id": id,
                "title": format!("Story {id}"),
                "description": "",
                "acceptanceCriteria": ["it works"],
                "priority": i + 1,
                "passes": false
            })
        })
        .collect();
    let prd = serde_json::json!({ "project": "e2e", "stories": stories });
    std::fs::create_dir_all(dir.join(STATE_DIR)).unwrap();
    std::fs::write(
        dir.join(STATE_DIR).join("prd.json"),
        serde_json::to_string_pretty(&prd).unwrap(),
    )
    .unwrap();
}

fn config(agent_command: &str, gate_command: &str, max_iterations: u32) -> String {
    format!(
        r#"max_iterations = {max_iterations}
inter_iteration_delay_ms = 0
commit_on_pass = false

[agent]
name = "script"
command = '''{agent_command}'''

[[quality_gates]]
name = "check"
command = '''{gate_command}'''
"#
    )
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn last_event(dir: &Path) -> Value {
    let thread = read_json(&dir.join(STATE_DIR).join("thread.json"));
    thread["events"].as_array().unwrap().last().unwrap().clone()
}

fn termination_reason(dir: &Path) -> String {
    let event = last_event(dir);
    assert_eq!(event["type"], "thread_completed");
    event["data"]["reason"].as_str().unwrap().to_string()
}

fn passes(dir: &Path) -> Vec<bool> {
    let prd = read_json(&dir.join(STATE_DIR).join("prd.json"));
    prd["stories"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["passes"].as_bool().unwrap())
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[test]
fn run_passes_every_story_through_real_gates() {
    let dir = tempfile::tempdir().unwrap();
    write_prd(dir.path(), &["US-001", "US-002"]);
    write_config(
        dir.path(),
        &config(
            "cat > last_prompt.txt && echo built > artifact.txt",
            "test -f artifact.txt",
            5,
        ),
    );

    let output = ralph(dir.path(), &["run"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Run finished: all_passed"));

    assert_eq!(termination_reason(dir.path()), "all_passed");
    assert_eq!(passes(dir.path()), vec![true, true]);

    // The agent saw the second story last
    let prompt = std::fs::read_to_string(dir.path().join("last_prompt.txt")).unwrap();
    assert!(prompt.contains("US-002 - Story US-002"));
    assert!(prompt.contains("<thread-context"));

    let progress = std::fs::read_to_string(dir.path().join(STATE_DIR).join("progress.txt")).unwrap();
    assert_eq!(progress.matches("## Iteration ").count(), 2);
    assert!(progress.contains("Gates: check PASS"));

    let state = read_json(&dir.path().join(STATE_DIR).join("state.json"));
    assert_eq!(state["status"], "completed");
    assert_eq!(state["completed_iterations"], 2);
}

#[test]
fn failing_gate_exhausts_the_budget() {
    let dir = tempfile::tempdir().unwrap();
    write_prd(dir.path(), &["US-001"]);
    write_config(dir.path(), &config("cat > /dev/null", "exit 3", 2));

    let output = ralph(dir.path(), &["run"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    assert_eq!(termination_reason(dir.path()), "max_iterations");
    let progress = std::fs::read_to_string(dir.path().join(STATE_DIR).join("progress.txt")).unwrap();
    assert_eq!(progress.matches("Result: FAILED").count(), 2);
    assert!(progress.contains("Gates: check FAIL"));
}

#[test]
fn cli_max_iterations_overrides_config() {
    let dir = tempfile::tempdir().unwrap();
    write_prd(dir.path(), &["US-001"]);
    write_config(dir.path(), &config("cat > /dev/null", "false", 5));

    let output = ralph(dir.path(), &["run", "--max-iterations", "1"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let state = read_json(&dir.path().join(STATE_DIR).join("state.json"));
    assert_eq!(state["completed_iterations"], 1);
    assert_eq!(state["termination_reason"], "max_iterations");
}

#[test]
fn human_input_pauses_and_resume_answers() {
    let dir = tempfile::tempdir().unwrap();
    write_prd(dir.path(), &["US-001"]);
    let agent = "if grep -q SQLite; then echo ok; \
                 else echo '<request-input>Which database?</request-input>'; fi";
    write_config(dir.path(), &config(agent, "true", 5));

    let output = ralph(dir.path(), &["run"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Which database?"));
    assert_eq!(termination_reason(dir.path()), "human_input");

    let status = ralph(dir.path(), &["status"]);
    assert!(status.status.success());
    assert!(stdout(&status).contains("Waiting for input: Which database?"));

    // An unfinished run is not clobbered
    let again = ralph(dir.path(), &["run"]);
    assert!(!again.status.success());
    assert!(stderr(&again).contains("--fresh"));

    // A response is required
    let missing = ralph(dir.path(), &["resume"]);
    assert!(!missing.status.success());

    let resumed = ralph(dir.path(), &["resume", "--response", "Use SQLite"]);
    assert!(resumed.status.success(), "stderr: {}", stderr(&resumed));
    assert_eq!(termination_reason(dir.path()), "all_passed");
    assert_eq!(passes(dir.path()), vec![true]);

    // Finished runs can be replaced without --fresh
    let status = ralph(dir.path(), &["status", "--json"]);
    let snapshot: Value = serde_json::from_slice(&status.stdout).unwrap();
    assert_eq!(snapshot["termination_reason"], "all_passed");
    assert_eq!(snapshot["completed_iterations"], 1);
}

#[test]
fn resume_keeps_mirroring_to_the_custom_prd() {
    let dir = tempfile::tempdir().unwrap();
    write_prd(dir.path(), &["US-001"]);
    let docs = dir.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::rename(dir.path().join(STATE_DIR).join("prd.json"), docs.join("prd.json")).unwrap();

    let agent = "if grep -q Postgres; then echo ok; \
                 else echo '<request-input>Which database?</request-input>'; fi";
    write_config(dir.path(), &config(agent, "true", 5));

    let output = ralph(dir.path(), &["run", "--prd", "docs/prd.json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(termination_reason(dir.path()), "human_input");

    let resumed = ralph(dir.path(), &["resume", "--response", "Use Postgres"]);
    assert!(resumed.status.success(), "stderr: {}", stderr(&resumed));
    assert_eq!(termination_reason(dir.path()), "all_passed");

    let prd = read_json(&docs.join("prd.json"));
    assert_eq!(prd["stories"][0]["passes"], true);
    assert!(!dir.path().join(STATE_DIR).join("prd.json").exists());
}

#[test]
fn fresh_discards_an_unfinished_run() {
    let dir = tempfile::tempdir().unwrap();
    write_prd(dir.path(), &["US-001"]);
    write_config(
        dir.path(),
        &config("echo '<request-input>Ready?</request-input>'", "true", 3),
    );

    assert!(ralph(dir.path(), &["run"]).status.success());
    let first = read_json(&dir.path().join(STATE_DIR).join("state.json"));

    let output = ralph(dir.path(), &["run", "--fresh"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let second = read_json(&dir.path().join(STATE_DIR).join("state.json"));
    assert_ne!(first["run_id"], second["run_id"]);
}

#[test]
fn init_then_status_without_a_run() {
    let dir = tempfile::tempdir().unwrap();

    let output = ralph(dir.path(), &["init"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(dir.path().join(STATE_DIR).join("config.toml").is_file());

    let prd = read_json(&dir.path().join(STATE_DIR).join("prd.json"));
    assert_eq!(prd["stories"][0]["id"], "US-001");

    // Running init twice keeps existing files
    std::fs::write(dir.path().join(STATE_DIR).join("config.toml"), "max_iterations = 4\n").unwrap();
    assert!(ralph(dir.path(), &["init"]).status.success());
    let config = std::fs::read_to_string(dir.path().join(STATE_DIR).join("config.toml")).unwrap();
    assert_eq!(config, "max_iterations = 4\n");

    let status = ralph(dir.path(), &["status"]);
    assert!(status.status.success());
    assert!(stdout(&status).contains("No run found"));
}

#[test]
fn missing_prd_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &config("cat", "true", 1));

    let output = ralph(dir.path(), &["run"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("PRD file not found"));
}

#[test]
fn invalid_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write_prd(dir.path(), &["US-001"]);
    write_config(dir.path(), "max_iterations = 0\n");

    let output = ralph(dir.path(), &["run"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("max_iterations"));
}
