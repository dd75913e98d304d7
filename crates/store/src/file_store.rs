//! File-backed thread store.
//!
//! Layout inside the state directory (default `.ralph/`):
//!
//! - `thread.json`: the full thread, rewritten atomically after every append
//! - `state.json`: derived snapshot for tooling that predates the event log
//! - `progress.txt`: append-only transcript, one block per completed iteration
//!
//! The PRD mirror goes to `prd.json` in the state directory unless another
//! path is set with [`FileThreadStore::with_prd_path`].

use async_trait::async_trait;
use ralph_core::error::StoreError;
use ralph_core::port::ThreadStore;
use ralph_core::projection::{derive_iterations, format_iteration_block, snapshot_state};
use ralph_core::story::Prd;
use ralph_core::thread::Thread;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const THREAD_FILE: &str = "thread.json";
const STATE_FILE: &str = "state.json";
const PROGRESS_FILE: &str = "progress.txt";
const PRD_FILE: &str = "prd.json";

const ITERATION_HEADER: &str = "## Iteration ";

pub struct FileThreadStore {
    state_dir: PathBuf,
    prd_path: PathBuf,
}

impl FileThreadStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        let prd_path = state_dir.join(PRD_FILE);
        Self {
            state_dir,
            prd_path,
        }
    }

    /// Mirror the PRD to `path` instead of `<state_dir>/prd.json`.
    pub fn with_prd_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.prd_path = path.into();
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn thread_path(&self) -> PathBuf {
        self.state_dir.join(THREAD_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.state_dir.join(PROGRESS_FILE)
    }

    pub fn prd_path(&self) -> &Path {
        &self.prd_path
    }

    /// Append blocks for iterations completed since the last save.
    ///
    /// Each run gets its own `# Ralph run <id>` header; blocks already written
    /// under the current run's header are counted and skipped.
    async fn append_progress(&self, thread: &Thread) -> Result<(), StoreError> {
        let Some((_, _, meta)) = thread.started() else {
            return Ok(());
        };
        let completed: Vec<_> = derive_iterations(thread)
            .into_iter()
            .filter(|r| r.is_complete())
            .collect();

        let path = self.progress_path();
        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_error(&path, e)),
        };

        let run_header = format!("# Ralph run {}", meta.run_id);
        let (mut out, written) = match existing.rfind(&run_header) {
            Some(pos) => {
                let written = existing[pos..]
                    .lines()
                    .filter(|line| line.starts_with(ITERATION_HEADER))
                    .count();
                (String::new(), written)
            }
            None => (format!("{run_header}\n\n"), 0),
        };
        if completed.len() <= written {
            return Ok(());
        }

        for result in &completed[written..] {
            out.push_str(&format_iteration_block(result));
            out.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.write_all(out.as_bytes())
            .await
            .map_err(|e| io_error(&path, e))?;
        file.flush().await.map_err(|e| io_error(&path, e))?;

        debug!(
            path = %path.display(),
            appended = completed.len() - written,
            "Progress transcript updated"
        );
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for FileThreadStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self) -> Result<Option<Thread>, StoreError> {
        let path = self.thread_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        let thread: Thread =
            serde_json::from_str(&content).map_err(|e| StoreError::Malformed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        thread.validate().map_err(|e| StoreError::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        debug!(path = %path.display(), events = thread.len(), "Thread loaded");
        Ok(Some(thread))
    }

    async fn save(&self, thread: &Thread) -> Result<(), StoreError> {
        write_json_atomic(&self.thread_path(), thread).await?;

        // Mirrors are derived; a failure here must not lose the thread itself
        if let Err(e) = write_json_atomic(&self.state_path(), &snapshot_state(thread)).await {
            warn!(error = %e, "Failed to write state snapshot");
        }
        if let Err(e) = self.append_progress(thread).await {
            warn!(error = %e, "Failed to append progress transcript");
        }
        Ok(())
    }

    async fn write_prd(&self, prd: &Prd) -> Result<(), StoreError> {
        write_json_atomic(&self.prd_path, prd).await?;
        debug!(
            path = %self.prd_path.display(),
            passed = prd.passed_count(),
            total = prd.stories.len(),
            "PRD mirror written"
        );
        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Write pretty JSON to a temp file in the same directory, then rename it
/// over `path`.
async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| StoreError::Serialize(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, json.as_bytes())
        .await
        .map_err(|e| io_error(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_core::config::LoopConfig;
    use ralph_core::event::{EventKind, ThreadEvent, ThreadMeta};
    use ralph_core::story::Story;
    use tempfile::TempDir;

    fn sample_thread() -> Thread {
        let prd = Prd {
            project: "demo".into(),
            description: String::new(),
            stories: vec![Story {
                id: "US-001".into(),
                title: "Login".into(),
                description: String::new(),
                acceptance_criteria: vec![],
                priority: 1,
                passes: false,
                notes: None,
            }],
        };
        Thread::create(prd, LoopConfig::default(), ThreadMeta::new("/tmp/work"))
    }

    fn complete_iteration(thread: Thread, n: u32, passed: bool) -> Thread {
        thread
            .into_appended(ThreadEvent::now(EventKind::IterationStarted {
                iteration: n,
                story_id: "US-001".into(),
                story_title: "Login".into(),
            }))
            .into_appended(ThreadEvent::now(EventKind::IterationCompleted {
                iteration: n,
                story_id: "US-001".into(),
                all_gates_passed: passed,
                committed: false,
                story_passed: passed,
            }))
    }

    #[tokio::test]
    async fn missing_thread_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = FileThreadStore::new(dir.path().join(".ralph"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileThreadStore::new(dir.path().join(".ralph"));
        let thread = complete_iteration(sample_thread(), 1, false);

        store.save(&thread).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, thread);

        // No temp file left behind
        assert!(!dir.path().join(".ralph/thread.json.tmp").exists());
        assert!(store.state_path().exists());
    }

    #[tokio::test]
    async fn thread_json_has_schema_and_tagged_events() {
        let dir = TempDir::new().unwrap();
        let store = FileThreadStore::new(dir.path());
        store.save(&sample_thread()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.thread_path()).unwrap()).unwrap();
        assert_eq!(raw["schema"], "ralph.thread.v1");
        assert_eq!(raw["events"][0]["type"], "thread_started");
        assert!(raw["events"][0]["data"]["prd"].is_object());
        assert!(raw["events"][0]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn malformed_thread_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileThreadStore::new(dir.path());
        std::fs::write(store.thread_path(), "{not json").unwrap();
        assert!(matches!(
            store.load().await,
            Err(StoreError::Malformed { .. })
        ));

        std::fs::write(
            store.thread_path(),
            r#"{"schema": "ralph.thread.v1", "events": []}"#,
        )
        .unwrap();
        assert!(matches!(
            store.load().await,
            Err(StoreError::Malformed { .. })
        ));

        std::fs::write(
            store.thread_path(),
            r#"{"schema": "other.v9", "events": []}"#,
        )
        .unwrap();
        assert!(matches!(
            store.load().await,
            Err(StoreError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn progress_only_appends_new_blocks() {
        let dir = TempDir::new().unwrap();
        let store = FileThreadStore::new(dir.path());

        let t1 = complete_iteration(sample_thread(), 1, false);
        store.save(&t1).await.unwrap();
        store.save(&t1).await.unwrap();

        let t2 = complete_iteration(t1, 2, true);
        store.save(&t2).await.unwrap();

        let progress = std::fs::read_to_string(store.progress_path()).unwrap();
        assert_eq!(progress.matches("## Iteration ").count(), 2);
        assert_eq!(progress.matches("# Ralph run ").count(), 1);
        assert!(progress.contains("## Iteration 1 - US-001: Login"));
        assert!(progress.contains("## Iteration 2 - US-001: Login"));
    }

    #[tokio::test]
    async fn progress_counts_blocks_not_header_text() {
        let dir = TempDir::new().unwrap();
        let store = FileThreadStore::new(dir.path());
        let title = "Render ## Iteration headers\n## Iteration 9 - fake";

        let started = |n: u32| {
            ThreadEvent::now(EventKind::IterationStarted {
                iteration: n,
                story_id: "US-001".into(),
                story_title: title.into(),
            })
        };
        let failed = |n: u32| {
            ThreadEvent::now(EventKind::IterationCompleted {
                iteration: n,
                story_id: "US-001".into(),
                all_gates_passed: false,
                committed: false,
                story_passed: false,
            })
        };

        let t1 = sample_thread().into_appended(started(1)).into_appended(failed(1));
        store.save(&t1).await.unwrap();
        let t2 = t1.into_appended(started(2)).into_appended(failed(2));
        store.save(&t2).await.unwrap();
        store.save(&t2).await.unwrap();

        let progress = std::fs::read_to_string(store.progress_path()).unwrap();
        let blocks = progress
            .lines()
            .filter(|line| line.starts_with("## Iteration "))
            .count();
        assert_eq!(blocks, 2);
        assert!(progress.contains("## Iteration 2 - US-001: Render ## Iteration headers ## Iteration 9 - fake"));
    }

    #[tokio::test]
    async fn progress_keeps_earlier_runs() {
        let dir = TempDir::new().unwrap();
        let store = FileThreadStore::new(dir.path());

        store
            .save(&complete_iteration(sample_thread(), 1, false))
            .await
            .unwrap();
        store
            .save(&complete_iteration(sample_thread(), 1, true))
            .await
            .unwrap();

        let progress = std::fs::read_to_string(store.progress_path()).unwrap();
        assert_eq!(progress.matches("# Ralph run ").count(), 2);
        assert_eq!(progress.matches("## Iteration 1 ").count(), 2);
    }

    #[tokio::test]
    async fn prd_mirror_respects_custom_path() {
        let dir = TempDir::new().unwrap();
        let prd_path = dir.path().join("docs/prd.json");
        let store = FileThreadStore::new(dir.path().join(".ralph")).with_prd_path(&prd_path);

        let thread = sample_thread();
        let (prd, _, _) = thread.started().unwrap();
        store.write_prd(&prd.with_passed(["US-001"])).await.unwrap();

        let written = Prd::load(&prd_path).unwrap();
        assert!(written.all_passed());
    }
}
