//! Error types for the Ralph domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use std::path::PathBuf;
use thiserror::Error;

/// What the dispatch loop can fail with. Runner failures are recorded as
/// events instead.
#[derive(Debug, Error)]
pub enum Error {
    // --- Thread errors ---
    #[error("Thread error: {0}")]
    Thread(#[from] ThreadError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Structural problems with an event thread.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ThreadError {
    #[error("Unsupported thread schema: {found} (expected {expected})")]
    UnsupportedSchema { found: String, expected: String },

    #[error("Thread has no events")]
    Empty,

    #[error("Thread must begin with thread_started, found {0}")]
    NotStarted(String),

    #[error("Thread is waiting for human input; supply a response to resume")]
    ResponseRequired,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Malformed thread file at {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Serialization failed: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    #[error("Failed to spawn `{command}`: {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("I/O failure while running `{command}`: {reason}")]
    Io { command: String, reason: String },

    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("Commit failed: {0}")]
    CommitFailed(String),
}

#[derive(Debug, Error)]
pub enum PrdError {
    #[error("PRD file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read PRD at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse PRD at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("PRD has no stories")]
    NoStories,
}
