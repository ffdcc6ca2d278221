use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single `git` invocation.
///
/// Callers on the recency path never surface these: they log and treat the
/// source as empty.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("failed to spawn git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("git {command} exited with status {status}: {stderr}")]
    Exit {
        command: String,
        status: i32,
        stderr: String,
    },
}

/// Errors that can occur while starting the change watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to create watcher: {0}")]
    Create(#[from] notify::Error),

    #[error("failed to watch path {path}: {source}")]
    WatchPath {
        path: PathBuf,
        source: notify::Error,
    },

    #[error("no repositories to watch")]
    NothingToWatch,
}

/// Rejections from [`crate::fs::resolve_path`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid path")]
    Empty,
    #[error("invalid path: contains a null byte")]
    NullByte,
    #[error("absolute paths not allowed")]
    Absolute,
    #[error("access to the .git directory is not allowed")]
    ControlDirectory,
    #[error("path traversal detected")]
    Traversal,
}
