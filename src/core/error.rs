//! Task error types.
//!
//! Every failure aborts the current invocation and surfaces to the caller
//! unchanged. Nothing here is retried; [`TaskError::is_transient`] only tells
//! the caller which failures are worth retrying.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while staging or running a task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The archive download failed (transport error, timeout or non-2xx status).
    #[error("failed to fetch archive for {repo}: {message}")]
    Fetch {
        repo: String,
        status: Option<u16>,
        message: String,
    },

    /// The archive response did not declare a filename.
    #[error("archive response for {repo} has no content-disposition filename")]
    ArchiveMetadata { repo: String },

    /// The archive payload is corrupt, unsupported or unsafe to extract.
    #[error("invalid archive '{filename}': {message}")]
    ArchiveFormat { filename: String, message: String },

    /// The workspace directory could not be prepared or written.
    #[error("workspace '{path}' unavailable: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The shell subprocess could not be spawned.
    #[error("failed to launch '{shell}': {source}")]
    Launch {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the subprocess output failed.
    #[error("failed to capture process output: {0}")]
    Capture(#[source] std::io::Error),

    /// The subprocess ran but exited with a non-zero code.
    #[error("command exited with code {code}")]
    NonZeroExit {
        code: i32,
        /// Captured stderr, kept only when stderr reporting is enabled.
        stderr: Option<String>,
        /// Last non-empty stdout line.
        last_output: Option<String>,
    },

    /// The subprocess was cancelled after exceeding its timeout.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),
}

impl TaskError {
    /// Stable snake_case name of the error kind, for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Fetch { .. } => "fetch",
            TaskError::ArchiveMetadata { .. } => "archive_metadata",
            TaskError::ArchiveFormat { .. } => "archive_format",
            TaskError::Workspace { .. } => "workspace",
            TaskError::Launch { .. } => "launch",
            TaskError::Capture(_) => "capture",
            TaskError::NonZeroExit { .. } => "non_zero_exit",
            TaskError::Timeout(_) => "timeout",
        }
    }

    /// Exit code of the subprocess, if it ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TaskError::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if this error is worth retrying by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Fetch { .. } | TaskError::Timeout(_))
    }

    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TaskError::Workspace {
            path: path.into(),
            source,
        }
    }
}
