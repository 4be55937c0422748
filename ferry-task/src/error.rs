//! Error types for ferry-task.

use ferry_core::BoxError;
use thiserror::Error;

/// Outcome of a failed prepare or run.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task is already preparing or running. Not a defect: overlapping
    /// triggers are rejected rather than queued.
    #[error("task is already in progress")]
    InProgress,

    /// The task's own work succeeded but some children ended badly.
    #[error("{failed} children failed")]
    ChildrenFailed { failed: usize },

    /// A child panicked; the fan-out boundary converted it into a failure.
    #[error("recovered from panic: {0}")]
    Panicked(String),

    /// A concurrency slot or join handle was torn down before the work ran.
    #[error("cancelled")]
    Cancelled,

    /// Plain failure message raised by a task body.
    #[error("{0}")]
    Failed(String),

    /// Failure raised by the work itself (storage, sync, ...).
    #[error(transparent)]
    Work(BoxError),
}

impl TaskError {
    /// Wrap any error as a work failure.
    pub fn work(err: impl Into<BoxError>) -> Self {
        TaskError::Work(err.into())
    }

    /// Conflicts are excluded from aggregated failure lists.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TaskError::InProgress)
    }
}
