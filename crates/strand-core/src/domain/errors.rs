//! Error taxonomy.
//!
//! - `PoolError`: rejected at the pool boundary (submission, construction).
//! - `TaskError`: a task's captured failure. Carried as a value in the
//!   task's terminal state and only surfaced at `wait`.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error accepted from user tasks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors returned at the pool boundary.
#[derive(Debug, Error)]
pub enum PoolError {
    /// `submit` after shutdown was requested.
    #[error("pool is closed: no new tasks are accepted after shutdown")]
    PoolClosed,

    /// `PoolConfig::validate` rejected the config.
    #[error("invalid pool config: {0}")]
    InvalidConfig(String),

    /// `WorkerPool::new` called outside a Tokio runtime.
    #[error("no tokio runtime available to host the pool")]
    NoRuntime,
}

/// Which input of a `combine` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// Failure captured from a task or a continuation.
///
/// `Clone` because one failure fans out to every continuation registered on
/// the failed task.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task returned an error. The original error is kept intact.
    #[error("task failed: {0}")]
    Failed(Arc<dyn StdError + Send + Sync + 'static>),

    /// The task (or a continuation) panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// One input of a `combine` failed.
    #[error("{side} side of combine failed: {source}")]
    Combine { side: Side, source: Box<TaskError> },

    /// The producer went away without completing the task.
    #[error("task was dropped before it completed")]
    Abandoned,
}

impl TaskError {
    /// Wrap a user error.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        TaskError::Failed(Arc::from(err.into()))
    }

    /// Build from a panic payload (as returned by `catch_unwind` or a
    /// `JoinError`).
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(msg)
    }

    /// Downcast the original error of a `Failed`, looking through
    /// `Combine` wrappers.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            TaskError::Failed(inner) => inner.downcast_ref::<E>(),
            TaskError::Combine { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// The innermost error, with `Combine` wrappers removed.
    pub fn root(&self) -> &TaskError {
        match self {
            TaskError::Combine { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn failed_keeps_original_error() {
        let err = TaskError::failed(DiskFull);
        assert!(err.downcast_ref::<DiskFull>().is_some());
        assert_eq!(err.to_string(), "task failed: disk full");
    }

    #[test]
    fn failed_accepts_plain_strings() {
        let err = TaskError::failed("boom");
        assert_eq!(err.to_string(), "task failed: boom");
    }

    #[test]
    fn combine_names_the_side_and_keeps_root() {
        let err = TaskError::Combine {
            side: Side::Right,
            source: Box::new(TaskError::failed(DiskFull)),
        };
        assert_eq!(err.to_string(), "right side of combine failed: task failed: disk full");
        assert!(err.downcast_ref::<DiskFull>().is_some());
        assert!(matches!(err.root(), TaskError::Failed(_)));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = TaskError::from_panic(Box::new("static str"));
        assert!(matches!(err, TaskError::Panicked(ref m) if m == "static str"));

        let err = TaskError::from_panic(Box::new(String::from("owned")));
        assert!(matches!(err, TaskError::Panicked(ref m) if m == "owned"));

        let err = TaskError::from_panic(Box::new(42_u32));
        assert!(matches!(err, TaskError::Panicked(_)));
    }
}
