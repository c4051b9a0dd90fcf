//! Lifecycle states.

use serde::{Deserialize, Serialize};

/// State of a `ComposableTask`.
///
/// State transitions:
/// - Pending -> Completed
/// - Pending -> Failed
///
/// Completed and Failed are terminal; a second completion is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// No result yet (queued, running, or waiting on an upstream task).
    Pending,

    /// Finished with a value.
    Completed,

    /// Finished with a captured `TaskError`.
    Failed,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }
}
