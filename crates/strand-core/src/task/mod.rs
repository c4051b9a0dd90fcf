//! Composable tasks: deferred results that can be chained without blocking.
//!
//! A `ComposableTask<T>` is a cheap handle (an `Arc`) onto a completion
//! cell. Every combinator registers a continuation on the upstream cell and
//! returns a new downstream task whose completer is owned by that
//! continuation. Failures travel down the chain untouched until a
//! `recover` absorbs them or a `wait` surfaces them.
//!
//! ```ignore
//! let total = pool
//!     .submit(async { Ok::<_, BoxError>(3) })?
//!     .combine(&pool.submit(async { Ok::<_, BoxError>(4) })?, |a, b| a + b)
//!     .map(|n| n * 10);
//! assert_eq!(total.wait().await?, 70);
//! ```

mod cell;
mod combine;

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

pub(crate) use self::cell::Completer;
use self::cell::{Cell, Outcome, guarded};
use crate::domain::{BoxError, TaskError, TaskState};

/// Handle onto a deferred result. Cloning shares the same result.
pub struct ComposableTask<T>
where
    T: Clone + Send + 'static,
{
    cell: Arc<Cell<T>>,
}

impl<T> Clone for ComposableTask<T>
where
    T: Clone + Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for ComposableTask<T>
where
    T: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposableTask")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> ComposableTask<T>
where
    T: Clone + Send + 'static,
{
    /// A pending task plus the completer that resolves it.
    pub(crate) fn pending(runtime: Option<Handle>) -> (Self, Completer<T>) {
        let cell = Arc::new(Cell::new(runtime));
        let completer = Completer::new(Arc::clone(&cell));
        (Self { cell }, completer)
    }

    /// An already-completed task.
    ///
    /// Continuations registered on it are scheduled on the current Tokio
    /// runtime, or on a helper thread when called outside any runtime.
    pub fn completed(value: T) -> Self {
        Self::resolved(Ok(value))
    }

    /// An already-failed task. Same scheduling as `completed`.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        Self::resolved(Err(TaskError::failed(err)))
    }

    fn resolved(outcome: Outcome<T>) -> Self {
        let (task, completer) = Self::pending(Handle::try_current().ok());
        completer.complete(outcome);
        task
    }

    fn derive<U>(&self) -> (ComposableTask<U>, Completer<U>)
    where
        U: Clone + Send + 'static,
    {
        ComposableTask::pending(self.cell.runtime())
    }

    /// Current state, without waiting.
    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    /// `true` once the task is Completed or Failed.
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// The result if the task is terminal, without waiting.
    pub fn try_result(&self) -> Option<Result<T, TaskError>> {
        self.cell.outcome()
    }

    /// Transform the value once it is available. `f` is never called if the
    /// task fails; the failure is passed on unchanged.
    pub fn map<U, F>(&self, f: F) -> ComposableTask<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (task, completer) = self.derive::<U>();
        self.cell.register(Box::new(move |outcome| {
            let next = match outcome {
                Ok(value) => guarded(move || f(value)),
                Err(err) => Err(err),
            };
            completer.complete(next);
        }));
        task
    }

    /// Run a side effect with the value. Same failure rule as `map`.
    pub fn consume<F>(&self, f: F) -> ComposableTask<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.map(f)
    }

    /// Replace a failure with `f(error)`. A success passes through.
    pub fn recover<F>(&self, f: F) -> ComposableTask<T>
    where
        F: FnOnce(TaskError) -> T + Send + 'static,
    {
        let (task, completer) = self.derive::<T>();
        self.cell.register(Box::new(move |outcome| {
            let next = match outcome {
                Ok(value) => Ok(value),
                Err(err) => {
                    tracing::debug!(error = %err, "recovering failed task");
                    guarded(move || f(err))
                }
            };
            completer.complete(next);
        }));
        task
    }

    /// Chain a step that itself produces a task. The result follows the
    /// inner task.
    pub fn and_then<U, F>(&self, f: F) -> ComposableTask<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> ComposableTask<U> + Send + 'static,
    {
        let (task, completer) = self.derive::<U>();
        self.cell.register(Box::new(move |outcome| {
            let inner = match outcome.and_then(|value| guarded(move || f(value))) {
                Ok(inner) => inner,
                Err(err) => {
                    completer.complete(Err(err));
                    return;
                }
            };
            inner
                .cell
                .register(Box::new(move |outcome| completer.complete(outcome)));
        }));
        task
    }

    /// Join with `other`. `f` runs once, after both sides succeed.
    ///
    /// Fails with `TaskError::Combine` on the first failure observed: a left
    /// failure resolves immediately, a right failure as soon as the left
    /// side is known. If both sides fail the left one is reported.
    pub fn combine<U, V, F>(&self, other: &ComposableTask<U>, f: F) -> ComposableTask<V>
    where
        U: Clone + Send + 'static,
        V: Clone + Send + 'static,
        F: FnOnce(T, U) -> V + Send + 'static,
    {
        combine::combine(self, other, f)
    }

    /// Suspend until the task is terminal.
    ///
    /// Cancel-safe: dropping the future (e.g. under `tokio::time::timeout`)
    /// leaves nothing behind for long; the stale registration is pruned on
    /// the next `wait`.
    pub async fn wait(&self) -> Result<T, TaskError> {
        self.cell
            .waiter()
            .await
            .unwrap_or(Err(TaskError::Abandoned))
    }

    /// Block the current thread until the task is terminal.
    ///
    /// For callers outside the runtime. Calling this from inside an async
    /// context panics (it would stall a runtime thread); use `wait` there.
    pub fn wait_blocking(&self) -> Result<T, TaskError> {
        self.cell
            .waiter()
            .blocking_recv()
            .unwrap_or(Err(TaskError::Abandoned))
    }
}
