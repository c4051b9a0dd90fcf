//! Shared completion cell behind every `ComposableTask`.
//!
//! The cell is a small state machine (pending -> completed | failed) plus a
//! FIFO of continuations. Whoever transitions the cell drains the FIFO on
//! its own thread of control. A continuation registered after the
//! transition is never run by the registering caller: it is appended to the
//! FIFO, and if no drain is in progress one is scheduled elsewhere (on the
//! runtime, or on a helper thread when there is no runtime).
//! A single drain at a time keeps continuations in registration order.
//!
//! Completing a downstream cell from inside a continuation does not drain
//! it on the spot: drains are flattened through a per-thread queue, so a
//! chain of any length runs in constant stack depth.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::domain::{TaskError, TaskState};

pub(crate) type Outcome<T> = Result<T, TaskError>;
pub(crate) type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

type Drain = Box<dyn FnOnce() + 'static>;

thread_local! {
    /// Drains waiting for the outermost drain loop on this thread.
    /// `None` when no drain loop is running here.
    static DEFERRED: RefCell<Option<VecDeque<Drain>>> = const { RefCell::new(None) };
}

/// Run `drain` now, or hand it to the drain loop already running on this
/// thread.
fn run_flat(drain: Drain) {
    let first = DEFERRED.with(|deferred| {
        let mut deferred = deferred.borrow_mut();
        match deferred.as_mut() {
            Some(queue) => {
                queue.push_back(drain);
                None
            }
            None => {
                *deferred = Some(VecDeque::new());
                Some(drain)
            }
        }
    });
    let Some(first) = first else {
        return;
    };

    let _loop = OutermostLoop;
    first();
    while let Some(next) =
        DEFERRED.with(|deferred| deferred.borrow_mut().as_mut().and_then(VecDeque::pop_front))
    {
        next();
    }
}

/// Clears the per-thread queue when the outermost loop exits.
struct OutermostLoop;

impl Drop for OutermostLoop {
    fn drop(&mut self) {
        DEFERRED.with(|deferred| *deferred.borrow_mut() = None);
    }
}

struct Slot<T> {
    outcome: Option<Outcome<T>>,
    continuations: VecDeque<Continuation<T>>,
    /// `wait` callers. Kept apart from continuations so abandoned waits
    /// can be pruned.
    waiters: Vec<oneshot::Sender<Outcome<T>>>,
    draining: bool,
}

pub(crate) struct Cell<T> {
    slot: Mutex<Slot<T>>,
    /// Where post-completion drains are scheduled. `None` outside a runtime,
    /// in which case a helper thread drains.
    runtime: Option<Handle>,
}

impl<T> Cell<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(runtime: Option<Handle>) -> Self {
        Self {
            slot: Mutex::new(Slot {
                outcome: None,
                continuations: VecDeque::new(),
                waiters: Vec::new(),
                draining: false,
            }),
            runtime,
        }
    }

    /// Runtime handle inherited by derived tasks.
    pub(crate) fn runtime(&self) -> Option<Handle> {
        self.runtime.clone()
    }

    // A panicking continuation is caught in `drain`, so the lock is never
    // held across user code; recovering from poison is safe.
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> TaskState {
        match &self.lock().outcome {
            None => TaskState::Pending,
            Some(Ok(_)) => TaskState::Completed,
            Some(Err(_)) => TaskState::Failed,
        }
    }

    /// Copy of the outcome, if terminal.
    pub(crate) fn outcome(&self) -> Option<Outcome<T>> {
        self.lock().outcome.clone()
    }

    /// Transition to a terminal state, wake waiters and run pending
    /// continuations. Returns `false` if the cell was already terminal (the
    /// new outcome is discarded).
    pub(crate) fn complete(self: &Arc<Self>, outcome: Outcome<T>) -> bool {
        let (waiters, drain) = {
            let mut slot = self.lock();
            if slot.outcome.is_some() {
                return false;
            }
            slot.outcome = Some(outcome.clone());
            let drain = !slot.draining && !slot.continuations.is_empty();
            if drain {
                slot.draining = true;
            }
            (std::mem::take(&mut slot.waiters), drain)
        };

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        if drain {
            Arc::clone(self).drain_flat();
        }
        true
    }

    /// Register a continuation. Never invokes it inline.
    pub(crate) fn register(self: &Arc<Self>, continuation: Continuation<T>) {
        {
            let mut slot = self.lock();
            slot.continuations.push_back(continuation);
            if slot.outcome.is_none() || slot.draining {
                return;
            }
            slot.draining = true;
        }

        let cell = Arc::clone(self);
        match &self.runtime {
            Some(handle) => {
                handle.spawn(async move { cell.drain_flat() });
            }
            None => {
                let fallback = Arc::clone(self);
                let spawned = std::thread::Builder::new()
                    .name("strand-drain".to_string())
                    .spawn(move || cell.drain_flat());
                if let Err(err) = spawned {
                    tracing::warn!(error = %err, "no drain thread available, draining in caller");
                    fallback.drain_flat();
                }
            }
        }
    }

    /// Receiver resolved with the outcome. Resolved at once if the cell is
    /// already terminal. Senders whose receiver was dropped (an abandoned
    /// `wait`) are pruned on every call.
    pub(crate) fn waiter(&self) -> oneshot::Receiver<Outcome<T>> {
        let (tx, rx) = oneshot::channel();
        let mut slot = self.lock();
        if let Some(outcome) = &slot.outcome {
            let _ = tx.send(outcome.clone());
            return rx;
        }
        slot.waiters.retain(|waiter| !waiter.is_closed());
        slot.waiters.push(tx);
        rx
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.lock().waiters.len()
    }

    fn drain_flat(self: Arc<Self>) {
        run_flat(Box::new(move || self.drain()));
    }

    fn drain(&self) {
        loop {
            let (continuation, outcome) = {
                let mut slot = self.lock();
                let Some(continuation) = slot.continuations.pop_front() else {
                    slot.draining = false;
                    return;
                };
                let Some(outcome) = slot.outcome.clone() else {
                    // draining is only set once an outcome exists
                    slot.continuations.push_front(continuation);
                    slot.draining = false;
                    return;
                };
                (continuation, outcome)
            };

            if catch_unwind(AssertUnwindSafe(move || continuation(outcome))).is_err() {
                tracing::warn!("continuation panicked outside of a guarded transform");
            }
        }
    }
}

/// Write side of a cell. Dropping it without completing fails the task with
/// `TaskError::Abandoned`.
pub(crate) struct Completer<T>
where
    T: Clone + Send + 'static,
{
    cell: Option<Arc<Cell<T>>>,
}

impl<T> Completer<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(cell: Arc<Cell<T>>) -> Self {
        Self { cell: Some(cell) }
    }

    pub(crate) fn complete(mut self, outcome: Outcome<T>) {
        if let Some(cell) = self.cell.take() {
            cell.complete(outcome);
        }
    }
}

impl<T> Drop for Completer<T>
where
    T: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.complete(Err(TaskError::Abandoned));
        }
    }
}

/// Run a user transform, turning a panic into `TaskError::Panicked`.
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> Outcome<R> {
    catch_unwind(AssertUnwindSafe(f)).map_err(TaskError::from_panic)
}
