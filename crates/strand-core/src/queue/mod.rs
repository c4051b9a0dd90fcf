//! Job queue: the pool's single piece of shared mutable state.
//!
//! - `Job`: a type-erased unit of work plus its id.
//! - `JobQueue`: the port the worker loops lease from.
//! - `InMemoryJobQueue`: FIFO implementation guarded by one mutex.

mod memory;

pub use memory::InMemoryJobQueue;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use serde::{Deserialize, Serialize};

use crate::domain::{PoolError, TaskId};

/// Counters kept by the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Jobs waiting for a worker.
    pub queued: usize,

    /// Jobs leased and not yet finished.
    pub running: usize,

    /// Jobs finished with `JobOutcome::Succeeded`.
    pub completed: usize,

    /// Jobs finished with `JobOutcome::Failed` (or whose lease was dropped).
    pub failed: usize,
}

/// How a job ended, as reported back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The task produced a value.
    Succeeded,

    /// The task returned an error or panicked.
    Failed,
}

/// Type-erased job body: runs the task, publishes its result and reports
/// how it went.
pub type JobFuture = Pin<Box<dyn Future<Output = JobOutcome> + Send + 'static>>;

/// A unit of work as the queue sees it. The future is lazy: nothing runs
/// until a worker polls it.
pub struct Job {
    id: TaskId,
    run: JobFuture,
}

impl Job {
    /// Wrap a job body under the given id.
    pub fn new(id: TaskId, run: JobFuture) -> Self {
        Self { id, run }
    }

    /// Id assigned at submission, used for log correlation.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The job body, ready to be awaited by a worker.
    pub fn into_future(self) -> JobFuture {
        self.run
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish()
    }
}

/// The running slot held for a leased job. The holder occupies the slot
/// until it reports `finish`. Dropping the lease without finishing counts
/// as a failure.
pub trait JobLease: Send {
    /// Id of the job this lease was handed out with.
    fn id(&self) -> TaskId;

    /// Release the running slot and record the outcome.
    fn finish(self: Box<Self>, outcome: JobOutcome);
}

/// Queue port.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job. Fails with `PoolClosed` once `close` has been called.
    fn push(&self, job: Job) -> Result<(), PoolError>;

    /// Wait for the next job in FIFO order, together with the lease on its
    /// running slot. Returns `None` once the queue is closed and empty.
    async fn lease(&self) -> Option<(Job, Box<dyn JobLease>)>;

    /// Stop accepting jobs and wake idle leasers so they can exit.
    fn close(&self);

    /// Has `close` been called?
    fn is_closed(&self) -> bool;

    /// Snapshot of the counters, taken under the queue lock.
    fn counts(&self) -> QueueCounts;
}
