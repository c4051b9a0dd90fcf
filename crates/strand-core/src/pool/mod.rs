//! WorkerPool: bounded, FIFO execution of submitted tasks.
//!
//! The pool owns N worker loops (one Tokio task each) leasing from a single
//! job queue, so at most N submitted tasks run at any instant. There is no
//! process-wide default pool: construct one and pass it where needed.
//!
//! ```ignore
//! let pool = WorkerPool::new(PoolConfig::with_workers(2))?;
//! let task = pool.submit(async { Ok::<_, BoxError>(21) })?.map(|v| v * 2);
//! assert_eq!(task.wait().await?, 42);
//! pool.shutdown(true).await;
//! ```

mod status;
mod worker;

pub use self::status::PoolStatus;

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};

use crate::config::PoolConfig;
use crate::domain::{BoxError, PoolError, TaskError, TaskId};
use crate::queue::{InMemoryJobQueue, Job, JobOutcome, JobQueue};
use crate::task::ComposableTask;

/// Fixed-size pool of worker slots over a FIFO job queue.
///
/// Dropping the pool requests shutdown; queued tasks still drain.
pub struct WorkerPool {
    /// From `PoolConfig::name`; attached to every log line.
    name: Arc<str>,

    /// Number of worker loops (the concurrency bound).
    workers: usize,

    queue: Arc<dyn JobQueue>,

    /// Runtime the workers run on; handed to every task for late drains.
    runtime: Handle,

    /// Taken (and joined) by the first waiting shutdown. Later waiters
    /// queue on the lock and so also return only after the drain.
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start a pool on the current Tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        Self::with_handle(config, runtime)
    }

    /// Start a pool on an explicit runtime.
    pub fn with_handle(config: PoolConfig, runtime: Handle) -> Result<Self, PoolError> {
        Self::with_queue(config, runtime, Arc::new(InMemoryJobQueue::new()))
    }

    /// Start a pool over a caller-provided queue.
    pub fn with_queue(
        config: PoolConfig,
        runtime: Handle,
        queue: Arc<dyn JobQueue>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let name: Arc<str> = Arc::from(config.name.as_str());
        let joins = (0..config.workers)
            .map(|worker_id| {
                runtime.spawn(worker::worker_loop(
                    Arc::clone(&name),
                    worker_id,
                    Arc::clone(&queue),
                ))
            })
            .collect();

        tracing::info!(pool = %name, workers = config.workers, "worker pool started");

        Ok(Self {
            name,
            workers: config.workers,
            queue,
            runtime,
            joins: Mutex::new(joins),
        })
    }

    /// Pool name, as configured.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker slots.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// `true` once shutdown has been requested; `submit` then fails with
    /// `PoolError::PoolClosed`.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Snapshot of queue counters plus pool identity.
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            name: self.name.to_string(),
            workers: self.workers,
            closed: self.queue.is_closed(),
            counts: self.queue.counts(),
        }
    }

    /// Queue an async task. Returns immediately.
    ///
    /// An `Err` from the future, or a panic while polling it, fails the
    /// returned task; nothing propagates into the pool.
    pub fn submit<T, E, Fut>(&self, task: Fut) -> Result<ComposableTask<T>, PoolError>
    where
        T: Clone + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.enqueue(async move { flatten(tokio::spawn(task).await) })
    }

    /// Queue a synchronous task. It runs on Tokio's blocking threads but
    /// still occupies one of this pool's slots while it runs.
    pub fn submit_blocking<T, E, F>(&self, task: F) -> Result<ComposableTask<T>, PoolError>
    where
        T: Clone + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.enqueue(async move { flatten(tokio::task::spawn_blocking(task).await) })
    }

    fn enqueue<T, W>(&self, work: W) -> Result<ComposableTask<T>, PoolError>
    where
        T: Clone + Send + 'static,
        W: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let id = TaskId::generate();
        let (task, completer) = ComposableTask::pending(Some(self.runtime.clone()));

        let run = Box::pin(async move {
            let outcome = work.await;
            let reported = match &outcome {
                Ok(_) => JobOutcome::Succeeded,
                Err(err) => {
                    tracing::debug!(task_id = %id, error = %err, "task failed");
                    JobOutcome::Failed
                }
            };
            completer.complete(outcome);
            reported
        });

        // On rejection the job (and its completer) is dropped here; the
        // caller gets the error instead of a task.
        self.queue.push(Job::new(id, run))?;
        tracing::trace!(pool = %self.name, task_id = %id, "task queued");
        Ok(task)
    }

    /// Stop accepting tasks without waiting. Queued and running tasks keep
    /// draining in the background.
    pub fn request_shutdown(&self) {
        if !self.queue.is_closed() {
            tracing::info!(pool = %self.name, "worker pool shutting down");
        }
        self.queue.close();
    }

    /// Stop accepting tasks. With `wait`, returns only after every queued
    /// and running task has finished and all workers have exited.
    pub async fn shutdown(&self, wait: bool) {
        self.request_shutdown();
        if !wait {
            return;
        }

        let mut joins = self.joins.lock().await;
        for (worker_id, join) in joins.drain(..).enumerate() {
            if let Err(err) = join.await {
                tracing::warn!(pool = %self.name, worker_id, error = %err, "worker exited abnormally");
            }
        }
        tracing::info!(pool = %self.name, "worker pool drained");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers finish what is queued, then exit.
        self.queue.close();
    }
}

/// Collapse a spawned task's join result into the task outcome. A panic
/// becomes `TaskError::Panicked`; a cancelled join becomes `Abandoned`.
fn flatten<T, E>(joined: Result<Result<T, E>, JoinError>) -> Result<T, TaskError>
where
    E: Into<BoxError>,
{
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskError::failed(err)),
        Err(err) if err.is_panic() => {
            let err = TaskError::from_panic(err.into_panic());
            tracing::warn!(error = %err, "task panicked");
            Err(err)
        }
        Err(_) => Err(TaskError::Abandoned),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::TaskState;

    fn pool(workers: usize) -> WorkerPool {
        WorkerPool::new(PoolConfig::with_workers(workers).named("test")).unwrap()
    }

    #[tokio::test]
    async fn submit_runs_and_returns_value() {
        let pool = pool(2);
        let task = pool.submit(async { Ok::<_, BoxError>(5) }).unwrap();
        assert_eq!(task.wait().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn blocking_tasks_run_too() {
        let pool = pool(1);
        let task = pool
            .submit_blocking(|| {
                std::thread::sleep(Duration::from_millis(10));
                Ok::<_, BoxError>("slept")
            })
            .unwrap();
        assert_eq!(task.wait().await.unwrap(), "slept");
    }

    #[tokio::test]
    async fn errors_are_captured_as_task_failures() {
        let pool = pool(1);
        let failed = pool.submit(async { Err::<i32, _>("broken") }).unwrap();
        let sibling = pool.submit(async { Ok::<_, BoxError>(1) }).unwrap();

        let err = failed.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "task failed: broken");
        assert_eq!(sibling.wait().await.unwrap(), 1);
        assert_eq!(failed.state(), TaskState::Failed);
    }

    #[tokio::test]
    async fn panics_are_captured_and_worker_survives() {
        let pool = pool(1);
        let panicked = pool
            .submit(async {
                if true {
                    panic!("task exploded");
                }
                Ok::<i32, BoxError>(0)
            })
            .unwrap();
        let blocking_panic = pool
            .submit_blocking(|| -> Result<i32, BoxError> { panic!("blocking exploded") })
            .unwrap();
        let after = pool.submit(async { Ok::<_, BoxError>(2) }).unwrap();

        assert!(matches!(panicked.wait().await, Err(TaskError::Panicked(ref m)) if m == "task exploded"));
        assert!(matches!(blocking_panic.wait().await, Err(TaskError::Panicked(_))));
        assert_eq!(after.wait().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails() {
        let pool = pool(1);
        pool.shutdown(false).await;
        assert!(pool.is_closed());

        let err = pool.submit(async { Ok::<_, BoxError>(1) }).unwrap_err();
        assert!(matches!(err, PoolError::PoolClosed));
        let err = pool.submit_blocking(|| Ok::<_, BoxError>(1)).unwrap_err();
        assert!(matches!(err, PoolError::PoolClosed));
    }

    #[tokio::test]
    async fn non_waiting_shutdown_still_drains() {
        let pool = pool(1);
        let task = pool
            .submit(async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, BoxError>("late")
            })
            .unwrap();
        pool.shutdown(false).await;
        assert!(!task.is_done());
        assert_eq!(task.wait().await.unwrap(), "late");
    }

    #[tokio::test]
    async fn waiting_shutdown_finishes_everything() {
        let pool = pool(2);
        let tasks: Vec<_> = (0..6)
            .map(|i| {
                pool.submit(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, BoxError>(i)
                })
                .unwrap()
            })
            .collect();

        pool.shutdown(true).await;

        assert!(tasks.iter().all(ComposableTask::is_done));
        let status = pool.status();
        assert!(status.closed);
        assert!(status.is_idle());
        assert_eq!(status.counts.completed, 6);
    }

    #[tokio::test]
    async fn status_counts_failures() {
        let pool = pool(1);
        let _ = pool.submit(async { Err::<(), _>("x") }).unwrap();
        let _ = pool.submit(async { Ok::<_, BoxError>(()) }).unwrap();
        pool.shutdown(true).await;

        let status = pool.status();
        assert_eq!(status.name, "test");
        assert_eq!(status.workers, 1);
        assert_eq!(status.counts.completed, 1);
        assert_eq!(status.counts.failed, 1);
    }

    #[test]
    fn needs_a_runtime() {
        let err = WorkerPool::new(PoolConfig::with_workers(1)).err().unwrap();
        assert!(matches!(err, PoolError::NoRuntime));
    }

    #[tokio::test]
    async fn zero_workers_is_rejected() {
        let err = WorkerPool::new(PoolConfig::with_workers(0)).err().unwrap();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[test]
    fn explicit_handle_from_outside_the_runtime() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let pool = WorkerPool::with_handle(PoolConfig::with_workers(1), rt.handle().clone()).unwrap();

        let task = pool.submit(async { Ok::<_, BoxError>(3) }).unwrap().map(|v| v + 1);
        assert_eq!(task.wait_blocking().unwrap(), 4);

        rt.block_on(pool.shutdown(true));
    }
}
