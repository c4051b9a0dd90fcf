use std::sync::Arc;

use crate::queue::JobQueue;

/// One execution slot: lease, run, report, repeat. Exits once the queue is
/// closed and drained.
pub(crate) async fn worker_loop(pool: Arc<str>, worker_id: usize, queue: Arc<dyn JobQueue>) {
    tracing::debug!(pool = %pool, worker_id, "worker started");

    while let Some((job, lease)) = queue.lease().await {
        let task_id = job.id();
        tracing::debug!(pool = %pool, worker_id, %task_id, "task started");
        // user code runs in its own tokio task inside the job; this await
        // only returns once the task's result has been published
        let outcome = job.into_future().await;
        tracing::debug!(pool = %pool, worker_id, %task_id, ?outcome, "task finished");

        lease.finish(outcome);
    }

    tracing::debug!(pool = %pool, worker_id, "worker stopped");
}
