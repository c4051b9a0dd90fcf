//! In-memory FIFO job queue.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{Job, JobLease, JobOutcome, JobQueue, QueueCounts};
use crate::domain::{PoolError, TaskId};

/// Queue state. Every field is read and written under the one mutex.
#[derive(Default)]
struct QueueState {
    /// Jobs waiting for a worker, oldest first.
    ready: VecDeque<Job>,

    /// Leases handed out and not yet finished.
    running: usize,

    completed: usize,
    failed: usize,

    closed: bool,
}

fn lock(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    // No user code runs under this lock.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory queue implementation.
#[derive(Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl InMemoryJobQueue {
    /// An empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn push(&self, job: Job) -> Result<(), PoolError> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            state.ready.push_back(job);
        }
        // Notify outside the lock
        self.notify.notify_one();
        Ok(())
    }

    async fn lease(&self) -> Option<(Job, Box<dyn JobLease>)> {
        loop {
            // Register interest before looking at the state so a push or
            // close between the check and the await is not missed.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            {
                let mut state = lock(&self.state);
                if let Some(job) = state.ready.pop_front() {
                    state.running += 1;
                    let lease = InMemoryLease {
                        id: job.id(),
                        outcome: None,
                        state: Arc::clone(&self.state),
                    };
                    return Some((job, Box::new(lease)));
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    fn close(&self) {
        lock(&self.state).closed = true;
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn counts(&self) -> QueueCounts {
        let state = lock(&self.state);
        QueueCounts {
            queued: state.ready.len(),
            running: state.running,
            completed: state.completed,
            failed: state.failed,
        }
    }
}

/// Lease implementation for InMemoryJobQueue.
///
/// Counters are updated once, in `Drop`, whether or not `finish` was called.
struct InMemoryLease {
    id: TaskId,
    /// Set by `finish`; `None` at drop time counts as a failure.
    outcome: Option<JobOutcome>,
    state: Arc<Mutex<QueueState>>,
}

impl JobLease for InMemoryLease {
    fn id(&self) -> TaskId {
        self.id
    }

    fn finish(mut self: Box<Self>, outcome: JobOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for InMemoryLease {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.running = state.running.saturating_sub(1);
        match self.outcome.unwrap_or(JobOutcome::Failed) {
            JobOutcome::Succeeded => state.completed += 1,
            JobOutcome::Failed => state.failed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn job(outcome: JobOutcome) -> Job {
        Job::new(TaskId::generate(), Box::pin(async move { outcome }))
    }

    #[tokio::test]
    async fn push_and_counts() {
        let queue = InMemoryJobQueue::new();
        queue.push(job(JobOutcome::Succeeded)).unwrap();

        let counts = queue.counts();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.running, 0);
    }

    #[tokio::test]
    async fn leases_in_fifo_order() {
        let queue = InMemoryJobQueue::new();
        let first = job(JobOutcome::Succeeded);
        let second = job(JobOutcome::Succeeded);
        let (id1, id2) = (first.id(), second.id());
        queue.push(first).unwrap();
        queue.push(second).unwrap();

        let (a, lease_a) = queue.lease().await.unwrap();
        let (b, _lease_b) = queue.lease().await.unwrap();
        assert_eq!(a.id(), id1);
        assert_eq!(lease_a.id(), id1);
        assert_eq!(b.id(), id2);
    }

    #[tokio::test]
    async fn lease_transitions_to_running_and_finish_releases() {
        let queue = InMemoryJobQueue::new();
        queue.push(job(JobOutcome::Succeeded)).unwrap();

        let (job, lease) = tokio::time::timeout(Duration::from_millis(100), queue.lease())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.counts().running, 1);
        assert_eq!(queue.counts().queued, 0);

        let outcome = job.into_future().await;
        lease.finish(outcome);

        let counts = queue.counts();
        assert_eq!(counts.running, 0);
        assert_eq!(counts.completed, 1);
    }

    #[tokio::test]
    async fn dropped_lease_counts_as_failed() {
        let queue = InMemoryJobQueue::new();
        queue.push(job(JobOutcome::Succeeded)).unwrap();
        drop(queue.lease().await.unwrap());

        let counts = queue.counts();
        assert_eq!(counts.running, 0);
        assert_eq!(counts.failed, 1);
    }

    #[tokio::test]
    async fn push_after_close_is_rejected() {
        let queue = InMemoryJobQueue::new();
        queue.close();
        assert!(queue.is_closed());
        let err = queue.push(job(JobOutcome::Succeeded)).unwrap_err();
        assert!(matches!(err, PoolError::PoolClosed));
    }

    #[tokio::test]
    async fn close_drains_before_returning_none() {
        let queue = InMemoryJobQueue::new();
        queue.push(job(JobOutcome::Succeeded)).unwrap();
        queue.close();

        assert!(queue.lease().await.is_some());
        assert!(queue.lease().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_idle_leaser() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.lease().await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let got_none = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(got_none);
    }

    #[tokio::test]
    async fn push_wakes_idle_leaser() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.lease().await.map(|(job, _lease)| job.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let pushed = job(JobOutcome::Failed);
        let id = pushed.id();
        queue.push(pushed).unwrap();

        let leased = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased, Some(id));
    }
}
