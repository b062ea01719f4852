//! Bounded pool for detached background work.
//!
//! Tasks run under a child of the process token rather than the token of the
//! request that submitted them, so they outlive a dropped client but still
//! stop on shutdown.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Default number of background tasks allowed to run at once.
pub const DEFAULT_BACKGROUND_TASKS: usize = 4;

#[derive(Debug, Clone)]
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl TaskPool {
    /// Creates a pool running at most `max_running` tasks (minimum one).
    #[must_use]
    pub fn new(max_running: usize, process_token: &CancellationToken) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_running.max(1))),
            tracker: TaskTracker::new(),
            cancel: process_token.child_token(),
        }
    }

    /// Token every task of this pool observes.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Tasks submitted and not yet finished, including those waiting for a slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Spawns `task` once a slot frees up.
    ///
    /// The closure receives the pool token; the future is also dropped at its
    /// next await point if the token fires. Returns `false` when the pool is
    /// already shut down.
    pub fn submit<F, Fut>(&self, name: &'static str, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() || self.cancel.is_cancelled() {
            debug!(task = name, "background pool closed, dropping task");
            return false;
        }

        let semaphore = Arc::clone(&self.semaphore);
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                permit = semaphore.acquire_owned() => permit,
            };
            let Ok(_permit) = permit else {
                warn!(task = name, "background semaphore closed");
                return;
            };

            debug!(task = name, "background task started");
            tokio::select! {
                biased;
                () = cancel.cancelled() => debug!(task = name, "background task cancelled"),
                () = task(cancel.clone()) => debug!(task = name, "background task finished"),
            }
        });
        true
    }

    /// Stops accepting work and waits for submitted tasks to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Cancels running tasks and waits for them to unwind.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_tasks_run_and_drain() {
        let root = CancellationToken::new();
        let pool = TaskPool::new(2, &root);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let done = Arc::clone(&done);
            assert!(pool.submit("count", move |_| async move {
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.drain().await;

        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert!(pool.is_empty());
        assert!(!pool.submit("late", |_| async {}));
    }

    #[tokio::test]
    async fn test_concurrency_bounded() {
        let root = CancellationToken::new();
        let pool = TaskPool::new(2, &root);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit("bounded", move |_| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        pool.drain().await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_request_cancel_does_not_reach_pool() {
        let root = CancellationToken::new();
        let request = root.child_token();
        let pool = TaskPool::new(1, &root);
        let done = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&done);
        pool.submit("detached", move |_| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        request.cancel();
        pool.drain().await;

        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_process_cancel_stops_tasks() {
        let root = CancellationToken::new();
        let pool = TaskPool::new(1, &root);
        let done = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&done);
        pool.submit("slow", move |_| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        root.cancel();
        pool.drain().await;

        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert!(pool.cancellation_token().is_cancelled());
    }
}
