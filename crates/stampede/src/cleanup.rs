//! Cleanup workforce - resolves completed tasks in the background.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use stampede_core::CompletionEvent;

use crate::store::TaskStore;

/// Fire-and-forget resolve calls with a counting barrier for shutdown.
pub struct CleanupWorkforce {
    store: Arc<dyn TaskStore>,
    tracker: TaskTracker,
    permits: Option<Arc<Semaphore>>,
    failures: Arc<AtomicUsize>,
}

impl CleanupWorkforce {
    /// Create a workforce; `max_concurrent` bounds in-flight resolves.
    pub fn new(store: Arc<dyn TaskStore>, max_concurrent: Option<usize>) -> Self {
        Self {
            store,
            tracker: TaskTracker::new(),
            permits: max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Resolve `completion` in the background.
    pub fn spawn(&self, completion: CompletionEvent) {
        let store = Arc::clone(&self.store);
        let permits = self.permits.clone();
        let failures = Arc::clone(&self.failures);

        self.tracker.spawn(async move {
            let _permit = match permits {
                Some(permits) => match permits.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            debug!(task_id = %completion.task_id, "Deleting task");
            match store.resolve(&completion).await {
                Ok(()) => debug!(task_id = %completion.task_id, "Deleted task"),
                Err(e) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!(task_id = %completion.task_id, error = %e, "Failed to resolve task");
                }
            }
        });
    }

    /// Resolve calls still running.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Resolve calls that failed so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Stop accepting work and wait until every spawned resolve finished.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stampede_core::TaskId;

    use crate::store::InMemoryTaskStore;

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_slow_resolves() {
        let store = Arc::new(InMemoryTaskStore::new().with_resolve_delay(Duration::from_secs(2)));
        let workforce = CleanupWorkforce::new(store.clone(), None);

        for i in 0..4 {
            workforce.spawn(CompletionEvent::succeeded(TaskId::new(format!("t{}", i))));
        }
        assert_eq!(workforce.outstanding(), 4);

        workforce.drain().await;

        assert_eq!(workforce.outstanding(), 0);
        assert_eq!(store.resolved().await.len(), 4);
        assert_eq!(workforce.failures(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_counted_and_swallowed() {
        let store = Arc::new(InMemoryTaskStore::new().with_failing_resolves());
        let workforce = CleanupWorkforce::new(store.clone(), None);

        workforce.spawn(CompletionEvent::succeeded(TaskId::new("a")));
        workforce.spawn(CompletionEvent::failed(TaskId::new("b"), "boom"));
        workforce.drain().await;

        assert_eq!(workforce.failures(), 2);
        assert_eq!(store.resolve_attempts().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_concurrency_still_resolves_everything() {
        let store = Arc::new(InMemoryTaskStore::new().with_resolve_delay(Duration::from_secs(1)));
        let workforce = CleanupWorkforce::new(store.clone(), Some(2));

        let start = tokio::time::Instant::now();
        for i in 0..6 {
            workforce.spawn(CompletionEvent::succeeded(TaskId::new(format!("t{}", i))));
        }
        workforce.drain().await;

        assert_eq!(store.resolved().await.len(), 6);
        // Two at a time, one second each.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
