//! Stampede entry point.

use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;

use stampede_core::{ExitReason, RunOnceResult, TaskTemplate};

use crate::cleanup::CleanupWorkforce;
use crate::config::Config;
use crate::correlator::{Correlator, CorrelatorInputs};
use crate::dispatcher::Dispatcher;
use crate::error::StampedeError;
use crate::notify::{self, Notification, Notifier, NoopNotifier};
use crate::store::TaskStore;
use crate::termination::TerminationController;

/// Summary of a finished stampede.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Tasks asked for.
    pub requested: usize,
    /// Tasks the store accepted.
    pub dispatched: usize,
    /// Completions matched to our tasks.
    pub seen: usize,
    /// Matched completions that reported failure.
    pub failed: usize,
    /// Completions ignored because their task was unknown or already seen.
    pub unmatched: usize,
    /// Submitted tasks never seen complete.
    pub still_pending: usize,
    /// Resolve calls that failed.
    pub cleanup_failures: usize,
    /// Errors reported by the completion watch.
    pub watch_errors: usize,
    pub results: Vec<RunOnceResult>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub exit: ExitReason,
}

impl RunReport {
    /// Whether every requested task was seen complete.
    pub fn is_complete(&self) -> bool {
        self.seen == self.requested
    }

    /// Mean time from submission to completion.
    pub fn mean_duration(&self) -> Option<Duration> {
        if self.results.is_empty() {
            return None;
        }
        let total: Duration = self.results.iter().map(|r| r.duration).sum();
        Some(total / self.results.len() as u32)
    }

    /// Slowest task.
    pub fn max_duration(&self) -> Option<Duration> {
        self.results.iter().map(|r| r.duration).max()
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Dispatches a batch of tasks and reconciles their completions.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use stampede::{InMemoryTaskStore, LogNotifier, Stampede};
/// use stampede_core::{Action, RunAction, TaskTemplate};
///
/// async fn run() -> Result<(), Box<dyn std::error::Error>> {
///     let store = Arc::new(InMemoryTaskStore::new());
///     let template = TaskTemplate::new(vec![Action::Run(RunAction::new(
///         "./work.sh",
///         Duration::from_secs(60),
///     ))]);
///
///     let report = Stampede::new(store)
///         .with_notifier(Arc::new(LogNotifier))
///         .run(template, 100)
///         .await?;
///
///     println!("seen {} of {}", report.seen, report.requested);
///     Ok(())
/// }
/// ```
pub struct Stampede {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    config: Config,
}

impl Stampede {
    /// Create a stampede against `store` with default config and no notifier.
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            notifier: Arc::new(NoopNotifier),
            config: Config::default(),
        }
    }

    /// Set the run notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Set the engine config.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Dispatch `count` tasks built from `template` and reconcile them.
    ///
    /// Returns once a deadline has fired, every cleanup call has finished
    /// and the completion watch has been stopped. Only a failed create (or
    /// a watch that cannot start) is an error.
    pub async fn run(&self, template: TaskTemplate, count: usize) -> Result<RunReport, StampedeError> {
        template.validate()?;

        let watch = self
            .store
            .watch_completions()
            .await
            .map_err(StampedeError::Watch)?;

        let started = Instant::now();
        info!(count, "Starting stampede");
        notify::post(self.notifier.as_ref(), Notification::started(count)).await;

        let termination = TerminationController::from_config(&self.config);
        let cleanup = CleanupWorkforce::new(
            Arc::clone(&self.store),
            self.config.max_concurrent_cleanups,
        );

        let (submissions_tx, submissions) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.store),
            template,
            self.config.marker_timeout,
        );
        let dispatches = dispatcher.spawn(count, submissions_tx);

        let inputs = CorrelatorInputs {
            submissions,
            dispatches,
            watch,
        };
        let tally = Correlator::new(count)
            .run(inputs, termination, &cleanup)
            .await;

        let elapsed = started.elapsed();
        notify::post(
            self.notifier.as_ref(),
            Notification::stopped(count, elapsed),
        )
        .await;

        let tally = tally?;
        let report = RunReport {
            requested: count,
            dispatched: tally.dispatched,
            seen: tally.seen,
            failed: tally.failed,
            unmatched: tally.unmatched,
            still_pending: tally.still_pending,
            cleanup_failures: cleanup.failures(),
            watch_errors: tally.watch_errors,
            results: tally.results,
            elapsed,
            exit: tally.exit,
        };

        info!(
            requested = report.requested,
            seen = report.seen,
            failed = report.failed,
            unmatched = report.unmatched,
            cleanup_failures = report.cleanup_failures,
            watch_errors = report.watch_errors,
            elapsed_ms = report.elapsed.as_millis() as u64,
            exit = %report.exit,
            "Stampede finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use stampede_core::{Action, CompletionEvent, RunAction, TaskId};

    use crate::notify::NotifyError;
    use crate::store::{InMemoryTaskStore, StoreError};

    const QUIESCENCE: Duration = Duration::from_secs(5);
    const CEILING: Duration = Duration::from_secs(600);

    fn config() -> Config {
        Config {
            hard_ceiling: CEILING,
            quiescence_window: QUIESCENCE,
            ..Config::default()
        }
    }

    fn template() -> TaskTemplate {
        TaskTemplate::new(vec![Action::Run(RunAction::new(
            "./load.sh",
            Duration::from_secs(30),
        ))])
    }

    fn fast_store() -> InMemoryTaskStore {
        InMemoryTaskStore::new()
            .with_auto_complete(Duration::from_millis(100)..=Duration::from_millis(900), 0.0)
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(notification);
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _notification: Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected("bad api key".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_tasks_stops_after_quiescence() {
        let store = Arc::new(InMemoryTaskStore::new());
        let stampede = Stampede::new(store.clone()).with_config(config());

        let report = stampede.run(template(), 0).await.unwrap();

        assert!(store.created().await.is_empty());
        assert_eq!(store.watches_started().await, 1);
        assert_eq!(report.exit, ExitReason::Quiescence);
        assert!(report.elapsed >= QUIESCENCE);
        assert!(report.elapsed < QUIESCENCE + Duration::from_secs(1));
        assert!(report.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_tasks_complete_then_quiesce() {
        let store = Arc::new(fast_store());
        let stampede = Stampede::new(store.clone()).with_config(config());

        let report = stampede.run(template(), 5).await.unwrap();

        assert_eq!(report.results.len(), 5);
        assert!(report.results.iter().all(|r| !r.failed));
        assert_eq!(report.seen, 5);
        assert_eq!(report.dispatched, 5);
        assert_eq!(report.still_pending, 0);
        assert_eq!(report.exit, ExitReason::Quiescence);
        assert!(report.elapsed <= Duration::from_secs(1) + QUIESCENCE);

        for result in &report.results {
            assert!(result.duration >= Duration::from_millis(100));
            assert!(result.duration <= Duration::from_millis(900));
        }

        let created: HashSet<TaskId> = store.created().await.into_iter().map(|t| t.id).collect();
        let reported: HashSet<TaskId> = report.results.iter().map(|r| r.task_id.clone()).collect();
        assert_eq!(created, reported);

        assert_eq!(store.resolved().await.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_completion_is_not_counted() {
        let store = Arc::new(fast_store());
        store
            .push_completion(CompletionEvent::succeeded(TaskId::new("not-ours")))
            .await;
        let stampede = Stampede::new(store.clone()).with_config(config());

        let report = stampede.run(template(), 3).await.unwrap();

        assert_eq!(report.seen, 3);
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.results.len(), 3);
        assert_eq!(store.resolve_attempts().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_error_mid_run_is_survived() {
        let store = Arc::new(
            InMemoryTaskStore::new()
                .with_auto_complete(Duration::from_millis(500)..=Duration::from_millis(900), 0.0),
        );
        let injector = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            injector
                .push_watch_error(StoreError::Watch("connection reset".to_string()))
                .await;
        });
        let stampede = Stampede::new(store.clone()).with_config(config());

        let report = stampede.run(template(), 4).await.unwrap();

        assert_eq!(report.seen, 4);
        assert_eq!(report.exit, ExitReason::Quiescence);
        assert_eq!(report.watch_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_ceiling_without_completions() {
        let store = Arc::new(InMemoryTaskStore::new());
        let stampede = Stampede::new(store.clone()).with_config(config());

        let report = stampede.run(template(), 2).await.unwrap();

        assert_eq!(report.exit, ExitReason::HardCeiling);
        assert_eq!(report.seen, 0);
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.still_pending, 2);
        assert!(report.elapsed >= CEILING);
        assert!(!report.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_aborts_run() {
        let store = Arc::new(InMemoryTaskStore::new().with_create_limit(2));
        let stampede = Stampede::new(store.clone()).with_config(config());

        let err = stampede.run(template(), 5).await.unwrap_err();

        assert!(matches!(
            err,
            StampedeError::Dispatch {
                source: StoreError::Create { .. },
                ..
            }
        ));
        assert_eq!(store.created().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_failures_do_not_abort() {
        let store = Arc::new(fast_store().with_failing_resolves());
        let stampede = Stampede::new(store.clone()).with_config(config());

        let report = stampede.run(template(), 3).await.unwrap();

        assert_eq!(report.seen, 3);
        assert_eq!(report.cleanup_failures, 3);
        assert!(store.resolved().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_slow_cleanup() {
        let store = Arc::new(fast_store().with_resolve_delay(QUIESCENCE * 4));
        let stampede = Stampede::new(store.clone()).with_config(config());

        let report = stampede.run(template(), 3).await.unwrap();

        assert_eq!(store.resolved().await.len(), 3);
        assert_eq!(report.cleanup_failures, 0);
        assert!(report.elapsed >= QUIESCENCE * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tasks_are_reported() {
        let store = Arc::new(
            InMemoryTaskStore::new()
                .with_auto_complete(Duration::from_millis(10)..=Duration::from_millis(50), 1.0),
        );
        let stampede = Stampede::new(store).with_config(config());

        let report = stampede.run(template(), 3).await.unwrap();

        assert_eq!(report.failed, 3);
        assert!(report.results.iter().all(|r| r.failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifier_sees_start_and_stop() {
        let notifier = Arc::new(RecordingNotifier::default());
        let stampede = Stampede::new(Arc::new(fast_store()))
            .with_config(config())
            .with_notifier(notifier.clone());

        stampede.run(template(), 4).await.unwrap();

        let seen = notifier.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].title, "stampede_start");
        assert_eq!(seen[0].tag("count"), Some("4"));
        assert_eq!(seen[1].title, "stampede_stop");
        assert_eq!(seen[1].tag("count"), Some("4"));
        assert!(seen[1].tag("duration").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_notifier_does_not_affect_run() {
        let stampede = Stampede::new(Arc::new(fast_store()))
            .with_config(config())
            .with_notifier(Arc::new(FailingNotifier));

        let report = stampede.run(template(), 2).await.unwrap();
        assert_eq!(report.seen, 2);
    }

    #[tokio::test]
    async fn test_invalid_template_is_rejected_before_watching() {
        let store = Arc::new(InMemoryTaskStore::new());
        let stampede = Stampede::new(store.clone());

        let err = stampede.run(TaskTemplate::new(Vec::new()), 1).await.unwrap_err();

        assert!(matches!(err, StampedeError::Core(_)));
        assert_eq!(store.watches_started().await, 0);
    }

    #[test]
    fn test_report_serializes_elapsed_as_millis() {
        let report = RunReport {
            requested: 1,
            dispatched: 1,
            seen: 1,
            failed: 0,
            unmatched: 0,
            still_pending: 0,
            cleanup_failures: 0,
            watch_errors: 0,
            results: vec![RunOnceResult {
                task_id: TaskId::new("t1"),
                duration: Duration::from_millis(40),
                failed: false,
            }],
            elapsed: Duration::from_millis(2500),
            exit: ExitReason::Quiescence,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed_ms"], 2500);
        assert_eq!(json["exit"], "QUIESCENCE");
        assert_eq!(report.mean_duration(), Some(Duration::from_millis(40)));
        assert_eq!(report.max_duration(), Some(Duration::from_millis(40)));
    }
}
