//! In-memory task store.
//!
//! Records every create and resolve, and can play the store's side of a
//! run: completing created tasks after a random latency, failing a share of
//! them, and injecting stray completions or watch errors. Completions and
//! errors produced before the first watch starts are buffered and flushed
//! into it; anything produced after a watch has been stopped is dropped.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use stampede_core::{CompletionEvent, TaskDefinition, TaskId};

use super::{CompletionWatch, StoreError, TaskStore};

/// Store-side behavior for created tasks.
#[derive(Debug, Clone)]
struct AutoComplete {
    latency: RangeInclusive<Duration>,
    failure_rate: f64,
}

impl AutoComplete {
    fn sample(&self) -> (Duration, bool) {
        let mut rng = rand::thread_rng();
        let min = self.latency.start().as_millis() as u64;
        let max = (self.latency.end().as_millis() as u64).max(min);
        let latency = Duration::from_millis(rng.gen_range(min..=max));
        let failed = rng.gen_bool(self.failure_rate);
        (latency, failed)
    }
}

enum Feed {
    Completion(CompletionEvent),
    Error(StoreError),
}

struct WatchFeed {
    generation: usize,
    completions: mpsc::UnboundedSender<CompletionEvent>,
    errors: mpsc::UnboundedSender<StoreError>,
}

impl WatchFeed {
    fn send(&self, item: Feed) {
        // A receiver that went away just means nobody is watching any more.
        let _ = match item {
            Feed::Completion(event) => self.completions.send(event).map_err(|_| ()),
            Feed::Error(err) => self.errors.send(err).map_err(|_| ()),
        };
    }
}

#[derive(Default)]
struct StoreState {
    created: Vec<TaskDefinition>,
    resolved: Vec<TaskId>,
    resolve_attempts: usize,
    watches_started: usize,
    watch: Option<WatchFeed>,
    backlog: Vec<Feed>,
}

impl StoreState {
    fn deliver(&mut self, item: Feed) {
        match &self.watch {
            Some(feed) => feed.send(item),
            None if self.watches_started == 0 => self.backlog.push(item),
            None => debug!("No completion watch open, dropping store event"),
        }
    }
}

/// A task store that lives in process memory.
pub struct InMemoryTaskStore {
    state: Arc<Mutex<StoreState>>,
    auto_complete: Option<AutoComplete>,
    create_limit: Option<usize>,
    fail_resolves: bool,
    resolve_delay: Duration,
}

impl InMemoryTaskStore {
    /// Create a store that accepts everything and never completes anything
    /// on its own.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            auto_complete: None,
            create_limit: None,
            fail_resolves: false,
            resolve_delay: Duration::ZERO,
        }
    }

    /// Complete every created task after a latency drawn from `latency`,
    /// failing it with probability `failure_rate`. Rates outside `0.0..=1.0`
    /// are clamped; a NaN rate fails nothing.
    pub fn with_auto_complete(mut self, latency: RangeInclusive<Duration>, failure_rate: f64) -> Self {
        let failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        self.auto_complete = Some(AutoComplete {
            latency,
            failure_rate,
        });
        self
    }

    /// Refuse every create after the first `limit`.
    pub fn with_create_limit(mut self, limit: usize) -> Self {
        self.create_limit = Some(limit);
        self
    }

    /// Fail every resolve.
    pub fn with_failing_resolves(mut self) -> Self {
        self.fail_resolves = true;
        self
    }

    /// Delay every resolve by `delay`.
    pub fn with_resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = delay;
        self
    }

    /// Emit a completion on the current watch, or the first one if none has
    /// started yet.
    pub async fn push_completion(&self, event: CompletionEvent) {
        self.state.lock().await.deliver(Feed::Completion(event));
    }

    /// Emit a watch error on the current watch, or the first one if none has
    /// started yet.
    pub async fn push_watch_error(&self, err: StoreError) {
        self.state.lock().await.deliver(Feed::Error(err));
    }

    /// Tasks created so far, in creation order.
    pub async fn created(&self) -> Vec<TaskDefinition> {
        self.state.lock().await.created.clone()
    }

    /// Tasks successfully resolved so far.
    pub async fn resolved(&self) -> Vec<TaskId> {
        self.state.lock().await.resolved.clone()
    }

    /// Number of resolve calls, successful or not.
    pub async fn resolve_attempts(&self) -> usize {
        self.state.lock().await.resolve_attempts
    }

    /// Number of watches ever started.
    pub async fn watches_started(&self) -> usize {
        self.state.lock().await.watches_started
    }

    /// Whether a watch is currently open.
    pub async fn is_watching(&self) -> bool {
        self.state.lock().await.watch.is_some()
    }

    fn schedule_completion(&self, task_id: TaskId, auto: &AutoComplete) {
        let (latency, failed) = auto.sample();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let event = if failed {
                CompletionEvent::failed(task_id, "simulated failure")
            } else {
                CompletionEvent::succeeded(task_id)
            };
            state
                .lock()
                .await
                .deliver(Feed::Completion(event.with_metadata("store", "memory")));
        });
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: TaskDefinition) -> Result<(), StoreError> {
        let task_id = task.id.clone();
        {
            let mut state = self.state.lock().await;
            if let Some(limit) = self.create_limit {
                if state.created.len() >= limit {
                    return Err(StoreError::Create {
                        task_id,
                        message: format!("store accepts at most {} tasks", limit),
                    });
                }
            }
            state.created.push(task);
        }

        if let Some(auto) = &self.auto_complete {
            self.schedule_completion(task_id, auto);
        }
        Ok(())
    }

    async fn watch_completions(&self) -> Result<CompletionWatch, StoreError> {
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (errors_tx, errors) = mpsc::unbounded_channel();
        let (stop, stop_rx) = oneshot::channel::<()>();

        let generation = {
            let mut state = self.state.lock().await;
            state.watches_started += 1;
            let feed = WatchFeed {
                generation: state.watches_started,
                completions: completions_tx,
                errors: errors_tx,
            };
            for item in std::mem::take(&mut state.backlog) {
                feed.send(item);
            }
            let generation = feed.generation;
            state.watch = Some(feed);
            generation
        };

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            // Fired or dropped, either way the watch is over.
            let _ = stop_rx.await;
            let mut state = state.lock().await;
            if state.watch.as_ref().is_some_and(|f| f.generation == generation) {
                state.watch = None;
                debug!(generation, "Completion watch stopped");
            }
        });

        Ok(CompletionWatch {
            completions,
            errors,
            stop,
        })
    }

    async fn resolve(&self, completion: &CompletionEvent) -> Result<(), StoreError> {
        if !self.resolve_delay.is_zero() {
            tokio::time::sleep(self.resolve_delay).await;
        }

        let mut state = self.state.lock().await;
        state.resolve_attempts += 1;
        if self.fail_resolves {
            return Err(StoreError::Resolve {
                task_id: completion.task_id.clone(),
                message: "resolve rejected".to_string(),
            });
        }
        state.resolved.push(completion.task_id.clone());
        Ok(())
    }
}
