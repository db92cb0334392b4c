//! Task store port.
//!
//! The engine never talks to a store directly: it creates tasks, watches for
//! completions and resolves completed tasks through [`TaskStore`].

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use stampede_core::{CompletionEvent, TaskDefinition, TaskId};

pub use self::memory::InMemoryTaskStore;

/// Task store errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Create failed for task {task_id}: {message}")]
    Create { task_id: TaskId, message: String },

    #[error("Resolve failed for task {task_id}: {message}")]
    Resolve { task_id: TaskId, message: String },

    #[error("Watch error: {0}")]
    Watch(String),
}

/// A live completion watch.
///
/// `completions` and `errors` stay open until the store stops the watch.
/// Firing (or dropping) `stop` asks the store to end it.
pub struct CompletionWatch {
    pub completions: mpsc::UnboundedReceiver<CompletionEvent>,
    pub errors: mpsc::UnboundedReceiver<StoreError>,
    pub stop: oneshot::Sender<()>,
}

impl CompletionWatch {
    /// Ask the store to end the watch.
    pub fn stop(self) {
        // The store may already have torn the watch down.
        let _ = self.stop.send(());
    }
}

/// Client for the external task store.
///
/// # Concurrency
///
/// One handle is shared by the whole run: `create` is called from every
/// dispatch unit at once, `resolve` from every cleanup unit at once, while
/// a watch started by `watch_completions` is feeding the correlator.
/// Implementations must tolerate all of that concurrently.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Submit a new task.
    async fn create(&self, task: TaskDefinition) -> Result<(), StoreError>;

    /// Begin observing completed tasks.
    async fn watch_completions(&self) -> Result<CompletionWatch, StoreError>;

    /// Acknowledge and delete a completed task.
    async fn resolve(&self, completion: &CompletionEvent) -> Result<(), StoreError>;
}
