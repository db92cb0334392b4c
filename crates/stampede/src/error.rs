//! Engine errors.
//!
//! Only failures that make a run meaningless cross the engine boundary.
//! Watch errors, unmatched completions and failed resolves are absorbed
//! and reported through logs and the run report.

use thiserror::Error;

use stampede_core::{CoreError, TaskId};

use crate::store::StoreError;

/// Fatal stampede errors.
#[derive(Debug, Error)]
pub enum StampedeError {
    /// The store refused to create a task.
    #[error("Failed to dispatch task {task_id}: {source}")]
    Dispatch {
        task_id: TaskId,
        #[source]
        source: StoreError,
    },

    /// A dispatch unit died before reporting back.
    #[error("Dispatch aborted: {0}")]
    DispatchAborted(String),

    /// The completion watch could not be started.
    #[error("Failed to start completion watch: {0}")]
    Watch(#[source] StoreError),

    /// Invalid template or other domain error.
    #[error(transparent)]
    Core(#[from] CoreError),
}
