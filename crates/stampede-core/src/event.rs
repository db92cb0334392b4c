//! Completion events from the task store and the results derived from them.

use crate::ids::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A task finished on the store side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    /// Task that completed.
    pub task_id: TaskId,
    /// Whether the task failed.
    pub failed: bool,
    /// Failure reason reported by the store, if any.
    pub failure_reason: Option<String>,
    /// Store-side metadata needed to resolve the task (index, cell, etc.).
    pub metadata: HashMap<String, String>,
}

impl CompletionEvent {
    /// Create a successful completion.
    pub fn succeeded(task_id: TaskId) -> Self {
        Self {
            task_id,
            failed: false,
            failure_reason: None,
            metadata: HashMap::new(),
        }
    }

    /// Create a failed completion.
    pub fn failed(task_id: TaskId, reason: impl Into<String>) -> Self {
        Self {
            task_id,
            failed: true,
            failure_reason: Some(reason.into()),
            metadata: HashMap::new(),
        }
    }

    /// Builder method to attach store metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one task, measured from submission to observed completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOnceResult {
    pub task_id: TaskId,
    #[serde(rename = "duration_ms", with = "millis")]
    pub duration: Duration,
    pub failed: bool,
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
