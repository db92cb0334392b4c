//! Stampede Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The async runtime
//! - Any concrete task store
//! - Notification transports
//!
//! Everything the engine dispatches, observes and reports is defined here.

pub mod error;
pub mod event;
pub mod ids;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use event::{CompletionEvent, RunOnceResult};
pub use ids::TaskId;
pub use status::{ExitReason, RunPhase};
pub use task::{Action, DownloadAction, RunAction, TaskDefinition, TaskTemplate, UploadAction};
