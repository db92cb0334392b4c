//! Stampede Engine
//!
//! Launches a batch of tasks against a task store, correlates the store's
//! completion stream back to those tasks, measures per-task latency, resolves
//! completed tasks, and shuts down once everything has been seen or the run
//! ceiling is reached.
//!
//! The store and the run notifier are collaborators reached through the
//! [`store::TaskStore`] and [`notify::Notifier`] traits.

pub mod cleanup;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod notify;
pub mod store;
pub mod termination;
pub mod timer;

pub use config::Config;
pub use engine::{RunReport, Stampede};
pub use error::StampedeError;
pub use notify::{LogNotifier, Notification, Notifier, NoopNotifier};
pub use store::{CompletionWatch, InMemoryTaskStore, StoreError, TaskStore};
