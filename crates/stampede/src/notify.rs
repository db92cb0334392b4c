//! Run notifications.
//!
//! A stampede tells an optional external sink (an events dashboard, a chat
//! hook) when it starts and stops. Delivery is best effort: a failing sink
//! is logged and never affects the run.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

/// Notifier errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification rejected: {0}")]
    Rejected(String),
}

/// An event posted to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub text: String,
    /// `key:value` tags.
    pub tags: Vec<String>,
}

impl Notification {
    /// Notification sent before the first task is dispatched.
    pub fn started(count: usize) -> Self {
        Self {
            title: "stampede_start".to_string(),
            text: "started the stampede".to_string(),
            tags: vec![format!("count:{}", count)],
        }
    }

    /// Notification sent after the run has stopped.
    pub fn stopped(count: usize, elapsed: Duration) -> Self {
        Self {
            title: "stampede_stop".to_string(),
            text: "stopped the stampede".to_string(),
            tags: vec![
                format!("count:{}", count),
                format!("duration:{:?}", elapsed),
            ],
        }
    }

    /// Look up the value of a `key:value` tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter().find_map(|tag| {
            tag.split_once(':')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// Sink for run start/stop notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Notifier used when none is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _notification: Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Notifier that writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            title = %notification.title,
            tags = ?notification.tags,
            "{}", notification.text
        );
        Ok(())
    }
}

/// Post a notification, logging instead of failing.
pub async fn post(notifier: &dyn Notifier, notification: Notification) {
    let title = notification.title.clone();
    match notifier.notify(notification).await {
        Ok(()) => info!(title = %title, "Posted run notification"),
        Err(e) => warn!(title = %title, error = %e, "Failed to post run notification"),
    }
}
