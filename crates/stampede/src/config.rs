//! Engine configuration.

use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute ceiling on a run, measured from start.
    pub hard_ceiling: Duration,

    /// Grace period after every dispatched task has been seen.
    pub quiescence_window: Duration,

    /// Timeout of the identifying echo action prepended to each task.
    pub marker_timeout: Duration,

    /// Upper bound on concurrent resolve calls (None = one per completion).
    pub max_concurrent_cleanups: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hard_ceiling: Duration::from_secs(100 * 60),
            quiescence_window: Duration::from_secs(30),
            marker_timeout: Duration::from_secs(10),
            max_concurrent_cleanups: None,
        }
    }
}
