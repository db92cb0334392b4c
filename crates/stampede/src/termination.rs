//! Two-stage run timeout.
//!
//! A run starts under a long hard ceiling. Once every dispatched task has
//! been seen, the ceiling is swapped for a short quiescence window that
//! lets late cleanup and duplicate events drain. The swap happens once.

use std::time::Duration;

use tracing::info;

use stampede_core::ExitReason;

use crate::config::Config;
use crate::timer::Deadline;

/// Which deadline is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Armed {
    Hard,
    Quiescent,
}

impl Armed {
    fn exit_reason(self) -> ExitReason {
        match self {
            Self::Hard => ExitReason::HardCeiling,
            Self::Quiescent => ExitReason::Quiescence,
        }
    }
}

/// Owns the single live deadline of a run.
#[derive(Debug)]
pub struct TerminationController {
    armed: Armed,
    deadline: Deadline,
    quiescence_window: Duration,
}

impl TerminationController {
    /// Arm the hard ceiling, starting now.
    pub fn new(hard_ceiling: Duration, quiescence_window: Duration) -> Self {
        Self {
            armed: Armed::Hard,
            deadline: Deadline::after(hard_ceiling),
            quiescence_window,
        }
    }

    /// Build from engine config.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.hard_ceiling, config.quiescence_window)
    }

    /// Currently armed stage.
    pub fn armed(&self) -> Armed {
        self.armed
    }

    /// Re-evaluate progress; switch to the quiescence window on the first
    /// call where `seen >= target`. Returns true if this call switched.
    pub fn observe(&mut self, seen: usize, target: usize) -> bool {
        if self.armed != Armed::Hard || seen < target {
            return false;
        }

        self.deadline.reset_after(self.quiescence_window);
        self.armed = Armed::Quiescent;
        info!(
            seen,
            target,
            window_ms = self.quiescence_window.as_millis() as u64,
            "All tasks seen, entering quiescence window"
        );
        true
    }

    /// Wait for the live deadline and report which stage fired.
    pub async fn expired(&mut self) -> ExitReason {
        (&mut self.deadline).await;
        self.armed.exit_reason()
    }
}
