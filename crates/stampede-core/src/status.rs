//! Lifecycle enums for a stampede run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the reconciliation loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    /// Accepting submissions, completions and watch errors.
    #[default]
    Running,
    /// Deadline fired; waiting for outstanding cleanup.
    Draining,
    /// Watch stopped and all cleanup finished.
    Stopped,
}

impl RunPhase {
    /// Returns true once nothing is left running.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Which deadline ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    /// The absolute run ceiling fired before every task was seen.
    HardCeiling,
    /// Every task was seen and the grace window elapsed.
    Quiescence,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HardCeiling => "hard_ceiling",
            Self::Quiescence => "quiescence",
        };
        f.write_str(s)
    }
}
