//! Correlator - the reconciliation loop.
//!
//! The correlator is the only owner of the pending index and the progress
//! counters. Everything else talks to it through channels, so none of its
//! state needs a lock.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use stampede_core::{CompletionEvent, ExitReason, RunOnceResult, RunPhase, TaskId};

use crate::cleanup::CleanupWorkforce;
use crate::dispatcher::{DispatchResult, SubmissionRecord};
use crate::error::StampedeError;
use crate::store::CompletionWatch;
use crate::termination::TerminationController;

/// Event sources the correlator multiplexes over.
pub struct CorrelatorInputs {
    pub submissions: mpsc::UnboundedReceiver<SubmissionRecord>,
    pub dispatches: JoinSet<DispatchResult>,
    pub watch: CompletionWatch,
}

/// What the correlator saw during a run.
#[derive(Debug, Clone)]
pub struct Tally {
    pub dispatched: usize,
    pub seen: usize,
    pub failed: usize,
    pub unmatched: usize,
    pub still_pending: usize,
    /// Errors reported on the watch's error feed.
    pub watch_errors: usize,
    pub results: Vec<RunOnceResult>,
    pub exit: ExitReason,
    /// Phase the correlator ended in.
    pub phase: RunPhase,
}

/// Matches completions to submissions.
pub struct Correlator {
    target: usize,
    pending: HashMap<TaskId, Instant>,
    dispatched: usize,
    seen: usize,
    failed: usize,
    unmatched: usize,
    watch_errors: usize,
    results: Vec<RunOnceResult>,
    phase: RunPhase,
}

impl Correlator {
    /// Create a correlator expecting `target` completions.
    pub fn new(target: usize) -> Self {
        Self {
            target,
            pending: HashMap::with_capacity(target),
            dispatched: 0,
            seen: 0,
            failed: 0,
            unmatched: 0,
            watch_errors: 0,
            results: Vec::with_capacity(target),
            phase: RunPhase::Running,
        }
    }

    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn unmatched(&self) -> usize {
        self.unmatched
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Index a submitted task.
    pub fn handle_submission(&mut self, record: SubmissionRecord) {
        self.pending.insert(record.task_id, record.submitted_at);
    }

    /// Match a completion against the pending index.
    ///
    /// Unknown ids (never submitted, or already matched) are ignored and
    /// yield `None`; only a match counts towards progress.
    pub fn handle_completion(&mut self, event: &CompletionEvent) -> Option<RunOnceResult> {
        let Some(submitted_at) = self.pending.remove(&event.task_id) else {
            self.unmatched += 1;
            debug!(task_id = %event.task_id, "Ignoring completion for unknown task");
            return None;
        };

        let result = RunOnceResult {
            task_id: event.task_id.clone(),
            duration: Instant::now().saturating_duration_since(submitted_at),
            failed: event.failed,
        };

        info!(
            seen = self.seen,
            task_id = %result.task_id,
            duration_ms = result.duration.as_millis() as u64,
            failed = result.failed,
            "Task done"
        );

        self.seen += 1;
        if result.failed {
            self.failed += 1;
        }
        self.results.push(result.clone());
        Some(result)
    }

    fn handle_dispatch(&mut self, joined: Result<DispatchResult, JoinError>) -> Result<(), StampedeError> {
        match joined {
            Ok(Ok(_task_id)) => {
                self.dispatched += 1;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(e) => Err(StampedeError::DispatchAborted(e.to_string())),
        }
    }

    fn set_phase(&mut self, phase: RunPhase) {
        info!(from = %self.phase, to = %phase, "Correlator phase changed");
        self.phase = phase;
    }

    /// Run until a deadline fires or a dispatch unit fails, then drain
    /// cleanup and stop the watch.
    pub async fn run(
        mut self,
        inputs: CorrelatorInputs,
        mut termination: TerminationController,
        cleanup: &CleanupWorkforce,
    ) -> Result<Tally, StampedeError> {
        let CorrelatorInputs {
            mut submissions,
            mut dispatches,
            mut watch,
        } = inputs;

        let outcome = loop {
            termination.observe(self.seen, self.target);

            tokio::select! {
                // Submissions first: a completion must never overtake the
                // record of its own task.
                biased;

                Some(record) = submissions.recv() => {
                    self.handle_submission(record);
                }
                Some(joined) = dispatches.join_next() => {
                    if let Err(e) = self.handle_dispatch(joined) {
                        error!(error = %e, "Dispatch failed, aborting stampede");
                        break Err(e);
                    }
                }
                Some(event) = watch.completions.recv() => {
                    if self.handle_completion(&event).is_some() {
                        cleanup.spawn(event);
                    }
                }
                Some(err) = watch.errors.recv() => {
                    self.watch_errors += 1;
                    warn!(error = %err, "Watch error");
                }
                reason = termination.expired() => {
                    info!(reason = %reason, seen = self.seen, target = self.target, "Deadline reached");
                    break Ok(reason);
                }
            }
        };

        self.set_phase(RunPhase::Draining);
        dispatches.abort_all();
        cleanup.drain().await;
        watch.stop();
        self.set_phase(RunPhase::Stopped);

        let exit = outcome?;
        Ok(Tally {
            dispatched: self.dispatched,
            seen: self.seen,
            failed: self.failed,
            unmatched: self.unmatched,
            still_pending: self.pending.len(),
            watch_errors: self.watch_errors,
            results: self.results,
            exit,
            phase: self.phase,
        })
    }
}
