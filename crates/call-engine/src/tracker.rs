//! # Completion Tracker
//!
//! Counts the attempts each run still has outstanding and the global number of attempts
//! in flight. A run is finished on the single release that takes its count from above zero
//! to zero or below; that release removes the entry and returns
//! [`ReleaseOutcome::Finished`]. Any later release on the same run is an
//! [`UnknownRun`](crate::error::CallEngineError::UnknownRun) error.
//!
//! The per-run map and the global total share one lock, so the decrement, the zero check
//! and the removal are one atomic step and the total always equals the sum of the map.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{CallEngineError, Result};
use crate::types::RunId;

/// Result of a successful release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The run still has attempts outstanding
    Pending { remaining: u64 },
    /// This release completed the run. Returned once per run.
    Finished,
}

#[derive(Debug, Default)]
struct TrackerState {
    runs: HashMap<RunId, u64>,
    in_flight: u64,
}

/// Per-run remaining-attempt counters
#[derive(Debug, Default)]
pub struct CompletionTracker {
    state: Mutex<TrackerState>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `attempts` pending attempts for a run and return the new global total.
    /// Reserving again for a live run adds to its count.
    pub fn reserve(&self, run_id: &RunId, attempts: u64) -> u64 {
        let mut state = self.state.lock();
        *state.runs.entry(run_id.clone()).or_insert(0) += attempts;
        state.in_flight += attempts;
        debug!(run_id = %run_id, attempts, in_flight = state.in_flight, "reserved attempts");
        state.in_flight
    }

    /// Subtract `attempts` from a run's remaining count
    pub fn release(&self, run_id: &RunId, attempts: u32) -> Result<ReleaseOutcome> {
        let mut state = self.state.lock();
        let Some(remaining) = state.runs.get_mut(run_id) else {
            return Err(CallEngineError::UnknownRun(run_id.clone()));
        };

        let released = u64::from(attempts).min(*remaining);
        *remaining -= released;
        let left = *remaining;
        state.in_flight = state.in_flight.saturating_sub(released);

        if left == 0 {
            state.runs.remove(run_id);
            info!(run_id = %run_id, in_flight = state.in_flight, "✅ run finished");
            Ok(ReleaseOutcome::Finished)
        } else {
            debug!(run_id = %run_id, remaining = left, "released attempts");
            Ok(ReleaseOutcome::Pending { remaining: left })
        }
    }

    /// True iff the run has an entry with attempts outstanding
    pub fn is_pending(&self, run_id: &RunId) -> bool {
        self.state.lock().runs.get(run_id).is_some_and(|n| *n > 0)
    }

    pub fn remaining(&self, run_id: &RunId) -> Option<u64> {
        self.state.lock().runs.get(run_id).copied()
    }

    /// Attempts in flight across all runs
    pub fn in_flight(&self) -> u64 {
        self.state.lock().in_flight
    }

    pub fn active_runs(&self) -> usize {
        self.state.lock().runs.len()
    }
}
