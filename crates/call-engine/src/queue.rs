//! FIFO of admitted runs waiting for dispatch

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

use crate::types::Run;

/// Runs pushed by the HTTP and bus producers, popped by the dispatch loop
#[derive(Debug, Default)]
pub struct RunQueue {
    runs: Mutex<VecDeque<Run>>,
    notify: Notify,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, run: Run) {
        self.runs.lock().push_back(run);
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<Run> {
        self.runs.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.lock().is_empty()
    }

    /// Wait until a run is pushed or `timeout` elapses
    pub async fn wait(&self, timeout: Duration) {
        if !self.is_empty() {
            return;
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}
