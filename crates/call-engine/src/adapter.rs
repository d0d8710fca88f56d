//! # Execution Adapter
//!
//! Runs one batch end to end:
//!
//! 1. render and persist the descriptor (`<descriptor_dir>/<run>-<batch>.xml`)
//! 2. launch the backend with the batch's ports and addresses
//! 3. wait the initial grace period, then poll run state at a fixed interval
//! 4. release the port lease and the batch's attempts, whether or not the backend worked
//! 5. if that release finished the run, finalize its summary
//!
//! Step 4 always happens, so a broken backend still lets the run complete with the results
//! that were produced.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::aggregator::ResultAggregator;
use crate::backend::{ExecutionBackend, Invocation};
use crate::config::EngineConfig;
use crate::config::PathsConfig;
use crate::descriptor::{self, BatchArtifacts};
use crate::error::Result;
use crate::ports::PortPool;
use crate::report::SummaryReport;
use crate::tracker::{CompletionTracker, ReleaseOutcome};
use crate::types::{Batch, RunId};

/// What happened to a batch
#[derive(Debug, Clone)]
pub struct BatchCompletion {
    pub run_id: RunId,
    pub batch_index: usize,
    pub attempts: u32,
    /// Set when this batch completed the run
    pub summary: Option<SummaryReport>,
}

/// Polling cadence for backend invocations
#[derive(Debug, Clone, Copy)]
pub struct PollTiming {
    pub initial_grace: Duration,
    pub interval: Duration,
    pub max_execution: Option<Duration>,
}

pub struct ExecutionAdapter {
    backend: Arc<dyn ExecutionBackend>,
    ports: Arc<PortPool>,
    tracker: Arc<CompletionTracker>,
    aggregator: Arc<ResultAggregator>,
    paths: PathsConfig,
    timing: PollTiming,
}

impl ExecutionAdapter {
    pub fn new(
        config: &EngineConfig,
        backend: Arc<dyn ExecutionBackend>,
        ports: Arc<PortPool>,
        tracker: Arc<CompletionTracker>,
        aggregator: Arc<ResultAggregator>,
    ) -> Self {
        Self {
            backend,
            ports,
            tracker,
            aggregator,
            paths: config.paths.clone(),
            timing: PollTiming {
                initial_grace: config.backend.initial_grace(),
                interval: config.backend.poll_interval(),
                max_execution: config.backend.max_execution(),
            },
        }
    }

    /// Execute a batch and account for its attempts.
    ///
    /// Backend errors are returned after the batch has been released.
    pub async fn execute(&self, batch: Batch) -> Result<BatchCompletion> {
        let attempts = batch.attempts();
        let executed = self.run_backend(&batch).await;
        if let Err(e) = &executed {
            error!(run_id = %batch.run_id, batch = batch.index, "❌ batch failed: {}", e);
        }

        self.ports.release_lease(batch.ports);
        let outcome = self.tracker.release(&batch.run_id, attempts)?;

        let summary = match outcome {
            ReleaseOutcome::Finished => Some(self.aggregator.finalize(&batch.run_id).await?),
            ReleaseOutcome::Pending { remaining } => {
                debug!(run_id = %batch.run_id, remaining, "run still pending");
                None
            }
        };

        executed.map(|_| BatchCompletion {
            run_id: batch.run_id.clone(),
            batch_index: batch.index,
            attempts,
            summary,
        })
    }

    /// Account for a batch that never reached the backend
    pub async fn abandon(&self, run_id: &RunId, attempts: u32) -> Result<Option<SummaryReport>> {
        match self.tracker.release(run_id, attempts)? {
            ReleaseOutcome::Finished => Ok(Some(self.aggregator.finalize(run_id).await?)),
            ReleaseOutcome::Pending { .. } => Ok(None),
        }
    }

    async fn run_backend(&self, batch: &Batch) -> Result<()> {
        let artifacts = BatchArtifacts::new(&self.paths, &batch.run_id, batch.index);
        let xml = descriptor::render(batch, &self.paths.reference_audio)?;
        descriptor::write(&artifacts.descriptor, &xml).await?;
        if let Some(dir) = artifacts.result.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let invocation = Invocation {
            run_id: batch.run_id.clone(),
            batch_index: batch.index,
            signaling_port: batch.ports.signaling,
            media_port: batch.ports.media,
            descriptor: artifacts.descriptor,
            result: artifacts.result,
            log: artifacts.log,
            public_ip: batch.addressing.public_ip.clone(),
            bound_ip: batch.addressing.bound_ip.clone(),
        };

        let started = Instant::now();
        let handle = self.backend.launch(&invocation).await?;
        info!(
            run_id = %batch.run_id,
            batch = batch.index,
            attempts = batch.attempts(),
            sip_port = batch.ports.signaling,
            rtp_port = batch.ports.media,
            "📞 batch running"
        );

        sleep(self.timing.initial_grace).await;
        while self.backend.is_running(&handle).await? {
            if let Some(limit) = self.timing.max_execution {
                if started.elapsed() >= limit {
                    warn!(run_id = %batch.run_id, batch = batch.index, "⏰ batch exceeded {:?}, terminating", limit);
                    self.backend.terminate(&handle).await?;
                    break;
                }
            }
            sleep(self.timing.interval).await;
        }

        debug!(run_id = %batch.run_id, batch = batch.index, elapsed = ?started.elapsed(), "batch done");
        Ok(())
    }
}
