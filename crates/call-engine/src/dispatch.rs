//! # Dispatch Engine
//!
//! Single consumer of the [`RunQueue`]. For each run it plans batches, leases a port pair
//! per batch and spawns one execution task per batch, pausing between launches. It never
//! waits for those tasks: completion is accounted for by the
//! [`CompletionTracker`](crate::tracker::CompletionTracker) inside each task.
//!
//! ```text
//!   RunQueue ──pop──▶ plan ──▶ lease ports ──▶ spawn(adapter.execute) ──▶ pace ──▶ next
//!                                  │
//!                                  └─ none within port_wait ─▶ abandon batch
//! ```
//!
//! While any batch task is alive the loop pauses before taking the next run. This throttles
//! between runs, not between batches.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::adapter::ExecutionAdapter;
use crate::batcher::{BatchPlan, RunBatcher};
use crate::config::DispatchConfig;
use crate::ports::{PortLease, PortPool};
use crate::queue::RunQueue;
use crate::types::{Batch, Run};

pub struct DispatchEngine {
    queue: Arc<RunQueue>,
    batcher: Arc<RunBatcher>,
    adapter: Arc<ExecutionAdapter>,
    ports: Arc<PortPool>,
    pacing: DispatchConfig,
    active: Arc<AtomicUsize>,
}

/// Decrements the active batch count when a batch task ends, even by panic
struct ActiveBatch(Arc<AtomicUsize>);

impl Drop for ActiveBatch {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DispatchEngine {
    pub fn new(
        queue: Arc<RunQueue>,
        batcher: Arc<RunBatcher>,
        adapter: Arc<ExecutionAdapter>,
        ports: Arc<PortPool>,
        pacing: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            batcher,
            adapter,
            ports,
            pacing,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Batch tasks currently executing
    pub fn active_batches(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Start the perpetual dispatch loop
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop().await })
    }

    async fn run_loop(&self) {
        info!("🔄 Starting dispatch loop");
        loop {
            match self.queue.pop() {
                Some(run) => {
                    self.dispatch_run(run).await;
                    if self.active_batches() > 0 {
                        sleep(self.pacing.idle_delay()).await;
                    }
                }
                None => self.queue.wait(self.pacing.idle_delay()).await,
            }
        }
    }

    /// Launch every batch of a run. Returns once the last batch is launched.
    pub async fn dispatch_run(&self, run: Run) {
        let plans = self.batcher.plan(&run);
        info!(
            run_id = %run.id,
            context = %run.context,
            attempts = run.total_attempts(),
            batches = plans.len(),
            "📋 dispatching run"
        );

        for plan in plans {
            match self.lease_ports().await {
                Some(lease) => {
                    let batch = self.batcher.build_batch(&run, &plan, lease);
                    self.launch(batch);
                }
                None => self.abandon(&run, &plan).await,
            }
            sleep(plan.pace).await;
        }
    }

    async fn lease_ports(&self) -> Option<PortLease> {
        let deadline = Instant::now() + self.pacing.port_wait();
        loop {
            if let Some(lease) = self.ports.allocate_pair() {
                return Some(lease);
            }
            if Instant::now() >= deadline {
                return None;
            }
            debug!("no free port pair, waiting");
            sleep(self.pacing.idle_delay()).await;
        }
    }

    async fn abandon(&self, run: &Run, plan: &BatchPlan) {
        warn!(
            run_id = %run.id,
            batch = plan.index,
            attempts = plan.attempts(),
            "⚠️ no free ports, batch abandoned"
        );
        if let Err(e) = self.adapter.abandon(&run.id, plan.attempts()).await {
            error!(run_id = %run.id, "failed to release abandoned batch: {}", e);
        }
    }

    fn launch(&self, batch: Batch) {
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveBatch(self.active.clone());
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let run_id = batch.run_id.clone();
            let index = batch.index;
            match adapter.execute(batch).await {
                Ok(completion) => {
                    if let Some(summary) = completion.summary {
                        info!(run_id = %run_id, calls = summary.calls, "🏁 run complete");
                    }
                }
                Err(e) => error!(run_id = %run_id, batch = index, "batch error: {}", e),
            }
        });
    }
}
