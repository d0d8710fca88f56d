//! # Controller
//!
//! Wires the engine together and owns its background tasks.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Controller                       │
//! ├───────────────┬───────────────┬──────────────────────┤
//! │  HTTP submit  │  bus: customer │  bus: provider      │
//! ├───────────────┴───────────────┴──────────────────────┤
//! │   RunBatcher (ingest + admission) → CompletionTracker │
//! │                    → RunQueue                         │
//! ├──────────────────────────────────────────────────────┤
//! │   DispatchEngine → PortPool → ExecutionAdapter        │
//! ├──────────────────────────────────────────────────────┤
//! │   ExecutionBackend        ResultAggregator → bus      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hct_call_engine::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = Arc::new(
//!     ControllerBuilder::new()
//!         .with_config(EngineConfig::default())
//!         .build()?,
//! );
//! controller.start().await?;
//!
//! let request: RunRequest =
//!     serde_json::from_str(r#"{"calls":[{"destination":"x@host:5060","count":3}]}"#)?;
//! let run_id = controller.submit(request, None).await?;
//! let summary = controller.run_status(&run_id).await?;
//! println!("{} calls so far", summary.calls);
//!
//! controller.stop().await;
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use hct_infra_common::{BusReceiver, InMemoryBus, MessageBus};

use crate::access::{AccessControl, SipAccessControl};
use crate::adapter::ExecutionAdapter;
use crate::aggregator::ResultAggregator;
use crate::backend::{ExecutionBackend, ProcessBackend};
use crate::batcher::RunBatcher;
use crate::config::EngineConfig;
use crate::dispatch::DispatchEngine;
use crate::error::{CallEngineError, Result};
use crate::ports::PortPool;
use crate::queue::RunQueue;
use crate::report::SummaryReport;
use crate::tracker::CompletionTracker;
use crate::types::{Context, RunId, RunRequest};

/// Point-in-time load figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    pub in_flight: u64,
    pub active_runs: usize,
    pub queued: usize,
    pub active_batches: usize,
}

pub struct Controller {
    config: EngineConfig,
    tracker: Arc<CompletionTracker>,
    queue: Arc<RunQueue>,
    batcher: Arc<RunBatcher>,
    aggregator: Arc<ResultAggregator>,
    dispatch: Arc<DispatchEngine>,
    bus: Arc<dyn MessageBus>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Start the dispatch loop and the bus subscriptions
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut handles = Vec::new();
        handles.push(self.dispatch.clone().spawn());

        for (channel, context) in [
            (self.config.bus.customer_commands.clone(), Context::Customer),
            (self.config.bus.provider_commands.clone(), Context::Provider),
        ] {
            let rx = self.bus.subscribe(&channel).await?;
            let controller = self.clone();
            handles.push(tokio::spawn(async move {
                controller.bus_loop(rx, context).await;
            }));
            info!("✅ Listening for {} runs on '{}'", context, channel);
        }

        self.handles.lock().extend(handles);
        Ok(())
    }

    /// Abort background tasks. Batches already running finish on their own.
    pub async fn stop(&self) {
        info!("🛑 Stopping controller...");
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
        info!("✅ Controller stopped");
    }

    /// Admit a run and queue it for dispatch
    pub async fn submit(&self, request: RunRequest, origin: Option<Context>) -> Result<RunId> {
        let run = self.batcher.ingest(request, origin).await?;
        if self.tracker.is_pending(&run.id) || self.aggregator.is_finalized(&run.id) {
            return Err(CallEngineError::InvalidRun(format!("run {} already exists", run.id)));
        }
        self.batcher.check_admission(&run, self.tracker.in_flight())?;

        let id = run.id.clone();
        let in_flight = self.tracker.reserve(&id, run.total_attempts());
        info!(
            run_id = %id,
            attempts = run.total_attempts(),
            in_flight,
            "📥 run admitted"
        );
        self.queue.push(run);
        Ok(id)
    }

    /// Decode a JSON run description and submit it
    pub async fn submit_json(&self, payload: &str, origin: Option<Context>) -> Result<RunId> {
        let request: RunRequest = serde_json::from_str(payload)
            .map_err(|e| CallEngineError::InvalidRun(format!("invalid command: {}", e)))?;
        self.submit(request, origin).await
    }

    /// Final summary, or the partial summary of a run still in progress
    pub async fn run_status(&self, run_id: &RunId) -> Result<SummaryReport> {
        let known = self.tracker.is_pending(run_id) || self.aggregator.is_finalized(run_id);
        let summary = self.aggregator.summary(run_id).await?;
        if !known && summary.calls == 0 {
            return Err(CallEngineError::UnknownRun(run_id.clone()));
        }
        Ok(summary)
    }

    pub fn is_pending(&self, run_id: &RunId) -> bool {
        self.tracker.is_pending(run_id)
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            in_flight: self.tracker.in_flight(),
            active_runs: self.tracker.active_runs(),
            queued: self.queue.len(),
            active_batches: self.dispatch.active_batches(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    async fn bus_loop(&self, mut rx: BusReceiver, context: Context) {
        loop {
            match rx.recv().await {
                Ok(Some(message)) => match self.submit_json(&message.payload, Some(context)).await {
                    Ok(run_id) => info!(run_id = %run_id, channel = rx.channel(), "run received from bus"),
                    Err(e) => warn!(channel = rx.channel(), "rejected bus run: {}", e),
                },
                Ok(None) => {
                    info!("bus channel '{}' closed", rx.channel());
                    return;
                }
                Err(e) => {
                    error!("bus receive error on '{}': {}", rx.channel(), e);
                    return;
                }
            }
        }
    }
}

/// Builder for [`Controller`]
#[derive(Default)]
pub struct ControllerBuilder {
    config: Option<EngineConfig>,
    backend: Option<Arc<dyn ExecutionBackend>>,
    bus: Option<Arc<dyn MessageBus>>,
    access: Option<Arc<dyn AccessControl>>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Execution backend; defaults to [`ProcessBackend`]
    pub fn with_backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Message bus; defaults to an [`InMemoryBus`]
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Access control for allow directives; defaults to SIP when a server is configured
    pub fn with_access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = Some(access);
        self
    }

    pub fn build(self) -> Result<Controller> {
        let config = self.config.ok_or_else(|| {
            CallEngineError::Configuration("Configuration not provided".to_string())
        })?;
        config
            .validate()
            .map_err(|errors| CallEngineError::Configuration(errors.join("; ")))?;

        let ports = Arc::new(PortPool::with_media_stride(
            config.ports.signaling(),
            config.ports.media(),
            config.ports.media_stride,
        )?);
        let tracker = Arc::new(CompletionTracker::new());
        let queue = Arc::new(RunQueue::new());
        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(InMemoryBus::new()) as Arc<dyn MessageBus>);
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(ProcessBackend::new(&config.backend)) as Arc<dyn ExecutionBackend>);

        let access = self.access.or_else(|| {
            config.access_control.server.as_ref().map(|server| {
                Arc::new(SipAccessControl::new(
                    server.clone(),
                    Duration::from_millis(config.access_control.timeout_ms),
                )) as Arc<dyn AccessControl>
            })
        });
        let mut batcher = RunBatcher::new(&config);
        if let Some(access) = access {
            batcher = batcher.with_access_control(access);
        }
        let batcher = Arc::new(batcher);

        let aggregator = Arc::new(ResultAggregator::new(&config, bus.clone()));
        let adapter = Arc::new(ExecutionAdapter::new(
            &config,
            backend,
            ports.clone(),
            tracker.clone(),
            aggregator.clone(),
        ));
        let dispatch = Arc::new(DispatchEngine::new(
            queue.clone(),
            batcher.clone(),
            adapter,
            ports,
            config.dispatch.clone(),
        ));

        info!(
            max_calls = config.admission.max_calls,
            signaling = ?config.ports.signaling(),
            media = ?config.ports.media(),
            "✅ Controller built"
        );

        Ok(Controller {
            config,
            tracker,
            queue,
            batcher,
            aggregator,
            dispatch,
            bus,
            handles: Mutex::new(Vec::new()),
        })
    }
}
