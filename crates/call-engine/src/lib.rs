//! # HCT Call Engine
//!
//! Orchestrates telephony load-test runs. A run is a list of call specifications submitted
//! over HTTP or the message bus; the engine splits it into batches, gives every batch a
//! signaling/media port pair, hands each batch to an external call generator and, once every
//! attempt of the run is accounted for, folds the generator's result files into one summary.
//!
//! ## Architecture
//!
//! ```text
//!   submit ─▶ RunBatcher ─▶ CompletionTracker.reserve ─▶ RunQueue
//!                                                          │
//!                                   DispatchEngine ◀───────┘
//!                                    │ plan, PortPool lease, pace
//!                                    ▼
//!                         ExecutionAdapter (one task per batch)
//!                          descriptor ─▶ ExecutionBackend ─▶ poll
//!                                    │ release ports + attempts
//!                                    ▼
//!                  CompletionTracker.release == Finished ?
//!                                    │ yes
//!                                    ▼
//!                   ResultAggregator ─▶ details / summary on the bus
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hct_call_engine::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load_from_file("hct.toml")?;
//!     let controller = Arc::new(ControllerBuilder::new().with_config(config).build()?);
//!     controller.start().await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, hct_call_engine::api::router(controller.clone())).await?;
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod adapter;
pub mod aggregator;
pub mod api;
pub mod backend;
pub mod batcher;
pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod ports;
pub mod queue;
pub mod report;
pub mod server;
pub mod stats;
pub mod tracker;
pub mod types;

pub use access::{AccessControl, SipAccessControl};
pub use adapter::{BatchCompletion, ExecutionAdapter};
pub use aggregator::ResultAggregator;
pub use backend::{ExecutionBackend, ExecutionHandle, Invocation, ProcessBackend};
pub use batcher::{Admission, BatchPlan, RunBatcher};
pub use config::EngineConfig;
pub use dispatch::DispatchEngine;
pub use error::{CallEngineError, Result};
pub use ports::{PortKind, PortLease, PortPool, PortRange};
pub use queue::RunQueue;
pub use report::{Classification, ResultRecord, SummaryReport};
pub use server::{Controller, ControllerBuilder, ControllerStats};
pub use stats::Stat;
pub use tracker::{CompletionTracker, ReleaseOutcome};
pub use types::{Batch, CallParams, CallSpec, Context, Run, RunId, RunKind, RunRequest};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        AccessControl, CallEngineError, Controller, ControllerBuilder, EngineConfig,
        ExecutionBackend, ExecutionHandle, Invocation, RunId, RunRequest,
        SummaryReport,
    };
}
