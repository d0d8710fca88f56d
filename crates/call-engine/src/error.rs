//! Error types for the call engine

use std::path::PathBuf;
use thiserror::Error;

use crate::ports::PortKind;
use crate::types::RunId;

/// Errors raised while admitting, dispatching and aggregating runs
#[derive(Error, Debug)]
pub enum CallEngineError {
    /// Invalid configuration, fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Run asks for more attempts than the system-wide maximum
    #[error("too many calls requested: {requested} > {max} (max calls)")]
    TooManyCalls { requested: u64, max: u32 },

    /// Submission could not be turned into a run
    #[error("invalid run: {0}")]
    InvalidRun(String),

    /// Access-control peer refused the `allow` directive
    #[error("allow {ip} refused with status {status}")]
    AccessDenied { ip: String, status: u16 },

    /// No free port in the range
    #[error("no free {0} port")]
    PortsExhausted(PortKind),

    /// Scenario descriptor could not be rendered
    #[error("descriptor error: {0}")]
    Descriptor(String),

    /// Execution backend missing or not running
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend started but failed while running
    #[error("backend error: {0}")]
    Backend(String),

    /// A result line could not be parsed
    #[error("malformed result in {path}:{line}: {reason}")]
    MalformedResult {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Release on a run that holds no reservation
    #[error("unknown run: {0}")]
    UnknownRun(RunId),

    #[error("bus error: {0}")]
    Bus(#[from] hct_infra_common::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for call engine operations
pub type Result<T> = std::result::Result<T, CallEngineError>;
