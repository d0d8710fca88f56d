//! Execution backend contract
//!
//! A backend runs one batch descriptor and writes one JSON result line per finished
//! attempt. The adapter only needs to start an invocation, ask whether it is still
//! running, and stop it when a timeout is configured.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::{CallEngineError, Result};
use crate::types::RunId;

/// Everything the backend needs to execute one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub run_id: RunId,
    pub batch_index: usize,
    pub signaling_port: u16,
    pub media_port: u16,
    pub descriptor: PathBuf,
    pub result: PathBuf,
    pub log: PathBuf,
    pub public_ip: String,
    pub bound_ip: String,
}

/// Opaque reference to a running invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionHandle(pub String);

impl ExecutionHandle {
    pub fn for_invocation(invocation: &Invocation) -> Self {
        Self(format!("{}-{}", invocation.run_id, invocation.batch_index))
    }
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Start executing a descriptor
    async fn launch(&self, invocation: &Invocation) -> Result<ExecutionHandle>;

    /// Whether the invocation is still running. Unknown handles are not running.
    async fn is_running(&self, handle: &ExecutionHandle) -> Result<bool>;

    /// Stop an invocation that overran its time budget
    async fn terminate(&self, handle: &ExecutionHandle) -> Result<()>;
}

/// Runs the test agent as a local child process
pub struct ProcessBackend {
    program: String,
    log_level: String,
    children: DashMap<ExecutionHandle, Child>,
}

impl ProcessBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            program: config.program.clone(),
            log_level: config.log_level.clone(),
            children: DashMap::new(),
        }
    }

    /// Command-line arguments for an invocation
    pub fn arguments(&self, invocation: &Invocation) -> Vec<String> {
        vec![
            "--udp".to_string(),
            "--rtp-port".to_string(),
            invocation.media_port.to_string(),
            "--port".to_string(),
            invocation.signaling_port.to_string(),
            "--conf".to_string(),
            invocation.descriptor.display().to_string(),
            "--output".to_string(),
            invocation.result.display().to_string(),
            "--log".to_string(),
            invocation.log.display().to_string(),
            "--ip-addr".to_string(),
            invocation.public_ip.clone(),
            "--bound-addr".to_string(),
            invocation.bound_ip.clone(),
            "--log-level-file".to_string(),
            self.log_level.clone(),
            "--log-level-console".to_string(),
            self.log_level.clone(),
        ]
    }

    pub fn running(&self) -> usize {
        self.children.len()
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    async fn launch(&self, invocation: &Invocation) -> Result<ExecutionHandle> {
        let args = self.arguments(invocation);
        debug!("exec {} {}", self.program, args.join(" "));

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    CallEngineError::BackendUnavailable(format!("{}: {}", self.program, e))
                }
                _ => CallEngineError::Backend(format!("spawn {}: {}", self.program, e)),
            })?;

        let handle = ExecutionHandle::for_invocation(invocation);
        info!(
            run_id = %invocation.run_id,
            batch = invocation.batch_index,
            pid = child.id(),
            "🚀 backend started"
        );
        self.children.insert(handle.clone(), child);
        Ok(handle)
    }

    async fn is_running(&self, handle: &ExecutionHandle) -> Result<bool> {
        let status = match self.children.get_mut(handle) {
            Some(mut child) => child.try_wait()?,
            None => return Ok(false),
        };
        match status {
            Some(status) => {
                self.children.remove(handle);
                if !status.success() {
                    warn!("backend {} exited with {}", handle.0, status);
                }
                Ok(false)
            }
            None => Ok(true),
        }
    }

    async fn terminate(&self, handle: &ExecutionHandle) -> Result<()> {
        if let Some((_, mut child)) = self.children.remove(handle) {
            child.start_kill()?;
            let _ = child.wait().await;
        }
        Ok(())
    }
}
