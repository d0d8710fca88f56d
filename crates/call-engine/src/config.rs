//! Controller configuration
//!
//! Loaded from TOML, then overridden from the environment, then validated. Every section
//! has defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! [ports]
//! signaling_start = 15060
//! signaling_end = 15259
//! media_start = 20000
//! media_end = 29999
//!
//! [admission]
//! max_calls = 20
//!
//! [addressing.customer]
//! public_ip = "203.0.113.10"
//! bound_ip = "10.0.0.10"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use hct_infra_common::config::{env_value, load_toml, override_from_env, parse_toml};

use crate::error::{CallEngineError, Result};
use crate::ports::{DEFAULT_MEDIA_STRIDE, PortRange};
use crate::types::{Addressing, Context};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ports: PortsConfig,
    pub admission: AdmissionConfig,
    pub addressing: AddressingConfig,
    pub access_control: AccessControlConfig,
    pub paths: PathsConfig,
    pub backend: BackendConfig,
    pub dispatch: DispatchConfig,
    pub bus: BusConfig,
    pub reports: ReportsConfig,
    pub http: HttpConfig,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub signaling_start: u16,
    pub signaling_end: u16,
    pub media_start: u16,
    pub media_end: u16,
    pub media_stride: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            signaling_start: 15060,
            signaling_end: 15259,
            media_start: 20000,
            media_end: 29999,
            media_stride: DEFAULT_MEDIA_STRIDE,
        }
    }
}

impl PortsConfig {
    pub fn signaling(&self) -> PortRange {
        PortRange::new(self.signaling_start, self.signaling_end)
    }

    pub fn media(&self) -> PortRange {
        PortRange::new(self.media_start, self.media_end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Hard limit for one run, soft limit for all runs in flight
    pub max_calls: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self { max_calls: 20 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressingConfig {
    pub customer: Addressing,
    pub provider: Addressing,
    /// Address of this controller, used in links handed back to clients
    pub local_ip: String,
}

impl AddressingConfig {
    pub fn for_context(&self, context: Context) -> &Addressing {
        match context {
            Context::Customer => &self.customer,
            Context::Provider => &self.provider,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessControlConfig {
    /// `host:port` of the peer that receives `allow` commands
    pub server: Option<String>,
    pub timeout_ms: u64,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            server: None,
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Where scenario descriptors are written
    pub descriptor_dir: PathBuf,
    /// Where the backend writes result and log files
    pub output_dir: PathBuf,
    /// Audio file played by every call
    pub reference_audio: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            descriptor_dir: PathBuf::from("/xml/hct"),
            output_dir: PathBuf::from("/output"),
            reference_audio: "/git/voip_patrol/voice_ref_files/reference_8000.wav".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub program: String,
    pub log_level: String,
    /// Wait before the first run-state poll
    pub initial_grace_ms: u64,
    pub poll_interval_ms: u64,
    /// Kill a batch that runs longer than this. Unset means wait forever.
    pub max_execution_secs: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "voip_patrol".to_string(),
            log_level: "1".to_string(),
            initial_grace_ms: 10_000,
            poll_interval_ms: 1_000,
            max_execution_secs: None,
        }
    }
}

impl BackendConfig {
    pub fn initial_grace(&self) -> Duration {
        Duration::from_millis(self.initial_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_execution(&self) -> Option<Duration> {
        self.max_execution_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Pause after launching a batch of repeats of one spec
    pub repeat_batch_delay_ms: u64,
    /// Pause after launching a group of single-attempt specs
    pub group_batch_delay_ms: u64,
    /// Idle time when the queue is empty or batches are running
    pub idle_delay_ms: u64,
    /// How long a batch waits for a free port pair before it is abandoned
    pub port_wait_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            repeat_batch_delay_ms: 250,
            group_batch_delay_ms: 2100,
            idle_delay_ms: 500,
            port_wait_ms: 30_000,
        }
    }
}

impl DispatchConfig {
    pub fn repeat_batch_delay(&self) -> Duration {
        Duration::from_millis(self.repeat_batch_delay_ms)
    }

    pub fn group_batch_delay(&self) -> Duration {
        Duration::from_millis(self.group_batch_delay_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn port_wait(&self) -> Duration {
        Duration::from_millis(self.port_wait_ms)
    }
}

/// Channel names on the message bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub customer_commands: String,
    pub provider_commands: String,
    pub details: String,
    pub summary: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            customer_commands: "hct.commands.customer".to_string(),
            provider_commands: "hct.commands.provider".to_string(),
            details: "hct.report.details".to_string(),
            summary: "hct.report.summary".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// Final summaries kept for status queries, oldest evicted first
    pub retained_summaries: usize,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            retained_summaries: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn load_from_str(content: &str) -> Result<Self> {
        parse_toml(content).map_err(|e| CallEngineError::Configuration(e.to_string()))
    }

    /// Read a TOML file, apply environment overrides and validate
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut config: Self =
            load_toml(path).map_err(|e| CallEngineError::Configuration(e.to_string()))?;
        config.apply_env();
        config.validate().map_err(|errors| CallEngineError::Configuration(errors.join("; ")))?;
        Ok(config)
    }

    /// Override fields from the deployment environment variables
    pub fn apply_env(&mut self) {
        override_from_env(&mut self.addressing.customer.public_ip, "PUBLIC_IP_CUSTOMER");
        override_from_env(&mut self.addressing.customer.bound_ip, "PRIVATE_IP_CUSTOMER");
        override_from_env(&mut self.addressing.provider.public_ip, "PUBLIC_IP_PROVIDER");
        override_from_env(&mut self.addressing.provider.bound_ip, "PRIVATE_IP_PROVIDER");
        override_from_env(&mut self.addressing.local_ip, "LOCAL_IP");
        override_from_env(&mut self.backend.log_level, "VP_LOG_LEVEL");
        override_from_env(&mut self.bus.customer_commands, "RMQ_SUB_Q_CUSTOMER");
        override_from_env(&mut self.bus.provider_commands, "RMQ_SUB_Q_PROVIDER");
        override_from_env(&mut self.bus.details, "RMQ_PUB_KEY_DETAILS");
        override_from_env(&mut self.bus.summary, "RMQ_PUB_KEY_SUMMARY");

        if let (Some(ip), Some(port)) = (env_value("VP_SERVER_IP"), env_value("VP_SERVER_PORT")) {
            self.access_control.server = Some(format!("{}:{}", ip, port));
        }
    }

    /// Collect every problem instead of stopping at the first
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.ports.signaling_end < self.ports.signaling_start {
            errors.push(format!(
                "invalid signaling port range {} !<= {}",
                self.ports.signaling_start, self.ports.signaling_end
            ));
        }
        if self.ports.media_end < self.ports.media_start {
            errors.push(format!(
                "invalid media port range {} !<= {}",
                self.ports.media_start, self.ports.media_end
            ));
        }
        if self.ports.media_stride == 0 {
            errors.push("ports.media_stride must be > 0".to_string());
        }
        let overlap = self.ports.signaling().contains(self.ports.media_start)
            || self.ports.media().contains(self.ports.signaling_start);
        if overlap {
            errors.push("signaling and media port ranges overlap".to_string());
        }
        if self.admission.max_calls == 0 {
            errors.push("admission.max_calls must be > 0".to_string());
        }
        if self.backend.program.trim().is_empty() {
            errors.push("backend.program must not be empty".to_string());
        }
        if self.backend.poll_interval_ms == 0 {
            errors.push("backend.poll_interval_ms must be > 0".to_string());
        }
        if self.reports.retained_summaries == 0 {
            errors.push("reports.retained_summaries must be > 0".to_string());
        }
        if self.bus.details == self.bus.summary {
            errors.push("bus.details and bus.summary must be distinct channels".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
