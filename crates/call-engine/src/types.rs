//! Run, call spec and batch types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CallEngineError;
use crate::ports::PortLease;

/// Expected cause code that tags network number test attempts. Not a real SIP code.
pub const N2T_MARKER: i32 = 800;

/// Final response class counted as connected
pub const SUCCESS_CODE: i32 = 200;

/// Originator used when a call spec names none
pub const DEFAULT_FROM: &str = "hct_controller";

/// Unique identifier of a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Counterparty a run is executed for. Selects the address pair used by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    #[default]
    Customer,
    Provider,
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::Customer => f.write_str("customer"),
            Context::Provider => f.write_str("provider"),
        }
    }
}

impl FromStr for Context {
    type Err = CallEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Context::Customer),
            "provider" => Ok(Context::Provider),
            other => Err(CallEngineError::InvalidRun(format!("unknown context '{}'", other))),
        }
    }
}

/// Kind of test a run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// Ordinary calls, classified connected/failed
    #[default]
    Call,
    /// Network number test: one zero-duration early-media attempt per spec,
    /// classified reachable/unreachable
    #[serde(rename = "n2t")]
    NetworkNumberTest,
}

impl FromStr for RunKind {
    type Err = CallEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "call" | "calls" => Ok(RunKind::Call),
            "n2t" => Ok(RunKind::NetworkNumberTest),
            other => Err(CallEngineError::InvalidRun(format!("unknown run type '{}'", other))),
        }
    }
}

/// Run description as submitted over HTTP or the bus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default, alias = "id", alias = "Uuid")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub cps: Option<u32>,
    #[serde(default)]
    pub calls: Vec<CallRequest>,
}

/// One call definition inside a [`RunRequest`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallRequest {
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub allow: Option<String>,
    #[serde(default)]
    pub expected_cause_code: Option<i32>,
}

/// A call definition with defaults filled in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSpec {
    /// Position within the run
    pub index: usize,
    pub destination: String,
    pub from: String,
    pub username: String,
    pub password: String,
    /// Requested call duration in seconds
    pub duration: u32,
    /// Requested attempts; 0 means a single attempt
    pub repeat: u32,
    pub expected_cause_code: i32,
    pub allow: Option<String>,
    pub early_record: bool,
}

impl CallSpec {
    /// Concrete attempts this spec produces
    pub fn attempts(&self) -> u32 {
        self.repeat.max(1)
    }
}

/// Local addresses handed to the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Addressing {
    /// Address advertised in signaling
    pub public_ip: String,
    /// Address the backend binds to
    pub bound_ip: String,
}

/// An admitted run. Never mutated after batching.
#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: RunId,
    pub context: Context,
    pub kind: RunKind,
    pub cps: Option<u32>,
    pub specs: Vec<CallSpec>,
    pub addressing: Addressing,
    pub submitted_at: DateTime<Utc>,
}

impl Run {
    /// Attempts across every spec. Summed in `u64` since counts come straight from clients.
    pub fn total_attempts(&self) -> u64 {
        self.specs.iter().map(|s| u64::from(s.attempts())).sum()
    }
}

/// A fully resolved batch item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallParams {
    pub run_id: RunId,
    pub spec_index: usize,
    pub destination: String,
    pub from: String,
    pub username: String,
    pub password: String,
    pub duration: u32,
    pub early_record: bool,
    pub expected_cause_code: i32,
    /// Extra repeats on top of the first attempt (at most 49)
    pub repeat: u32,
    pub signaling_port: u16,
    pub media_port: u16,
    pub public_ip: String,
    pub bound_ip: String,
}

impl CallParams {
    pub fn attempts(&self) -> u32 {
        self.repeat + 1
    }
}

/// Attempts dispatched together in one backend invocation
#[derive(Debug, Clone)]
pub struct Batch {
    pub run_id: RunId,
    /// Position of the batch within its run; keys the descriptor and result files
    pub index: usize,
    pub items: Vec<CallParams>,
    /// Port pair leased for this invocation, released once on completion
    pub ports: PortLease,
    pub addressing: Addressing,
}

impl Batch {
    pub fn attempts(&self) -> u32 {
        self.items.iter().map(CallParams::attempts).sum()
    }

    /// Longest requested duration among the items, in seconds
    pub fn max_duration(&self) -> u32 {
        self.items.iter().map(|i| i.duration).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_field_names() {
        let json = r#"{
            "context": "provider",
            "type": "n2t",
            "cps": 5,
            "calls": [{
                "destination": "x@host:5060",
                "from": "alice",
                "count": 3,
                "username": "u",
                "password": "p",
                "duration": 10,
                "allow": "10.0.0.1",
                "expected_cause_code": 486
            }]
        }"#;
        let request: RunRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.context.as_deref(), Some("provider"));
        assert_eq!(request.kind.as_deref(), Some("n2t"));
        assert_eq!(request.cps, Some(5));
        let call = &request.calls[0];
        assert_eq!(call.count, Some(3));
        assert_eq!(call.expected_cause_code, Some(486));
        assert_eq!(call.allow.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_context_and_kind_parsing() {
        assert_eq!("Customer".parse::<Context>().unwrap(), Context::Customer);
        assert_eq!("provider".parse::<Context>().unwrap(), Context::Provider);
        assert!("carrier".parse::<Context>().is_err());
        assert_eq!("n2t".parse::<RunKind>().unwrap(), RunKind::NetworkNumberTest);
        assert_eq!("call".parse::<RunKind>().unwrap(), RunKind::Call);
        assert!("fax".parse::<RunKind>().is_err());
    }

    #[test]
    fn test_zero_repeat_counts_one_attempt() {
        let spec = CallSpec {
            index: 0,
            destination: "x@h".into(),
            from: DEFAULT_FROM.into(),
            username: String::new(),
            password: String::new(),
            duration: 0,
            repeat: 0,
            expected_cause_code: SUCCESS_CODE,
            allow: None,
            early_record: false,
        };
        assert_eq!(spec.attempts(), 1);
        assert_eq!(CallSpec { repeat: 7, ..spec }.attempts(), 7);
    }
}
