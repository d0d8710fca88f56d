//! Per-attempt result records and the run summary built from them

use serde::{Deserialize, Serialize};

use crate::stats::Stat;
use crate::types::{N2T_MARKER, RunId, SUCCESS_CODE};

/// Action type of records that describe a call attempt
pub const CALL_ACTION: &str = "call";

pub const RESULT_REACHABLE: &str = "REACHABLE";
pub const RESULT_UNREACHABLE: &str = "UNREACHABLE";

/// One line of backend output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultRecord {
    pub label: String,
    pub start: String,
    pub end: String,
    pub action: String,
    pub from: String,
    pub to: String,
    pub result: String,
    pub expected_cause_code: i32,
    pub cause_code: i32,
    pub reason: String,
    pub tone_detected: i32,
    #[serde(rename = "callid")]
    pub call_id: String,
    pub transport: String,
    pub peer_socket: String,
    pub duration: i32,
    pub expected_duration: i32,
    pub max_duration: i32,
    pub hangup_duration: i32,
    pub call_info: CallInfo,
    pub sip_latency: SipLatency,
    pub rtp_stats: Vec<RtpStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallInfo {
    pub local_uri: String,
    pub remote_uri: String,
    pub local_contact: String,
    pub remote_contact: String,
}

/// Milliseconds from INVITE to the 100, 18x and 200 responses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SipLatency {
    #[serde(rename = "invite100Ms", alias = "Invite100Ms")]
    pub invite100_ms: i32,
    #[serde(rename = "invite18xMs", alias = "Invite18xMs")]
    pub invite18x_ms: i32,
    #[serde(rename = "invite200Ms", alias = "Invite200Ms")]
    pub invite200_ms: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpStats {
    pub rtt: i32,
    #[serde(rename = "remote_rtp_socket")]
    pub remote_socket: String,
    pub codec_name: String,
    pub codec_rate: String,
    #[serde(rename = "Tx")]
    pub tx: RtpTransfer,
    #[serde(rename = "Rx")]
    pub rx: RtpTransfer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpTransfer {
    pub jitter_avg: f32,
    pub jitter_max: f32,
    pub pkt: i32,
    pub kbytes: i32,
    pub loss: i32,
    #[serde(rename = "mos_lq")]
    pub mos: f32,
}

/// How a call record was counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Connected,
    Failed,
    Reachable,
    Unreachable,
    /// Final code below 200; counted in `calls` only
    Unanswered,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SipSummary {
    pub invite100: Stat,
    pub invite18x: Stat,
    pub invite200: Stat,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtpDirection {
    pub pkt: i64,
    pub kbytes: i64,
    pub lost: i64,
    pub jitter_max: f32,
}

impl RtpDirection {
    fn add(&mut self, transfer: &RtpTransfer) {
        self.pkt += i64::from(transfer.pkt);
        self.kbytes += i64::from(transfer.kbytes);
        self.lost += i64::from(transfer.loss);
        if transfer.jitter_max > self.jitter_max {
            self.jitter_max = transfer.jitter_max;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtpSummary {
    pub rtt_avg: i64,
    pub tx: RtpDirection,
    pub rx: RtpDirection,
    #[serde(skip)]
    rtt_total: i64,
    #[serde(skip)]
    rtt_samples: i64,
}

impl RtpSummary {
    fn add(&mut self, stats: &RtpStats) {
        self.tx.add(&stats.tx);
        self.rx.add(&stats.rx);
        if stats.rtt > 0 {
            self.rtt_total += i64::from(stats.rtt);
            self.rtt_samples += 1;
            self.rtt_avg = self.rtt_total / self.rtt_samples;
        }
    }
}

/// Summary of one run, built incrementally from result records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub uuid: RunId,
    pub calls: u32,
    /// Total duration of connected calls, seconds
    pub duration: i64,
    pub avg_duration: f64,
    pub failed: u32,
    pub connected: u32,
    pub reachable: u32,
    pub sip: SipSummary,
    pub rtp: RtpSummary,
}

impl SummaryReport {
    pub fn new(run_id: RunId) -> Self {
        Self {
            uuid: run_id,
            ..Default::default()
        }
    }

    /// Fold one record into the summary.
    ///
    /// Returns `None` for non-call records, which are ignored. Network number test records
    /// get their `result` field set to REACHABLE or UNREACHABLE.
    pub fn record(&mut self, record: &mut ResultRecord) -> Option<Classification> {
        if record.action != CALL_ACTION {
            return None;
        }

        let latency = &record.sip_latency;
        for (stat, sample) in [
            (&mut self.sip.invite100, latency.invite100_ms),
            (&mut self.sip.invite18x, latency.invite18x_ms),
            (&mut self.sip.invite200, latency.invite200_ms),
        ] {
            if sample > 0 {
                stat.update(sample);
            }
        }

        if let Some(first) = record.rtp_stats.first() {
            self.rtp.add(first);
        }

        self.calls += 1;
        let classification = classify(record);
        match classification {
            Classification::Reachable => {
                record.result = RESULT_REACHABLE.to_string();
                self.reachable += 1;
            }
            Classification::Unreachable => {
                record.result = RESULT_UNREACHABLE.to_string();
                self.failed += 1;
            }
            Classification::Failed => self.failed += 1,
            Classification::Connected => {
                self.connected += 1;
                self.duration += i64::from(record.duration);
                self.avg_duration = (self.duration / i64::from(self.connected)) as f64;
            }
            Classification::Unanswered => {}
        }
        Some(classification)
    }
}

/// Classify a call record. Network number tests are judged on tone detection first.
pub fn classify(record: &ResultRecord) -> Classification {
    if record.expected_cause_code == N2T_MARKER {
        if record.tone_detected != 0 || record.cause_code == SUCCESS_CODE {
            Classification::Reachable
        } else {
            Classification::Unreachable
        }
    } else if record.cause_code >= 300 {
        Classification::Failed
    } else if record.cause_code >= 200 {
        Classification::Connected
    } else {
        Classification::Unanswered
    }
}
