//! # Run Batcher
//!
//! Turns a submitted [`RunRequest`] into an admitted [`Run`], and a run into the batches
//! the dispatch engine launches.
//!
//! ```text
//!  RunRequest ──ingest──▶ Run ──plan──▶ [BatchPlan] ──build_batch(+PortLease)──▶ Batch
//!                 │
//!                 ├─ context → address pair
//!                 ├─ defaults (from, expected code 200)
//!                 ├─ n2t overrides
//!                 └─ allow directives
//! ```
//!
//! Batching rules:
//!
//! - a spec with `repeat = N > 0` becomes `ceil(N / 50)` batches of one item each; every
//!   item covers at most 50 attempts (`repeat` ≤ 49 on top of the first attempt) and
//!   launches are paced by the short repeat delay;
//! - specs with `repeat = 0` are grouped 50 to a batch, paced by the longer group delay.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::access::AccessControl;
use crate::config::{AddressingConfig, DispatchConfig, EngineConfig};
use crate::error::{CallEngineError, Result};
use crate::ports::PortLease;
use crate::types::{
    Batch, CallParams, CallSpec, Context, DEFAULT_FROM, N2T_MARKER, Run, RunId, RunKind,
    RunRequest, SUCCESS_CODE,
};

/// Most attempts one batch item (and one backend invocation) carries
pub const MAX_BATCH_ATTEMPTS: u32 = 50;

/// Most specs grouped into a batch of single attempts
pub const MAX_GROUP_ITEMS: usize = 50;

const ACCESS_GRANTED: u16 = 200;

/// One item of a planned batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedItem {
    pub spec_index: usize,
    /// Extra repeats on top of the first attempt
    pub repeat: u32,
}

/// A batch before ports are leased
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    pub index: usize,
    pub items: Vec<PlannedItem>,
    /// Pause after launching this batch
    pub pace: Duration,
}

impl BatchPlan {
    pub fn attempts(&self) -> u32 {
        self.items.iter().map(|i| i.repeat + 1).sum()
    }
}

/// Outcome of a successful admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Accepted although attempts in flight plus this run exceed the maximum
    OverCommitted { in_flight: u64 },
}

/// Resolves, admits and batches runs
pub struct RunBatcher {
    addressing: AddressingConfig,
    pacing: DispatchConfig,
    max_calls: u32,
    access: Option<Arc<dyn AccessControl>>,
}

impl RunBatcher {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            addressing: config.addressing.clone(),
            pacing: config.dispatch.clone(),
            max_calls: config.admission.max_calls,
            access: None,
        }
    }

    pub fn with_access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = Some(access);
        self
    }

    /// Resolve a request and apply its allow directives.
    ///
    /// `origin` is the context of the channel the request arrived on; an explicit
    /// `context` field wins over it.
    pub async fn ingest(&self, request: RunRequest, origin: Option<Context>) -> Result<Run> {
        let run = self.resolve(request, origin)?;
        self.authorize(&run).await?;
        Ok(run)
    }

    /// Fill defaults, classify the run type and pick addressing. No side effects.
    pub fn resolve(&self, request: RunRequest, origin: Option<Context>) -> Result<Run> {
        let context = match non_empty(request.context.as_deref()) {
            Some(c) => c.parse()?,
            None => origin.unwrap_or_default(),
        };
        let kind = match non_empty(request.kind.as_deref()) {
            Some(k) => k.parse()?,
            None => RunKind::Call,
        };
        if request.calls.is_empty() {
            return Err(CallEngineError::InvalidRun("run has no calls".to_string()));
        }

        let n2t = kind == RunKind::NetworkNumberTest;
        let specs = request
            .calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| {
                let destination = call.destination.trim().to_string();
                if destination.is_empty() {
                    return Err(CallEngineError::InvalidRun(format!(
                        "call {}: empty request URI",
                        index
                    )));
                }
                Ok(CallSpec {
                    index,
                    destination,
                    from: non_empty(call.from.as_deref()).unwrap_or(DEFAULT_FROM).to_string(),
                    username: call.username.unwrap_or_default(),
                    password: call.password.unwrap_or_default(),
                    duration: if n2t { 0 } else { call.duration.unwrap_or(0) },
                    repeat: if n2t { 1 } else { call.count.unwrap_or(0) },
                    expected_cause_code: if n2t {
                        N2T_MARKER
                    } else {
                        call.expected_cause_code.unwrap_or(SUCCESS_CODE)
                    },
                    allow: non_empty(call.allow.as_deref()).map(str::to_string),
                    early_record: n2t,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let id = match non_empty(request.uuid.as_deref()) {
            Some(id) => checked_run_id(id)?,
            None => RunId::new(),
        };

        Ok(Run {
            id,
            context,
            kind,
            cps: request.cps,
            specs,
            addressing: self.addressing.for_context(context).clone(),
            submitted_at: Utc::now(),
        })
    }

    /// Send every distinct allow directive; anything but 200 rejects the run
    pub async fn authorize(&self, run: &Run) -> Result<()> {
        let ips: BTreeSet<&str> = run.specs.iter().filter_map(|s| s.allow.as_deref()).collect();
        if ips.is_empty() {
            return Ok(());
        }
        let access = self.access.as_ref().ok_or_else(|| {
            CallEngineError::Configuration(
                "allow directive requires access_control.server".to_string(),
            )
        })?;

        for ip in ips {
            let status = access.allow(ip).await;
            if status != ACCESS_GRANTED {
                warn!(run_id = %run.id, ip, status, "allow refused");
                return Err(CallEngineError::AccessDenied {
                    ip: ip.to_string(),
                    status,
                });
            }
            info!(run_id = %run.id, ip, "allow granted");
        }
        Ok(())
    }

    /// Reject runs larger than the maximum; flag runs that overcommit the system
    pub fn check_admission(&self, run: &Run, in_flight: u64) -> Result<Admission> {
        let requested = run.total_attempts();
        if requested > u64::from(self.max_calls) {
            return Err(CallEngineError::TooManyCalls {
                requested,
                max: self.max_calls,
            });
        }
        if in_flight.saturating_add(requested) > u64::from(self.max_calls) {
            warn!(
                run_id = %run.id,
                requested,
                in_flight,
                max = self.max_calls,
                "⚠️ too many active calls, run accepted anyway"
            );
            return Ok(Admission::OverCommitted { in_flight });
        }
        Ok(Admission::Accepted)
    }

    /// Split a run into ordered batch plans
    pub fn plan(&self, run: &Run) -> Vec<BatchPlan> {
        let mut plans: Vec<BatchPlan> = Vec::new();
        let mut group: Vec<PlannedItem> = Vec::new();

        for spec in &run.specs {
            if spec.repeat > 0 {
                let mut remaining = spec.repeat;
                while remaining > 0 {
                    let chunk = remaining.min(MAX_BATCH_ATTEMPTS);
                    plans.push(BatchPlan {
                        index: plans.len(),
                        items: vec![PlannedItem {
                            spec_index: spec.index,
                            repeat: chunk - 1,
                        }],
                        pace: self.pacing.repeat_batch_delay(),
                    });
                    remaining -= chunk;
                }
            } else {
                group.push(PlannedItem {
                    spec_index: spec.index,
                    repeat: 0,
                });
                if group.len() == MAX_GROUP_ITEMS {
                    self.flush_group(&mut plans, &mut group);
                }
            }
        }
        self.flush_group(&mut plans, &mut group);

        debug!(run_id = %run.id, batches = plans.len(), "planned batches");
        plans
    }

    fn flush_group(&self, plans: &mut Vec<BatchPlan>, group: &mut Vec<PlannedItem>) {
        if group.is_empty() {
            return;
        }
        plans.push(BatchPlan {
            index: plans.len(),
            items: std::mem::take(group),
            pace: self.pacing.group_batch_delay(),
        });
    }

    /// Resolve a plan into a dispatchable batch using a leased port pair
    pub fn build_batch(&self, run: &Run, plan: &BatchPlan, ports: PortLease) -> Batch {
        let items = plan
            .items
            .iter()
            .filter_map(|item| run.specs.get(item.spec_index).map(|spec| (item, spec)))
            .map(|(item, spec)| CallParams {
                run_id: run.id.clone(),
                spec_index: spec.index,
                destination: spec.destination.clone(),
                from: spec.from.clone(),
                username: spec.username.clone(),
                password: spec.password.clone(),
                duration: spec.duration,
                early_record: spec.early_record,
                expected_cause_code: spec.expected_cause_code,
                repeat: item.repeat,
                signaling_port: ports.signaling,
                media_port: ports.media,
                public_ip: run.addressing.public_ip.clone(),
                bound_ip: run.addressing.bound_ip.clone(),
            })
            .collect();

        Batch {
            run_id: run.id.clone(),
            index: plan.index,
            items,
            ports,
            addressing: run.addressing.clone(),
        }
    }
}

/// Run ids name artifact files, so only `[A-Za-z0-9_-]` is accepted
fn checked_run_id(id: &str) -> Result<RunId> {
    if id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        Ok(RunId::from(id))
    } else {
        Err(CallEngineError::InvalidRun(format!("invalid run id '{}'", id)))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallRequest;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    struct ScriptedAccess {
        status: u16,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AccessControl for ScriptedAccess {
        async fn allow(&self, ip: &str) -> u16 {
            self.seen.lock().push(ip.to_string());
            self.status
        }
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.addressing.customer.public_ip = "203.0.113.1".into();
        config.addressing.customer.bound_ip = "10.0.0.1".into();
        config.addressing.provider.public_ip = "203.0.113.2".into();
        config.addressing.provider.bound_ip = "10.0.0.2".into();
        config.admission.max_calls = 500;
        config
    }

    fn call(destination: &str, count: Option<u32>) -> CallRequest {
        CallRequest {
            destination: destination.to_string(),
            count,
            ..Default::default()
        }
    }

    fn request(calls: Vec<CallRequest>) -> RunRequest {
        RunRequest {
            calls,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let batcher = RunBatcher::new(&config());
        let run = batcher
            .resolve(request(vec![call("x@host:5060", Some(3))]), None)
            .unwrap();

        assert_eq!(run.context, Context::Customer);
        assert_eq!(run.kind, RunKind::Call);
        assert_eq!(run.addressing.public_ip, "203.0.113.1");
        let spec = &run.specs[0];
        assert_eq!(spec.from, DEFAULT_FROM);
        assert_eq!(spec.expected_cause_code, SUCCESS_CODE);
        assert_eq!(spec.repeat, 3);
        assert!(!spec.early_record);
        assert_eq!(run.total_attempts(), 3);
        assert!(!run.id.as_str().is_empty());
    }

    #[test]
    fn test_explicit_context_beats_origin() {
        let batcher = RunBatcher::new(&config());
        let mut req = request(vec![call("x@h", None)]);
        let run = batcher.resolve(req.clone(), Some(Context::Provider)).unwrap();
        assert_eq!(run.context, Context::Provider);
        assert_eq!(run.addressing.bound_ip, "10.0.0.2");

        req.context = Some("customer".into());
        let run = batcher.resolve(req, Some(Context::Provider)).unwrap();
        assert_eq!(run.context, Context::Customer);
    }

    #[test]
    fn test_supplied_uuid_is_kept() {
        let batcher = RunBatcher::new(&config());
        let mut req = request(vec![call("x@h", None)]);
        req.uuid = Some("4a7c-run".into());
        assert_eq!(batcher.resolve(req, None).unwrap().id.as_str(), "4a7c-run");
    }

    #[test]
    fn test_run_id_must_be_file_safe() {
        let batcher = RunBatcher::new(&config());
        for bad in ["../x", "a/b", "..", "run 1", "a\\b", "résumé"] {
            let mut req = request(vec![call("x@h", None)]);
            req.uuid = Some(bad.into());
            assert!(
                matches!(batcher.resolve(req, None), Err(CallEngineError::InvalidRun(_))),
                "accepted {:?}",
                bad
            );
        }

        let mut req = request(vec![call("x@h", None)]);
        req.uuid = Some("Run_2024-01".into());
        assert_eq!(batcher.resolve(req, None).unwrap().id.as_str(), "Run_2024-01");
    }

    #[test]
    fn test_n2t_overrides_spec() {
        let batcher = RunBatcher::new(&config());
        let mut req = request(vec![CallRequest {
            destination: "18005550100@carrier".into(),
            count: Some(10),
            duration: Some(30),
            expected_cause_code: Some(486),
            ..Default::default()
        }]);
        req.kind = Some("n2t".into());
        let run = batcher.resolve(req, None).unwrap();

        let spec = &run.specs[0];
        assert_eq!(run.kind, RunKind::NetworkNumberTest);
        assert_eq!(spec.repeat, 1);
        assert_eq!(spec.duration, 0);
        assert_eq!(spec.expected_cause_code, N2T_MARKER);
        assert!(spec.early_record);
        assert_eq!(run.total_attempts(), 1);
    }

    #[test]
    fn test_empty_destination_rejected() {
        let batcher = RunBatcher::new(&config());
        let err = batcher
            .resolve(request(vec![call("x@h", None), call("  ", None)]), None)
            .unwrap_err();
        assert!(matches!(err, CallEngineError::InvalidRun(msg) if msg.contains("empty request URI")));
    }

    #[test]
    fn test_no_calls_rejected() {
        let batcher = RunBatcher::new(&config());
        assert!(matches!(
            batcher.resolve(request(vec![]), None),
            Err(CallEngineError::InvalidRun(_))
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let batcher = RunBatcher::new(&config());
        let mut req = request(vec![call("x@h", None)]);
        req.kind = Some("fax".into());
        assert!(matches!(batcher.resolve(req, None), Err(CallEngineError::InvalidRun(_))));
    }

    #[test]
    fn test_admission() {
        let mut cfg = config();
        cfg.admission.max_calls = 20;
        let batcher = RunBatcher::new(&cfg);

        let run = batcher.resolve(request(vec![call("x@h", Some(21))]), None).unwrap();
        assert!(matches!(
            batcher.check_admission(&run, 0),
            Err(CallEngineError::TooManyCalls { requested: 21, max: 20 })
        ));

        let run = batcher.resolve(request(vec![call("x@h", Some(15))]), None).unwrap();
        assert_eq!(batcher.check_admission(&run, 0).unwrap(), Admission::Accepted);
        assert_eq!(
            batcher.check_admission(&run, 10).unwrap(),
            Admission::OverCommitted { in_flight: 10 }
        );
    }

    #[test]
    fn test_huge_counts_rejected_without_overflow() {
        let batcher = RunBatcher::new(&config());
        let run = batcher
            .resolve(
                request(vec![call("x@h", Some(u32::MAX)), call("y@h", Some(2))]),
                None,
            )
            .unwrap();

        assert_eq!(run.total_attempts(), 4_294_967_297);
        assert!(matches!(
            batcher.check_admission(&run, u64::MAX),
            Err(CallEngineError::TooManyCalls { requested: 4_294_967_297, max: 500 })
        ));
    }

    #[test]
    fn test_repeat_spec_chunks_by_fifty() {
        let batcher = RunBatcher::new(&config());
        let run = batcher.resolve(request(vec![call("x@h", Some(120))]), None).unwrap();
        let plans = batcher.plan(&run);

        assert_eq!(plans.len(), 3);
        let repeats: Vec<u32> = plans.iter().map(|p| p.items[0].repeat).collect();
        assert_eq!(repeats, vec![49, 49, 19]);
        assert!(plans.iter().all(|p| p.pace == Duration::from_millis(250)));
        assert_eq!(plans.iter().map(|p| p.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_single_specs_grouped_by_fifty() {
        let batcher = RunBatcher::new(&config());
        let calls = (0..120).map(|i| call(&format!("{}@h", i), None)).collect();
        let run = batcher.resolve(request(calls), None).unwrap();
        let plans = batcher.plan(&run);

        let sizes: Vec<usize> = plans.iter().map(|p| p.items.len()).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert!(plans.iter().all(|p| p.pace == Duration::from_millis(2100)));
        assert_eq!(plans[1].items[0].spec_index, 50);
    }

    #[test]
    fn test_build_batch_stamps_ports_and_addresses() {
        let batcher = RunBatcher::new(&config());
        let run = batcher
            .resolve(request(vec![call("a@h", None), call("b@h", None)]), None)
            .unwrap();
        let plan = &batcher.plan(&run)[0];
        let lease = PortLease { signaling: 15060, media: 20000 };
        let batch = batcher.build_batch(&run, plan, lease);

        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.attempts(), 2);
        assert!(batch.items.iter().all(|i| i.signaling_port == 15060 && i.media_port == 20000));
        assert_eq!(batch.items[1].destination, "b@h");
        assert_eq!(batch.items[0].public_ip, "203.0.113.1");
    }

    #[tokio::test]
    async fn test_allow_directive_granted() {
        let access = Arc::new(ScriptedAccess { status: 200, seen: Mutex::new(vec![]) });
        let batcher = RunBatcher::new(&config()).with_access_control(access.clone());
        let mut c1 = call("a@h", None);
        c1.allow = Some("192.0.2.5".into());
        let mut c2 = call("b@h", None);
        c2.allow = Some("192.0.2.5".into());

        batcher.ingest(request(vec![c1, c2]), None).await.unwrap();
        assert_eq!(access.seen.lock().as_slice(), ["192.0.2.5"]);
    }

    #[tokio::test]
    async fn test_allow_directive_refused() {
        let access = Arc::new(ScriptedAccess { status: 503, seen: Mutex::new(vec![]) });
        let batcher = RunBatcher::new(&config()).with_access_control(access);
        let mut c = call("a@h", None);
        c.allow = Some("192.0.2.9".into());

        let err = batcher.ingest(request(vec![c]), None).await.unwrap_err();
        assert!(matches!(err, CallEngineError::AccessDenied { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_allow_without_server_is_config_error() {
        let batcher = RunBatcher::new(&config());
        let mut c = call("a@h", None);
        c.allow = Some("192.0.2.9".into());
        assert!(matches!(
            batcher.ingest(request(vec![c]), None).await,
            Err(CallEngineError::Configuration(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_batches_cover_every_attempt(counts in prop::collection::vec(0u32..260, 1..12)) {
            let batcher = RunBatcher::new(&config());
            let calls = counts.iter().map(|c| call("x@h", Some(*c))).collect();
            let run = batcher.resolve(request(calls), None).unwrap();
            let plans = batcher.plan(&run);

            let planned: u64 = plans.iter().map(|p| u64::from(p.attempts())).sum();
            prop_assert_eq!(planned, run.total_attempts());
            prop_assert!(plans.iter().all(|p| p.attempts() <= MAX_BATCH_ATTEMPTS));
            for (i, plan) in plans.iter().enumerate() {
                prop_assert_eq!(plan.index, i);
            }
        }

        #[test]
        fn prop_repeat_batches_are_ceil_n_over_fifty(n in 1u32..1000) {
            let batcher = RunBatcher::new(&config());
            let run = batcher.resolve(request(vec![call("x@h", Some(n))]), None).unwrap();
            let plans = batcher.plan(&run);
            prop_assert_eq!(plans.len() as u32, n.div_ceil(MAX_BATCH_ATTEMPTS));
            let last = plans.last().unwrap().attempts();
            let expected_last = if n % MAX_BATCH_ATTEMPTS == 0 { MAX_BATCH_ATTEMPTS } else { n % MAX_BATCH_ATTEMPTS };
            prop_assert_eq!(last, expected_last);
        }
    }
}
