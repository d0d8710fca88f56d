//! # Port Pool
//!
//! Hands out signaling and media ports from two disjoint ranges. Each backend invocation
//! binds one signaling port and one media port, so batches lease them as a
//! [`PortLease`] pair.
//!
//! Signaling ports are scanned one by one from the start of the range. Media ports are
//! scanned in strides (200 by default): a call's RTP/RTCP streams occupy a contiguous block
//! above the base port, and striding keeps two invocations from overlapping.
//!
//! All operations on both ranges go through one lock. Allocation happens once per batch,
//! which is rare next to the time a batch spends executing.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

use crate::error::{CallEngineError, Result};

/// Default distance between two media base ports
pub const DEFAULT_MEDIA_STRIDE: u16 = 200;

/// Which range a port belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Signaling,
    Media,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Signaling => f.write_str("signaling"),
            PortKind::Media => f.write_str("media"),
        }
    }
}

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

/// A signaling + media port pair owned by one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortLease {
    pub signaling: u16,
    pub media: u16,
}

#[derive(Debug)]
struct RangeState {
    range: PortRange,
    stride: u16,
    in_use: BTreeSet<u16>,
}

impl RangeState {
    fn new(range: PortRange, stride: u16) -> Self {
        Self {
            range,
            stride: stride.max(1),
            in_use: BTreeSet::new(),
        }
    }

    fn allocate(&mut self) -> Option<u16> {
        let port = (self.range.start..=self.range.end)
            .step_by(self.stride as usize)
            .find(|p| !self.in_use.contains(p))?;
        self.in_use.insert(port);
        Some(port)
    }

    fn release(&mut self, port: u16) -> bool {
        self.in_use.remove(&port)
    }

    fn capacity(&self) -> usize {
        (self.range.start..=self.range.end)
            .step_by(self.stride as usize)
            .count()
    }
}

#[derive(Debug)]
struct PoolState {
    signaling: RangeState,
    media: RangeState,
}

impl PoolState {
    fn range_mut(&mut self, kind: PortKind) -> &mut RangeState {
        match kind {
            PortKind::Signaling => &mut self.signaling,
            PortKind::Media => &mut self.media,
        }
    }

    fn range(&self, kind: PortKind) -> &RangeState {
        match kind {
            PortKind::Signaling => &self.signaling,
            PortKind::Media => &self.media,
        }
    }
}

/// Allocator for signaling and media ports
#[derive(Debug)]
pub struct PortPool {
    state: Mutex<PoolState>,
}

impl PortPool {
    /// Create a pool with the default media stride.
    ///
    /// Fails with [`CallEngineError::Configuration`] if either range ends before it starts.
    pub fn new(signaling: PortRange, media: PortRange) -> Result<Self> {
        Self::with_media_stride(signaling, media, DEFAULT_MEDIA_STRIDE)
    }

    pub fn with_media_stride(signaling: PortRange, media: PortRange, stride: u16) -> Result<Self> {
        if signaling.end < signaling.start {
            return Err(CallEngineError::Configuration(format!(
                "invalid signaling port range {} !<= {}",
                signaling.start, signaling.end
            )));
        }
        if media.end < media.start {
            return Err(CallEngineError::Configuration(format!(
                "invalid media port range {} !<= {}",
                media.start, media.end
            )));
        }
        if stride == 0 {
            return Err(CallEngineError::Configuration("media stride must be > 0".to_string()));
        }

        Ok(Self {
            state: Mutex::new(PoolState {
                signaling: RangeState::new(signaling, 1),
                media: RangeState::new(media, stride),
            }),
        })
    }

    /// First free signaling port, or `None` when the range is exhausted
    pub fn allocate_signaling_port(&self) -> Option<u16> {
        let port = self.state.lock().signaling.allocate();
        debug!("allocate signaling port: {:?}", port);
        port
    }

    /// First free media base port on a stride boundary, or `None` when exhausted
    pub fn allocate_media_port(&self) -> Option<u16> {
        let port = self.state.lock().media.allocate();
        debug!("allocate media port: {:?}", port);
        port
    }

    /// Allocate one port of each kind, or neither
    pub fn allocate_pair(&self) -> Option<PortLease> {
        let mut state = self.state.lock();
        let signaling = state.signaling.allocate()?;
        match state.media.allocate() {
            Some(media) => Some(PortLease { signaling, media }),
            None => {
                state.signaling.release(signaling);
                None
            }
        }
    }

    /// Mark a port free again. Releasing a free or foreign port is a no-op.
    pub fn release(&self, port: u16, kind: PortKind) {
        let mut state = self.state.lock();
        let range = state.range_mut(kind);
        if !range.range.contains(port) {
            warn!("release of {} port {} outside {:?}", kind, port, range.range);
            return;
        }
        if !range.release(port) {
            debug!("{} port {} already free", kind, port);
        }
    }

    pub fn release_lease(&self, lease: PortLease) {
        self.release(lease.signaling, PortKind::Signaling);
        self.release(lease.media, PortKind::Media);
    }

    pub fn in_use(&self, kind: PortKind) -> usize {
        self.state.lock().range(kind).in_use.len()
    }

    /// Number of allocatable ports of a kind
    pub fn capacity(&self, kind: PortKind) -> usize {
        self.state.lock().range(kind).capacity()
    }

    pub fn is_in_use(&self, port: u16, kind: PortKind) -> bool {
        self.state.lock().range(kind).in_use.contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pool(sig: (u16, u16), media: (u16, u16)) -> PortPool {
        PortPool::new(PortRange::new(sig.0, sig.1), PortRange::new(media.0, media.1)).unwrap()
    }

    #[test]
    fn test_invalid_ranges_are_config_errors() {
        let err = PortPool::new(PortRange::new(10, 5), PortRange::new(100, 200)).unwrap_err();
        assert!(matches!(err, CallEngineError::Configuration(_)));
        let err = PortPool::new(PortRange::new(5, 10), PortRange::new(200, 100)).unwrap_err();
        assert!(matches!(err, CallEngineError::Configuration(_)));
    }

    #[test]
    fn test_signaling_is_sequential_until_exhausted() {
        let pool = pool((5060, 5062), (20000, 20000));
        assert_eq!(pool.allocate_signaling_port(), Some(5060));
        assert_eq!(pool.allocate_signaling_port(), Some(5061));
        assert_eq!(pool.allocate_signaling_port(), Some(5062));
        assert_eq!(pool.allocate_signaling_port(), None);
    }

    #[test]
    fn test_media_uses_stride_slots() {
        let pool = pool((5060, 5060), (20000, 20450));
        assert_eq!(pool.capacity(PortKind::Media), 3);
        assert_eq!(pool.allocate_media_port(), Some(20000));
        assert_eq!(pool.allocate_media_port(), Some(20200));
        assert_eq!(pool.allocate_media_port(), Some(20400));
        assert_eq!(pool.allocate_media_port(), None);
    }

    #[test]
    fn test_release_is_idempotent_and_reusable() {
        let pool = pool((5060, 5061), (20000, 20000));
        let port = pool.allocate_signaling_port().unwrap();
        pool.release(port, PortKind::Signaling);
        pool.release(port, PortKind::Signaling);
        assert_eq!(pool.in_use(PortKind::Signaling), 0);
        assert_eq!(pool.allocate_signaling_port(), Some(port));
    }

    #[test]
    fn test_pair_allocation_rolls_back() {
        let pool = pool((5060, 5065), (20000, 20000));
        let lease = pool.allocate_pair().unwrap();
        assert_eq!(lease, PortLease { signaling: 5060, media: 20000 });

        // media exhausted: signaling must not leak
        assert_eq!(pool.allocate_pair(), None);
        assert_eq!(pool.in_use(PortKind::Signaling), 1);

        pool.release_lease(lease);
        assert_eq!(pool.in_use(PortKind::Signaling), 0);
        assert_eq!(pool.in_use(PortKind::Media), 0);
    }

    #[test]
    fn test_foreign_port_release_is_ignored() {
        let pool = pool((5060, 5061), (20000, 20000));
        pool.allocate_signaling_port();
        pool.release(9999, PortKind::Signaling);
        assert_eq!(pool.in_use(PortKind::Signaling), 1);
    }

    proptest! {
        #[test]
        fn prop_signaling_ports_stay_in_range_and_unique(
            start in 1024u16..60000,
            len in 0u16..64,
            takes in 1usize..100,
        ) {
            let end = start.saturating_add(len);
            let pool = PortPool::new(PortRange::new(start, end), PortRange::new(1, 1)).unwrap();
            let mut seen = BTreeSet::new();
            for _ in 0..takes {
                match pool.allocate_signaling_port() {
                    Some(port) => {
                        prop_assert!(port >= start && port <= end);
                        prop_assert!(seen.insert(port));
                    }
                    None => prop_assert_eq!(seen.len(), (end - start) as usize + 1),
                }
            }
        }

        #[test]
        fn prop_release_then_allocate_returns_lowest_free(
            len in 1u16..32,
            victim in 0u16..32,
        ) {
            let start = 10000u16;
            let end = start + len;
            let pool = PortPool::new(PortRange::new(start, end), PortRange::new(1, 1)).unwrap();
            while pool.allocate_signaling_port().is_some() {}
            let port = start + victim.min(len);
            pool.release(port, PortKind::Signaling);
            prop_assert_eq!(pool.allocate_signaling_port(), Some(port));
        }
    }
}
