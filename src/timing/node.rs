use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::clock::monotonic_ns;

use super::identity::TimerIdentity;
use super::Policy;

/// Point-in-time view of a node's cumulative counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounters {
    pub count: u64,
    pub total: u64,
    pub lag_count: u64,
    pub lag_total: u64,
}

impl NodeCounters {
    /// Per-field difference against an earlier snapshot of the same node.
    pub fn since(&self, earlier: &NodeCounters) -> NodeCounters {
        NodeCounters {
            count: self.count.saturating_sub(earlier.count),
            total: self.total.saturating_sub(earlier.total),
            lag_count: self.lag_count.saturating_sub(earlier.lag_count),
            lag_total: self.lag_total.saturating_sub(earlier.lag_total),
        }
    }
}

/// Atomic storage shared by both synchronization regimes.
struct CounterSet {
    depth: AtomicU32,
    start_ns: AtomicU64,
    cur_count: AtomicU64,
    cur_total: AtomicU64,
    count: AtomicU64,
    total: AtomicU64,
    lag_count: AtomicU64,
    lag_total: AtomicU64,
}

impl CounterSet {
    fn new() -> Self {
        Self {
            depth: AtomicU32::new(0),
            start_ns: AtomicU64::new(0),
            cur_count: AtomicU64::new(0),
            cur_total: AtomicU64::new(0),
            count: AtomicU64::new(0),
            total: AtomicU64::new(0),
            lag_count: AtomicU64::new(0),
            lag_total: AtomicU64::new(0),
        }
    }
}

/// Counter update regime, chosen at construction from the identity's
/// `cross_thread` flag.
///
/// `Local` assumes tick-thread-exclusive mutation and uses plain relaxed
/// load/store pairs; `Shared` pays for read-modify-write atomics so
/// worker threads may drive the timer concurrently with the tick thread.
enum Counters {
    Local(CounterSet),
    Shared(CounterSet),
}

impl Counters {
    fn set(&self) -> &CounterSet {
        match self {
            Counters::Local(s) | Counters::Shared(s) => s,
        }
    }

    /// Depth 0->1 records the start timestamp. Returns true on that
    /// transition.
    fn begin(&self, now_ns: u64) -> bool {
        match self {
            Counters::Local(s) => {
                let d = s.depth.load(Ordering::Relaxed);
                s.depth.store(d + 1, Ordering::Relaxed);
                if d == 0 {
                    s.start_ns.store(now_ns, Ordering::Relaxed);
                    true
                } else {
                    false
                }
            }
            Counters::Shared(s) => {
                let prev = s.depth.fetch_add(1, Ordering::Relaxed);
                if prev == 0 {
                    s.start_ns.store(now_ns, Ordering::Relaxed);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Depth 1->0 folds the elapsed span into the tick-local counters.
    /// A call at depth 0 (unmatched stop) is a no-op.
    fn end(&self, now_ns: u64) {
        match self {
            Counters::Local(s) => {
                let d = s.depth.load(Ordering::Relaxed);
                if d == 0 {
                    return;
                }
                s.depth.store(d - 1, Ordering::Relaxed);
                if d == 1 {
                    let diff = now_ns.saturating_sub(s.start_ns.load(Ordering::Relaxed));
                    let c = s.cur_count.load(Ordering::Relaxed);
                    s.cur_count.store(c + 1, Ordering::Relaxed);
                    let t = s.cur_total.load(Ordering::Relaxed);
                    s.cur_total.store(t + diff, Ordering::Relaxed);
                }
            }
            Counters::Shared(s) => {
                let mut d = s.depth.load(Ordering::Relaxed);
                loop {
                    if d == 0 {
                        return;
                    }
                    match s.depth.compare_exchange_weak(
                        d,
                        d - 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(cur) => d = cur,
                    }
                }
                if d == 1 {
                    let diff = now_ns.saturating_sub(s.start_ns.load(Ordering::Relaxed));
                    s.cur_count.fetch_add(1, Ordering::Relaxed);
                    s.cur_total.fetch_add(diff, Ordering::Relaxed);
                }
            }
        }
    }

    /// Rolls the tick-local counters into the cumulative ones, feeding
    /// the lag counters as well when the tick was violated.
    fn process_tick(&self, violated: bool) {
        match self {
            Counters::Local(s) => {
                let cc = s.cur_count.load(Ordering::Relaxed);
                let ct = s.cur_total.load(Ordering::Relaxed);
                s.cur_count.store(0, Ordering::Relaxed);
                s.cur_total.store(0, Ordering::Relaxed);
                s.count.store(s.count.load(Ordering::Relaxed) + cc, Ordering::Relaxed);
                s.total.store(s.total.load(Ordering::Relaxed) + ct, Ordering::Relaxed);
                if violated {
                    s.lag_count
                        .store(s.lag_count.load(Ordering::Relaxed) + cc, Ordering::Relaxed);
                    s.lag_total
                        .store(s.lag_total.load(Ordering::Relaxed) + ct, Ordering::Relaxed);
                }
            }
            Counters::Shared(s) => {
                // Swap so spans folded by workers after this point land in
                // the next tick, not nowhere.
                let cc = s.cur_count.swap(0, Ordering::Relaxed);
                let ct = s.cur_total.swap(0, Ordering::Relaxed);
                s.count.fetch_add(cc, Ordering::Relaxed);
                s.total.fetch_add(ct, Ordering::Relaxed);
                if violated {
                    s.lag_count.fetch_add(cc, Ordering::Relaxed);
                    s.lag_total.fetch_add(ct, Ordering::Relaxed);
                }
            }
        }
    }

    /// Zeroes the counters. A full reset also abandons any open span:
    /// a node left running when profiling was disabled would otherwise
    /// keep a stale depth forever, since `stop()` no-ops while disabled
    /// and the 1->0 fold would never fire again.
    fn reset(&self, full: bool) {
        let s = self.set();
        s.cur_count.store(0, Ordering::Relaxed);
        s.cur_total.store(0, Ordering::Relaxed);
        s.count.store(0, Ordering::Relaxed);
        s.total.store(0, Ordering::Relaxed);
        s.lag_count.store(0, Ordering::Relaxed);
        s.lag_total.store(0, Ordering::Relaxed);
        if full {
            s.depth.store(0, Ordering::Relaxed);
            s.start_ns.store(0, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> NodeCounters {
        let s = self.set();
        NodeCounters {
            count: s.count.load(Ordering::Relaxed),
            total: s.total.load(Ordering::Relaxed),
            lag_count: s.lag_count.load(Ordering::Relaxed),
            lag_total: s.lag_total.load(Ordering::Relaxed),
        }
    }
}

/// A single named, hierarchical counter with start/stop semantics.
///
/// Nested timing is non-exclusive: overlapping sections each accumulate
/// their full wall time; child time is never subtracted from the parent.
pub struct TimingNode {
    id: u32,
    identity: TimerIdentity,
    policy: Arc<Policy>,
    enabled: AtomicBool,
    in_interval: AtomicBool,
    counters: Counters,
}

impl TimingNode {
    pub(crate) fn new(id: u32, identity: TimerIdentity, policy: Arc<Policy>) -> Self {
        let set = CounterSet::new();
        let counters = if identity.cross_thread {
            Counters::Shared(set)
        } else {
            Counters::Local(set)
        };
        let node = Self {
            id,
            identity,
            policy,
            enabled: AtomicBool::new(false),
            in_interval: AtomicBool::new(false),
            counters,
        };
        node.recheck_enabled();
        node
    }

    /// Dense id, stable for the process lifetime.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn identity(&self) -> &TimerIdentity {
        &self.identity
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Begins a timed span. No-op while profiling (or this node) is
    /// disabled, so the disabled-state cost is a branch.
    pub fn start(self: &Arc<Self>) {
        if !self.policy.is_enabled() || !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        self.start_at(monotonic_ns());
    }

    /// Ends a timed span. An unmatched stop is a no-op.
    pub fn stop(&self) {
        if !self.policy.is_enabled() || !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        self.counters.end(monotonic_ns());
    }

    /// RAII wrapper around [`start`](Self::start)/[`stop`](Self::stop).
    pub fn scope(self: &Arc<Self>) -> TimingGuard {
        self.start();
        TimingGuard {
            node: Arc::clone(self),
        }
    }

    pub(crate) fn start_at(self: &Arc<Self>, now_ns: u64) {
        if self.counters.begin(now_ns) && !self.in_interval.swap(true, Ordering::Relaxed) {
            self.policy.register_active(self);
        }
    }

    #[cfg(test)]
    pub(crate) fn stop_at(&self, now_ns: u64) {
        self.counters.end(now_ns);
    }

    /// Invoked exactly once per tick per active node by the aggregator,
    /// after the tick's violation status is known.
    pub(crate) fn process_tick(&self, violated: bool) {
        self.counters.process_tick(violated);
    }

    /// Zeroes all counters. A full reset also re-derives `enabled` and
    /// drops the interval-membership bookkeeping.
    pub(crate) fn reset(&self, full: bool) {
        self.counters.reset(full);
        if full {
            self.recheck_enabled();
            self.in_interval.store(false, Ordering::Relaxed);
        }
    }

    /// Re-derives `enabled` from current policy: global switch AND, for
    /// nested detail timers, the verbose flag.
    pub(crate) fn recheck_enabled(&self) {
        let enabled = self.policy.is_enabled()
            && (self.policy.is_verbose() || !self.identity.verbosity_gated());
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn clear_interval_membership(&self) {
        self.in_interval.store(false, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> NodeCounters {
        self.counters.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> u32 {
        self.counters.set().depth.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> (u64, u64) {
        let s = self.counters.set();
        (
            s.cur_count.load(Ordering::Relaxed),
            s.cur_total.load(Ordering::Relaxed),
        )
    }
}

/// Stops the node when dropped.
pub struct TimingGuard {
    node: Arc<TimingNode>,
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        self.node.stop();
    }
}
