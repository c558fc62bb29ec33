use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::ProfilerConfig;
use crate::constants::{
    MEMORY_DECAY_DEN, MEMORY_DECAY_NUM, MEMORY_SAMPLE_TICKS, TICKS_PER_MINUTE, TICKS_PER_SECOND,
    TICK_VIOLATION_THRESHOLD,
};
use crate::history::{HistoryRing, HistorySnapshot, MinuteReport, NodeEntry, TickBreakdown};
use crate::sysmetrics;
use crate::timing::identity::TimerIdentity;
use crate::timing::node::{NodeCounters, TimingNode};
use crate::timing::registry::Registry;
use crate::timing::Policy;

/// Externally supplied per-tick counts, provided by the host tick loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickSample {
    /// Connected sessions this tick.
    pub sessions: u32,
    pub entities: u32,
    pub activated_entities: u32,
    pub block_entities: u32,
    /// Mean session round-trip time this tick, in milliseconds.
    pub avg_ping_ms: f64,
}

/// Orchestrates once-per-tick rollups, config-driven resets and the
/// minute/interval rollover state machine.
///
/// All methods run exclusively on the host tick thread; the only state
/// reachable from other threads is the nodes' own counters.
pub struct Aggregator {
    registry: Arc<Registry>,
    policy: Arc<Policy>,
    config: Arc<ArcSwap<ProfilerConfig>>,
    root: Arc<TimingNode>,

    pending_full_reset: Arc<AtomicBool>,
    pending_recheck: Arc<AtomicBool>,

    ring: HistoryRing,
    minutes: Vec<MinuteReport>,

    // Minute-scoped working state.
    tick_counts: TickBreakdown,
    ping_sum_ms: f64,
    ping_ticks: u64,
    minute_start: Instant,
    last_minute_root: NodeCounters,

    // Interval-scoped working state.
    tick_in_interval: u64,
    interval_start_ms: i64,

    // Session-scoped state.
    session_start: Instant,
    session_start_ms: i64,
    mem_used_avg: f64,
    mem_free_avg: f64,

    tick_start: Option<Instant>,
}

impl Aggregator {
    pub(crate) fn new(
        config: Arc<ArcSwap<ProfilerConfig>>,
        registry: Arc<Registry>,
        policy: Arc<Policy>,
        pending_full_reset: Arc<AtomicBool>,
        pending_recheck: Arc<AtomicBool>,
    ) -> Self {
        let root = registry.get_or_create(TimerIdentity::new("server", "full tick"));
        let capacity = config.load().frame_capacity();
        let now_ms = Utc::now().timestamp_millis();

        Self {
            registry,
            policy,
            config,
            root,
            pending_full_reset,
            pending_recheck,
            ring: HistoryRing::new(capacity),
            minutes: Vec::new(),
            tick_counts: TickBreakdown::default(),
            ping_sum_ms: 0.0,
            ping_ticks: 0,
            minute_start: Instant::now(),
            last_minute_root: NodeCounters::default(),
            tick_in_interval: 0,
            interval_start_ms: now_ms,
            session_start: Instant::now(),
            session_start_ms: now_ms,
            mem_used_avg: 0.0,
            mem_free_avg: 0.0,
            tick_start: None,
        }
    }

    /// Begins a tick: consumes deferred policy changes, then starts the
    /// root node. Returns true when a full reset was performed.
    pub fn start_tick(&mut self) -> bool {
        let mut did_full_reset = false;

        if self.pending_full_reset.swap(false, Ordering::Relaxed) {
            self.apply_policy_from_config();
            self.full_reset();
            did_full_reset = true;
        } else if self.pending_recheck.swap(false, Ordering::Relaxed) {
            self.apply_policy_from_config();
            self.registry.recheck_all();
            debug!("re-derived enabled flags after verbosity change");
        }

        if !self.policy.is_enabled() {
            return did_full_reset;
        }

        self.tick_start = Some(Instant::now());
        self.root.start();
        did_full_reset
    }

    /// Ends a tick: stops the root node, rolls every active node's
    /// tick-local counters into cumulative state, and drives the
    /// minute/interval rollovers.
    pub fn stop_tick(&mut self, sample: &TickSample) {
        let Some(tick_start) = self.tick_start.take() else {
            return;
        };

        self.root.stop();
        let violated = tick_start.elapsed() > TICK_VIOLATION_THRESHOLD;

        self.tick_in_interval += 1;
        self.tick_counts.timed += 1;
        self.tick_counts.player += u64::from(sample.sessions);
        self.tick_counts.entity += u64::from(sample.entities);
        self.tick_counts.activated_entity += u64::from(sample.activated_entities);
        self.tick_counts.block_entity += u64::from(sample.block_entities);
        self.ping_sum_ms += sample.avg_ping_ms;
        self.ping_ticks += 1;

        if self.tick_in_interval % MEMORY_SAMPLE_TICKS == 0 {
            let m = sysmetrics::memory();
            self.mem_used_avg = decay(self.mem_used_avg, m.used as f64);
            self.mem_free_avg = decay(self.mem_free_avg, m.free as f64);
        }

        let root_id = self.root.id();
        for node in self.policy.active_nodes() {
            if node.id() == root_id {
                continue;
            }
            // One malformed node must not abort accounting for the rest.
            let outcome = catch_unwind(AssertUnwindSafe(|| node.process_tick(violated)));
            if outcome.is_err() {
                warn!(
                    id = node.id(),
                    group = %node.identity().group,
                    name = %node.identity().name,
                    "timer accounting fault, node skipped this tick",
                );
            }
        }
        self.root.process_tick(violated);

        if self.tick_in_interval % TICKS_PER_MINUTE == 0 {
            self.push_minute_report();
        }

        let history_interval = self.config.load().history_interval;
        if self.tick_in_interval >= history_interval {
            self.rollover();
        }
    }

    /// Captures the still-open interval without disturbing it. If the
    /// interval holds a partial minute, a synthetic trailing minute
    /// report is appended so no data is lost.
    pub fn fresh_snapshot(&self) -> HistorySnapshot {
        let mut minutes = self.minutes.clone();
        if self.tick_counts.timed > 0 {
            minutes.push(self.build_minute_report());
        }

        let mut entries = Vec::new();
        for node in self.policy.active_nodes() {
            let counters = node.snapshot();
            if counters.count > 0 {
                entries.push(NodeEntry {
                    timer_id: node.id(),
                    counters,
                });
            }
        }

        HistorySnapshot {
            start_epoch_ms: self.interval_start_ms,
            end_epoch_ms: Utc::now().timestamp_millis(),
            total_ticks: minutes.iter().map(|m| m.ticks.timed).sum(),
            entries,
            minutes,
        }
    }

    pub fn ring(&self) -> &HistoryRing {
        &self.ring
    }

    pub fn session_start_epoch_ms(&self) -> i64 {
        self.session_start_ms
    }

    pub fn session_elapsed(&self) -> std::time::Duration {
        self.session_start.elapsed()
    }

    pub(crate) fn resize_ring(&mut self, capacity: usize) {
        self.ring.resize(capacity);
    }

    /// Updates the live policy flags from the current config. Runs only
    /// at tick start so flag changes never interleave with accounting.
    fn apply_policy_from_config(&self) {
        let cfg = self.config.load();
        self.policy.set_enabled(cfg.enabled);
        self.policy.set_verbose(cfg.verbose);
    }

    /// Full reset: every registered node, the ring, the minute queue and
    /// the epoch clocks. Runs before any timing begins in the tick.
    fn full_reset(&mut self) {
        self.registry.reset_all(true);
        self.policy.drain_active();
        self.ring.clear();
        self.minutes.clear();
        self.tick_counts = TickBreakdown::default();
        self.ping_sum_ms = 0.0;
        self.ping_ticks = 0;
        self.tick_in_interval = 0;
        self.last_minute_root = NodeCounters::default();
        self.mem_used_avg = 0.0;
        self.mem_free_avg = 0.0;

        let now_ms = Utc::now().timestamp_millis();
        self.interval_start_ms = now_ms;
        self.session_start_ms = now_ms;
        self.session_start = Instant::now();
        self.minute_start = Instant::now();

        info!(
            enabled = self.policy.is_enabled(),
            verbose = self.policy.is_verbose(),
            "profiler state fully reset",
        );
    }

    fn build_minute_report(&self) -> MinuteReport {
        let elapsed = self.minute_start.elapsed().as_secs_f64().max(f64::EPSILON);
        let tps = (self.tick_counts.timed as f64 / elapsed).min(TICKS_PER_SECOND as f64);
        let avg_ping_ms = if self.ping_ticks > 0 {
            self.ping_sum_ms / self.ping_ticks as f64
        } else {
            0.0
        };

        MinuteReport {
            epoch_secs: Utc::now().timestamp(),
            tps,
            avg_ping_ms,
            full_tick: self.root.snapshot().since(&self.last_minute_root),
            ticks: self.tick_counts,
            avg_used_memory: self.mem_used_avg as u64,
            avg_free_memory: self.mem_free_avg as u64,
            load_avg: sysmetrics::load_average(),
        }
    }

    fn push_minute_report(&mut self) {
        let report = self.build_minute_report();
        self.minutes.push(report);

        self.tick_counts = TickBreakdown::default();
        self.ping_sum_ms = 0.0;
        self.ping_ticks = 0;
        self.minute_start = Instant::now();
        self.last_minute_root = self.root.snapshot();
    }

    /// Soft interval rollover: closes the interval into the ring and
    /// clears the interval's working counters. The ring itself is
    /// untouched beyond the push.
    fn rollover(&mut self) {
        let snapshot = self.fresh_snapshot();
        self.ring.push(snapshot);

        for node in self.policy.drain_active() {
            node.reset(false);
        }
        self.minutes.clear();
        self.tick_counts = TickBreakdown::default();
        self.ping_sum_ms = 0.0;
        self.ping_ticks = 0;
        self.tick_in_interval = 0;
        self.last_minute_root = NodeCounters::default();
        self.interval_start_ms = Utc::now().timestamp_millis();
        self.minute_start = Instant::now();

        debug!(frames = self.ring.len(), "history interval rolled over");
    }
}

/// Memory EMA step: `avg * 59/60 + sample * 1/60`, applied once per
/// 20-tick sample. The cadence/weight pairing is part of the report
/// contract; see `constants`.
fn decay(avg: f64, sample: f64) -> f64 {
    avg * (MEMORY_DECAY_NUM / MEMORY_DECAY_DEN) + sample / MEMORY_DECAY_DEN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_setup(history_interval: u64) -> (Aggregator, Arc<Registry>, Arc<Policy>) {
        let policy = Arc::new(Policy::new(true, true));
        let registry = Arc::new(Registry::new(Arc::clone(&policy)));
        // Bypasses validate() on purpose: small intervals keep tests fast.
        let config = Arc::new(ArcSwap::from_pointee(ProfilerConfig {
            history_interval,
            history_length: history_interval * 3,
            ..Default::default()
        }));
        let agg = Aggregator::new(
            config,
            Arc::clone(&registry),
            Arc::clone(&policy),
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        );
        (agg, registry, policy)
    }

    fn run_tick(agg: &mut Aggregator, work: impl FnOnce()) {
        agg.start_tick();
        work();
        agg.stop_tick(&TickSample {
            sessions: 3,
            entities: 10,
            activated_entities: 5,
            block_entities: 2,
            avg_ping_ms: 40.0,
        });
    }

    #[test]
    fn test_decay_formula_exact() {
        let next = decay(600.0, 1200.0);
        assert!((next - (600.0 * 59.0 / 60.0 + 1200.0 / 60.0)).abs() < 1e-9);
    }

    #[test]
    fn test_fresh_snapshot_appends_synthetic_partial_minute() {
        let (mut agg, registry, _) = test_setup(1_000_000);
        let timer = registry.get_or_create(TimerIdentity::new("world", "entity tick"));

        for _ in 0..5 {
            run_tick(&mut agg, || {
                timer.start();
                timer.stop();
            });
        }

        let snap = agg.fresh_snapshot();
        assert_eq!(snap.minutes.len(), 1);
        assert_eq!(snap.minutes[0].ticks.timed, 5);
        assert_eq!(snap.minutes[0].ticks.player, 15);
        assert_eq!(snap.total_ticks, 5);

        let entry = snap
            .entries
            .iter()
            .find(|e| e.timer_id == timer.id())
            .expect("timer has an entry");
        assert_eq!(entry.counters.count, 5);
    }

    #[test]
    fn test_rollover_pushes_frame_and_clears_working_state() {
        let (mut agg, registry, policy) = test_setup(4);
        let timer = registry.get_or_create(TimerIdentity::new("world", "entity tick"));

        for _ in 0..4 {
            run_tick(&mut agg, || {
                timer.start();
                timer.stop();
            });
        }

        assert_eq!(agg.ring().len(), 1);
        let frame = agg.ring().frames().next().expect("one frame");
        assert_eq!(frame.total_ticks, 4);
        assert!(frame.entries.iter().any(|e| e.timer_id == timer.id()));

        // Soft rollover cleared counters and the active collection.
        assert_eq!(timer.snapshot(), NodeCounters::default());
        assert!(policy.active_nodes().is_empty());

        // The node re-registers on its next start.
        run_tick(&mut agg, || {
            timer.start();
            timer.stop();
        });
        assert!(policy.active_nodes().iter().any(|n| n.id() == timer.id()));
    }

    #[test]
    fn test_ring_respects_capacity_across_rollovers() {
        let (mut agg, _, _) = test_setup(2);

        for _ in 0..2 * 5 {
            run_tick(&mut agg, || {});
        }

        // history_length = 3 * interval.
        assert_eq!(agg.ring().len(), 3);
    }

    #[test]
    fn test_full_reset_flag_consumed_at_start_tick() {
        let policy = Arc::new(Policy::new(true, true));
        let registry = Arc::new(Registry::new(Arc::clone(&policy)));
        let config = Arc::new(ArcSwap::from_pointee(ProfilerConfig {
            history_interval: 1_000_000,
            ..Default::default()
        }));
        let full_reset = Arc::new(AtomicBool::new(false));
        let mut agg = Aggregator::new(
            config,
            Arc::clone(&registry),
            Arc::clone(&policy),
            Arc::clone(&full_reset),
            Arc::new(AtomicBool::new(false)),
        );

        let timer = registry.get_or_create(TimerIdentity::new("world", "entity tick"));
        run_tick(&mut agg, || {
            timer.start();
            timer.stop();
        });
        assert!(timer.snapshot().count > 0);

        full_reset.store(true, Ordering::Relaxed);
        assert!(agg.start_tick());
        agg.stop_tick(&TickSample::default());

        assert_eq!(timer.snapshot(), NodeCounters::default());
        assert!(agg.ring().is_empty());
        assert!(!full_reset.load(Ordering::Relaxed));
    }

    #[test]
    fn test_violated_tick_feeds_lag_counters() {
        let (mut agg, registry, _) = test_setup(1_000_000);
        let timer = registry.get_or_create(TimerIdentity::new("world", "entity tick"));

        run_tick(&mut agg, || {
            timer.start();
            std::thread::sleep(TICK_VIOLATION_THRESHOLD + std::time::Duration::from_millis(15));
            timer.stop();
        });

        let snap = timer.snapshot();
        assert_eq!(snap.lag_count, 1);
        assert!(snap.lag_total >= TICK_VIOLATION_THRESHOLD.as_nanos() as u64);
    }

    #[test]
    fn test_disabled_profiler_skips_accounting() {
        let policy = Arc::new(Policy::new(false, false));
        let registry = Arc::new(Registry::new(Arc::clone(&policy)));
        let config = Arc::new(ArcSwap::from_pointee(ProfilerConfig {
            enabled: false,
            ..Default::default()
        }));
        let mut agg = Aggregator::new(
            config,
            Arc::clone(&registry),
            Arc::clone(&policy),
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        );

        agg.start_tick();
        agg.stop_tick(&TickSample::default());

        assert_eq!(agg.fresh_snapshot().total_ticks, 0);
    }
}
