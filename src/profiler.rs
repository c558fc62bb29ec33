use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::info;

use crate::config::ProfilerConfig;
use crate::export::payload::HostInfo;
use crate::export::{Pipeline, Requester};
use crate::history::HistorySnapshot;
use crate::tick::{Aggregator, TickSample};
use crate::timing::identity::TimerIdentity;
use crate::timing::node::TimingNode;
use crate::timing::registry::Registry;
use crate::timing::Policy;

/// Top-level profiler handle owned by the host server.
///
/// All tick-driving methods (`start_tick`, `stop_tick`) must be called
/// from the tick thread. Everything else, including config changes and
/// report requests, may come from any thread; such changes are deferred
/// and take effect at the next tick boundary.
pub struct Profiler {
    config: Arc<ArcSwap<ProfilerConfig>>,
    registry: Arc<Registry>,
    aggregator: Mutex<Aggregator>,
    pipeline: Pipeline,
    host: HostInfo,
    pending_full_reset: Arc<AtomicBool>,
    pending_recheck: Arc<AtomicBool>,
}

impl Profiler {
    pub fn new(mut config: ProfilerConfig, host: HostInfo) -> Self {
        config.validate();
        info!(
            enabled = config.enabled,
            verbose = config.verbose,
            history_interval = config.history_interval,
            history_length = config.history_length,
            "profiler initialized",
        );

        let policy = Arc::new(Policy::new(config.enabled, config.verbose));
        let registry = Arc::new(Registry::new(Arc::clone(&policy)));
        let config = Arc::new(ArcSwap::from_pointee(config));
        let pending_full_reset = Arc::new(AtomicBool::new(false));
        let pending_recheck = Arc::new(AtomicBool::new(false));

        let aggregator = Aggregator::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            policy,
            Arc::clone(&pending_full_reset),
            Arc::clone(&pending_recheck),
        );

        Self {
            config,
            registry,
            aggregator: Mutex::new(aggregator),
            pipeline: Pipeline::new(),
            host,
            pending_full_reset,
            pending_recheck,
        }
    }

    /// Returns the timing node for `identity`, creating it on first use.
    /// Safe from any thread; cheap after the first call per identity.
    pub fn timer(&self, identity: TimerIdentity) -> Arc<TimingNode> {
        self.registry.get_or_create(identity)
    }

    /// Marks the start of a server tick.
    pub fn start_tick(&self) {
        let did_full_reset = self.aggregator.lock().start_tick();
        if did_full_reset {
            self.pipeline.mark_profiling_started();
        }
    }

    /// Marks the end of a server tick, then services any queued report
    /// requests while counters are guaranteed stable.
    pub fn stop_tick(&self, sample: &TickSample) {
        let mut aggregator = self.aggregator.lock();
        aggregator.stop_tick(sample);

        let cfg = self.config.load_full();
        self.pipeline
            .process_pending(&cfg, &self.host, &self.registry, &aggregator);
    }

    /// Queues a report request, serviced at the end of the next tick.
    pub fn request_report(&self, requester: Box<dyn Requester>) {
        self.pipeline.request(requester);
    }

    /// Toggles profiling. Takes effect at the next tick start with a
    /// full state reset; mid-tick accounting is never disturbed.
    pub fn set_enabled(&self, enabled: bool) {
        let current = self.config.load();
        if current.enabled == enabled {
            return;
        }
        let mut next = (**current).clone();
        next.enabled = enabled;
        self.config.store(Arc::new(next));
        self.pending_full_reset.store(true, Ordering::Relaxed);
        info!(enabled, "profiling toggle deferred to next tick start");
    }

    /// Toggles verbose (nested) timers. Takes effect at the next tick
    /// start by re-deriving every node's enabled flag.
    pub fn set_verbose(&self, verbose: bool) {
        let current = self.config.load();
        if current.verbose == verbose {
            return;
        }
        let mut next = (**current).clone();
        next.verbose = verbose;
        self.config.store(Arc::new(next));
        self.pending_recheck.store(true, Ordering::Relaxed);
        info!(verbose, "verbosity change deferred to next tick start");
    }

    /// Replaces the whole config, clamping out-of-range values. Flag
    /// changes are deferred like the individual setters; the history
    /// ring is resized immediately, keeping its most recent frames.
    pub fn apply_config(&self, mut config: ProfilerConfig) {
        config.validate();
        let previous = self.config.load_full();

        if previous.enabled != config.enabled {
            self.pending_full_reset.store(true, Ordering::Relaxed);
        } else if previous.verbose != config.verbose {
            self.pending_recheck.store(true, Ordering::Relaxed);
        }

        let capacity = config.frame_capacity();
        self.config.store(Arc::new(config));
        self.aggregator.lock().resize_ring(capacity);
    }

    pub fn config(&self) -> Arc<ProfilerConfig> {
        self.config.load_full()
    }

    /// Live capture of the still-open interval.
    pub fn snapshot(&self) -> HistorySnapshot {
        self.aggregator.lock().fresh_snapshot()
    }

    /// Number of closed history frames currently retained.
    pub fn frame_count(&self) -> usize {
        self.aggregator.lock().ring().len()
    }

    /// Waits for any in-flight report upload to finish.
    pub fn shutdown(&self) {
        self.pipeline.shutdown();
    }
}
