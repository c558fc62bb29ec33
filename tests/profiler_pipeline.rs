//! Black-box tests driving the public profiler API the way a host
//! server's tick loop would.

use std::sync::Arc;

use parking_lot::Mutex;

use tickprof::{
    HostInfo, Profiler, ProfilerConfig, ReportOutcome, Requester, TickSample, TimerIdentity,
};

fn profiler_with(config: ProfilerConfig) -> Profiler {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Profiler::new(config, HostInfo::default())
}

fn tick(profiler: &Profiler, sample: &TickSample, work: impl FnOnce()) {
    profiler.start_tick();
    work();
    profiler.stop_tick(sample);
}

#[test]
fn test_minute_report_after_1200_ticks() {
    // Interval larger than a minute so the minute boundary is observable
    // before any rollover.
    let profiler = profiler_with(ProfilerConfig {
        history_interval: 2400,
        history_length: 2400,
        ..Default::default()
    });
    let timer = profiler.timer(TimerIdentity::new("world", "entity tick"));

    let sample = TickSample {
        sessions: 2,
        entities: 8,
        avg_ping_ms: 25.0,
        ..Default::default()
    };
    for _ in 0..1200 {
        tick(&profiler, &sample, || {
            timer.start();
            timer.stop();
        });
    }

    let snap = profiler.snapshot();
    assert_eq!(snap.minutes.len(), 1);
    assert_eq!(snap.total_ticks, 1200);

    let minute = &snap.minutes[0];
    assert_eq!(minute.ticks.timed, 1200);
    assert_eq!(minute.ticks.player, 2400);
    assert_eq!(minute.ticks.entity, 9600);
    assert!((minute.avg_ping_ms - 25.0).abs() < 1e-9);
    assert!(minute.tps > 0.0 && minute.tps <= 20.0);
    assert!(minute.full_tick.count == 1200);

    let entry = snap
        .entries
        .iter()
        .find(|e| e.timer_id == timer.id())
        .expect("timer entry present");
    assert_eq!(entry.counters.count, 1200);
}

#[test]
fn test_interval_rollover_produces_history_frames() {
    let profiler = profiler_with(ProfilerConfig::default());
    let timer = profiler.timer(TimerIdentity::new("world", "chunk load"));

    // Default interval is 1200 ticks; two full intervals plus a partial.
    for _ in 0..2405 {
        tick(&profiler, &TickSample::default(), || {
            let _guard = timer.scope();
        });
    }

    assert_eq!(profiler.frame_count(), 2);
    assert_eq!(profiler.snapshot().total_ticks, 5);
    // The open interval starts from reset counters.
    let snap = profiler.snapshot();
    let entry = snap
        .entries
        .iter()
        .find(|e| e.timer_id == timer.id())
        .expect("timer entry present");
    assert_eq!(entry.counters.count, 5);
}

#[test]
fn test_cross_thread_timers_isolated_per_node() {
    let profiler = Arc::new(profiler_with(ProfilerConfig::default()));
    let decode = profiler.timer(TimerIdentity::new("network", "packet decode").cross_thread());
    let encode = profiler.timer(TimerIdentity::new("network", "packet encode").cross_thread());

    profiler.start_tick();

    // One worker per node; counts must come out exact since each node
    // sees a single driving thread.
    let mut handles = Vec::new();
    for timer in [Arc::clone(&decode), Arc::clone(&encode)] {
        handles.push(std::thread::spawn(move || {
            for _ in 0..500 {
                timer.start();
                timer.stop();
            }
        }));
    }
    for h in handles {
        h.join().expect("worker panicked");
    }

    profiler.stop_tick(&TickSample::default());

    let snap = profiler.snapshot();
    for timer in [&decode, &encode] {
        let entry = snap
            .entries
            .iter()
            .find(|e| e.timer_id == timer.id())
            .expect("cross-thread timer entry present");
        assert_eq!(entry.counters.count, 500);
    }
}

struct RecordingRequester {
    outcomes: Arc<Mutex<Vec<ReportOutcome>>>,
}

impl Requester for RecordingRequester {
    fn name(&self) -> &str {
        "console"
    }

    fn notify(&self, outcome: ReportOutcome) {
        self.outcomes.lock().push(outcome);
    }
}

#[test]
fn test_report_request_rejected_during_warmup() {
    let profiler = profiler_with(ProfilerConfig::default());
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    profiler.request_report(Box::new(RecordingRequester {
        outcomes: Arc::clone(&outcomes),
    }));
    tick(&profiler, &TickSample::default(), || {});

    let outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        ReportOutcome::Rejected { message } => {
            assert!(message.contains("warming up"), "message: {message}");
        }
        other => panic!("expected warm-up rejection, got {other:?}"),
    }
}

#[test]
fn test_disabled_profiler_records_nothing() {
    let profiler = profiler_with(ProfilerConfig {
        enabled: false,
        ..Default::default()
    });
    let timer = profiler.timer(TimerIdentity::new("world", "entity tick"));

    for _ in 0..10 {
        tick(&profiler, &TickSample::default(), || {
            timer.start();
            timer.stop();
        });
    }

    let snap = profiler.snapshot();
    assert_eq!(snap.total_ticks, 0);
    assert!(snap.entries.is_empty());
}

#[test]
fn test_shrinking_history_keeps_most_recent_frames() {
    let profiler = profiler_with(ProfilerConfig {
        history_interval: 1200,
        history_length: 1200 * 4,
        ..Default::default()
    });

    for _ in 0..1200 * 4 {
        tick(&profiler, &TickSample::default(), || {});
    }
    assert_eq!(profiler.frame_count(), 4);

    profiler.apply_config(ProfilerConfig {
        history_interval: 1200,
        history_length: 1200 * 2,
        ..Default::default()
    });

    assert_eq!(profiler.frame_count(), 2);
}
