//! Policy constants for tick accounting, history retention and export
//! admission. These are part of the report contract consumed downstream;
//! do not tune them without bumping [`REPORT_VERSION`].

use std::time::Duration;

/// Nominal tick rate of the host server.
pub const TICKS_PER_SECOND: u64 = 20;

/// A tick longer than this counts as violated; violated ticks feed the
/// lag counters of every node active during that tick.
pub const TICK_VIOLATION_THRESHOLD: Duration = Duration::from_millis(50);

/// Ticks per minute report at the nominal rate.
pub const TICKS_PER_MINUTE: u64 = 1200;

/// Memory usage is sampled once every this many ticks, not every tick.
pub const MEMORY_SAMPLE_TICKS: u64 = 20;

/// Exponential moving average weight for memory samples:
/// `avg = avg * 59/60 + sample * 1/60`. Combined with the 20-tick sample
/// cadence this gives a slower effective half-life than the weight alone
/// suggests; report consumers expect this exact numeric behavior.
pub const MEMORY_DECAY_NUM: f64 = 59.0;
pub const MEMORY_DECAY_DEN: f64 = 60.0;

/// Minimum elapsed time between two completed exports.
pub const EXPORT_COOLDOWN: Duration = Duration::from_secs(60);

/// Minimum profiling time before the first export is admitted, so a
/// report always carries a useful sample size.
pub const EXPORT_WARMUP: Duration = Duration::from_secs(180);

/// Smallest accepted history interval, in ticks (one minute report).
pub const MIN_HISTORY_INTERVAL: u64 = 1200;

/// Hard cap on retained history frames unless explicitly overridden.
pub const MAX_HISTORY_FRAMES: u64 = 12;

/// Schema version of the exported report payload.
pub const REPORT_VERSION: u32 = 1;
