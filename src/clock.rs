use std::sync::OnceLock;
use std::time::Instant;

/// Returns nanoseconds on the monotonic clock, anchored at first use.
///
/// Node timestamps are plain `u64` so they can live in atomics; all
/// readings share one anchor, so differences are valid durations.
pub fn monotonic_ns() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_nanos() as u64
}
