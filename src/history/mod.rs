use std::collections::VecDeque;

use crate::timing::node::NodeCounters;

/// Per-minute tick-count breakdown. `timed` is the number of ticks the
/// aggregator accounted; the rest are sums of the externally supplied
/// per-tick counts over the minute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickBreakdown {
    pub timed: u64,
    pub player: u64,
    pub entity: u64,
    pub activated_entity: u64,
    pub block_entity: u64,
}

/// Immutable rollup appended roughly every 1200 ticks.
#[derive(Debug, Clone)]
pub struct MinuteReport {
    /// Wall-clock seconds since the Unix epoch at the minute boundary.
    pub epoch_secs: i64,
    pub tps: f64,
    pub avg_ping_ms: f64,
    /// Cumulative full-tick counters over the minute.
    pub full_tick: NodeCounters,
    pub ticks: TickBreakdown,
    pub avg_used_memory: u64,
    pub avg_free_memory: u64,
    pub load_avg: f64,
}

/// Per-node export entry. Only nodes with nonzero cumulative count at
/// snapshot time appear.
#[derive(Debug, Clone, Copy)]
pub struct NodeEntry {
    pub timer_id: u32,
    pub counters: NodeCounters,
}

/// Immutable capture of one history interval.
#[derive(Debug, Clone)]
pub struct HistorySnapshot {
    /// Interval start, milliseconds since the Unix epoch.
    pub start_epoch_ms: i64,
    /// Capture time, milliseconds since the Unix epoch.
    pub end_epoch_ms: i64,
    /// Sum of `minutes[].ticks.timed`.
    pub total_ticks: u64,
    pub entries: Vec<NodeEntry>,
    pub minutes: Vec<MinuteReport>,
}

/// Bounded FIFO of interval snapshots. Oldest frame is evicted on
/// overflow; resizing keeps the most recent frames that still fit.
pub struct HistoryRing {
    frames: VecDeque<HistorySnapshot>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, snapshot: HistorySnapshot) {
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(snapshot);
    }

    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames oldest-first.
    pub fn frames(&self) -> impl Iterator<Item = &HistorySnapshot> {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(start_ms: i64) -> HistorySnapshot {
        HistorySnapshot {
            start_epoch_ms: start_ms,
            end_epoch_ms: start_ms + 60_000,
            total_ticks: 1200,
            entries: Vec::new(),
            minutes: Vec::new(),
        }
    }

    #[test]
    fn test_push_evicts_oldest_on_overflow() {
        let mut ring = HistoryRing::new(3);
        for i in 0..5 {
            ring.push(snap(i * 1_000));
        }

        assert_eq!(ring.len(), 3);
        let starts: Vec<i64> = ring.frames().map(|s| s.start_epoch_ms).collect();
        assert_eq!(starts, vec![2_000, 3_000, 4_000]);
    }

    #[test]
    fn test_resize_shrink_keeps_most_recent() {
        let mut ring = HistoryRing::new(5);
        for i in 0..5 {
            ring.push(snap(i * 1_000));
        }

        ring.resize(2);

        assert_eq!(ring.len(), 2);
        assert_eq!(ring.capacity(), 2);
        let starts: Vec<i64> = ring.frames().map(|s| s.start_epoch_ms).collect();
        assert_eq!(starts, vec![3_000, 4_000]);
    }

    #[test]
    fn test_resize_grow_keeps_existing() {
        let mut ring = HistoryRing::new(2);
        ring.push(snap(0));
        ring.push(snap(1_000));

        ring.resize(4);
        ring.push(snap(2_000));
        ring.push(snap(3_000));

        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_zero_capacity_clamps_to_one() {
        let mut ring = HistoryRing::new(0);
        ring.push(snap(0));
        ring.push(snap(1_000));

        assert_eq!(ring.len(), 1);
        assert_eq!(ring.frames().next().map(|s| s.start_epoch_ms), Some(1_000));
    }
}
