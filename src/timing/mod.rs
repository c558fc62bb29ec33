pub mod identity;
pub mod node;
pub mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use self::node::TimingNode;

/// Shared profiling policy plus the interval-active node collection.
///
/// Every node holds a handle to this so `start()` can check the global
/// switch and self-register into the current interval without reaching
/// back into the registry.
pub struct Policy {
    enabled: AtomicBool,
    verbose: AtomicBool,
    /// Nodes that started at least once this interval, in first-start
    /// order. Cleared on every interval rollover.
    active: Mutex<Vec<Arc<TimingNode>>>,
}

impl Policy {
    pub fn new(enabled: bool, verbose: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            verbose: AtomicBool::new(verbose),
            active: Mutex::new(Vec::with_capacity(64)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    pub(crate) fn register_active(&self, node: &Arc<TimingNode>) {
        self.active.lock().push(Arc::clone(node));
    }

    /// Snapshot of the interval-active collection, in registration order.
    pub(crate) fn active_nodes(&self) -> Vec<Arc<TimingNode>> {
        self.active.lock().clone()
    }

    /// Empties the interval-active collection, clearing each node's
    /// membership flag so its next `start()` re-registers it.
    pub(crate) fn drain_active(&self) -> Vec<Arc<TimingNode>> {
        let mut active = self.active.lock();
        for node in active.iter() {
            node.clear_interval_membership();
        }
        std::mem::take(&mut *active)
    }
}

#[cfg(test)]
mod tests {
    use super::identity::TimerIdentity;
    use super::*;

    #[test]
    fn test_active_registration_order_and_drain() {
        let policy = Arc::new(Policy::new(true, true));
        let a = Arc::new(TimingNode::new(
            0,
            TimerIdentity::new("g", "a"),
            Arc::clone(&policy),
        ));
        let b = Arc::new(TimingNode::new(
            1,
            TimerIdentity::new("g", "b"),
            Arc::clone(&policy),
        ));

        b.start_at(10);
        a.start_at(20);
        a.stop_at(30);
        b.stop_at(40);
        // Re-entering within the interval must not duplicate.
        a.start_at(50);
        a.stop_at(60);

        let ids: Vec<u32> = policy.active_nodes().iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec![1, 0]);

        let drained = policy.drain_active();
        assert_eq!(drained.len(), 2);
        assert!(policy.active_nodes().is_empty());

        // After the rollover the next start re-registers.
        a.start_at(70);
        a.stop_at(80);
        assert_eq!(policy.active_nodes().len(), 1);
    }
}
