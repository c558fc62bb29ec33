use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::identity::TimerIdentity;
use super::node::TimingNode;
use super::Policy;

/// Memoizing node registry keyed by identity.
///
/// Lookups of existing nodes are lock-free map reads; only the rare
/// creation path takes the ordered-list lock to assign the next dense id.
pub struct Registry {
    nodes: DashMap<TimerIdentity, Arc<TimingNode>>,
    /// All nodes ever created, indexed by their dense id.
    all: Mutex<Vec<Arc<TimingNode>>>,
    policy: Arc<Policy>,
}

impl Registry {
    pub fn new(policy: Arc<Policy>) -> Self {
        Self {
            nodes: DashMap::with_capacity(256),
            all: Mutex::new(Vec::with_capacity(256)),
            policy,
        }
    }

    /// Returns the node for `identity`, creating it on first lookup.
    /// Atomic with respect to concurrent callers.
    pub fn get_or_create(&self, identity: TimerIdentity) -> Arc<TimingNode> {
        if let Some(node) = self.nodes.get(&identity) {
            return Arc::clone(&node);
        }

        let node = self
            .nodes
            .entry(identity.clone())
            .or_insert_with(|| {
                let mut all = self.all.lock();
                let id = all.len() as u32;
                let node = Arc::new(TimingNode::new(id, identity, Arc::clone(&self.policy)));
                all.push(Arc::clone(&node));
                debug!(
                    id,
                    group = %node.identity().group,
                    name = %node.identity().name,
                    "created timing node",
                );
                node
            });
        Arc::clone(&node)
    }

    /// Snapshot of every registered node, in dense-id order.
    pub fn all_nodes(&self) -> Vec<Arc<TimingNode>> {
        self.all.lock().clone()
    }

    pub fn node_count(&self) -> usize {
        self.all.lock().len()
    }

    /// Resets every registered node, including inactive ones.
    pub(crate) fn reset_all(&self, full: bool) {
        let all = self.all.lock();
        for node in all.iter() {
            node.reset(full);
        }
    }

    /// Re-derives `enabled` for every registered node under the
    /// registry-wide lock.
    pub(crate) fn recheck_all(&self) {
        let all = self.all.lock();
        for node in all.iter() {
            node.recheck_enabled();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> Registry {
        Registry::new(Arc::new(Policy::new(true, true)))
    }

    #[test]
    fn test_get_or_create_memoizes() {
        let reg = test_registry();
        let a = reg.get_or_create(TimerIdentity::new("world", "entity tick"));
        let b = reg.get_or_create(TimerIdentity::new("world", "entity tick"));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.node_count(), 1);
    }

    #[test]
    fn test_dense_ids_assigned_in_creation_order() {
        let reg = test_registry();
        let a = reg.get_or_create(TimerIdentity::new("g", "a"));
        let b = reg.get_or_create(TimerIdentity::new("g", "b"));
        let c = reg.get_or_create(TimerIdentity::new("h", "a"));

        assert_eq!(a.id(), 0);
        assert_eq!(b.id(), 1);
        assert_eq!(c.id(), 2);

        let ids: Vec<u32> = reg.all_nodes().iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_distinct_identities_get_distinct_nodes() {
        let reg = test_registry();
        let plain = reg.get_or_create(TimerIdentity::new("g", "t"));
        let nested = reg.get_or_create(TimerIdentity::new("g", "t").with_parent(0));
        let shared = reg.get_or_create(TimerIdentity::new("g", "t").cross_thread());

        assert!(!Arc::ptr_eq(&plain, &nested));
        assert!(!Arc::ptr_eq(&plain, &shared));
        assert_eq!(reg.node_count(), 3);
    }

    #[test]
    fn test_concurrent_get_or_create_single_node() {
        use std::thread;

        let reg = Arc::new(test_registry());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let reg = Arc::clone(&reg);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    reg.get_or_create(TimerIdentity::new("g", format!("timer-{}", i % 10)));
                }
            }));
        }

        for h in handles {
            h.join().expect("thread panicked");
        }

        assert_eq!(reg.node_count(), 10);

        // Ids remain dense and unique.
        let mut ids: Vec<u32> = reg.all_nodes().iter().map(|n| n.id()).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..10).collect::<Vec<u32>>());
    }
}
