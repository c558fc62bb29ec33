use std::sync::Arc;

/// Canonical identity of a timer. Two identities are equal iff every
/// field matches; the registry memoizes nodes by this key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerIdentity {
    /// Logical grouping, typically the owning subsystem or plugin name.
    pub group: Arc<str>,
    /// Timer name within the group.
    pub name: Arc<str>,
    /// Dense id of the parent node, for nested detail timers.
    pub parent: Option<u32>,
    /// Whether the timer may be driven from outside the tick thread.
    pub cross_thread: bool,
}

impl TimerIdentity {
    /// Creates a top-level, tick-thread-only identity.
    pub fn new(group: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            parent: None,
            cross_thread: false,
        }
    }

    /// Nests this identity under the given parent node id.
    #[must_use]
    pub fn with_parent(mut self, parent: u32) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Marks the identity as safe to drive from worker threads.
    #[must_use]
    pub fn cross_thread(mut self) -> Self {
        self.cross_thread = true;
        self
    }

    /// Nested detail timers are only enabled in verbose mode.
    pub fn verbosity_gated(&self) -> bool {
        self.parent.is_some()
    }
}
