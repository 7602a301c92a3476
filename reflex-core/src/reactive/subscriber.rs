//! Subscriber types for the reactive system.
//!
//! A subscriber is any computation that can sit in a dependency set: plain
//! computations, the computation behind a derived value, and the computations
//! driving watchers. The registry stores them type-erased.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::computation::ComputationCore;

/// Unique identifier for a subscriber.
///
/// Each computation gets a unique ID when created. This ID is the identity
/// used for dependency-set membership and for context-stack bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A computation as seen by the dependency graph.
pub(crate) trait Subscriber: Send + Sync {
    /// Bookkeeping shared by every computation kind.
    fn core(&self) -> &ComputationCore;

    /// Re-execute the computation, discarding its result.
    fn rerun(self: Arc<Self>);
}

/// Type-erased handle to a computation.
///
/// This is what a notify handler receives: calling [`run`](Self::run)
/// re-executes the computation the same way `trigger` would have without a
/// handler installed.
#[derive(Clone)]
pub struct SubscriberRef(pub(crate) Arc<dyn Subscriber>);

impl SubscriberRef {
    /// Get the computation's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.0.core().id()
    }

    /// Re-run the computation.
    pub fn run(&self) {
        Arc::clone(&self.0).rerun();
    }

    /// Detach the computation from every dependency set it belongs to.
    pub fn stop(&self) {
        self.0.core().stop();
    }

    /// Whether the computation still tracks dependencies.
    pub fn is_active(&self) -> bool {
        self.0.core().is_active()
    }

    /// Number of dependency sets the computation currently belongs to.
    pub fn dependency_count(&self) -> usize {
        self.0.core().dependency_count()
    }
}

impl fmt::Debug for SubscriberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRef")
            .field("id", &self.id())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}
