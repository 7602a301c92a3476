//! Computation Runner
//!
//! A computation is an executable unit that subscribes to exactly the
//! reactive state it read during its most recent run.
//!
//! # How Computations Run
//!
//! 1. Remove the computation from every dependency set it currently belongs
//!    to, then forget that list.
//!
//! 2. Push the computation onto the runtime's context stack.
//!
//! 3. Execute the function. Every tracked read re-populates the list.
//!
//! 4. Pop the stack, restoring the previous current computation.
//!
//! 5. Return the function's result.
//!
//! Step 1 is what keeps subscriptions precise: a run that takes a different
//! branch and stops reading a key loses that subscription.
//!
//! # Notification
//!
//! Without a notify handler, `trigger` re-runs the computation directly.
//! With one, `trigger` calls the handler instead and leaves re-running to it
//! (derived values flip a stale flag, post-flush watchers enqueue a job).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::{Subscriber, SubscriberId, SubscriberRef};
use crate::graph::DepSet;

/// Handler invoked by `trigger` in place of a direct re-run.
pub type NotifyFn = Box<dyn Fn(&SubscriberRef) + Send + Sync>;

/// Options for [`Runtime::computation`].
#[derive(Default)]
pub struct ComputationOptions {
    /// Do not run at creation; the first run is the caller's job.
    pub lazy: bool,

    /// Custom notification handler.
    pub notify: Option<NotifyFn>,
}

impl ComputationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer the first run to the caller.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Install a notification handler.
    pub fn notify<F>(mut self, notify: F) -> Self
    where
        F: Fn(&SubscriberRef) + Send + Sync + 'static,
    {
        self.notify = Some(Box::new(notify));
        self
    }
}

impl fmt::Debug for ComputationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationOptions")
            .field("lazy", &self.lazy)
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

/// Bookkeeping shared by every computation, independent of its result type.
pub(crate) struct ComputationCore {
    id: SubscriberId,
    runtime: WeakRuntime,

    /// Dependency sets joined during the most recent run.
    dependencies: Mutex<SmallVec<[Weak<DepSet>; 4]>>,

    notify: Option<NotifyFn>,
    lazy: bool,

    /// Cleared by `stop`; an inactive computation runs untracked.
    active: AtomicBool,
}

impl ComputationCore {
    pub(crate) fn new(runtime: WeakRuntime, notify: Option<NotifyFn>, lazy: bool) -> Self {
        Self {
            id: SubscriberId::new(),
            runtime,
            dependencies: Mutex::new(SmallVec::new()),
            notify,
            lazy,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn notify_handler(&self) -> Option<&NotifyFn> {
        self.notify.as_ref()
    }

    pub(crate) fn record_dependency(&self, dep: &Arc<DepSet>) {
        self.dependencies.lock().push(Arc::downgrade(dep));
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.dependencies.lock().len()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Leave every dependency set joined by the previous run.
    pub(crate) fn cleanup(&self) {
        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        for dep in dependencies {
            if let Some(dep) = dep.upgrade() {
                // Dropped here, after the set's lock is released.
                let _removed = dep.remove(self.id);
            }
        }
    }

    pub(crate) fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            tracing::trace!(subscriber = ?self.id, "computation stopped");
        }
        self.cleanup();
    }
}

struct ComputationInner<T> {
    core: ComputationCore,
    func: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: 'static> ComputationInner<T> {
    fn execute(self: &Arc<Self>) -> T {
        self.core.cleanup();

        let Some(runtime) = self.core.runtime.upgrade() else {
            return (self.func)();
        };

        let frame: Option<Arc<dyn Subscriber>> = if self.core.is_active() {
            Some(Arc::clone(self) as Arc<dyn Subscriber>)
        } else {
            None
        };
        let _ctx = runtime.context().enter(frame);
        (self.func)()
    }
}

impl<T: 'static> Subscriber for ComputationInner<T> {
    fn core(&self) -> &ComputationCore {
        &self.core
    }

    fn rerun(self: Arc<Self>) {
        // Re-runs triggered by a write have no caller for the result
        drop(self.execute());
    }
}

/// An executable unit participating in the dependency graph.
///
/// # Example
///
/// ```rust,ignore
/// let count = rt.reference(0);
///
/// let c = count.clone();
/// let printer = rt.computation(
///     move || println!("count is {}", c.get()),
///     ComputationOptions::new(),
/// );
///
/// count.set(5); // prints "count is 5"
/// ```
pub struct Computation<T: 'static> {
    inner: Arc<ComputationInner<T>>,
}

impl<T: 'static> Computation<T> {
    /// Run the computation, re-subscribing it from scratch.
    pub fn run(&self) -> T {
        self.inner.execute()
    }

    /// Get the computation's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.inner.core.id()
    }

    /// Number of dependency sets joined by the most recent run.
    pub fn dependency_count(&self) -> usize {
        self.inner.core.dependency_count()
    }

    /// Whether the computation was created without an initial run.
    pub fn is_lazy(&self) -> bool {
        self.inner.core.lazy
    }

    /// Whether the computation still tracks dependencies.
    pub fn is_active(&self) -> bool {
        self.inner.core.is_active()
    }

    /// Detach from all dependency sets.
    ///
    /// After stopping, explicit runs still execute the function but no
    /// longer subscribe to anything, so the computation is never notified
    /// again.
    pub fn stop(&self) {
        self.inner.core.stop();
    }

    /// Type-erased handle to this computation.
    pub fn as_subscriber(&self) -> SubscriberRef {
        SubscriberRef(Arc::clone(&self.inner) as Arc<dyn Subscriber>)
    }

    /// Non-owning handle to this computation.
    pub fn downgrade(&self) -> WeakComputation<T> {
        WeakComputation {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<T: 'static> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Computation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.id())
            .field("lazy", &self.is_lazy())
            .field("active", &self.is_active())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

/// Non-owning counterpart of [`Computation`].
pub struct WeakComputation<T: 'static> {
    inner: Weak<ComputationInner<T>>,
}

impl<T: 'static> WeakComputation<T> {
    pub fn upgrade(&self) -> Option<Computation<T>> {
        self.inner.upgrade().map(|inner| Computation { inner })
    }
}

impl<T: 'static> Clone for WeakComputation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl Runtime {
    /// Create a computation over `func`.
    ///
    /// Unless `options.lazy` is set, the computation runs once immediately
    /// and its result is discarded.
    pub fn computation<T, F>(&self, func: F, options: ComputationOptions) -> Computation<T>
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let ComputationOptions { lazy, notify } = options;
        let computation = Computation {
            inner: Arc::new(ComputationInner {
                core: ComputationCore::new(self.downgrade(), notify, lazy),
                func: Box::new(func),
            }),
        };

        if !lazy {
            computation.run();
        }

        computation
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PropKey, SubjectId};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn computation_runs_on_creation() {
        let rt = Runtime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let computation = rt.computation(
            move || {
                run_count_clone.fetch_add(1, Ordering::SeqCst);
            },
            ComputationOptions::new(),
        );

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert!(!computation.is_lazy());
    }

    #[test]
    fn lazy_computation_does_not_run_on_creation() {
        let rt = Runtime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let computation = rt.computation(
            move || run_count_clone.fetch_add(1, Ordering::SeqCst) + 1,
            ComputationOptions::new().lazy(),
        );

        assert_eq!(run_count.load(Ordering::SeqCst), 0);

        // Manually run, result is returned
        assert_eq!(computation.run(), 1);
        assert_eq!(computation.run(), 2);
    }

    #[test]
    fn tracking_repopulates_dependencies_each_run() {
        let rt = Runtime::new();
        let subject = SubjectId::new();
        let reads = Arc::new(AtomicI32::new(2));

        let rt_clone = rt.clone();
        let reads_clone = reads.clone();
        let computation = rt.computation(
            move || {
                for i in 0..reads_clone.load(Ordering::SeqCst) {
                    rt_clone.track(subject, PropKey::Index(i as usize));
                    // Tracking the same pair twice has no extra effect
                    rt_clone.track(subject, PropKey::Index(i as usize));
                }
            },
            ComputationOptions::new(),
        );

        assert_eq!(computation.dependency_count(), 2);
        assert_eq!(rt.subscriber_count(subject, PropKey::Index(1)), 1);

        reads.store(1, Ordering::SeqCst);
        computation.run();

        assert_eq!(computation.dependency_count(), 1);
        assert_eq!(rt.subscriber_count(subject, PropKey::Index(0)), 1);
        assert_eq!(rt.subscriber_count(subject, PropKey::Index(1)), 0);
    }

    #[test]
    fn notify_handler_replaces_rerun() {
        let rt = Runtime::new();
        let subject = SubjectId::new();
        let runs = Arc::new(AtomicI32::new(0));
        let notified = Arc::new(AtomicI32::new(0));

        let rt_clone = rt.clone();
        let runs_clone = runs.clone();
        let notified_clone = notified.clone();
        let computation = rt.computation(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                rt_clone.track(subject, PropKey::Value);
            },
            ComputationOptions::new().notify(move |_| {
                notified_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // The handler is not invoked at creation
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        rt.trigger(subject, PropKey::Value);
        rt.trigger(subject, PropKey::Value);

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 2);
        assert_eq!(computation.dependency_count(), 1);
    }

    #[test]
    fn stopped_computation_is_not_notified() {
        let rt = Runtime::new();
        let subject = SubjectId::new();
        let runs = Arc::new(AtomicI32::new(0));

        let rt_clone = rt.clone();
        let runs_clone = runs.clone();
        let computation = rt.computation(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                rt_clone.track(subject, PropKey::Value);
            },
            ComputationOptions::new(),
        );

        computation.stop();
        assert!(!computation.is_active());
        assert_eq!(computation.dependency_count(), 0);

        rt.trigger(subject, PropKey::Value);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Explicit runs still execute, untracked
        computation.run();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(rt.subscriber_count(subject, PropKey::Value), 0);
    }

    #[test]
    fn weak_handle_does_not_keep_computation_alive() {
        let rt = Runtime::new();
        let computation = rt.computation(|| 1, ComputationOptions::new().lazy());
        let weak = computation.downgrade();

        assert_eq!(weak.upgrade().map(|c| c.run()), Some(1));

        drop(computation);
        assert!(weak.upgrade().is_none());
    }
}
