//! Reactive Runtime
//!
//! The runtime is the central coordinator: it owns the subscription
//! registry, the execution context stack, and the job scheduler, and it
//! implements the two graph primitives, `track` and `trigger`.
//!
//! # How It Works
//!
//! 1. When a computation runs, it pushes itself onto the context stack.
//!
//! 2. A read of reactive state calls [`Runtime::track`], which adds the
//!    current computation to the dependency set of `(subject, key)`.
//!
//! 3. A write calls [`Runtime::trigger`], which visits every subscriber of
//!    `(subject, key)`:
//!    a. computations with a notify handler get the handler called
//!    b. all others are re-run directly
//!
//! # Ownership
//!
//! There is no global runtime. Each [`Runtime`] is an independent reactive
//! graph; subjects and computations hold a [`WeakRuntime`] back to it.
//! Dropping the last `Runtime` handle frees the registry and every
//! computation it kept alive.
//!
//! # Threading
//!
//! The runtime is `Send + Sync` and never holds a lock while user code runs,
//! but the context stack is shared: the model is single-threaded cooperative
//! scheduling. Driving one runtime from several threads at once would
//! attribute reads to the wrong computation.
//!
//! # Self-triggering
//!
//! A computation that reads and writes the same `(subject, key)` re-triggers
//! itself. This is allowed and not guarded against; a computation that does
//! so unconditionally recurses until the stack overflows. Nested triggers
//! beyond [`RuntimeConfig::trigger_depth_warning`] are logged.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::context::ContextStack;
use super::subscriber::{Subscriber, SubscriberRef};
use crate::config::RuntimeConfig;
use crate::graph::{PropKey, SubjectId, SubscriptionRegistry};
use crate::scheduler::{Job, Scheduler};

struct RuntimeInner {
    config: RuntimeConfig,
    registry: SubscriptionRegistry,
    context: ContextStack,
    scheduler: Scheduler,
    trigger_depth: AtomicUsize,
}

/// Handle to an independent reactive graph.
///
/// Cloning is cheap and every clone refers to the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

/// Non-owning handle to a [`Runtime`].
#[derive(Clone, Default)]
pub struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

/// Decrements the trigger depth when a trigger pass ends, even by panic.
struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                scheduler: Scheduler::new(config.flush),
                config,
                registry: SubscriptionRegistry::new(),
                context: ContextStack::new(),
                trigger_depth: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn context(&self) -> &ContextStack {
        &self.inner.context
    }

    /// Record that the current computation depends on `(subject, key)`.
    ///
    /// Does nothing outside a computation or inside [`untracked`](Self::untracked).
    pub fn track(&self, subject: SubjectId, key: impl Into<PropKey>) {
        let Some(current) = self.inner.context.current() else {
            return;
        };

        let key = key.into();
        let dep = self.inner.registry.dep_for(subject, key);
        if dep.insert(&current) {
            current.core().record_dependency(&dep);
            tracing::trace!(
                subject = %dep.subject(),
                key = %dep.key(),
                subscriber = ?current.core().id(),
                "tracked dependency"
            );
        }
    }

    /// Notify every subscriber of `(subject, key)`.
    ///
    /// Subscribers are visited from a snapshot taken before the first one
    /// runs. If a subscriber panics, the remaining ones are still visited and
    /// the first panic is resumed once the pass is complete.
    pub fn trigger(&self, subject: SubjectId, key: impl Into<PropKey>) {
        let key = key.into();
        let Some(dep) = self.inner.registry.get(subject, &key) else {
            return;
        };

        let subscribers = dep.snapshot();
        if subscribers.is_empty() {
            return;
        }

        let depth = self.inner.trigger_depth.fetch_add(1, Ordering::AcqRel) + 1;
        let _depth = DepthGuard(&self.inner.trigger_depth);
        if depth == self.inner.config.trigger_depth_warning {
            tracing::warn!(
                subject = %subject,
                key = %key,
                depth,
                "nested trigger depth reached warning threshold; a computation may be re-triggering itself"
            );
        }

        tracing::trace!(
            subject = %subject,
            key = %key,
            subscribers = subscribers.len(),
            "triggering"
        );

        let mut first_panic = None;
        for subscriber in subscribers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| notify(subscriber)));
            if let Err(payload) = result {
                first_panic.get_or_insert(payload);
            }
        }

        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    /// The computation currently being tracked, if any.
    pub fn current(&self) -> Option<SubscriberRef> {
        self.inner.context.current().map(SubscriberRef)
    }

    /// Check if reads are currently being tracked.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.current().is_some()
    }

    /// Run `f` without tracking any of its reads.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = self.inner.context.enter(None);
        f()
    }

    /// Drop all registry entries of a subject.
    ///
    /// Every subject type calls this when it is destroyed.
    pub fn forget_subject(&self, subject: SubjectId) {
        let removed = self.inner.registry.remove_subject(subject);
        if let Some(keys) = &removed {
            tracing::debug!(subject = %subject, keys = keys.len(), "forgot subject");
        }
        drop(removed);
    }

    /// Number of computations subscribed to `(subject, key)`.
    pub fn subscriber_count(&self, subject: SubjectId, key: impl Into<PropKey>) -> usize {
        self.inner.registry.subscriber_count(subject, &key.into())
    }

    /// Number of subjects with registry entries.
    pub fn subject_count(&self) -> usize {
        self.inner.registry.subject_count()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Queue a job for the next flush. See [`Scheduler::enqueue`].
    pub fn enqueue_job(&self, job: Job) {
        self.inner.scheduler.enqueue(job);
    }

    /// Run the pending flush now. See [`Scheduler::flush`].
    pub fn flush_jobs(&self) {
        self.inner.scheduler.flush();
    }

    /// Resolve once the pending flush, if any, has completed.
    pub fn next_tick(&self) -> impl Future<Output = ()> + Send + 'static {
        let scheduler = self.inner.scheduler.clone();
        async move { scheduler.next_tick().await }
    }

    /// Wait for the pending flush, then run `f`.
    pub fn next_tick_with<R, F>(&self, f: F) -> impl Future<Output = R> + Send + 'static
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let scheduler = self.inner.scheduler.clone();
        async move { scheduler.next_tick_with(f).await }
    }
}

fn notify(subscriber: Arc<dyn Subscriber>) {
    match subscriber.core().notify_handler() {
        Some(handler) => handler(&SubscriberRef(Arc::clone(&subscriber))),
        None => subscriber.rerun(),
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("subjects", &self.subject_count())
            .field("context_depth", &self.inner.context.depth())
            .field("pending_jobs", &self.inner.scheduler.pending_jobs())
            .finish()
    }
}

impl fmt::Debug for WeakRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRuntime")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}
