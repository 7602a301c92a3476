//! Watchers
//!
//! Declarative subscriptions with side effects.
//!
//! - [`Runtime::watch`] observes an explicit source and calls back with the
//!   old and new values.
//! - [`Runtime::watch_deep`] observes every entry of a composite value,
//!   recursively.
//! - [`Runtime::watch_effect`] re-runs a callback in full whenever anything
//!   it read changes.
//!
//! # Cleanup
//!
//! Callbacks receive an [`OnCleanup`] slot. A cleanup registered during one
//! run is invoked exactly once, immediately before the next callback run.
//! Registering again replaces the pending cleanup.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::computation::ComputationOptions;
use super::proxy::Value;
use super::runtime::Runtime;
use super::subscriber::SubscriberRef;
use crate::graph::SubjectId;
use crate::scheduler::Job;

/// When a watcher's callback runs after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flush {
    /// Inside the `trigger` that reported the change.
    #[default]
    Sync,

    /// In the next scheduler flush. A burst of changes produces one run.
    Post,
}

/// Options for [`Runtime::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Run the callback once at creation, with no old value.
    pub immediate: bool,
    pub flush: Flush,
}

impl WatchOptions {
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    pub fn post() -> Self {
        Self {
            flush: Flush::Post,
            ..Self::default()
        }
    }
}

type CleanupFn = Box<dyn FnOnce() + Send>;

/// Slot for the teardown of a watcher run.
#[derive(Clone, Default)]
pub struct OnCleanup {
    pending: Arc<Mutex<Option<CleanupFn>>>,
}

impl OnCleanup {
    /// Register `cleanup` to run before the next callback run.
    pub fn register<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.pending.lock() = Some(Box::new(cleanup));
    }

    /// Invoke and clear the pending cleanup, if any.
    fn run_pending(&self) {
        let pending = self.pending.lock().take();
        if let Some(cleanup) = pending {
            cleanup();
        }
    }
}

impl fmt::Debug for OnCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnCleanup")
            .field("pending", &self.pending.lock().is_some())
            .finish()
    }
}

/// Handle to a watcher's computation.
///
/// Dropping the handle leaves the watcher running for as long as its
/// sources exist; [`stop`](Self::stop) detaches it.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    computation: SubscriberRef,
}

impl WatchHandle {
    /// Detach the watcher. Its callback never runs again.
    pub fn stop(&self) {
        self.computation.stop();
    }

    pub fn is_active(&self) -> bool {
        self.computation.is_active()
    }

    /// Number of dependency sets the watcher currently belongs to.
    pub fn dependency_count(&self) -> usize {
        self.computation.dependency_count()
    }
}

/// Read every entry of `value`, recursively, tracking each read.
///
/// Proxies already visited are skipped, so cyclic structures terminate.
pub fn traverse(value: &Value) {
    traverse_with(value, &mut HashSet::new());
}

fn traverse_with(value: &Value, seen: &mut HashSet<SubjectId>) {
    match value {
        Value::Reactive(proxy) => {
            if !seen.insert(proxy.subject()) {
                return;
            }
            for key in proxy.keys() {
                if let Some(entry) = proxy.get(key) {
                    traverse_with(&entry, seen);
                }
            }
        }
        Value::List(items) => items.iter().for_each(|item| traverse_with(item, seen)),
        Value::Map(entries) => entries.values().for_each(|entry| traverse_with(entry, seen)),
        _ => {}
    }
}

impl Runtime {
    /// Watch the value produced by `source`.
    ///
    /// The callback receives `(old, new, on_cleanup)`. Without
    /// `options.immediate`, `source` is read once at creation to capture the
    /// initial value and subscriptions, and the callback first runs on the
    /// first change. With it, the callback runs at creation with `old` set
    /// to `None`.
    pub fn watch<T, G, C>(&self, source: G, callback: C, options: WatchOptions) -> WatchHandle
    where
        T: Clone + Send + 'static,
        G: Fn() -> T + Send + Sync + 'static,
        C: Fn(Option<T>, T, &OnCleanup) + Send + Sync + 'static,
    {
        let job_slot: Arc<OnceLock<Job>> = Arc::new(OnceLock::new());

        let slot = Arc::clone(&job_slot);
        let runtime = self.downgrade();
        let flush = options.flush;
        let computation = self.computation(
            source,
            ComputationOptions::new().lazy().notify(move |_| {
                let Some(job) = slot.get() else {
                    return;
                };
                match flush {
                    Flush::Sync => job.run(),
                    Flush::Post => {
                        if let Some(runtime) = runtime.upgrade() {
                            runtime.enqueue_job(job.clone());
                        }
                    }
                }
            }),
        );

        let old_value: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let on_cleanup = OnCleanup::default();

        let weak = computation.downgrade();
        let previous = Arc::clone(&old_value);
        let job = Job::new(move || {
            let Some(computation) = weak.upgrade() else {
                return;
            };
            let new_value = computation.run();
            on_cleanup.run_pending();
            let old = previous.lock().clone();
            callback(old, new_value.clone(), &on_cleanup);
            *previous.lock() = Some(new_value);
        });
        let _ = job_slot.set(job.clone());

        if options.immediate {
            job.run();
        } else {
            let initial = computation.run();
            *old_value.lock() = Some(initial);
        }

        WatchHandle {
            computation: computation.as_subscriber(),
        }
    }

    /// Watch every entry of a composite value, recursively.
    ///
    /// Plain composites are wrapped first. Old and new values are the same
    /// proxy handle; the callback learns that something inside changed.
    pub fn watch_deep<C>(&self, source: impl Into<Value>, callback: C, options: WatchOptions) -> WatchHandle
    where
        C: Fn(Option<Value>, Value, &OnCleanup) + Send + Sync + 'static,
    {
        let source = self.reactive(source);
        self.watch(
            move || {
                traverse(&source);
                source.clone()
            },
            callback,
            options,
        )
    }

    /// Run `callback` now and again, in full, whenever anything it read
    /// changes.
    pub fn watch_effect<C>(&self, callback: C) -> WatchHandle
    where
        C: Fn(&OnCleanup) + Send + Sync + 'static,
    {
        let on_cleanup = OnCleanup::default();

        let pending = on_cleanup.clone();
        let computation = self.computation(
            move || callback(&on_cleanup),
            ComputationOptions::new().lazy().notify(move |computation| {
                pending.run_pending();
                computation.run();
            }),
        );
        computation.run();

        WatchHandle {
            computation: computation.as_subscriber(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
