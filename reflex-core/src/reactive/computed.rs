//! Derived Values
//!
//! A [`Computed`] is a cached derived value that recomputes lazily.
//!
//! # How Derived Values Work
//!
//! 1. The getter runs inside a lazy computation; nothing runs at creation.
//!
//! 2. On read, if the cache is stale, the computation runs, its result is
//!    cached, and the stale flag is cleared. Otherwise the cache is returned.
//!
//! 3. Every read tracks the derived value itself under [`PropKey::Value`].
//!    Readers subscribe to the derived value, never directly to its sources.
//!
//! 4. When a source changes, the computation's notify handler marks the
//!    cache stale. Only the fresh-to-stale transition notifies the derived
//!    value's own readers, so N upstream writes cause one notification.
//!
//! # Why This Matters
//!
//! - A source changes
//! - 10 derived values depend on it
//! - Only the ones actually read again recompute, and each at most once

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::computation::{Computation, ComputationOptions};
use super::runtime::{Runtime, WeakRuntime};
use crate::error::{ReactiveError, Result};
use crate::graph::{PropKey, SubjectId};

type Setter<T> = Box<dyn Fn(T) + Send + Sync>;

struct ComputedInner<T: 'static> {
    subject: SubjectId,
    value: Mutex<Option<T>>,
    stale: Arc<AtomicBool>,
    computation: Computation<T>,
    setter: Option<Setter<T>>,
    runtime: WeakRuntime,
}

impl<T: 'static> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.computation.stop();
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.forget_subject(self.subject);
        }
    }
}

/// A cached derived value.
///
/// # Example
///
/// ```rust,ignore
/// let x = rt.reference(1);
///
/// let x2 = x.clone();
/// let doubled = rt.computed(move || x2.get() * 2);
///
/// assert_eq!(doubled.get(), 2);
/// x.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T: 'static> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + 'static,
{
    /// Get the derived value's subject ID.
    pub fn subject(&self) -> SubjectId {
        self.inner.subject
    }

    /// Get the current value, recomputing if stale.
    ///
    /// The read is tracked against this derived value.
    pub fn get(&self) -> T {
        let cached = if self.inner.stale.load(Ordering::Acquire) {
            None
        } else {
            self.inner.value.lock().clone()
        };

        let value = match cached {
            Some(value) => value,
            None => self.recompute(),
        };

        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.subject, PropKey::Value);
        }
        value
    }

    fn recompute(&self) -> T {
        let value = self.inner.computation.run();
        *self.inner.value.lock() = Some(value.clone());
        self.inner.stale.store(false, Ordering::Release);
        value
    }

    /// Write through the setter.
    ///
    /// Without a setter the write is ignored with a warning and
    /// [`ReactiveError::ReadonlyComputed`] is returned.
    pub fn set(&self, value: T) -> Result<()> {
        match &self.inner.setter {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => {
                tracing::warn!(
                    subject = %self.inner.subject,
                    "write to readonly computed value ignored"
                );
                Err(ReactiveError::ReadonlyComputed {
                    subject: self.inner.subject,
                })
            }
        }
    }

    /// Whether the next read recomputes.
    pub fn is_stale(&self) -> bool {
        self.inner.stale.load(Ordering::Acquire)
    }

    /// Whether writes go through a setter.
    pub fn is_writable(&self) -> bool {
        self.inner.setter.is_some()
    }

    /// Number of sources read by the most recent recomputation.
    pub fn dependency_count(&self) -> usize {
        self.inner.computation.dependency_count()
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Computed<T>
where
    T: fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("subject", &self.inner.subject)
            .field("stale", &self.inner.stale.load(Ordering::Acquire))
            .field("value", &*self.inner.value.lock())
            .field("writable", &self.inner.setter.is_some())
            .finish()
    }
}

impl Runtime {
    /// Create a readonly derived value.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: Clone + Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.build_computed(getter, None)
    }

    /// Create a derived value whose writes go to `setter`.
    pub fn computed_with_setter<T, F, S>(&self, getter: F, setter: S) -> Computed<T>
    where
        T: Clone + Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        self.build_computed(getter, Some(Box::new(setter)))
    }

    fn build_computed<T, F>(&self, getter: F, setter: Option<Setter<T>>) -> Computed<T>
    where
        T: Clone + Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let subject = SubjectId::new();
        let stale = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&stale);
        let runtime = self.downgrade();
        let computation = self.computation(
            getter,
            ComputationOptions::new().lazy().notify(move |_| {
                // Only the fresh -> stale transition is announced
                if !flag.swap(true, Ordering::AcqRel) {
                    if let Some(runtime) = runtime.upgrade() {
                        runtime.trigger(subject, PropKey::Value);
                    }
                }
            }),
        );

        Computed {
            inner: Arc::new(ComputedInner {
                subject,
                value: Mutex::new(None),
                stale,
                computation,
                setter,
                runtime: self.downgrade(),
            }),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn computed_computes_on_first_access() {
        let rt = Runtime::new();
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let computed = rt.computed(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        // Not computed yet
        assert!(computed.is_stale());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        // First access triggers computation
        assert_eq!(computed.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(!computed.is_stale());
    }

    #[test]
    fn computed_caches_value_when_fresh() {
        let rt = Runtime::new();
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let computed = rt.computed(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn computed_recomputes_after_source_change() {
        let rt = Runtime::new();
        let x = rt.reference(1);
        let call_count = Arc::new(AtomicI32::new(0));

        let x_clone = x.clone();
        let call_count_clone = call_count.clone();
        let doubled = rt.computed(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            x_clone.get() * 2
        });

        assert_eq!(doubled.get(), 2);
        assert_eq!(doubled.get(), 2);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        x.set(5);
        assert!(doubled.is_stale());
        // Invalidation alone does not recompute
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        assert_eq!(doubled.get(), 10);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn computed_depends_on_computed() {
        let rt = Runtime::new();
        let base = rt.reference(5);

        let base_clone = base.clone();
        let doubled = rt.computed(move || base_clone.get() * 2);

        let doubled_clone = doubled.clone();
        let plus_ten = rt.computed(move || doubled_clone.get() + 10);

        assert_eq!(doubled.get(), 10);
        assert_eq!(plus_ten.get(), 20);

        base.set(10);

        // Staleness propagates through the chain without manual marking
        assert!(plus_ten.is_stale());
        assert_eq!(plus_ten.get(), 30);
        assert_eq!(doubled.get(), 20);
    }

    #[test]
    fn readonly_write_is_rejected_and_value_kept() {
        let rt = Runtime::new();
        let computed = rt.computed(|| 7);
        assert_eq!(computed.get(), 7);
        assert!(!computed.is_writable());

        let err = computed.set(1).unwrap_err();
        assert!(matches!(err, ReactiveError::ReadonlyComputed { subject } if subject == computed.subject()));
        assert_eq!(computed.get(), 7);
    }

    #[test]
    fn setter_receives_writes() {
        let rt = Runtime::new();
        let celsius = rt.reference(0.0_f64);

        let read = celsius.clone();
        let write = celsius.clone();
        let fahrenheit = rt.computed_with_setter(
            move || read.get() * 9.0 / 5.0 + 32.0,
            move |f: f64| write.set((f - 32.0) * 5.0 / 9.0),
        );

        assert_eq!(fahrenheit.get(), 32.0);
        fahrenheit.set(212.0).unwrap();
        assert_eq!(celsius.get(), 100.0);
        assert_eq!(fahrenheit.get(), 212.0);
    }

    #[test]
    fn computed_clone_shares_state() {
        let rt = Runtime::new();
        let c1 = rt.computed(|| 42);
        assert_eq!(c1.get(), 42);

        let c2 = c1.clone();
        assert_eq!(c1.subject(), c2.subject());
        assert!(!c2.is_stale());
        assert_eq!(c2.get(), 42);
    }
}
