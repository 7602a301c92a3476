//! Reference Cells
//!
//! A [`Ref`] is the simplest subject: a single tracked slot. Reading it
//! inside a computation subscribes that computation to the slot, and writing
//! a value that differs from the current one notifies every subscriber.
//!
//! # Change Detection
//!
//! Writes compare with `!=` for plain values. References created with
//! [`Runtime::reference_value`] hold a dynamic [`Value`] instead: composite
//! values are wrapped into reactive proxies on the way in, and changes are
//! detected by identity (see [`Value::same_value`]).

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::proxy::Value;
use super::runtime::{Runtime, WeakRuntime};
use crate::graph::{PropKey, SubjectId};

struct RefInner<T> {
    subject: SubjectId,
    value: Mutex<T>,
    runtime: WeakRuntime,

    /// Applied to every stored value.
    convert: fn(&WeakRuntime, T) -> T,

    /// Decides whether a write notifies.
    changed: fn(&T, &T) -> bool,
}

impl<T> Drop for RefInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.forget_subject(self.subject);
        }
    }
}

/// A reactive reference cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = rt.reference(0);
///
/// // Read the value (tracked inside computations)
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// ```
pub struct Ref<T> {
    inner: Arc<RefInner<T>>,
}

impl<T> Ref<T>
where
    T: Clone + Send + 'static,
{
    /// Get the reference's subject ID.
    pub fn subject(&self) -> SubjectId {
        self.inner.subject
    }

    /// Get the current value, tracking the read.
    pub fn get(&self) -> T {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.subject, PropKey::Value);
        }
        self.inner.value.lock().clone()
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> T {
        self.inner.value.lock().clone()
    }

    /// Store a new value and notify subscribers if it changed.
    pub fn set(&self, value: T) {
        let value = (self.inner.convert)(&self.inner.runtime, value);
        let previous = {
            let mut current = self.inner.value.lock();
            if !(self.inner.changed)(&current, &value) {
                return;
            }
            std::mem::replace(&mut *current, value)
        };
        drop(previous);

        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.trigger(self.inner.subject, PropKey::Value);
        }
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        // `f` may read this cell, directly or through a derived value.
        let current = self.inner.value.lock().clone();
        self.set(f(&current));
    }

    /// Check if two handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Ref<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("subject", &self.inner.subject)
            .field("value", &*self.inner.value.lock())
            .finish()
    }
}

fn keep<T>(_: &WeakRuntime, value: T) -> T {
    value
}

fn not_equal<T: PartialEq>(current: &T, next: &T) -> bool {
    current != next
}

fn wrap_value(runtime: &WeakRuntime, value: Value) -> Value {
    value.into_reactive(runtime)
}

fn value_changed(current: &Value, next: &Value) -> bool {
    !current.same_value(next)
}

impl Runtime {
    fn build_ref<T>(
        &self,
        value: T,
        convert: fn(&WeakRuntime, T) -> T,
        changed: fn(&T, &T) -> bool,
    ) -> Ref<T> {
        let runtime = self.downgrade();
        Ref {
            inner: Arc::new(RefInner {
                subject: SubjectId::new(),
                value: Mutex::new(convert(&runtime, value)),
                runtime,
                convert,
                changed,
            }),
        }
    }

    /// Create a reference cell holding a plain value.
    pub fn reference<T>(&self, value: T) -> Ref<T>
    where
        T: Clone + PartialEq + Send + 'static,
    {
        self.build_ref(value, keep, not_equal::<T>)
    }

    /// Create a reference cell holding a dynamic value.
    ///
    /// Composite values, both initial and assigned later, are wrapped into
    /// reactive proxies.
    pub fn reference_value(&self, value: impl Into<Value>) -> Ref<Value> {
        self.build_ref(value.into(), wrap_value, value_changed)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
