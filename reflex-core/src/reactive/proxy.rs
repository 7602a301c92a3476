//! Reactive Proxy
//!
//! A [`Reactive`] wraps a composite value (a list or a map) so that reads go
//! through [`Runtime::track`] and writes through [`Runtime::trigger`]. There
//! is no transparent interception: composite state is observable only when
//! it is read and mutated through this handle's accessor methods.
//!
//! # Semantics
//!
//! - Every read tracks `(proxy, key)` and returns the stored value.
//! - Nested plain composites are wrapped the first time they are read, and
//!   the wrapped proxy is stored back, so later reads return the same proxy.
//! - An already wrapped value is never wrapped again.
//! - A write stores the new value (wrapping it if composite) and triggers
//!   `(proxy, key)` only if it differs from the old one by
//!   [`Value::same_value`]. Adding or removing an entry also triggers
//!   [`PropKey::Iterate`], and for lists [`PropKey::Length`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use super::runtime::{Runtime, WeakRuntime};
use crate::error::{ReactiveError, Result};
use crate::graph::{PropKey, SubjectId};

/// A dynamic value that can live inside a reactive proxy.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),

    /// A plain, unobserved list.
    List(Vec<Value>),

    /// A plain, unobserved map with insertion-ordered keys.
    Map(IndexMap<String, Value>),

    /// A composite wrapped in a reactive proxy.
    Reactive(Reactive),
}

impl Value {
    /// Identity/inequality comparison used for change detection.
    ///
    /// Primitives compare by value (floats by bit pattern, with every NaN
    /// equal to every other NaN), proxies by identity. Plain composites are
    /// never the same value as anything, like freshly allocated objects.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => same_float(*a, *b),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Reactive(a), Value::Reactive(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Whether this is a list or a map, wrapped or not.
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_) | Value::Reactive(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(r) => Some(r),
            _ => None,
        }
    }

    /// Wrap a plain composite into a proxy bound to `runtime`. Anything else,
    /// including an existing proxy, is returned unchanged.
    pub(crate) fn into_reactive(self, runtime: &WeakRuntime) -> Value {
        match self {
            Value::List(items) => {
                Value::Reactive(Reactive::from_composite(Composite::List(items), runtime))
            }
            Value::Map(entries) => {
                Value::Reactive(Reactive::from_composite(Composite::Map(entries), runtime))
            }
            other => other,
        }
    }

    /// Convert to JSON without tracking. A proxy reachable from itself is
    /// emitted as `null` at the point where it repeats.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_with(&mut HashSet::new())
    }

    fn to_json_with(&self, seen: &mut HashSet<SubjectId>) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Value::Str(s) => Json::String(s.to_string()),
            Value::List(items) => Json::Array(items.iter().map(|v| v.to_json_with(seen)).collect()),
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_with(seen)))
                    .collect(),
            ),
            Value::Reactive(r) => {
                if !seen.insert(r.subject()) {
                    return Json::Null;
                }
                let json = r.snapshot().to_json_with(seen);
                seen.remove(&r.subject());
                json
            }
        }
    }
}

fn same_float(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => self.same_value(other),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(entries: IndexMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}

impl From<Reactive> for Value {
    fn from(r: Reactive) -> Self {
        Value::Reactive(r)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::from(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Storage behind a proxy.
enum Composite {
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Composite {
    fn kind(&self) -> &'static str {
        match self {
            Composite::List(_) => "list",
            Composite::Map(_) => "map",
        }
    }

    fn slot_mut(&mut self, key: &PropKey) -> Option<&mut Value> {
        match (self, key) {
            (Composite::List(items), PropKey::Index(index)) => items.get_mut(*index),
            (Composite::Map(entries), PropKey::Name(name)) => entries.get_mut(&**name),
            _ => None,
        }
    }

    fn addresses(&self, key: &PropKey) -> bool {
        matches!(
            (self, key),
            (Composite::List(_), PropKey::Index(_) | PropKey::Length)
                | (Composite::Map(_), PropKey::Name(_))
        )
    }
}

/// Result of a write, decided under the lock and acted on after it.
enum Write {
    Unchanged,
    Replaced(Value),
    Added { list: bool },
}

struct ReactiveInner {
    subject: SubjectId,
    data: Mutex<Composite>,
    runtime: WeakRuntime,
}

impl Drop for ReactiveInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.forget_subject(self.subject);
        }
    }
}

/// Handle to a composite value whose reads and writes are observable.
///
/// Clones share the same storage and identity.
#[derive(Clone)]
pub struct Reactive {
    inner: Arc<ReactiveInner>,
}

impl Reactive {
    fn from_composite(data: Composite, runtime: &WeakRuntime) -> Self {
        Self {
            inner: Arc::new(ReactiveInner {
                subject: SubjectId::new(),
                data: Mutex::new(data),
                runtime: runtime.clone(),
            }),
        }
    }

    /// Get the proxy's subject ID.
    pub fn subject(&self) -> SubjectId {
        self.inner.subject
    }

    /// Check if two handles refer to the same proxy.
    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_list(&self) -> bool {
        matches!(&*self.inner.data.lock(), Composite::List(_))
    }

    fn track(&self, key: PropKey) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track(self.inner.subject, key);
        }
    }

    fn trigger(&self, key: PropKey) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.trigger(self.inner.subject, key);
        }
    }

    /// Read an entry, tracking `(self, key)`.
    ///
    /// [`PropKey::Length`] reads a list's length. Missing entries and keys
    /// that do not fit the composite read as `None`.
    pub fn get(&self, key: impl Into<PropKey>) -> Option<Value> {
        let key = key.into();
        self.track(key.clone());

        let mut data = self.inner.data.lock();
        if key == PropKey::Length {
            return match &*data {
                Composite::List(items) => Some(Value::Int(items.len() as i64)),
                Composite::Map(_) => None,
            };
        }

        let slot = data.slot_mut(&key)?;
        if matches!(slot, Value::List(_) | Value::Map(_)) {
            let plain = std::mem::take(slot);
            *slot = plain.into_reactive(&self.inner.runtime);
        }
        Some(slot.clone())
    }

    /// Write an entry, triggering `(self, key)` if the value changed.
    ///
    /// Lists accept any existing index, or the index one past the end to
    /// append.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into().into_reactive(&self.inner.runtime);

        let outcome = {
            let mut data = self.inner.data.lock();
            match (&mut *data, &key) {
                (Composite::Map(entries), PropKey::Name(name)) => match entries.get_mut(&**name) {
                    Some(slot) if slot.same_value(&value) => Write::Unchanged,
                    Some(slot) => Write::Replaced(std::mem::replace(slot, value)),
                    None => {
                        entries.insert(name.to_string(), value);
                        Write::Added { list: false }
                    }
                },
                (Composite::List(items), PropKey::Index(index)) => {
                    let len = items.len();
                    match items.get_mut(*index) {
                        Some(slot) if slot.same_value(&value) => Write::Unchanged,
                        Some(slot) => Write::Replaced(std::mem::replace(slot, value)),
                        None if *index == len => {
                            items.push(value);
                            Write::Added { list: true }
                        }
                        None => {
                            return Err(ReactiveError::IndexOutOfBounds { index: *index, len })
                        }
                    }
                }
                (data, key) => {
                    return Err(ReactiveError::KeyMismatch {
                        key: key.clone(),
                        kind: data.kind(),
                    })
                }
            }
        };

        match outcome {
            Write::Unchanged => {}
            Write::Replaced(previous) => {
                drop(previous);
                self.trigger(key);
            }
            Write::Added { list } => {
                self.trigger(key);
                if list {
                    self.trigger(PropKey::Length);
                }
                self.trigger(PropKey::Iterate);
            }
        }
        Ok(())
    }

    /// Remove an entry, returning it. List entries after it shift down.
    pub fn remove(&self, key: impl Into<PropKey>) -> Result<Option<Value>> {
        let key = key.into();

        let (removed, shifted) = {
            let mut data = self.inner.data.lock();
            match (&mut *data, &key) {
                (Composite::Map(entries), PropKey::Name(name)) => {
                    (entries.shift_remove(&**name), None)
                }
                (Composite::List(items), PropKey::Index(index)) if *index < items.len() => {
                    let len = items.len();
                    (Some(items.remove(*index)), Some(*index..len))
                }
                (Composite::List(_), PropKey::Index(_)) => (None, None),
                (data, key) => {
                    return Err(ReactiveError::KeyMismatch {
                        key: key.clone(),
                        kind: data.kind(),
                    })
                }
            }
        };

        if removed.is_some() {
            match shifted {
                Some(range) => {
                    for index in range {
                        self.trigger(PropKey::Index(index));
                    }
                    self.trigger(PropKey::Length);
                }
                None => self.trigger(key),
            }
            self.trigger(PropKey::Iterate);
        }
        Ok(removed)
    }

    /// Append to a list.
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let len = match &*self.inner.data.lock() {
            Composite::List(items) => items.len(),
            Composite::Map(_) => return Err(ReactiveError::NotAList),
        };
        self.set(PropKey::Index(len), value)
    }

    /// Number of entries. Tracks the length of a list, the key set of a map.
    pub fn len(&self) -> usize {
        let (len, key) = match &*self.inner.data.lock() {
            Composite::List(items) => (items.len(), PropKey::Length),
            Composite::Map(entries) => (entries.len(), PropKey::Iterate),
        };
        self.track(key);
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of all entries, in order. Tracks the key set.
    pub fn keys(&self) -> Vec<PropKey> {
        self.track(PropKey::Iterate);
        match &*self.inner.data.lock() {
            Composite::List(items) => (0..items.len()).map(PropKey::Index).collect(),
            Composite::Map(entries) => entries.keys().map(|k| PropKey::from(k.as_str())).collect(),
        }
    }

    /// Whether an entry exists. Tracks `(self, key)`.
    pub fn contains_key(&self, key: impl Into<PropKey>) -> bool {
        let key = key.into();
        self.track(key.clone());
        let mut data = self.inner.data.lock();
        data.addresses(&key) && (key == PropKey::Length || data.slot_mut(&key).is_some())
    }

    /// Shallow untracked copy of the storage as a plain composite.
    fn snapshot(&self) -> Value {
        match &*self.inner.data.lock() {
            Composite::List(items) => Value::List(items.clone()),
            Composite::Map(entries) => Value::Map(entries.clone()),
        }
    }

    /// Deep untracked copy as a plain value. Proxies reachable from
    /// themselves are kept as proxy handles where they repeat.
    pub fn to_value(&self) -> Value {
        fn unwrap(value: Value, seen: &mut HashSet<SubjectId>) -> Value {
            match value {
                Value::Reactive(r) => {
                    if !seen.insert(r.subject()) {
                        return Value::Reactive(r);
                    }
                    let plain = unwrap(r.snapshot(), seen);
                    seen.remove(&r.subject());
                    plain
                }
                Value::List(items) => {
                    Value::List(items.into_iter().map(|v| unwrap(v, seen)).collect())
                }
                Value::Map(entries) => Value::Map(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k, unwrap(v, seen)))
                        .collect(),
                ),
                other => other,
            }
        }

        unwrap(Value::Reactive(self.clone()), &mut HashSet::new())
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, len) = match &*self.inner.data.lock() {
            Composite::List(items) => ("list", items.len()),
            Composite::Map(entries) => ("map", entries.len()),
        };
        f.debug_struct("Reactive")
            .field("subject", &self.inner.subject)
            .field("kind", &kind)
            .field("len", &len)
            .finish()
    }
}

impl Runtime {
    /// Make a value observable.
    ///
    /// Plain composites are wrapped into a proxy bound to this runtime;
    /// proxies and primitives are returned unchanged.
    pub fn reactive(&self, value: impl Into<Value>) -> Value {
        value.into().into_reactive(&self.downgrade())
    }

    /// Create an empty reactive map.
    pub fn reactive_map(&self) -> Reactive {
        Reactive::from_composite(Composite::Map(IndexMap::new()), &self.downgrade())
    }

    /// Create an empty reactive list.
    pub fn reactive_list(&self) -> Reactive {
        Reactive::from_composite(Composite::List(Vec::new()), &self.downgrade())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ComputationOptions;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counting_reader<F>(rt: &Runtime, read: F) -> Arc<AtomicI32>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let c = rt.computation(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                read();
            },
            ComputationOptions::new(),
        );
        // Kept alive by the dependency sets it joined
        drop(c);
        runs
    }

    #[test]
    fn read_tracks_and_write_triggers() {
        let rt = Runtime::new();
        let state = rt.reactive_map();
        state.set("count", 1).unwrap();

        let s = state.clone();
        let runs = counting_reader(&rt, move || {
            s.get("count");
        });

        state.set("count", 2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Same value: no notification
        state.set("count", 2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Unrelated key: no notification
        state.set("other", true).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nested_composites_are_wrapped_lazily_once() {
        let rt = Runtime::new();
        let Value::Reactive(root) = rt.reactive(json!({ "user": { "name": "ada" } })) else {
            panic!("expected a proxy");
        };

        let first = root.get("user").unwrap();
        let second = root.get("user").unwrap();
        let (Value::Reactive(a), Value::Reactive(b)) = (&first, &second) else {
            panic!("nested map should be wrapped");
        };
        assert!(a.ptr_eq(b));
        assert_eq!(a.get("name"), Some(Value::from("ada")));
    }

    #[test]
    fn proxies_are_never_double_wrapped() {
        let rt = Runtime::new();
        let list = rt.reactive_list();
        let wrapped = rt.reactive(Value::Reactive(list.clone()));
        assert!(wrapped.as_reactive().unwrap().ptr_eq(&list));

        let map = rt.reactive_map();
        map.set("items", list.clone()).unwrap();
        let stored = map.get("items").unwrap();
        assert!(stored.as_reactive().unwrap().ptr_eq(&list));
    }

    #[test]
    fn list_push_triggers_length_and_iteration() {
        let rt = Runtime::new();
        let list = rt.reactive_list();

        let l = list.clone();
        let length_runs = counting_reader(&rt, move || {
            l.len();
        });
        let l = list.clone();
        let first_runs = counting_reader(&rt, move || {
            l.get(0usize);
        });

        list.push(10).unwrap();
        assert_eq!(length_runs.load(Ordering::SeqCst), 2);
        assert_eq!(first_runs.load(Ordering::SeqCst), 2);

        list.push(20).unwrap();
        assert_eq!(length_runs.load(Ordering::SeqCst), 3);
        assert_eq!(first_runs.load(Ordering::SeqCst), 2);
        assert_eq!(list.get(PropKey::Length), Some(Value::Int(2)));
    }

    #[test]
    fn remove_shifts_list_entries() {
        let rt = Runtime::new();
        let Value::Reactive(list) = rt.reactive(json!([1, 2, 3])) else {
            panic!("expected a proxy");
        };

        let l = list.clone();
        let last_runs = counting_reader(&rt, move || {
            l.get(2usize);
        });

        assert_eq!(list.remove(0usize).unwrap(), Some(Value::Int(1)));
        assert_eq!(last_runs.load(Ordering::SeqCst), 2);
        assert_eq!(list.to_value(), Value::List(vec![Value::Int(2), Value::Int(3)]));
        assert_eq!(list.remove(9usize).unwrap(), None);
    }

    #[test]
    fn map_key_set_changes_trigger_iteration() {
        let rt = Runtime::new();
        let map = rt.reactive_map();

        let m = map.clone();
        let runs = counting_reader(&rt, move || {
            m.keys();
        });

        map.set("a", 1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Overwriting an existing key keeps the key set
        map.set("a", 2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        map.remove("a").unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(!map.contains_key("a"));
    }

    #[test]
    fn invalid_writes_are_rejected() {
        let rt = Runtime::new();
        let list = rt.reactive_list();
        let map = rt.reactive_map();

        assert!(matches!(
            list.set(3usize, 1),
            Err(ReactiveError::IndexOutOfBounds { index: 3, len: 0 })
        ));
        assert!(matches!(
            list.set("name", 1),
            Err(ReactiveError::KeyMismatch { kind: "list", .. })
        ));
        assert!(matches!(
            map.set(0usize, 1),
            Err(ReactiveError::KeyMismatch { kind: "map", .. })
        ));
        assert!(matches!(map.push(1), Err(ReactiveError::NotAList)));
    }

    #[test]
    fn same_value_semantics() {
        assert!(Value::Float(f64::NAN).same_value(&Value::Float(f64::NAN)));
        assert!(!Value::Float(0.0).same_value(&Value::Float(-0.0)));
        assert!(!Value::Int(1).same_value(&Value::Float(1.0)));
        assert!(!Value::List(vec![]).same_value(&Value::List(vec![])));
        assert_eq!(Value::List(vec![]), Value::List(vec![]));
        assert!(Value::from("a").same_value(&Value::from("a")));
    }

    #[test]
    fn json_conversion_handles_cycles() {
        let rt = Runtime::new();
        let map = rt.reactive_map();
        map.set("n", 1).unwrap();
        map.set("me", map.clone()).unwrap();

        let json = Value::Reactive(map.clone()).to_json();
        assert_eq!(json, json!({ "n": 1, "me": null }));
        // Break the self-reference so the proxy can be freed
        map.remove("me").unwrap();
    }
}
