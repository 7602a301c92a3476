//! Subject identity and property keys.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a reactive subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubjectId(u64);

impl SubjectId {
    /// Generate a new unique subject ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for SubjectId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A property key of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// The single slot of a reference cell or derived value.
    Value,

    /// A named entry of a reactive map.
    Name(Arc<str>),

    /// A positional entry of a reactive list.
    Index(usize),

    /// The length of a reactive list.
    Length,

    /// Key-set membership. Read by key enumeration, written when an entry
    /// is added or removed.
    Iterate,
}

impl PropKey {
    /// Build a named key.
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        Self::Name(name.into())
    }
}

impl From<&str> for PropKey {
    fn from(name: &str) -> Self {
        Self::Name(Arc::from(name))
    }
}

impl From<String> for PropKey {
    fn from(name: String) -> Self {
        Self::Name(Arc::from(name))
    }
}

impl From<Arc<str>> for PropKey {
    fn from(name: Arc<str>) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&PropKey> for PropKey {
    fn from(key: &PropKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => f.write_str("value"),
            Self::Name(name) => write!(f, "{name:?}"),
            Self::Index(index) => write!(f, "[{index}]"),
            Self::Length => f.write_str("length"),
            Self::Iterate => f.write_str("<iterate>"),
        }
    }
}
