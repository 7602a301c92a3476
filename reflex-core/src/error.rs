//! Error types.

use thiserror::Error;

use crate::graph::{PropKey, SubjectId};

#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A derived value without a setter was written to.
    #[error("write to readonly computed value {subject} ignored")]
    ReadonlyComputed { subject: SubjectId },

    #[error("index {index} out of bounds for reactive list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// The key kind does not fit the composite (a name on a list, an index
    /// on a map, ...).
    #[error("key {key} cannot address an entry of a reactive {kind}")]
    KeyMismatch { key: PropKey, kind: &'static str },

    /// A list-only operation was applied to a map.
    #[error("operation requires a reactive list")]
    NotAList,

    #[error("invalid runtime config: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;
