//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How a pending flush of the job queue gets executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushStrategy {
    /// The host calls [`Runtime::flush_jobs`] at its idle point, or awaits
    /// [`Runtime::next_tick`].
    ///
    /// [`Runtime::flush_jobs`]: crate::reactive::Runtime::flush_jobs
    /// [`Runtime::next_tick`]: crate::reactive::Runtime::next_tick
    Manual,

    /// A flush task is spawned on the current tokio runtime as soon as the
    /// first job of a burst is queued. Falls back to `Manual` when no tokio
    /// runtime is running, or when it is not a current-thread runtime.
    #[default]
    Tokio,
}

/// Configuration for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Flush strategy of the job queue.
    pub flush: FlushStrategy,

    /// Nested trigger depth at which a warning is logged.
    pub trigger_depth_warning: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush: FlushStrategy::Tokio,
            trigger_depth_warning: 100,
        }
    }
}

impl RuntimeConfig {
    /// A configuration whose flushes are driven by the host.
    pub fn manual() -> Self {
        Self {
            flush: FlushStrategy::Manual,
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
