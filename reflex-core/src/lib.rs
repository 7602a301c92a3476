//! Reflex Core
//!
//! This crate provides a fine-grained, push-based reactive engine.
//! It implements:
//!
//! - Dependency tracking between reactive state and the code that reads it
//! - Reference cells and reactive proxies over lists and maps
//! - Lazily cached computed values
//! - Watchers with synchronous or batched (post-flush) callbacks
//! - A deduplicating job queue driven by Tokio or by hand
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: The runtime, computations, and every user-facing primitive
//! - `graph`: Subject identity and the subscription registry
//! - `scheduler`: The deduplicating job queue and `next_tick`
//!
//! # Example
//!
//! ```rust,ignore
//! use reflex_core::{Runtime, WatchOptions};
//!
//! let rt = Runtime::new();
//!
//! // Create a reference cell
//! let count = rt.reference(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = rt.computed(move || c.get() * 2);
//!
//! // Watch it
//! let d = doubled.clone();
//! let _handle = rt.watch(
//!     move || d.get(),
//!     |old, new, _| println!("doubled: {old:?} -> {new}"),
//!     WatchOptions::default(),
//! );
//!
//! // Update the cell
//! count.set(5);
//! // Watcher runs, prints: "doubled: Some(0) -> 10"
//! ```

pub mod graph;
pub mod reactive;
pub mod scheduler;

mod config;
mod error;

pub use config::{FlushStrategy, RuntimeConfig};
pub use error::{ReactiveError, Result};
pub use graph::{PropKey, SubjectId};
pub use reactive::{
    Computation, ComputationOptions, Computed, Flush, OnCleanup, Reactive, Ref, Runtime, Value,
    WatchHandle, WatchOptions,
};
pub use scheduler::{Job, JobId, Scheduler};
