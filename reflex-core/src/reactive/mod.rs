//! Reactive Primitives
//!
//! This module implements the core reactive system: reference cells, reactive
//! proxies, computed values, and watchers, all built on top of one
//! [`Computation`] type.
//!
//! # Concepts
//!
//! ## Sources
//!
//! A [`Ref`] holds a single value; a [`Reactive`] proxy holds a list or a
//! map. Reading a source inside a running computation records a dependency
//! on `(source, key)`. Writing a changed value notifies every computation
//! that depends on that key.
//!
//! ## Computed Values
//!
//! A [`Computed`] caches the result of its getter. A change to a dependency
//! only marks it stale; the getter runs again on the next read.
//!
//! ## Watchers
//!
//! [`Runtime::watch`] and [`Runtime::watch_effect`] run side effects when
//! their dependencies change, either synchronously or batched through the
//! scheduler.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic. The [`Runtime`] keeps a stack of running
//! computations; a read consults the top of the stack and, if a computation
//! is running, registers it with the source. Every run starts by clearing the
//! previous run's dependencies, so only the keys actually read last time
//! cause a rerun.

mod computation;
mod computed;
mod context;
mod proxy;
mod reference;
mod runtime;
mod subscriber;
mod watch;

pub use computation::{Computation, ComputationOptions, NotifyFn, WeakComputation};
pub use computed::Computed;
pub use proxy::{Reactive, Value};
pub use reference::Ref;
pub use runtime::{Runtime, WeakRuntime};
pub use subscriber::{SubscriberId, SubscriberRef};
pub use watch::{traverse, Flush, OnCleanup, WatchHandle, WatchOptions};

pub(crate) use computation::ComputationCore;
pub(crate) use subscriber::Subscriber;
