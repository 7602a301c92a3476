//! Dependency Graph
//!
//! This module holds the subscription registry: the two-level mapping from a
//! reactive subject and one of its property keys to the set of computations
//! that read that property during their most recent run.
//!
//! # Overview
//!
//! - A *subject* is anything observable: a reference cell, a derived value,
//!   or a wrapped composite value. Each one owns a [`SubjectId`].
//! - A *key* ([`PropKey`]) names one observable slot of a subject.
//! - A *dependency set* ([`DepSet`]) is the set of subscribers of one
//!   `(subject, key)` pair.
//!
//! # Design Decisions
//!
//! 1. Subjects are identified by opaque numeric handles instead of weak
//!    object keys. Every subject type calls [`Runtime::forget_subject`] from
//!    its `Drop` impl, so registry entries never outlive their subject.
//!
//! 2. Computations keep only weak handles to the dependency sets they joined.
//!    The registry owns the sets, and the sets own their subscribers, so a
//!    computation lives exactly as long as something still observes it or
//!    holds it.
//!
//! [`Runtime::forget_subject`]: crate::reactive::Runtime::forget_subject

mod registry;
mod subject;

pub use subject::{PropKey, SubjectId};
pub(crate) use registry::{DepSet, SubscriptionRegistry};
