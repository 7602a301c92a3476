//! Subscription Registry
//!
//! Maps `subject -> key -> dependency set`. The registry only ever hands out
//! `Arc<DepSet>` clones; callers mutate the sets after the map shard lock has
//! been released, so notification code never runs under a registry lock.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;

use super::subject::{PropKey, SubjectId};
use crate::reactive::{Subscriber, SubscriberId};

/// The subscribers of a single `(subject, key)` pair.
///
/// Membership is unique per subscriber, so tracking the same pair several
/// times within one run has no additional effect.
pub(crate) struct DepSet {
    subject: SubjectId,
    key: PropKey,
    subscribers: Mutex<IndexMap<SubscriberId, Arc<dyn Subscriber>>>,
}

impl DepSet {
    fn new(subject: SubjectId, key: PropKey) -> Self {
        Self {
            subject,
            key,
            subscribers: Mutex::new(IndexMap::new()),
        }
    }

    pub(crate) fn subject(&self) -> SubjectId {
        self.subject
    }

    pub(crate) fn key(&self) -> &PropKey {
        &self.key
    }

    /// Add a subscriber. Returns `false` if it was already a member.
    pub(crate) fn insert(&self, subscriber: &Arc<dyn Subscriber>) -> bool {
        let id = subscriber.core().id();
        let mut subscribers = self.subscribers.lock();
        if subscribers.contains_key(&id) {
            return false;
        }
        subscribers.insert(id, Arc::clone(subscriber));
        true
    }

    /// Remove a subscriber, handing it back so the caller drops it outside
    /// the set's lock.
    pub(crate) fn remove(&self, id: SubscriberId) -> Option<Arc<dyn Subscriber>> {
        self.subscribers.lock().shift_remove(&id)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    /// Copy of the current members. Notification iterates this copy, so
    /// subscribers that re-run and re-subscribe mid-pass are visited once.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn Subscriber>> {
        self.subscribers.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Process-independent registry of dependency sets, one per runtime.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    subjects: DashMap<SubjectId, HashMap<PropKey, Arc<DepSet>>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Get the dependency set for `(subject, key)`, creating the nested
    /// mappings on demand.
    pub(crate) fn dep_for(&self, subject: SubjectId, key: PropKey) -> Arc<DepSet> {
        let mut keys = self.subjects.entry(subject).or_default();
        let dep = keys
            .entry(key)
            .or_insert_with_key(|key| Arc::new(DepSet::new(subject, key.clone())));
        Arc::clone(dep)
    }

    /// Get the dependency set for `(subject, key)` if anything ever tracked it.
    pub(crate) fn get(&self, subject: SubjectId, key: &PropKey) -> Option<Arc<DepSet>> {
        self.subjects
            .get(&subject)
            .and_then(|keys| keys.get(key).cloned())
    }

    /// Drop every dependency set of a subject.
    ///
    /// The removed sets are returned rather than dropped here: releasing them
    /// may release computations whose captured state drops further subjects,
    /// and those re-enter the registry.
    pub(crate) fn remove_subject(
        &self,
        subject: SubjectId,
    ) -> Option<HashMap<PropKey, Arc<DepSet>>> {
        self.subjects.remove(&subject).map(|(_, keys)| keys)
    }

    pub(crate) fn subscriber_count(&self, subject: SubjectId, key: &PropKey) -> usize {
        self.get(subject, key).map_or(0, |dep| dep.len())
    }

    pub(crate) fn subject_count(&self) -> usize {
        self.subjects.len()
    }
}
