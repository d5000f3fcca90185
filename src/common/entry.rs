use std::sync::Arc;

use triomphe::Arc as TrioArc;

use super::deferred::Deferred;
use crate::stats::EntryStats;

/// A lookup is in flight for the key; no value is observable yet.
pub(crate) struct Pending<K, T, E> {
    pub(crate) key: Arc<K>,
    pub(crate) revision: u64,
    pub(crate) deferred: Deferred<T, E>,
}

/// A finished lookup (or a `set`), with its wall-clock metadata.
pub(crate) struct Complete<K, T, E> {
    pub(crate) key: Arc<K>,
    pub(crate) revision: u64,
    pub(crate) outcome: Result<T, Arc<E>>,
    pub(crate) loaded_at_millis: u64,
    pub(crate) expires_at_millis: u64,
}

/// A background refresh is in flight while `previous` stays servable.
pub(crate) struct Refreshing<K, T, E> {
    pub(crate) revision: u64,
    pub(crate) deferred: Deferred<T, E>,
    pub(crate) previous: TrioArc<Complete<K, T, E>>,
}

/// What is known about a key's value at an instant.
///
/// The only transitions are `Pending -> Complete`, `Complete -> Refreshing`,
/// `Refreshing -> Complete` and removal. Every value put into the map gets a
/// fresh revision from the owning cache, so "is the map still holding the
/// entry I looked at" is a revision comparison.
pub(crate) enum MapValue<K, T, E> {
    Pending(Pending<K, T, E>),
    Complete(TrioArc<Complete<K, T, E>>),
    Refreshing(Refreshing<K, T, E>),
}

impl<K, T, E> Clone for Pending<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            revision: self.revision,
            deferred: self.deferred.clone(),
        }
    }
}

impl<K, T, E> Clone for Refreshing<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            revision: self.revision,
            deferred: self.deferred.clone(),
            previous: TrioArc::clone(&self.previous),
        }
    }
}

impl<K, T, E> Clone for MapValue<K, T, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending(p) => Self::Pending(p.clone()),
            Self::Complete(c) => Self::Complete(TrioArc::clone(c)),
            Self::Refreshing(r) => Self::Refreshing(r.clone()),
        }
    }
}

impl<K, T, E> Complete<K, T, E> {
    pub(crate) fn has_expired(&self, now_millis: u64) -> bool {
        now_millis > self.expires_at_millis
    }

    pub(crate) fn entry_stats(&self) -> EntryStats {
        EntryStats::new(self.loaded_at_millis)
    }
}

impl<K, T, E> MapValue<K, T, E> {
    pub(crate) fn revision(&self) -> u64 {
        match self {
            Self::Pending(p) => p.revision,
            Self::Complete(c) => c.revision,
            Self::Refreshing(r) => r.revision,
        }
    }

    /// The complete entry readers may be served from, if any.
    pub(crate) fn servable(&self) -> Option<&TrioArc<Complete<K, T, E>>> {
        match self {
            Self::Pending(_) => None,
            Self::Complete(c) => Some(c),
            Self::Refreshing(r) => Some(&r.previous),
        }
    }

    pub(crate) fn entry_stats(&self) -> Option<EntryStats> {
        self.servable().map(|c| c.entry_stats())
    }
}
