use super::value_initializer::LookupGuard;
use crate::{
    common::{
        cache_state::{CacheState, Slot},
        deferred::Deferred,
        entry::{Complete, MapValue, Pending, Refreshing},
        time::Clock,
    },
    policy::TimeToLive,
    stats::{CacheStats, EntryStats},
    CacheError, Policy,
};

use std::{
    future::Future,
    hash::{BuildHasher, Hash},
    sync::Arc,
};
use triomphe::Arc as TrioArc;

/// The engine shared by the plain caches. The lookup is not part of it: each
/// operation that may start one receives an `init` closure that creates the
/// lookup future, and calls it only when this call drives the lookup.
pub(crate) struct BaseCache<K, V, E, S> {
    inner: Arc<Inner<K, V, E, S>>,
}

impl<K, V, E, S> Clone for BaseCache<K, V, E, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<K, V, E, S> {
    name: Option<String>,
    max_capacity: usize,
    state: CacheState<K, V, E, S>,
    time_to_live: TimeToLive<V, E>,
    clock: Arc<dyn Clock>,
}

impl<K, V, E, S> Inner<K, V, E, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    fn track_access(&self, key: Arc<K>) {
        let evicted = self.state.track_access(key, self.max_capacity);
        if !evicted.is_empty() {
            self.log_evicted(evicted.len());
        }
    }

    #[cfg(feature = "logging")]
    fn log_evicted(&self, count: usize) {
        log::trace!(
            "{}Evicted {count} entries",
            crate::common::log_prefix(self.name.as_deref())
        );
    }

    #[cfg(not(feature = "logging"))]
    fn log_evicted(&self, _count: usize) {}
}

impl<K, V, E, S> BaseCache<K, V, E, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        name: Option<String>,
        max_capacity: usize,
        initial_capacity: Option<usize>,
        build_hasher: S,
        time_to_live: TimeToLive<V, E>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                max_capacity,
                state: CacheState::new(initial_capacity, build_hasher),
                time_to_live,
                clock,
            }),
        }
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub(crate) fn policy(&self) -> Policy {
        Policy::new(self.inner.max_capacity, self.inner.time_to_live.uniform())
    }

    pub(crate) async fn get_with<F, Fut>(&self, key: &K, init: F) -> Result<V, CacheError<E>>
    where
        K: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let inner = &*self.inner;
        loop {
            match inner.state.get_or_reserve(key) {
                Slot::Reserved(pending) => {
                    inner.state.record_miss();
                    inner.track_access(Arc::clone(&pending.key));
                    return self.lookup_value_of(pending, init()).await;
                }
                Slot::Found(MapValue::Pending(pending)) => {
                    inner.state.record_hit();
                    inner.track_access(pending.key);
                    return pending.deferred.wait().await.into_result();
                }
                Slot::Found(MapValue::Complete(complete)) => {
                    inner.state.record_hit();
                    inner.track_access(Arc::clone(&complete.key));
                    if complete.has_expired(inner.now_millis()) {
                        inner.state.remove_if_revision(key, complete.revision);
                        continue;
                    }
                    return complete.outcome.clone().map_err(CacheError::Lookup);
                }
                Slot::Found(MapValue::Refreshing(refreshing)) => {
                    let previous = &refreshing.previous;
                    inner.state.record_hit();
                    inner.track_access(Arc::clone(&previous.key));
                    if previous.has_expired(inner.now_millis()) {
                        return refreshing.deferred.wait().await.into_result();
                    }
                    return previous.outcome.clone().map_err(CacheError::Lookup);
                }
            }
        }
    }

    pub(crate) async fn refresh_with<F, Fut>(&self, key: &K, init: F) -> Result<(), CacheError<E>>
    where
        K: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let inner = &*self.inner;
        match inner.state.get_or_reserve(key) {
            Slot::Reserved(pending) => {
                inner.track_access(Arc::clone(&pending.key));
                self.lookup_value_of(pending, init()).await.map(drop)
            }
            Slot::Found(MapValue::Pending(Pending { deferred, .. }))
            | Slot::Found(MapValue::Refreshing(Refreshing { deferred, .. })) => {
                deferred.wait().await.into_result().map(drop)
            }
            Slot::Found(MapValue::Complete(complete)) => {
                if complete.has_expired(inner.now_millis()) {
                    inner.state.remove_if_revision(key, complete.revision);
                    return self.get_with(key, init).await.map(drop);
                }
                let pending = Pending {
                    key: Arc::clone(&complete.key),
                    revision: inner.state.next_revision(),
                    deferred: Deferred::new(),
                };
                let refreshing = Refreshing {
                    revision: pending.revision,
                    deferred: pending.deferred.clone(),
                    previous: TrioArc::clone(&complete),
                };
                // If the entry changed in the meantime, the lookup still runs
                // for this caller but its outcome is not installed.
                let _ = inner.state.replace_if_revision(
                    key,
                    complete.revision,
                    MapValue::Refreshing(refreshing),
                );
                inner.track_access(Arc::clone(&pending.key));
                self.lookup_value_of(pending, init()).await.map(drop)
            }
        }
    }

    pub(crate) fn set(&self, key: K, value: V) {
        let inner = &*self.inner;
        let now = inner.now_millis();
        let key = Arc::new(key);
        let expires_at_millis = inner.time_to_live.expires_at(Ok(&value), now);
        let complete = Complete {
            key: Arc::clone(&key),
            revision: inner.state.next_revision(),
            outcome: Ok(value),
            loaded_at_millis: now,
            expires_at_millis,
        };
        inner
            .state
            .insert(Arc::clone(&key), MapValue::Complete(TrioArc::new(complete)));
        inner.track_access(key);
    }

    pub(crate) fn invalidate(&self, key: &K) {
        self.inner.state.remove(key);
    }

    pub(crate) fn invalidate_all(&self) {
        self.inner.state.clear();
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.inner.state.contains(key)
    }

    pub(crate) fn size(&self) -> usize {
        self.inner.state.len()
    }

    pub(crate) fn entries(&self) -> Vec<(Arc<K>, V)> {
        self.inner
            .state
            .servable_entries()
            .into_iter()
            .filter_map(|c| match &c.outcome {
                Ok(v) => Some((Arc::clone(&c.key), v.clone())),
                Err(_) => None,
            })
            .collect()
    }

    pub(crate) fn cache_stats(&self) -> CacheStats {
        self.inner.state.stats()
    }

    pub(crate) fn entry_stats(&self, key: &K) -> Option<EntryStats> {
        self.inner.state.get(key).and_then(|v| v.entry_stats())
    }

    async fn lookup_value_of<Fut>(
        &self,
        pending: Pending<K, V, E>,
        lookup: Fut,
    ) -> Result<V, CacheError<E>>
    where
        Fut: Future<Output = Result<V, E>>,
    {
        let inner = &*self.inner;
        let guard = LookupGuard::new(
            &inner.state,
            pending.key,
            pending.revision,
            pending.deferred,
            inner.name.as_deref(),
        );

        let outcome = lookup.await.map_err(Arc::new);

        let now = inner.now_millis();
        let expires_at_millis = inner
            .time_to_live
            .expires_at(outcome.as_ref().map_err(|e| &**e), now);
        let complete = TrioArc::new(Complete {
            key: Arc::clone(guard.key()),
            revision: inner.state.next_revision(),
            outcome: outcome.clone(),
            loaded_at_millis: now,
            expires_at_millis,
        });
        // Not installing is fine: a newer write or an invalidation won.
        let _ = guard.complete(complete);

        outcome.map_err(CacheError::Lookup)
    }
}
