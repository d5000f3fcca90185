use super::{
    builder::CacheBuilder,
    scope::{LookupScope, ScopedRef, ScopedResource},
    value_initializer::LookupGuard,
    ScopedLookupFn,
};
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
    collections::hash_map::RandomState,
    fmt,
    hash::{BuildHasher, Hash},
    sync::Arc,
};
use triomphe::Arc as TrioArc;

type Resource<V> = Arc<ScopedResource<V>>;
type ScopedValue<K, V, E> = MapValue<K, Resource<V>, E>;

/// A capacity-bounded cache of values that own resources, produced on demand
/// by an asynchronous lookup.
///
/// It behaves like [`Cache`][cache-struct] (one lookup in flight per key,
/// cached failures, LRU eviction, time-to-live), except that:
///
/// - The lookup receives the [`Scope`][scope-struct] of the value it produces
///   and registers the value's finalizers on it.
/// - `get` returns a [`ScopedRef`][scoped-ref-struct] borrow instead of a clone.
/// - Once an entry leaves the cache (evicted, invalidated, replaced by a
///   refresh, or expired) and its last borrow is dropped, its scope is closed
///   exactly once. Dropping the last handle to the cache releases every entry
///   the cache still holds.
///
/// [cache-struct]: ./struct.Cache.html
/// [scope-struct]: ./struct.Scope.html
/// [scoped-ref-struct]: ./struct.ScopedRef.html
///
/// # Example
///
/// ```rust
/// use lookup_cache::future::ScopedCache;
/// use std::{
///     convert::Infallible,
///     sync::{atomic::{AtomicUsize, Ordering}, Arc},
/// };
///
/// #[tokio::main]
/// async fn main() {
///     let open_connections = Arc::new(AtomicUsize::new(0));
///     let counter = Arc::clone(&open_connections);
///
///     let cache = ScopedCache::builder(100).build(move |host: String, scope| {
///         let counter = Arc::clone(&counter);
///         async move {
///             counter.fetch_add(1, Ordering::SeqCst);
///             // Close the "connection" when it is no longer used.
///             scope.add_finalizer(move || {
///                 counter.fetch_sub(1, Ordering::SeqCst);
///             });
///             Ok::<_, Infallible>(format!("connection to {host}"))
///         }
///     });
///
///     let host = "db.example.com".to_string();
///     let conn = cache.get(&host).await.unwrap();
///     assert_eq!(*conn, "connection to db.example.com");
///
///     // Still borrowed, so invalidating does not close the connection yet.
///     cache.invalidate(&host);
///     assert_eq!(open_connections.load(Ordering::SeqCst), 1);
///
///     drop(conn);
///     assert_eq!(open_connections.load(Ordering::SeqCst), 0);
/// }
/// ```
pub struct ScopedCache<K, V, E, S = RandomState>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    inner: Arc<Inner<K, V, E, S>>,
}

impl<K, V, E, S> Clone for ScopedCache<K, V, E, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    /// Makes a clone of this shared cache.
    ///
    /// This operation is cheap as it only creates thread-safe reference counted
    /// pointers to the shared internal data structures.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E, S> fmt::Debug for ScopedCache<K, V, E, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCache")
            .field("name", &self.inner.name)
            .field("max_capacity", &self.inner.max_capacity)
            .field("size", &self.inner.state.len())
            .finish()
    }
}

struct Inner<K, V, E, S>
// NOTE: We usually do not attach trait bounds to here at the struct definition, but
// the Drop trait requires these bounds here.
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    name: Option<String>,
    max_capacity: usize,
    state: CacheState<K, Resource<V>, E, S>,
    lookup: ScopedLookupFn<K, V, E>,
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
        if evicted.is_empty() {
            return;
        }
        self.log_evicted(evicted.len());
        for value in evicted {
            release_cache_share(value);
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

impl<K, V, E, S> Drop for Inner<K, V, E, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    fn drop(&mut self) {
        for value in self.state.clear() {
            release_cache_share(value);
        }
    }
}

/// Gives up the cache's share of the resource held by a value that has just
/// left the map. A `Refreshing` value holds the share of its previous entry; a
/// `Pending` value holds none.
fn release_cache_share<K, V, E>(value: ScopedValue<K, V, E>) {
    let complete = match &value {
        MapValue::Pending(_) => return,
        MapValue::Complete(c) => c,
        MapValue::Refreshing(r) => &r.previous,
    };
    if let Ok(resource) = &complete.outcome {
        resource.release();
    }
}

impl<K, V, E> ScopedCache<K, V, E, RandomState>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Returns a [`CacheBuilder`][builder-struct], which can build a
    /// `ScopedCache` with various configuration knobs.
    ///
    /// [builder-struct]: ./struct.CacheBuilder.html
    pub fn builder(
        max_capacity: usize,
    ) -> CacheBuilder<V, E, ScopedCache<K, V, E, RandomState>> {
        CacheBuilder::with_max_capacity(max_capacity)
    }
}

impl<K, V, E, S> ScopedCache<K, V, E, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub(crate) fn with_everything(
        name: Option<String>,
        max_capacity: usize,
        initial_capacity: Option<usize>,
        build_hasher: S,
        lookup: ScopedLookupFn<K, V, E>,
        time_to_live: TimeToLive<V, E>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                max_capacity,
                state: CacheState::new(initial_capacity, build_hasher),
                lookup,
                time_to_live,
                clock,
            }),
        }
    }

    /// Returns the cache's name.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Returns a read-only cache policy of this cache.
    pub fn policy(&self) -> Policy {
        Policy::new(self.inner.max_capacity, self.inner.time_to_live.uniform())
    }

    /// Returns a borrow of the value for the key, running the lookup if there is
    /// no fresh entry for it.
    ///
    /// The value stays usable for as long as the returned borrow lives, even if
    /// the entry leaves the cache in the meantime.
    ///
    /// # Errors
    ///
    /// The same as [`Cache::get`][cache-get].
    ///
    /// [cache-get]: ./struct.Cache.html#method.get
    pub async fn get(&self, key: &K) -> Result<ScopedRef<V>, CacheError<E>> {
        let inner = &*self.inner;
        loop {
            // A resource can be finalized between reading its entry and
            // borrowing it. Then the entry is gone too and we look again.
            match inner.state.get_or_reserve(key) {
                Slot::Reserved(pending) => {
                    inner.state.record_miss();
                    inner.track_access(Arc::clone(&pending.key));
                    return self.lookup_value_of(pending).await;
                }
                Slot::Found(MapValue::Pending(pending)) => {
                    inner.state.record_hit();
                    inner.track_access(pending.key);
                    let resource = pending.deferred.wait().await.into_result()?;
                    if let Some(borrowed) = ScopedResource::acquire(&resource) {
                        return Ok(borrowed);
                    }
                }
                Slot::Found(MapValue::Complete(complete)) => {
                    inner.state.record_hit();
                    inner.track_access(Arc::clone(&complete.key));
                    if complete.has_expired(inner.now_millis()) {
                        if let Some(removed) = inner.state.remove_if_revision(key, complete.revision)
                        {
                            release_cache_share(removed);
                        }
                        continue;
                    }
                    if let Some(borrowed) = borrow(&complete)? {
                        return Ok(borrowed);
                    }
                }
                Slot::Found(MapValue::Refreshing(refreshing)) => {
                    let previous = &refreshing.previous;
                    inner.state.record_hit();
                    inner.track_access(Arc::clone(&previous.key));
                    if !previous.has_expired(inner.now_millis()) {
                        if let Some(borrowed) = borrow(previous)? {
                            return Ok(borrowed);
                        }
                        continue;
                    }
                    let resource = refreshing.deferred.wait().await.into_result()?;
                    if let Some(borrowed) = ScopedResource::acquire(&resource) {
                        return Ok(borrowed);
                    }
                }
            }
        }
    }

    /// Runs a new lookup for the key, keeping a fresh previous value servable
    /// to `get` until the lookup finishes. The previous value is then released
    /// by the cache, and finalized once its last borrow is dropped.
    ///
    /// # Errors
    ///
    /// The same as [`Cache::refresh`][cache-refresh].
    ///
    /// [cache-refresh]: ./struct.Cache.html#method.refresh
    pub async fn refresh(&self, key: &K) -> Result<(), CacheError<E>> {
        let inner = &*self.inner;
        match inner.state.get_or_reserve(key) {
            Slot::Reserved(pending) => {
                inner.track_access(Arc::clone(&pending.key));
                self.lookup_value_of(pending).await.map(drop)
            }
            Slot::Found(MapValue::Pending(Pending { deferred, .. }))
            | Slot::Found(MapValue::Refreshing(Refreshing { deferred, .. })) => {
                deferred.wait().await.into_result().map(drop)
            }
            Slot::Found(MapValue::Complete(complete)) => {
                if complete.has_expired(inner.now_millis()) {
                    if let Some(removed) = inner.state.remove_if_revision(key, complete.revision) {
                        release_cache_share(removed);
                    }
                    return self.get(key).await.map(drop);
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
                // On success the cache's share of the previous resource moves
                // into the refreshing entry, so it is not released here.
                let _ = inner.state.replace_if_revision(
                    key,
                    complete.revision,
                    MapValue::Refreshing(refreshing),
                );
                inner.track_access(Arc::clone(&pending.key));
                self.lookup_value_of(pending).await.map(drop)
            }
        }
    }

    /// Discards the entry for the key, if any. Its resource is finalized once
    /// its last borrow is dropped.
    pub fn invalidate(&self, key: &K) {
        if let Some(removed) = self.inner.state.remove(key) {
            release_cache_share(removed);
        }
    }

    /// Discards all entries.
    pub fn invalidate_all(&self) {
        for removed in self.inner.state.clear() {
            release_cache_share(removed);
        }
    }

    /// Returns `true` if the cache holds an entry for the key, in any state.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.state.contains(key)
    }

    /// Returns the number of entries, counting the ones whose lookup is still
    /// in flight.
    pub fn size(&self) -> usize {
        self.inner.state.len()
    }

    /// Returns a snapshot of the hit and miss counters and the current size.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.state.stats()
    }

    /// Returns the statistics of the key's entry, or `None` if the key has no
    /// complete entry.
    pub fn entry_stats(&self, key: &K) -> Option<EntryStats> {
        self.inner.state.get(key).and_then(|v| v.entry_stats())
    }

    async fn lookup_value_of(
        &self,
        pending: Pending<K, Resource<V>, E>,
    ) -> Result<ScopedRef<V>, CacheError<E>> {
        let inner = &*self.inner;
        // An interrupted refresh removes a `Refreshing` entry, which still
        // holds the cache's share of the previous resource.
        let guard = LookupGuard::new(
            &inner.state,
            pending.key,
            pending.revision,
            pending.deferred,
            inner.name.as_deref(),
        )
        .on_removal(release_cache_share::<K, V, E>);

        let scope = LookupScope::new(inner.name.as_deref());
        let outcome = (inner.lookup)(K::clone(guard.key()), scope.scope().clone()).await;

        let now = inner.now_millis();
        let expires_at_millis = inner.time_to_live.expires_at(outcome.as_ref(), now);
        let (stored, borrowed) = match outcome {
            Ok(value) => {
                // One share for the cache and one for this caller.
                let resource = scope.into_resource(value);
                let borrowed = ScopedResource::adopt(Arc::clone(&resource));
                (Ok(resource), Ok(borrowed))
            }
            Err(e) => {
                // Nothing to finalize later.
                drop(scope);
                let e = Arc::new(e);
                (Err(Arc::clone(&e)), Err(CacheError::Lookup(e)))
            }
        };

        let complete = TrioArc::new(Complete {
            key: Arc::clone(guard.key()),
            revision: inner.state.next_revision(),
            outcome: stored,
            loaded_at_millis: now,
            expires_at_millis,
        });
        match guard.complete(complete) {
            Ok(replaced) => release_cache_share(replaced),
            // A newer write or an invalidation won. Nobody will release the
            // cache's share of our resource, so do it now.
            Err(not_installed) => release_cache_share(not_installed),
        }

        borrowed
    }
}

/// Borrows the resource of a complete entry. Returns `Ok(None)` if the resource
/// was finalized after the entry was read.
fn borrow<K, V, E>(
    complete: &Complete<K, Resource<V>, E>,
) -> Result<Option<ScopedRef<V>>, CacheError<E>> {
    match &complete.outcome {
        Ok(resource) => Ok(ScopedResource::acquire(resource)),
        Err(e) => Err(CacheError::Lookup(Arc::clone(e))),
    }
}
