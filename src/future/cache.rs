use super::{base_cache::BaseCache, builder::CacheBuilder, LookupFn};
use crate::{
    common::time::Clock,
    policy::TimeToLive,
    stats::{CacheStats, EntryStats},
    CacheError, Policy,
};

use std::{
    collections::hash_map::RandomState,
    fmt,
    future::Future,
    hash::{BuildHasher, Hash},
    sync::Arc,
    time::Duration,
};

/// A thread-safe, capacity-bounded cache whose values are produced on demand
/// by an asynchronous lookup.
///
/// - For each key at most one lookup is in flight at a time. Every caller that
///   asks for the key while its lookup is running awaits the same outcome.
/// - Failed lookups are cached too, and returned as
///   [`CacheError::Lookup`][lookup-err] until they expire or are refreshed.
/// - When the cache holds more than `max_capacity` entries, the least recently
///   used ones are evicted. Recency is tracked on a best-effort basis, so the
///   size may briefly exceed the capacity under contention.
/// - Entries expire after a time-to-live, which can be uniform or depend on the
///   lookup outcome. An expired entry is removed on its next access.
///
/// To share the cache across async tasks, clone it. This is a cheap operation.
///
/// [lookup-err]: ../enum.CacheError.html#variant.Lookup
///
/// # Example
///
/// ```rust
/// // Cargo.toml
/// //
/// // [dependencies]
/// // lookup-cache = "0.1"
/// // tokio = { version = "1", features = ["rt-multi-thread", "macros" ] }
///
/// use lookup_cache::future::Cache;
/// use std::{convert::Infallible, time::Duration};
///
/// #[tokio::main]
/// async fn main() {
///     // Up to 1,000 entries, each fresh for 5 minutes.
///     let cache = Cache::new(1_000, Duration::from_secs(5 * 60), |id: u32| async move {
///         // Pretend to fetch the user from a database.
///         Ok::<_, Infallible>(format!("user-{id}"))
///     });
///
///     assert_eq!(cache.get(&42).await.unwrap(), "user-42");
///     // The second get is served from the cache.
///     assert_eq!(cache.get(&42).await.unwrap(), "user-42");
///
///     let stats = cache.cache_stats();
///     assert_eq!((stats.hits(), stats.misses()), (1, 1));
/// }
/// ```
pub struct Cache<K, V, E, S = RandomState> {
    base: BaseCache<K, V, E, S>,
    lookup: LookupFn<K, V, E>,
}

impl<K, V, E, S> Clone for Cache<K, V, E, S> {
    /// Makes a clone of this shared cache.
    ///
    /// This operation is cheap as it only creates thread-safe reference counted
    /// pointers to the shared internal data structures.
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            lookup: Arc::clone(&self.lookup),
        }
    }
}

impl<K, V, E, S> fmt::Debug for Cache<K, V, E, S>
where
    K: fmt::Debug + Hash + Eq + Clone + Send + Sync + 'static,
    V: fmt::Debug + Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d_map = f.debug_map();

        for (k, v) in self.entries() {
            d_map.entry(&k, &v);
        }

        d_map.finish()
    }
}

impl<K, V, E> Cache<K, V, E, RandomState>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Constructs a new `Cache<K, V, E>` that will store up to `max_capacity`
    /// entries, each of them fresh for `time_to_live` after its lookup
    /// finished. Pass `Duration::MAX` for entries that never expire.
    ///
    /// To adjust other configuration knobs such as the name or a per-outcome
    /// time-to-live, use the [`CacheBuilder`][builder-struct].
    ///
    /// [builder-struct]: ./struct.CacheBuilder.html
    pub fn new<F, Fut>(max_capacity: usize, time_to_live: Duration, lookup: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        CacheBuilder::new(max_capacity)
            .time_to_live(time_to_live)
            .build(lookup)
    }

    /// Returns a [`CacheBuilder`][builder-struct], which can build a `Cache`
    /// with various configuration knobs.
    ///
    /// [builder-struct]: ./struct.CacheBuilder.html
    pub fn builder(max_capacity: usize) -> CacheBuilder<V, E, Cache<K, V, E, RandomState>> {
        CacheBuilder::new(max_capacity)
    }
}

impl<K, V, E, S> Cache<K, V, E, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub(crate) fn with_everything(
        name: Option<String>,
        max_capacity: usize,
        initial_capacity: Option<usize>,
        build_hasher: S,
        lookup: LookupFn<K, V, E>,
        time_to_live: TimeToLive<V, E>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base: BaseCache::new(
                name,
                max_capacity,
                initial_capacity,
                build_hasher,
                time_to_live,
                clock,
            ),
            lookup,
        }
    }

    /// Returns the cache's name.
    pub fn name(&self) -> Option<&str> {
        self.base.name()
    }

    /// Returns a read-only cache policy of this cache.
    ///
    /// At this time, cache policy cannot be modified after cache creation.
    pub fn policy(&self) -> Policy {
        self.base.policy()
    }

    /// Returns the value for the key, running the lookup if there is no fresh
    /// entry for it.
    ///
    /// If a lookup for the key is already in flight, this awaits its outcome
    /// instead of starting another one. If the key is being refreshed, the
    /// previous value is returned as long as it has not expired.
    ///
    /// # Errors
    ///
    /// - `CacheError::Lookup` if the lookup failed, now or earlier (failures
    ///   are cached like values).
    /// - `CacheError::Interrupted` if the future driving the lookup was
    ///   dropped, or the lookup panicked, before the lookup completed.
    pub async fn get(&self, key: &K) -> Result<V, CacheError<E>> {
        self.base
            .get_with(key, || (self.lookup)(K::clone(key)))
            .await
    }

    /// Runs a new lookup for the key, keeping a fresh previous value servable
    /// to `get` until the lookup finishes.
    ///
    /// If a lookup or a refresh for the key is already in flight, this awaits
    /// it instead of starting another one. Refreshing does not count as a hit
    /// or a miss.
    ///
    /// # Errors
    ///
    /// The same as [`get`](#method.get). A failed refresh replaces the
    /// previous value with the failure.
    pub async fn refresh(&self, key: &K) -> Result<(), CacheError<E>> {
        self.base
            .refresh_with(key, || (self.lookup)(K::clone(key)))
            .await
    }

    /// Inserts a value for the key, replacing any entry, including one whose
    /// lookup is still in flight. That lookup's outcome is still delivered to
    /// its awaiters but it does not overwrite this value.
    ///
    /// The value expires like a successful lookup outcome would.
    pub fn set(&self, key: K, value: V) {
        self.base.set(key, value);
    }

    /// Discards the entry for the key, if any. A lookup in flight for the key
    /// keeps running for its awaiters but its outcome is not installed.
    pub fn invalidate(&self, key: &K) {
        self.base.invalidate(key);
    }

    /// Discards all entries.
    pub fn invalidate_all(&self) {
        self.base.invalidate_all();
    }

    /// Returns `true` if the cache holds an entry for the key, in any state.
    ///
    /// This does not check expiration and does not count as an access.
    pub fn contains(&self, key: &K) -> bool {
        self.base.contains(key)
    }

    /// Returns the number of entries, counting the ones whose lookup is still
    /// in flight.
    pub fn size(&self) -> usize {
        self.base.size()
    }

    /// Returns a snapshot of the key-value pairs that `get` could currently be
    /// served from: successful complete entries, and the previous values of
    /// entries being refreshed. The order is unspecified.
    pub fn entries(&self) -> Vec<(Arc<K>, V)> {
        self.base.entries()
    }

    /// Returns the values of [`entries`](#method.entries).
    pub fn values(&self) -> Vec<V> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Returns a snapshot of the hit and miss counters and the current size.
    pub fn cache_stats(&self) -> CacheStats {
        self.base.cache_stats()
    }

    /// Returns the statistics of the key's entry, or `None` if the key has no
    /// complete entry.
    pub fn entry_stats(&self, key: &K) -> Option<EntryStats> {
        self.base.entry_stats(key)
    }
}
