use super::{base_cache::BaseCache, builder::CacheBuilder, KeyFn, LookupFn};
use crate::{
    common::time::Clock,
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

/// A [`Cache`][cache-struct] whose callers pass the lookup's input rather than
/// the key itself.
///
/// The cache derives the key from each input with a keying function and stores
/// the value under that key, so two inputs with the same key share one entry.
/// This is useful when the input carries more than what identifies the value,
/// such as a request with tracing context, or is too large to keep in the
/// cache.
///
/// Everything else behaves like `Cache`.
///
/// [cache-struct]: ./struct.Cache.html
///
/// # Example
///
/// ```rust
/// use lookup_cache::future::KeyedCache;
/// use std::convert::Infallible;
///
/// #[derive(Clone)]
/// struct Request {
///     user_id: u32,
///     trace_id: String,
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let cache = KeyedCache::builder(100).build(
///         |req: &Request| req.user_id,
///         |req: Request| async move {
///             Ok::<_, Infallible>(format!("user-{} ({})", req.user_id, req.trace_id))
///         },
///     );
///
///     let first = Request { user_id: 1, trace_id: "a".into() };
///     let second = Request { user_id: 1, trace_id: "b".into() };
///     assert_eq!(cache.get(&first).await.unwrap(), "user-1 (a)");
///     // Same key, so the value of the first lookup is served.
///     assert_eq!(cache.get(&second).await.unwrap(), "user-1 (a)");
///     assert_eq!(cache.size(), 1);
/// }
/// ```
pub struct KeyedCache<I, K, V, E, S = RandomState> {
    base: BaseCache<K, V, E, S>,
    key_by: KeyFn<I, K>,
    lookup: LookupFn<I, V, E>,
}

impl<I, K, V, E, S> Clone for KeyedCache<I, K, V, E, S> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            key_by: Arc::clone(&self.key_by),
            lookup: Arc::clone(&self.lookup),
        }
    }
}

impl<I, K, V, E, S> fmt::Debug for KeyedCache<I, K, V, E, S>
where
    I: Clone + Send + Sync + 'static,
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

impl<I, K, V, E> KeyedCache<I, K, V, E, RandomState>
where
    I: Clone + Send + Sync + 'static,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Returns a [`CacheBuilder`][builder-struct], which can build a
    /// `KeyedCache` with various configuration knobs.
    ///
    /// [builder-struct]: ./struct.CacheBuilder.html
    pub fn builder(
        max_capacity: usize,
    ) -> CacheBuilder<V, E, KeyedCache<I, K, V, E, RandomState>> {
        CacheBuilder::with_max_capacity(max_capacity)
    }
}

impl<I, K, V, E, S> KeyedCache<I, K, V, E, S>
where
    I: Clone + Send + Sync + 'static,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn with_everything(
        name: Option<String>,
        max_capacity: usize,
        initial_capacity: Option<usize>,
        build_hasher: S,
        key_by: KeyFn<I, K>,
        lookup: LookupFn<I, V, E>,
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
            key_by,
            lookup,
        }
    }

    /// Returns the cache's name.
    pub fn name(&self) -> Option<&str> {
        self.base.name()
    }

    /// Returns a read-only cache policy of this cache.
    pub fn policy(&self) -> Policy {
        self.base.policy()
    }

    /// Returns the value for the input's key, running the lookup with this
    /// input if there is no fresh entry for the key.
    ///
    /// # Errors
    ///
    /// The same as [`Cache::get`][cache-get].
    ///
    /// [cache-get]: ./struct.Cache.html#method.get
    pub async fn get(&self, input: &I) -> Result<V, CacheError<E>> {
        let key = (self.key_by)(input);
        self.base
            .get_with(&key, || (self.lookup)(I::clone(input)))
            .await
    }

    /// Runs a new lookup with this input for the input's key. See
    /// [`Cache::refresh`][cache-refresh].
    ///
    /// # Errors
    ///
    /// The same as [`Cache::refresh`][cache-refresh].
    ///
    /// [cache-refresh]: ./struct.Cache.html#method.refresh
    pub async fn refresh(&self, input: &I) -> Result<(), CacheError<E>> {
        let key = (self.key_by)(input);
        self.base
            .refresh_with(&key, || (self.lookup)(I::clone(input)))
            .await
    }

    /// Inserts a value for the input's key, replacing any entry.
    pub fn set(&self, input: &I, value: V) {
        self.base.set((self.key_by)(input), value);
    }

    /// Discards the entry for the input's key, if any.
    pub fn invalidate(&self, input: &I) {
        self.base.invalidate(&(self.key_by)(input));
    }

    /// Discards all entries.
    pub fn invalidate_all(&self) {
        self.base.invalidate_all();
    }

    /// Returns `true` if the cache holds an entry for the input's key, in any
    /// state.
    pub fn contains(&self, input: &I) -> bool {
        self.base.contains(&(self.key_by)(input))
    }

    /// Returns the number of entries, counting the ones whose lookup is still
    /// in flight.
    pub fn size(&self) -> usize {
        self.base.size()
    }

    /// Returns a snapshot of the servable entries, by derived key. See
    /// [`Cache::entries`][cache-entries].
    ///
    /// [cache-entries]: ./struct.Cache.html#method.entries
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

    /// Returns the statistics of the entry for the input's key.
    pub fn entry_stats(&self, input: &I) -> Option<EntryStats> {
        self.base.entry_stats(&(self.key_by)(input))
    }
}

#[cfg(test)]
mod tests {
    use super::KeyedCache;

    use std::{
        convert::Infallible,
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
    };

    #[derive(Clone, Debug)]
    struct Query {
        table: &'static str,
        id: u32,
        attempt: u32,
    }

    fn query(table: &'static str, id: u32, attempt: u32) -> Query {
        Query { table, id, attempt }
    }

    fn query_cache(calls: Arc<AtomicU32>) -> KeyedCache<Query, (&'static str, u32), String, Infallible> {
        KeyedCache::builder(10)
            .name("queries")
            .build(
                |q: &Query| (q.table, q.id),
                move |q: Query| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(format!("{}/{} (attempt {})", q.table, q.id, q.attempt)) }
                },
            )
    }

    #[tokio::test]
    async fn inputs_with_the_same_key_share_an_entry() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = query_cache(Arc::clone(&calls));
        assert_eq!(cache.name(), Some("queries"));

        assert_eq!(cache.get(&query("users", 1, 0)).await.unwrap(), "users/1 (attempt 0)");
        assert_eq!(cache.get(&query("users", 1, 1)).await.unwrap(), "users/1 (attempt 0)");
        assert_eq!(cache.get(&query("teams", 1, 2)).await.unwrap(), "teams/1 (attempt 2)");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.size(), 2);
        assert!(cache.contains(&query("users", 1, 9)));

        let mut keys: Vec<_> = cache.entries().into_iter().map(|(k, _)| *k).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![("teams", 1), ("users", 1)]);

        let stats = cache.cache_stats();
        assert_eq!((stats.hits(), stats.misses()), (1, 2));
    }

    #[tokio::test]
    async fn refresh_runs_the_lookup_with_the_new_input() {
        let calls = Arc::new(AtomicU32::new(0));
        let cache = query_cache(Arc::clone(&calls));

        cache.get(&query("users", 1, 0)).await.unwrap();
        cache.refresh(&query("users", 1, 1)).await.unwrap();
        assert_eq!(cache.get(&query("users", 1, 2)).await.unwrap(), "users/1 (attempt 1)");
        assert!(cache.entry_stats(&query("users", 1, 3)).is_some());

        cache.set(&query("users", 1, 4), "set".to_string());
        assert_eq!(cache.values(), vec!["set".to_string()]);

        cache.invalidate(&query("users", 1, 5));
        assert!(!cache.contains(&query("users", 1, 0)));
        cache.get(&query("users", 2, 0)).await.unwrap();
        cache.invalidate_all();
        assert_eq!(cache.size(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
