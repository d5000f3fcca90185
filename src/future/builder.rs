use super::{Cache, KeyedCache, Scope, ScopedCache};
use crate::{
    common::time::{Clock, SystemClock},
    policy::TimeToLive,
};

use futures_util::FutureExt;
use std::{
    collections::hash_map::RandomState,
    future::Future,
    hash::{BuildHasher, Hash},
    marker::PhantomData,
    sync::Arc,
    time::Duration,
};

/// Builds a [`Cache`][cache-struct], a [`KeyedCache`][keyed-cache-struct] or a
/// [`ScopedCache`][scoped-cache-struct] with various configuration knobs.
///
/// [cache-struct]: ./struct.Cache.html
/// [keyed-cache-struct]: ./struct.KeyedCache.html
/// [scoped-cache-struct]: ./struct.ScopedCache.html
///
/// # Examples
///
/// ```rust
/// use lookup_cache::future::CacheBuilder;
///
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let cache = CacheBuilder::new(10_000) // Max 10,000 entries
///     .name("users")
///     // Successful lookups stay fresh for 30 minutes, failures for 5 seconds.
///     .time_to_live_with(|outcome: Result<&String, &std::io::Error>| match outcome {
///         Ok(_) => Duration::from_secs(30 * 60),
///         Err(_) => Duration::from_secs(5),
///     })
///     // Create the cache.
///     .build(|id: u64| async move { Ok(format!("user-{id}")) });
///
/// assert_eq!(cache.get(&7).await.unwrap(), "user-7");
/// # }
/// ```
///
pub struct CacheBuilder<V, E, C> {
    name: Option<String>,
    max_capacity: usize,
    initial_capacity: Option<usize>,
    time_to_live: TimeToLive<V, E>,
    clock: Option<Arc<dyn Clock>>,
    cache_type: PhantomData<C>,
}

impl<K, V, E> CacheBuilder<V, E, Cache<K, V, E, RandomState>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Construct a new `CacheBuilder` that will be used to build a `Cache` holding
    /// up to `max_capacity` entries.
    pub fn new(max_capacity: usize) -> Self {
        Self::with_max_capacity(max_capacity)
    }

    /// Builds a `Cache<K, V, E>` whose values are produced by `lookup`.
    pub fn build<F, Fut>(self, lookup: F) -> Cache<K, V, E, RandomState>
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.build_with_hasher(lookup, RandomState::default())
    }

    /// Builds a `Cache<K, V, E, S>` whose values are produced by `lookup`, with
    /// the given `hasher`.
    pub fn build_with_hasher<F, Fut, S>(self, lookup: F, hasher: S) -> Cache<K, V, E, S>
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        let clock = self.clock_or_default();
        Cache::with_everything(
            self.name,
            self.max_capacity,
            self.initial_capacity,
            hasher,
            Arc::new(move |key| lookup(key).boxed()),
            self.time_to_live,
            clock,
        )
    }
}

impl<I, K, V, E> CacheBuilder<V, E, KeyedCache<I, K, V, E, RandomState>>
where
    I: Clone + Send + Sync + 'static,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Builds a `KeyedCache<I, K, V, E>` that stores the value produced by
    /// `lookup` for an input under the key `key_by` derives from the input.
    pub fn build<KF, F, Fut>(self, key_by: KF, lookup: F) -> KeyedCache<I, K, V, E, RandomState>
    where
        KF: Fn(&I) -> K + Send + Sync + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.build_with_hasher(key_by, lookup, RandomState::default())
    }

    /// Builds a `KeyedCache<I, K, V, E, S>` with the given `hasher` for the
    /// derived keys.
    pub fn build_with_hasher<KF, F, Fut, S>(
        self,
        key_by: KF,
        lookup: F,
        hasher: S,
    ) -> KeyedCache<I, K, V, E, S>
    where
        KF: Fn(&I) -> K + Send + Sync + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        let clock = self.clock_or_default();
        KeyedCache::with_everything(
            self.name,
            self.max_capacity,
            self.initial_capacity,
            hasher,
            Arc::new(key_by),
            Arc::new(move |input| lookup(input).boxed()),
            self.time_to_live,
            clock,
        )
    }
}

impl<K, V, E> CacheBuilder<V, E, ScopedCache<K, V, E, RandomState>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Builds a `ScopedCache<K, V, E>` whose values are produced by `lookup`.
    ///
    /// The lookup receives the [`Scope`][scope-struct] of the value it is about
    /// to produce, and registers the value's finalizers on it.
    ///
    /// [scope-struct]: ./struct.Scope.html
    pub fn build<F, Fut>(self, lookup: F) -> ScopedCache<K, V, E, RandomState>
    where
        F: Fn(K, Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.build_with_hasher(lookup, RandomState::default())
    }

    /// Builds a `ScopedCache<K, V, E, S>` whose values are produced by `lookup`,
    /// with the given `hasher`.
    pub fn build_with_hasher<F, Fut, S>(self, lookup: F, hasher: S) -> ScopedCache<K, V, E, S>
    where
        F: Fn(K, Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        let clock = self.clock_or_default();
        ScopedCache::with_everything(
            self.name,
            self.max_capacity,
            self.initial_capacity,
            hasher,
            Box::new(move |key, scope| lookup(key, scope).boxed()),
            self.time_to_live,
            clock,
        )
    }
}

impl<V, E, C> CacheBuilder<V, E, C> {
    pub(crate) fn with_max_capacity(max_capacity: usize) -> Self {
        Self {
            name: None,
            max_capacity,
            initial_capacity: None,
            time_to_live: TimeToLive::Never,
            clock: None,
            cache_type: PhantomData,
        }
    }

    /// Sets the name of the cache. Currently the name is used for
    /// identification only in logging messages.
    pub fn name(self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self
        }
    }

    /// Sets the initial capacity of the cache.
    pub fn initial_capacity(self, capacity: usize) -> Self {
        Self {
            initial_capacity: Some(capacity),
            ..self
        }
    }

    /// Sets the time to live of the cache.
    ///
    /// An entry will be expired after the specified duration past from the
    /// completion of its lookup, whether the lookup succeeded or failed.
    /// `Duration::MAX` means the entries never expire, which is also the
    /// default.
    pub fn time_to_live(self, duration: Duration) -> Self {
        let time_to_live = if duration == Duration::MAX {
            TimeToLive::Never
        } else {
            TimeToLive::Uniform(duration)
        };
        Self {
            time_to_live,
            ..self
        }
    }

    /// Sets a time to live that depends on the outcome of each lookup, for
    /// example to retry failures sooner than successful values are refreshed.
    pub fn time_to_live_with<F>(self, time_to_live: F) -> Self
    where
        F: Fn(Result<&V, &E>) -> Duration + Send + Sync + 'static,
    {
        Self {
            time_to_live: TimeToLive::ByOutcome(Arc::new(time_to_live)),
            ..self
        }
    }

    /// Sets the clock used for expiration and for the load timestamps of the
    /// entries. Defaults to [`SystemClock`][system-clock].
    ///
    /// [system-clock]: ../struct.SystemClock.html
    pub fn clock(self, clock: impl Clock) -> Self {
        Self {
            clock: Some(Arc::new(clock)),
            ..self
        }
    }

    fn clock_or_default(&self) -> Arc<dyn Clock> {
        self.clock
            .clone()
            .unwrap_or_else(|| Arc::new(SystemClock::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::CacheBuilder;
    use crate::future::ScopedCache;

    use std::{convert::Infallible, time::Duration};

    #[tokio::test]
    async fn build_cache() {
        // Cache<char, String, Infallible>
        let cache = CacheBuilder::new(100).build(|c: char| async move {
            Ok::<_, Infallible>(c.to_string())
        });

        assert_eq!(cache.name(), None);
        assert_eq!(cache.policy().max_capacity(), 100);
        assert_eq!(cache.policy().time_to_live(), None);

        assert_eq!(cache.get(&'a').await.unwrap(), "a");

        let cache = CacheBuilder::new(100)
            .name("letters")
            .initial_capacity(10)
            .time_to_live(Duration::from_secs(45 * 60))
            .build(|c: char| async move { Ok::<_, Infallible>(c.to_string()) });

        assert_eq!(cache.name(), Some("letters"));
        assert_eq!(cache.policy().max_capacity(), 100);
        assert_eq!(
            cache.policy().time_to_live(),
            Some(Duration::from_secs(45 * 60))
        );

        assert_eq!(cache.get(&'a').await.unwrap(), "a");
    }

    #[tokio::test]
    async fn infinite_time_to_live_is_no_time_to_live() {
        let lookup = |c: char| async move { Ok::<_, Infallible>(c) };
        let by_default = CacheBuilder::new(10).build(lookup);
        let explicit = CacheBuilder::new(10)
            .time_to_live(Duration::MAX)
            .build(lookup);
        let via_new = crate::future::Cache::new(10, Duration::MAX, lookup);

        for cache in [by_default, explicit, via_new] {
            assert_eq!(cache.policy().time_to_live(), None);
        }
    }

    #[tokio::test]
    async fn build_scoped_cache() {
        let cache = ScopedCache::builder(5)
            .name("scoped")
            .build(|c: char, _scope| async move { Ok::<_, Infallible>(c as u32) });

        assert_eq!(cache.name(), Some("scoped"));
        assert_eq!(cache.policy().max_capacity(), 5);
        assert_eq!(*cache.get(&'a').await.unwrap(), 97);
    }
}
