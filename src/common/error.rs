use std::sync::Arc;

/// The error type returned by [`Cache::get`][cache-get] and
/// [`Cache::refresh`][cache-refresh] (and their counterparts on
/// [`ScopedCache`][scoped-cache]).
///
/// [cache-get]: ./future/struct.Cache.html#method.get
/// [cache-refresh]: ./future/struct.Cache.html#method.refresh
/// [scoped-cache]: ./future/struct.ScopedCache.html
#[derive(thiserror::Error, Debug)]
pub enum CacheError<E> {
    /// The lookup failed with its own error.
    ///
    /// Failures are cached like values (for the time-to-live the cache assigns
    /// to failures), and the same `Arc` is handed to every caller that awaited
    /// the failed computation.
    #[error("lookup failed: {0}")]
    Lookup(Arc<E>),

    /// The future driving the lookup was dropped or panicked before the lookup
    /// completed.
    ///
    /// The entry was removed from the cache, so the next access starts a fresh
    /// lookup.
    #[error("the lookup was interrupted before it completed")]
    Interrupted,
}

impl<E> CacheError<E> {
    /// Returns the lookup error, if this is a lookup failure.
    pub fn lookup_error(&self) -> Option<&Arc<E>> {
        match self {
            Self::Lookup(e) => Some(e),
            Self::Interrupted => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl<E> Clone for CacheError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Lookup(e) => Self::Lookup(Arc::clone(e)),
            Self::Interrupted => Self::Interrupted,
        }
    }
}
