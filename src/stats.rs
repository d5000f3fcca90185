//! Point-in-time statistics about a cache and its entries.

use std::{
    fmt::{self, Debug},
    ops::Sub,
};

use crossbeam_utils::atomic::AtomicCell;

/// Statistics about the performance of a cache.
///
/// Cache statistics are incremented according to the following rules:
///
/// - When `get` encounters an existing entry (complete, being computed or being
///   refreshed), `hits` is incremented.
/// - When `get` encounters a missing entry and starts a lookup for it, `misses`
///   is incremented.
/// - `refresh`, `set` and the invalidation methods do not modify the counters.
///
/// `size` is the number of entries in the cache at the time the snapshot was
/// taken, including entries whose lookup is still in flight.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    hits: u64,
    misses: u64,
    size: usize,
}

impl Debug for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStats")
            .field("request_count", &self.request_count())
            .field("hits", &self.hits)
            .field("hit_rate", &self.hit_rate())
            .field("misses", &self.misses)
            .field("miss_rate", &self.miss_rate())
            .field("size", &self.size)
            .finish()
    }
}

impl CacheStats {
    pub(crate) fn new(hits: u64, misses: u64, size: usize) -> Self {
        Self { hits, misses, size }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn request_count(&self) -> u64 {
        self.hits.saturating_add(self.misses)
    }

    pub fn hit_rate(&self) -> f64 {
        let req_count = self.request_count();
        if req_count == 0 {
            1.0
        } else {
            self.hits as f64 / req_count as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        let req_count = self.request_count();
        if req_count == 0 {
            0.0
        } else {
            self.misses as f64 / req_count as f64
        }
    }
}

/// Subtracting an earlier snapshot gives the counts for the period in between.
/// `size` is taken from the later snapshot.
impl Sub for CacheStats {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            hits: self.hits.saturating_sub(rhs.hits),
            misses: self.misses.saturating_sub(rhs.misses),
            size: self.size,
        }
    }
}

/// Statistics about a single cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryStats {
    loaded_at_millis: u64,
}

impl EntryStats {
    pub(crate) fn new(loaded_at_millis: u64) -> Self {
        Self { loaded_at_millis }
    }

    /// The wall-clock time, in milliseconds since the Unix epoch, at which the
    /// entry's value was loaded or set.
    pub fn loaded_at_millis(&self) -> u64 {
        self.loaded_at_millis
    }
}

pub(crate) fn saturating_add(counter: &AtomicCell<u64>, value: u64) {
    let mut v0 = counter.load();
    loop {
        let v1 = v0.saturating_add(value);
        match counter.compare_exchange(v0, v1) {
            Ok(_) => break,
            Err(v2) => v0 = v2,
        }
    }
}

/// Hit and miss counters shared by every caller of one cache.
#[derive(Default)]
pub(crate) struct StatsCounter {
    hits: AtomicCell<u64>,
    misses: AtomicCell<u64>,
}

impl StatsCounter {
    pub(crate) fn record_hit(&self) {
        saturating_add(&self.hits, 1);
    }

    pub(crate) fn record_miss(&self) {
        saturating_add(&self.misses, 1);
    }

    pub(crate) fn snapshot(&self, size: usize) -> CacheStats {
        CacheStats::new(self.hits.load(), self.misses.load(), size)
    }
}
