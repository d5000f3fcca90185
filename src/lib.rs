#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Lookup Cache is a concurrent, capacity-bounded cache for Rust whose values
//! are produced on demand by an asynchronous lookup function.
//!
//! A lookup cache sits in front of a slow or expensive source, such as a
//! database or a remote service, and makes sure that:
//!
//! - For each key at most one lookup is in flight at any time. Concurrent
//!   callers asking for the same key await the same outcome.
//! - Outcomes, including failures, are kept for a time-to-live and served from
//!   memory until they expire or are refreshed. A refresh keeps serving the
//!   previous value while the new lookup runs.
//! - The number of entries stays bounded. The least recently used entries are
//!   evicted first.
//! - Hits, misses and per-entry load timestamps are recorded.
//!
//! # Cache types
//!
//! - [`future::Cache`][future-cache-struct] caches plain values and hands out
//!   clones of them.
//! - [`future::KeyedCache`][keyed-cache-struct] is a `Cache` called with the
//!   lookup's input. It stores each value under a key derived from the input.
//! - [`future::ScopedCache`][scoped-cache-struct] caches values that own
//!   resources. Each value carries a [`Scope`][scope-struct] of finalizers that
//!   is closed once the value has left the cache and its last borrow was
//!   dropped.
//!
//! Both are runtime-agnostic: they work with Tokio, async-std, actix-rt or any
//! other executor.
//!
//! [future-cache-struct]: ./future/struct.Cache.html
//! [keyed-cache-struct]: ./future/struct.KeyedCache.html
//! [scoped-cache-struct]: ./future/struct.ScopedCache.html
//! [scope-struct]: ./future/struct.Scope.html
//!
//! # Example
//!
//! ```rust
//! use lookup_cache::{future::Cache, CacheError};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct NotFound;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = Cache::new(10_000, Duration::from_secs(60), |id: u32| async move {
//!         if id == 0 {
//!             Err(NotFound)
//!         } else {
//!             Ok(format!("user-{id}"))
//!         }
//!     });
//!
//!     assert_eq!(cache.get(&1).await.unwrap(), "user-1");
//!     assert!(matches!(cache.get(&0).await, Err(CacheError::Lookup(_))));
//! }
//! ```
//!
//! # Crate features
//!
//! - `quanta` (enabled by default): measures time with `quanta::Instant`, which
//!   can be faster than `std::time::Instant` depending on the platform.
//! - `logging`: logs evictions, interrupted lookups and panicking finalizers
//!   through the [`log`](https://crates.io/crates/log) crate.

pub mod future;
pub mod stats;

pub(crate) mod common;
pub(crate) mod policy;

pub use common::{
    error::CacheError,
    time::{Clock, ManualClock, SystemClock},
};
pub use policy::Policy;

#[cfg(test)]
mod tests {
    #[test]
    fn public_types_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<crate::future::Cache<u32, String, std::io::Error>>();
        assert_send_sync::<crate::future::KeyedCache<String, u32, String, std::io::Error>>();
        assert_send_sync::<crate::future::ScopedCache<u32, String, std::io::Error>>();
        assert_send_sync::<crate::future::ScopedRef<String>>();
        assert_send_sync::<crate::future::Scope>();
        assert_send_sync::<crate::CacheError<std::io::Error>>();
    }
}
