//! Provides concurrent, capacity-bounded caches whose values are produced by an
//! asynchronous lookup.
//!
//! - [`Cache`] caches plain values. `get` hands out clones.
//! - [`KeyedCache`] is a `Cache` whose callers pass a lookup input, from which
//!   the cache derives the key it stores the value under.
//! - [`ScopedCache`] caches values that own resources. `get` hands out a
//!   [`ScopedRef`] borrow, and the resource's [`Scope`] is closed once the entry
//!   has left the cache and its last borrow was dropped.

use futures_util::future::BoxFuture;
use std::sync::Arc;

mod base_cache;
mod builder;
mod cache;
mod keyed_cache;
mod scope;
mod scoped_cache;
mod value_initializer;

pub use {
    builder::CacheBuilder,
    cache::Cache,
    keyed_cache::KeyedCache,
    scope::{Scope, ScopedRef},
    scoped_cache::ScopedCache,
};

pub(crate) type LookupFn<K, V, E> =
    Arc<dyn Fn(K) -> BoxFuture<'static, Result<V, E>> + Send + Sync + 'static>;

pub(crate) type KeyFn<I, K> = Arc<dyn Fn(&I) -> K + Send + Sync + 'static>;

pub(crate) type ScopedLookupFn<K, V, E> =
    Box<dyn Fn(K, Scope) -> BoxFuture<'static, Result<V, E>> + Send + Sync + 'static>;
