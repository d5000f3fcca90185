use std::{
    fmt,
    ops::Deref,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

type Finalizer = Box<dyn FnOnce() + Send + 'static>;

/// Collects the finalizers of one value cached by a
/// [`ScopedCache`][scoped-cache-struct].
///
/// The lookup that produces the value receives its scope and registers on it
/// whatever must run once the value is no longer used, such as closing a
/// connection or deleting a temporary file. The cache closes the scope once the
/// entry has left the cache and every [`ScopedRef`][scoped-ref-struct] to the
/// value has been dropped. If the lookup fails, its scope is closed right away.
///
/// Closing runs the finalizers in the reverse order of their registration.
///
/// [scoped-cache-struct]: ./struct.ScopedCache.html
/// [scoped-ref-struct]: ./struct.ScopedRef.html
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    // `None` once the scope is closed.
    finalizers: Mutex<Option<Vec<Finalizer>>>,
    #[cfg(feature = "logging")]
    cache_name: Option<String>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Scope {
    pub(crate) fn new(_cache_name: Option<&str>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                finalizers: Mutex::new(Some(Vec::new())),
                #[cfg(feature = "logging")]
                cache_name: _cache_name.map(ToString::to_string),
            }),
        }
    }

    /// Registers a finalizer. If the scope is already closed, the finalizer
    /// runs immediately.
    pub fn add_finalizer<F>(&self, finalizer: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut finalizers = self.inner.finalizers.lock();
        if let Some(list) = finalizers.as_mut() {
            list.push(Box::new(finalizer));
            return;
        }
        std::mem::drop(finalizers);
        self.inner.run(vec![Box::new(finalizer)]);
    }

    /// Returns `true` once the scope has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.finalizers.lock().is_none()
    }

    /// Closes the scope. Only the first call runs the finalizers.
    pub(crate) fn close(&self) {
        self.inner.close();
    }
}

impl ScopeInner {
    fn close(&self) {
        let finalizers = self.finalizers.lock().take();
        if let Some(finalizers) = finalizers {
            self.run(finalizers);
        }
    }

    fn run(&self, finalizers: Vec<Finalizer>) {
        for finalizer in finalizers.into_iter().rev() {
            // A panicking finalizer must not keep the others from running.
            if let Err(payload) = catch_unwind(AssertUnwindSafe(finalizer)) {
                self.log_panic(payload.as_ref());
            }
        }
    }

    #[cfg(feature = "logging")]
    fn log_panic(&self, payload: &(dyn std::any::Any + Send + 'static)) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str));

        let cn = crate::common::log_prefix(self.cache_name.as_deref());
        if let Some(m) = message {
            log::error!("{cn}Panicked in a finalizer: {m}");
        } else {
            log::error!("{cn}Panicked in a finalizer");
        }
    }

    #[cfg(not(feature = "logging"))]
    fn log_panic(&self, _payload: &(dyn std::any::Any + Send + 'static)) {}
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// The scope handed to one scoped lookup. It is closed when dropped, unless the
/// lookup produced a resource that took the scope over. A lookup that fails,
/// or whose future is dropped before it finishes, has its scope closed even if
/// it kept a clone of it.
pub(crate) struct LookupScope {
    scope: Scope,
    adopted: bool,
}

impl LookupScope {
    pub(crate) fn new(cache_name: Option<&str>) -> Self {
        Self {
            scope: Scope::new(cache_name),
            adopted: false,
        }
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Hands the scope over to the resource produced by the lookup.
    pub(crate) fn into_resource<V>(mut self, value: V) -> Arc<ScopedResource<V>> {
        self.adopted = true;
        ScopedResource::new_shared(value, self.scope.clone())
    }
}

impl Drop for LookupScope {
    fn drop(&mut self) {
        if !self.adopted {
            self.scope.close();
        }
    }
}

/// A cached value together with its scope and the number of its owners.
///
/// The owners are the cache, for as long as the value's entry is in it, and
/// every live [`ScopedRef`]. The scope is closed when the count drops to zero,
/// and the count never rises again after that.
pub(crate) struct ScopedResource<V> {
    value: V,
    scope: Scope,
    owners: AtomicU32,
}

impl<V> ScopedResource<V> {
    /// Creates a resource owned by the cache and by the caller that produced
    /// it. The caller's share is handed out with `adopt`.
    pub(crate) fn new_shared(value: V, scope: Scope) -> Arc<Self> {
        Arc::new(Self {
            value,
            scope,
            owners: AtomicU32::new(2),
        })
    }

    /// Takes a new borrow, unless the resource has already been finalized.
    pub(crate) fn acquire(this: &Arc<Self>) -> Option<ScopedRef<V>> {
        let mut current = this.owners.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return None;
            }
            match this.owners.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(Self::adopt(Arc::clone(this))),
                Err(actual) => current = actual,
            }
        }
    }

    /// Wraps an owner share that was already counted.
    pub(crate) fn adopt(this: Arc<Self>) -> ScopedRef<V> {
        ScopedRef { resource: this }
    }

    /// Gives up one owner share, closing the scope if it was the last one.
    pub(crate) fn release(&self) {
        if self.owners.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.scope.close();
        }
    }
}

/// A borrow of a value cached by a [`ScopedCache`][scoped-cache-struct].
///
/// The value stays usable for as long as the borrow lives, even if its entry is
/// evicted, invalidated or refreshed in the meantime. Dropping the last borrow
/// of a value that is no longer cached closes the value's [`Scope`].
///
/// [scoped-cache-struct]: ./struct.ScopedCache.html
pub struct ScopedRef<V> {
    resource: Arc<ScopedResource<V>>,
}

impl<V> Deref for ScopedRef<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.resource.value
    }
}

impl<V> Clone for ScopedRef<V> {
    fn clone(&self) -> Self {
        // We hold a share, so the count cannot be zero here.
        self.resource.owners.fetch_add(1, Ordering::AcqRel);
        ScopedResource::adopt(Arc::clone(&self.resource))
    }
}

impl<V> Drop for ScopedRef<V> {
    fn drop(&mut self) {
        self.resource.release();
    }
}

impl<V: fmt::Debug> fmt::Debug for ScopedRef<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScopedRef").field(&self.resource.value).finish()
    }
}
