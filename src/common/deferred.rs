use std::sync::Arc;

use event_listener::Event;
use parking_lot::Mutex;
use triomphe::Arc as TrioArc;

use super::error::CacheError;

/// How an in-flight computation ended.
pub(crate) enum Resolution<T, E> {
    Completed(Result<T, Arc<E>>),
    Interrupted,
}

impl<T: Clone, E> Clone for Resolution<T, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Completed(Ok(v)) => Self::Completed(Ok(v.clone())),
            Self::Completed(Err(e)) => Self::Completed(Err(Arc::clone(e))),
            Self::Interrupted => Self::Interrupted,
        }
    }
}

impl<T, E> Resolution<T, E> {
    pub(crate) fn into_result(self) -> Result<T, CacheError<E>> {
        match self {
            Self::Completed(result) => result.map_err(CacheError::Lookup),
            Self::Interrupted => Err(CacheError::Interrupted),
        }
    }
}

struct DeferredInner<T, E> {
    resolution: Mutex<Option<Resolution<T, E>>>,
    resolved: Event,
}

/// A single-assignment cell that any number of tasks can await.
///
/// The first `resolve` wins; later ones are ignored. Every waiter, including
/// ones that start waiting after the resolution, observes a clone of the same
/// `Resolution`.
pub(crate) struct Deferred<T, E> {
    inner: TrioArc<DeferredInner<T, E>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: TrioArc::clone(&self.inner),
        }
    }
}

impl<T, E> Deferred<T, E> {
    pub(crate) fn new() -> Self {
        Self {
            inner: TrioArc::new(DeferredInner {
                resolution: Mutex::new(None),
                resolved: Event::new(),
            }),
        }
    }

    /// Sets the resolution and wakes all waiters. Returns `false` if the
    /// deferred was already resolved.
    pub(crate) fn resolve(&self, resolution: Resolution<T, E>) -> bool {
        {
            let mut slot = self.inner.resolution.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(resolution);
        }
        self.inner.resolved.notify(usize::MAX);
        true
    }
}

impl<T: Clone, E> Deferred<T, E> {
    pub(crate) fn try_get(&self) -> Option<Resolution<T, E>> {
        self.inner.resolution.lock().clone()
    }

    pub(crate) async fn wait(&self) -> Resolution<T, E> {
        loop {
            if let Some(resolution) = self.try_get() {
                return resolution;
            }
            // Register before re-checking so a resolution that lands in between
            // still wakes us up.
            let listener = self.inner.resolved.listen();
            if let Some(resolution) = self.try_get() {
                return resolution;
            }
            listener.await;
        }
    }
}
