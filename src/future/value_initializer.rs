use std::{
    hash::{BuildHasher, Hash},
    sync::Arc,
};

use triomphe::Arc as TrioArc;

use crate::common::{
    cache_state::CacheState,
    deferred::{Deferred, Resolution},
    entry::{Complete, MapValue},
};

/// Drives one lookup on behalf of a `Pending` or `Refreshing` entry.
///
/// If the guard is dropped before `complete` is called, the future driving the
/// lookup was dropped or the lookup panicked. The guard then removes its entry
/// (if the map still holds it) and resolves the awaiters as interrupted, so
/// nobody waits forever and the next access starts a fresh lookup. The removed
/// entry is passed to the `on_removal` hook, if any.
pub(crate) struct LookupGuard<'a, K, T, E, S>
// NOTE: We usually do not attach trait bounds to here at the struct definition, but
// the Drop trait requires these bounds here.
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    state: &'a CacheState<K, T, E, S>,
    key: Arc<K>,
    revision: u64,
    deferred: Option<Deferred<T, E>>,
    cache_name: Option<&'a str>,
    on_removal: Option<fn(MapValue<K, T, E>)>,
}

impl<'a, K, T, E, S> LookupGuard<'a, K, T, E, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    pub(crate) fn new(
        state: &'a CacheState<K, T, E, S>,
        key: Arc<K>,
        revision: u64,
        deferred: Deferred<T, E>,
        cache_name: Option<&'a str>,
    ) -> Self {
        Self {
            state,
            key,
            revision,
            deferred: Some(deferred),
            cache_name,
            on_removal: None,
        }
    }

    /// Sets a function that takes over the entry removed by an interruption.
    pub(crate) fn on_removal(mut self, on_removal: fn(MapValue<K, T, E>)) -> Self {
        self.on_removal = Some(on_removal);
        self
    }

    pub(crate) fn key(&self) -> &Arc<K> {
        &self.key
    }

    /// Installs the finished entry and wakes the awaiters.
    ///
    /// The entry is installed only if the map still holds the value this
    /// lookup was started for. Otherwise a `set`, an invalidation or an
    /// eviction got there first and the outcome is only delivered to the
    /// awaiters. Returns the replaced value, or the finished entry back if it
    /// was not installed.
    pub(crate) fn complete(
        mut self,
        complete: TrioArc<Complete<K, T, E>>,
    ) -> Result<MapValue<K, T, E>, MapValue<K, T, E>>
    where
        T: Clone,
    {
        let outcome = complete.outcome.clone();
        let installed =
            self.state
                .replace_if_revision(&self.key, self.revision, MapValue::Complete(complete));
        // Resolve after installing, so an awaiter that wakes up and reads the
        // map again finds the new entry.
        if let Some(deferred) = self.deferred.take() {
            deferred.resolve(Resolution::Completed(outcome));
        }
        installed
    }
}

impl<'a, K, T, E, S> Drop for LookupGuard<'a, K, T, E, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    fn drop(&mut self) {
        let Some(deferred) = self.deferred.take() else {
            return;
        };
        let removed = self.state.remove_if_revision(&self.key, self.revision);
        deferred.resolve(Resolution::Interrupted);
        if let (Some(removed), Some(on_removal)) = (removed, self.on_removal) {
            on_removal(removed);
        }

        #[cfg(feature = "logging")]
        log::debug!(
            "{}A lookup was interrupted before it completed. Removed its entry",
            crate::common::log_prefix(self.cache_name)
        );
        #[cfg(not(feature = "logging"))]
        let _ = self.cache_name;
    }
}

#[cfg(test)]
mod tests {
    use super::LookupGuard;
    use crate::common::{
        cache_state::{CacheState, Slot},
        entry::{Complete, MapValue},
    };
    use std::{collections::hash_map::RandomState, sync::Arc};
    use triomphe::Arc as TrioArc;

    type State = CacheState<u32, String, (), RandomState>;

    fn reserve(state: &State, key: u32) -> LookupGuard<'_, u32, String, (), RandomState> {
        match state.get_or_reserve(&key) {
            Slot::Reserved(p) => LookupGuard::new(state, p.key, p.revision, p.deferred, None),
            Slot::Found(_) => panic!("expected a reservation"),
        }
    }

    fn finished(state: &State, key: u32, value: &str) -> TrioArc<Complete<u32, String, ()>> {
        TrioArc::new(Complete {
            key: Arc::new(key),
            revision: state.next_revision(),
            outcome: Ok(value.to_string()),
            loaded_at_millis: 0,
            expires_at_millis: u64::MAX,
        })
    }

    #[tokio::test]
    async fn completion_installs_and_wakes() {
        let state = State::new(None, RandomState::new());
        let guard = reserve(&state, 1);
        let deferred = match state.get(&1) {
            Some(MapValue::Pending(p)) => p.deferred,
            _ => panic!("expected a pending entry"),
        };

        assert!(guard.complete(finished(&state, 1, "one")).is_ok());
        assert_eq!(deferred.wait().await.into_result().unwrap(), "one");
        assert!(matches!(state.get(&1), Some(MapValue::Complete(_))));
    }

    #[tokio::test]
    async fn completion_does_not_overwrite_a_newer_entry() {
        let state = State::new(None, RandomState::new());
        let guard = reserve(&state, 1);
        state.insert(
            Arc::new(1),
            MapValue::Complete(finished(&state, 1, "newer")),
        );

        assert!(guard.complete(finished(&state, 1, "older")).is_err());
        match state.get(&1) {
            Some(MapValue::Complete(c)) => assert_eq!(c.outcome.as_deref().unwrap(), "newer"),
            _ => panic!("expected a complete entry"),
        }
    }

    #[tokio::test]
    async fn dropping_the_guard_interrupts() {
        let state = State::new(None, RandomState::new());
        let guard = reserve(&state, 1);
        let deferred = match state.get(&1) {
            Some(MapValue::Pending(p)) => p.deferred,
            _ => panic!("expected a pending entry"),
        };

        drop(guard);
        assert!(!state.contains(&1));
        assert!(deferred.wait().await.into_result().unwrap_err().is_interrupted());
    }

    #[tokio::test]
    async fn interruption_hands_the_removed_entry_over() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static REMOVED: AtomicUsize = AtomicUsize::new(0);

        fn count_removal(value: MapValue<u32, String, ()>) {
            assert!(matches!(value, MapValue::Pending(_)));
            REMOVED.fetch_add(1, Ordering::SeqCst);
        }

        let state = State::new(None, RandomState::new());
        let guard = reserve(&state, 1).on_removal(count_removal);
        drop(guard);
        assert_eq!(REMOVED.load(Ordering::SeqCst), 1);

        // Nothing to hand over when the entry was already replaced.
        let guard = reserve(&state, 2).on_removal(count_removal);
        state.insert(Arc::new(2), MapValue::Complete(finished(&state, 2, "two")));
        drop(guard);
        assert_eq!(REMOVED.load(Ordering::SeqCst), 1);
    }
}
