use std::{
    hash::{BuildHasher, Hash},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crossbeam_channel::{Receiver, Sender};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use smallvec::SmallVec;
use triomphe::Arc as TrioArc;

use super::{
    deferred::Deferred,
    entry::{Complete, MapValue, Pending},
    key_set::KeySet,
};
use crate::stats::{CacheStats, StatsCounter};

/// The maximum number of times a single access-tracking winner re-drains the
/// access queue before handing the work to the next caller.
pub(crate) const MAX_DRAIN_REPEATS: usize = 4;

pub(crate) type Evicted<K, T, E> = SmallVec<[MapValue<K, T, E>; 4]>;

/// The result of looking a key up and reserving it if it was absent.
pub(crate) enum Slot<K, T, E> {
    /// The key was absent and this caller installed a `Pending` entry. The
    /// caller owns the lookup.
    Reserved(Pending<K, T, E>),
    Found(MapValue<K, T, E>),
}

/// The mutable state underlying a cache.
///
/// `map` is a sharded concurrent map; every conditional write on it runs under
/// the shard lock, so compare-then-write sequences are atomic. `keys` is only
/// touched by the caller that wins `try_lock` on it, which is the
/// access-tracking gate: losers enqueue their access on `access_snd` and move
/// on without blocking.
pub(crate) struct CacheState<K, T, E, S> {
    map: DashMap<Arc<K>, MapValue<K, T, E>, S>,
    keys: Mutex<KeySet<K, S>>,
    access_snd: Sender<Arc<K>>,
    access_rcv: Receiver<Arc<K>>,
    stats: StatsCounter,
    revision: AtomicU64,
}

impl<K, T, E, S> CacheState<K, T, E, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    pub(crate) fn new(initial_capacity: Option<usize>, build_hasher: S) -> Self {
        let (access_snd, access_rcv) = crossbeam_channel::unbounded();
        Self {
            map: DashMap::with_capacity_and_hasher(
                initial_capacity.unwrap_or_default(),
                build_hasher.clone(),
            ),
            keys: Mutex::new(KeySet::with_hasher(build_hasher)),
            access_snd,
            access_rcv,
            stats: StatsCounter::default(),
            revision: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn get(&self, key: &K) -> Option<MapValue<K, T, E>> {
        self.map.get(key).map(|v| v.value().clone())
    }

    /// Returns the entry for the key, or installs a fresh `Pending` entry if
    /// there is none.
    ///
    /// The optimistic read avoids cloning the key on a hit. The entry API then
    /// re-checks presence under the shard lock, so when two callers race on a
    /// missing key exactly one of them gets `Slot::Reserved`.
    pub(crate) fn get_or_reserve(&self, key: &K) -> Slot<K, T, E>
    where
        K: Clone,
    {
        if let Some(value) = self.get(key) {
            return Slot::Found(value);
        }
        match self.map.entry(Arc::new(key.clone())) {
            Entry::Occupied(entry) => Slot::Found(entry.get().clone()),
            Entry::Vacant(entry) => {
                let pending = Pending {
                    key: Arc::clone(entry.key()),
                    revision: self.next_revision(),
                    deferred: Deferred::new(),
                };
                entry.insert(MapValue::Pending(pending.clone()));
                Slot::Reserved(pending)
            }
        }
    }

    /// Replaces the entry only if the map still holds the value with the given
    /// revision. Returns the replaced value.
    pub(crate) fn replace_if_revision(
        &self,
        key: &K,
        revision: u64,
        value: MapValue<K, T, E>,
    ) -> Result<MapValue<K, T, E>, MapValue<K, T, E>> {
        match self.map.get_mut(key) {
            Some(mut current) if current.revision() == revision => {
                Ok(std::mem::replace(current.value_mut(), value))
            }
            _ => Err(value),
        }
    }

    /// Removes the entry only if the map still holds the value with the given
    /// revision.
    pub(crate) fn remove_if_revision(&self, key: &K, revision: u64) -> Option<MapValue<K, T, E>> {
        self.map
            .remove_if(key, |_, v| v.revision() == revision)
            .map(|(_, v)| v)
    }

    pub(crate) fn insert(&self, key: Arc<K>, value: MapValue<K, T, E>) -> Option<MapValue<K, T, E>> {
        self.map.insert(key, value)
    }

    pub(crate) fn remove(&self, key: &K) -> Option<MapValue<K, T, E>> {
        self.map.remove(key).map(|(_, v)| v)
    }

    /// Removes every entry and returns them. Shards are cleared one at a time; a
    /// write landing in an already-cleared shard is ordered after the clear.
    pub(crate) fn clear(&self) -> Vec<MapValue<K, T, E>> {
        let mut removed = Vec::new();
        self.map.retain(|_, v| {
            removed.push(v.clone());
            false
        });
        removed
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Snapshots the servable complete entries. The order is unspecified.
    pub(crate) fn servable_entries(&self) -> Vec<TrioArc<Complete<K, T, E>>> {
        self.map
            .iter()
            .filter_map(|kv| kv.value().servable().cloned())
            .collect()
    }

    pub(crate) fn record_hit(&self) {
        self.stats.record_hit();
    }

    pub(crate) fn record_miss(&self) {
        self.stats.record_miss();
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }

    /// Records that the key was just used and, if this caller wins the gate,
    /// applies the queued accesses to the LRU order and evicts least recently
    /// used entries until the map fits in `capacity`.
    ///
    /// Never blocks. The evicted values are returned so the caller can release
    /// any resources they own outside of the map's locks.
    pub(crate) fn track_access(&self, key: Arc<K>, capacity: usize) -> Evicted<K, T, E> {
        let mut evicted = Evicted::new();

        // The receiver lives as long as `self`, so the unbounded channel never
        // rejects a send.
        let _ = self.access_snd.send(key);

        for _ in 0..MAX_DRAIN_REPEATS {
            let Some(mut keys) = self.keys.try_lock() else {
                // Somebody else is updating. They will pick up our access.
                break;
            };

            for key in self.access_rcv.try_iter() {
                keys.add(key);
            }

            let mut size = self.map.len();
            while size > capacity {
                let Some(lru) = keys.remove() else {
                    break;
                };
                if let Some((_, value)) = self.map.remove(&lru) {
                    size -= 1;
                    evicted.push(value);
                }
            }

            std::mem::drop(keys);

            // Accesses enqueued while we were holding the gate would otherwise
            // wait for the next caller.
            if self.access_rcv.is_empty() {
                break;
            }
        }

        evicted
    }

    #[cfg(test)]
    pub(crate) fn tracked_key_count(&self) -> usize {
        self.keys.lock().len()
    }
}
