use std::{
    collections::HashMap,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

/// A node of the `KeySet`. Links are slot indices into the owning set's arena
/// rather than pointers, so a node never borrows its neighbours.
#[derive(Debug)]
pub(crate) struct MapKey<K> {
    key: Arc<K>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<K> MapKey<K> {
    fn new(key: Arc<K>) -> Self {
        Self {
            key,
            prev: None,
            next: None,
        }
    }
}

#[derive(Debug)]
enum Slot<K> {
    Occupied(MapKey<K>),
    Vacant { next_free: Option<usize> },
}

/// A set of keys ordered by last access. The head is the least recently
/// touched key and the tail the most recently touched one.
///
/// The set is a doubly linked list laid out in an index-based arena. It is not
/// safe for concurrent mutation; the cache only touches it from the single
/// caller that currently holds the access-tracking gate.
pub(crate) struct KeySet<K, S> {
    slots: Vec<Slot<K>>,
    index: HashMap<Arc<K>, usize, S>,
    head: Option<usize>,
    tail: Option<usize>,
    free: Option<usize>,
}

impl<K, S> KeySet<K, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    pub(crate) fn with_hasher(build_hasher: S) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::with_hasher(build_hasher),
            head: None,
            tail: None,
            free: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Marks the key as the most recently used one. A key that is already in
    /// the set is moved to the tail; otherwise it is appended.
    pub(crate) fn add(&mut self, key: Arc<K>) {
        if let Some(&idx) = self.index.get(&key) {
            self.move_to_back(idx);
            return;
        }
        let idx = self.allocate(MapKey::new(Arc::clone(&key)));
        self.index.insert(key, idx);
        self.push_back(idx);
    }

    /// Removes and returns the least recently used key.
    pub(crate) fn remove(&mut self) -> Option<Arc<K>> {
        let idx = self.head?;
        self.unlink(idx);
        let node = self.release(idx);
        self.index.remove(&node.key);
        Some(node.key)
    }

    #[cfg(test)]
    pub(crate) fn peek_front(&self) -> Option<&K> {
        self.head.map(|idx| &*self.node(idx).key)
    }

    #[cfg(test)]
    pub(crate) fn peek_back(&self) -> Option<&K> {
        self.tail.map(|idx| &*self.node(idx).key)
    }

    fn move_to_back(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            // Already at the tail. Nothing to do.
            return;
        }
        self.unlink(idx);
        self.push_back(idx);
    }

    fn push_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        {
            let node = self.node_mut(idx);
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            None => self.head = Some(idx),
            Some(tail) => self.node_mut(tail).next = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node_mut(idx);
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            // This node is the head node.
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            // This node is the tail node.
            None => self.tail = prev,
        }
    }

    fn allocate(&mut self, node: MapKey<K>) -> usize {
        match self.free {
            Some(idx) => {
                if let Slot::Vacant { next_free } = self.slots[idx] {
                    self.free = next_free;
                }
                self.slots[idx] = Slot::Occupied(node);
                idx
            }
            None => {
                self.slots.push(Slot::Occupied(node));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) -> MapKey<K> {
        let vacant = Slot::Vacant {
            next_free: self.free,
        };
        self.free = Some(idx);
        match std::mem::replace(&mut self.slots[idx], vacant) {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("released a vacant key slot {idx}"),
        }
    }

    #[cfg(test)]
    fn node(&self, idx: usize) -> &MapKey<K> {
        match &self.slots[idx] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("linked to a vacant key slot {idx}"),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut MapKey<K> {
        match &mut self.slots[idx] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("linked to a vacant key slot {idx}"),
        }
    }
}
