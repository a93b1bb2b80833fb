use slab::Slab;

/// Fixed-capacity registry of live connections keyed by slot index.
///
/// A slot index stays valid for the lifetime of its connection and is only
/// reused after [`ConnectionTable::remove`]. Insert, lookup and removal are
/// O(1); freed slots are recycled through the slab's free list.
pub struct ConnectionTable<C> {
    slots: Slab<C>,
    max_connections: usize,
}

impl<C> ConnectionTable<C> {
    pub fn new(max_connections: usize) -> Self {
        Self {
            slots: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Occupy a free slot.
    ///
    /// Returns `None` if the table is at its admission limit.
    pub fn insert(&mut self, conn: C) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        Some(self.slots.insert(conn))
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut C> {
        self.slots.get_mut(slot)
    }

    /// Release a slot, handing back its connection
    pub fn remove(&mut self, slot: usize) -> Option<C> {
        self.slots.try_remove(slot)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.max_connections
    }

    /// Occupied slot indices in ascending order
    pub fn slots(&self) -> Vec<usize> {
        self.slots.iter().map(|(slot, _)| slot).collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut C)> {
        self.slots.iter_mut()
    }
}
