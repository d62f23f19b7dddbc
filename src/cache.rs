//! Bounded, recency-ordered store of assembled scenes.
//!
//! Entries live in a slab and are chained into a doubly linked recency list
//! by slot index, so lookup, promotion and eviction are all O(1). Evicted
//! and cleared values are disposed before they are dropped.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
};

use crate::data_structures::scene_graph::SceneGraph;

pub const DEFAULT_CAPACITY: usize = 5;

/// Explicit release of graphics resources held by a cached value.
pub trait Dispose {
    fn dispose(&mut self);
}

impl Dispose for SceneGraph {
    fn dispose(&mut self) {
        SceneGraph::dispose(self);
    }
}

/// Outcome of [`ModelCache::put`].
#[derive(Debug)]
pub enum Put<T> {
    /// The value was stored. `evicted` names the entry that made room.
    Inserted { evicted: Option<String> },
    /// The id was already cached. It was promoted and the offered value is
    /// handed back unused.
    AlreadyCached(T),
}

struct Slot<T> {
    id: String,
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct ModelCache<T: Dispose = SceneGraph> {
    index: HashMap<String, usize>,
    slots: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    capacity: usize,
}

impl<T: Dispose> Default for ModelCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<T: Dispose> ModelCache<T> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn has(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the cached value and marks it most recently used.
    pub fn get(&mut self, id: &str) -> Option<&T> {
        let slot = *self.index.get(id)?;
        self.promote(slot);
        self.slots[slot].as_ref().map(|s| &s.value)
    }

    pub fn put(&mut self, id: impl Into<String>, value: T) -> Put<T> {
        let id = id.into();
        if let Some(&slot) = self.index.get(&id) {
            self.promote(slot);
            log::debug!("cache hit on put for '{id}'");
            return Put::AlreadyCached(value);
        }

        let evicted = if self.index.len() >= self.capacity {
            self.evict_lru()
        } else {
            None
        };

        let entry = Slot {
            id: id.clone(),
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.push_front(slot);
        self.index.insert(id, slot);
        Put::Inserted { evicted }
    }

    /// Disposes and drops every entry.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(mut entry) = slot.take() {
                dispose_guarded(&entry.id, &mut entry.value);
            }
        }
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Cached ids, most recently used first.
    pub fn ids_by_recency(&self) -> Vec<&str> {
        let mut ids = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let Some(entry) = self.slots[slot].as_ref() else {
                break;
            };
            ids.push(entry.id.as_str());
            cursor = entry.next;
        }
        ids
    }

    fn evict_lru(&mut self) -> Option<String> {
        let slot = self.tail?;
        self.unlink(slot);
        let mut entry = self.slots[slot].take()?;
        dispose_guarded(&entry.id, &mut entry.value);
        self.index.remove(&entry.id);
        self.free.push(slot);
        log::info!("evicted '{}' from the model cache", entry.id);
        Some(entry.id)
    }

    fn promote(&mut self, slot: usize) {
        if self.head != Some(slot) {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.slots[slot].as_ref().map(|s| (s.prev, s.next)) else {
            return;
        };
        match prev {
            Some(p) => self.link_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.link_mut(n).prev = prev,
            None => self.tail = prev,
        }
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = None;
            entry.next = None;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(h) = old_head {
            self.link_mut(h).prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    /// Linked slots are always occupied.
    fn link_mut(&mut self, slot: usize) -> &mut Slot<T> {
        match self.slots[slot].as_mut() {
            Some(entry) => entry,
            None => unreachable!("recency list points at free slot {slot}"),
        }
    }
}

impl<T: Dispose> Drop for ModelCache<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// A panicking dispose must not block the insertion that triggered it.
fn dispose_guarded<T: Dispose>(id: &str, value: &mut T) {
    if catch_unwind(AssertUnwindSafe(|| value.dispose())).is_err() {
        log::error!("disposing '{id}' panicked, dropping it anyway");
    }
}
