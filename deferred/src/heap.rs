//! Array-backed binary min-heap keyed by fire time
//!
//! Positions are 1-indexed so the tree arithmetic stays `parent = i / 2`,
//! `children = 2i, 2i + 1`; position `i` lives at `slots[i - 1]`. The backing
//! storage doubles when full and only shrinks through [`HeapContainer::compact`].

use std::fmt;

use crate::clock::Timestamp;

/// Initial number of slots reserved by [`HeapContainer::new`]
pub const DEFAULT_CAPACITY: usize = 128;

/// Largest up-front reservation; larger requests are clamped and the heap grows on demand
pub const MAX_INITIAL_CAPACITY: usize = 1 << 20;

#[derive(Debug, Clone)]
struct Slot<T> {
    key: Timestamp,
    value: T,
}

/// Binary min-heap of values ordered by a [`Timestamp`] key
#[derive(Clone)]
pub struct HeapContainer<T> {
    slots: Vec<Slot<T>>,
    capacity: usize,
    initial_capacity: usize,
}

impl<T> Default for HeapContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HeapContainer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapContainer")
            .field("len", &self.slots.len())
            .field("capacity", &self.capacity)
            .field("min", &self.slots.first().map(|s| s.key))
            .finish()
    }
}

impl<T> HeapContainer<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Reserve `capacity` slots, clamped to `1..=MAX_INITIAL_CAPACITY`
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_INITIAL_CAPACITY);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            initial_capacity: capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots reserved before the next doubling
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert `value` at `key`; returns true if it became the new minimum
    pub fn insert(&mut self, key: Timestamp, value: T) -> bool {
        if self.slots.len() == self.capacity {
            self.grow();
        }
        self.slots.push(Slot { key, value });
        let landed = self.sift_up(self.slots.len());
        landed == 1
    }

    pub fn peek_min(&self) -> Option<(Timestamp, &T)> {
        self.slots.first().map(|slot| (slot.key, &slot.value))
    }

    /// Remove the minimum; moves the last slot into the root and sifts it down
    pub fn remove_min(&mut self) -> Option<(Timestamp, T)> {
        if self.slots.is_empty() {
            return None;
        }
        let removed = self.slots.swap_remove(0);
        if !self.slots.is_empty() {
            self.sift_down(1);
        }
        Some((removed.key, removed.value))
    }

    /// Move the root to a later `key` and restore order by sifting down
    ///
    /// Returns false when the heap is empty. The new key must not be earlier
    /// than the current one: re-arming a repeating task only ever moves it forward.
    pub fn reschedule_min(&mut self, key: Timestamp) -> bool {
        let Some(root) = self.slots.first_mut() else {
            return false;
        };
        debug_assert!(key >= root.key, "reschedule_min moved the root backwards");
        root.key = key;
        self.sift_down(1);
        true
    }

    /// Value at 1-indexed position `index`
    pub fn get(&self, index: usize) -> Option<&T> {
        index.checked_sub(1).and_then(|i| self.slots.get(i)).map(|slot| &slot.value)
    }

    /// Key at 1-indexed position `index`
    pub fn key_at(&self, index: usize) -> Option<Timestamp> {
        index.checked_sub(1).and_then(|i| self.slots.get(i)).map(|slot| slot.key)
    }

    /// Unordered removal: the last slot fills the hole and order is NOT restored
    ///
    /// Callers removing in bulk follow up with a single [`heapify`](Self::heapify).
    ///
    /// # Panics
    ///
    /// If `index` is 0 or greater than `len()`.
    pub fn quick_remove(&mut self, index: usize) -> (Timestamp, T) {
        self.check_index(index);
        let removed = self.slots.swap_remove(index - 1);
        (removed.key, removed.value)
    }

    /// Ordered removal of the slot at `index`
    ///
    /// # Panics
    ///
    /// If `index` is 0 or greater than `len()`.
    pub fn remove_at(&mut self, index: usize) -> (Timestamp, T) {
        self.check_index(index);
        let removed = self.slots.swap_remove(index - 1);
        if index <= self.slots.len() && self.sift_down(index) == index {
            self.sift_up(index);
        }
        (removed.key, removed.value)
    }

    /// First 1-indexed position whose value matches `pred`
    pub fn position<F>(&self, mut pred: F) -> Option<usize>
    where
        F: FnMut(&T) -> bool,
    {
        self.slots.iter().position(|slot| pred(&slot.value)).map(|i| i + 1)
    }

    /// Restore heap order over the whole array in O(n)
    pub fn heapify(&mut self) {
        for index in (1..=self.slots.len() / 2).rev() {
            self.sift_down(index);
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Release backing storage down to the smallest power of two that fits,
    /// never below the initial capacity
    pub fn compact(&mut self) {
        let target = (self.slots.len() + 1).next_power_of_two().max(self.initial_capacity);
        if target < self.capacity {
            self.capacity = target;
            self.slots.shrink_to(target);
        }
    }

    /// Slots in array order (not sorted)
    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, &T)> {
        self.slots.iter().map(|slot| (slot.key, &slot.value))
    }

    /// Whether every parent key is <= both child keys
    pub fn is_heap(&self) -> bool {
        (2..=self.slots.len()).all(|child| self.key(child / 2) <= self.key(child))
    }

    fn grow(&mut self) {
        self.capacity = self.capacity.checked_mul(2).unwrap_or(usize::MAX);
        self.slots.reserve_exact(self.capacity - self.slots.len());
    }

    fn check_index(&self, index: usize) {
        assert!(
            index >= 1 && index <= self.slots.len(),
            "heap index {} out of range 1..={}",
            index,
            self.slots.len()
        );
    }

    fn key(&self, index: usize) -> Timestamp {
        self.slots[index - 1].key
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.slots.swap(a - 1, b - 1);
    }

    fn sift_up(&mut self, mut k: usize) -> usize {
        while k > 1 {
            let parent = k / 2;
            if self.key(parent) <= self.key(k) {
                break;
            }
            self.swap(parent, k);
            k = parent;
        }
        k
    }

    fn sift_down(&mut self, mut k: usize) -> usize {
        let len = self.slots.len();
        loop {
            let mut child = k * 2;
            if child > len {
                break;
            }
            // child indexes the smaller kid
            if child < len && self.key(child) > self.key(child + 1) {
                child += 1;
            }
            if self.key(k) <= self.key(child) {
                break;
            }
            self.swap(k, child);
            k = child;
        }
        k
    }
}
