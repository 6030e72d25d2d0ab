//! Fixed-capacity slot pool with LIFO slot recycling
//!
//! ```text
//!   slot:   0     1     2     3     4   ...  capacity-1
//!         [res] [ A ] [ - ] [ B ] [   ]
//!           ^           ^           ^
//!           |           |           +-- high-water mark (next fresh slot)
//!           |           +-------------- freed, on the free-list
//!           +-------------------------- reserved, never issued
//! ```

use crate::render::handle::{Handle, ResourceType};

/// LIFO stack of reclaimed slots
#[derive(Debug, Default)]
pub struct FreeList {
    slots: Vec<u16>,
}

impl FreeList {
    /// Pop the most recently freed slot
    pub fn pop(&mut self) -> Option<u16> {
        self.slots.pop()
    }

    /// Return a slot
    pub fn push(&mut self, slot: u16) {
        self.slots.push(slot);
    }

    /// Number of reclaimed slots waiting for reuse
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if no slot is waiting for reuse
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn clear(&mut self) {
        self.slots.clear();
    }
}

/// Usage counters for one pool
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Live resources
    pub live: usize,
    /// Highest slot ever issued plus one
    pub high_water: u16,
    /// Fixed capacity including the reserved slot
    pub capacity: u16,
}

/// Pool of resources of one type addressed by handle slot
#[derive(Debug)]
pub struct Pool<T> {
    kind: ResourceType,
    entries: Vec<Option<T>>,
    free_list: FreeList,
    high_water: u16,
    capacity: u16,
}

impl<T> Pool<T> {
    /// Create an empty pool; slot 0 is reserved immediately
    pub fn new(kind: ResourceType, capacity: u16) -> Self {
        let mut entries = Vec::with_capacity(usize::from(capacity));
        entries.push(None);
        Self {
            kind,
            entries,
            free_list: FreeList::default(),
            high_water: 1,
            capacity,
        }
    }

    /// Resource type stored in this pool
    pub const fn kind(&self) -> ResourceType {
        self.kind
    }

    /// Fixed capacity
    pub const fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Claim a slot, preferring the most recently freed one
    pub fn reserve(&mut self) -> Option<u16> {
        if let Some(slot) = self.free_list.pop() {
            return Some(slot);
        }
        if self.high_water < self.capacity {
            let slot = self.high_water;
            self.high_water += 1;
            return Some(slot);
        }
        None
    }

    /// Give back a reserved slot that was never filled
    pub fn release(&mut self, slot: u16) {
        self.free_list.push(slot);
    }

    /// Store a resource in a reserved slot and return its handle
    pub fn fill(&mut self, slot: u16, value: T) -> Handle {
        let index = usize::from(slot);
        if self.entries.len() <= index {
            self.entries.resize_with(index + 1, || None);
        }
        self.entries[index] = Some(value);
        Handle::new(self.kind, slot)
    }

    fn index_of(&self, handle: Handle) -> Option<usize> {
        (handle.is(self.kind) && handle.slot() < self.capacity).then(|| usize::from(handle.slot()))
    }

    /// Live resource behind a handle
    pub fn get(&self, handle: Handle) -> Option<&T> {
        let index = self.index_of(handle)?;
        self.entries.get(index)?.as_ref()
    }

    /// Mutable live resource behind a handle
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let index = self.index_of(handle)?;
        self.entries.get_mut(index)?.as_mut()
    }

    /// Remove a live resource and push its slot onto the free-list
    pub fn take(&mut self, handle: Handle) -> Option<T> {
        let index = self.index_of(handle)?;
        let value = self.entries.get_mut(index)?.take()?;
        self.free_list.push(handle.slot());
        Some(value)
    }

    /// Remove every live resource and reset the pool to its initial state
    pub fn drain(&mut self) -> Vec<T> {
        let drained = self.entries.drain(1..).flatten().collect();
        self.free_list.clear();
        self.high_water = 1;
        drained
    }

    /// Usage counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live: self.entries.iter().filter(|e| e.is_some()).count(),
            high_water: self.high_water,
            capacity: self.capacity,
        }
    }
}
