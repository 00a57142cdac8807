use serde::{Deserialize, Serialize};

/// Largest capacity a table can have; slot indices are 16 bits wide.
pub const MAX_SLOTS: usize = 1 << 16;

/// Slot generations are 12 bits wide and wrap.
pub const GENERATION_MASK: u16 = 0x0fff;

/// Position of a value inside a [`HandleTable`] plus the generation the slot
/// had when the value was inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId {
    index: u16,
    generation: u16,
}

impl SlotId {
    pub(crate) const fn new(index: u16, generation: u16) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u16 {
        self.index
    }

    pub fn generation(self) -> u16 {
        self.generation
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

/// Fixed-capacity slot array with O(1) insert and remove.
///
/// Lookups through a [`SlotId`] whose slot is empty, out of range or has been
/// recycled since the id was issued return `None`.
#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    // Stack of free indices; the lowest index sits on top of a fresh table.
    free: Vec<u16>,
    len: usize,
}

impl<T> HandleTable<T> {
    /// Creates a table with `capacity` slots (at most [`MAX_SLOTS`]).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_SLOTS);
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();
        let free = (0..capacity).rev().map(|index| index as u16).collect();
        Self {
            slots,
            free,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Stores `value` in a free slot. When the table is full the value is
    /// handed back so the caller can release whatever it owns.
    pub fn insert(&mut self, value: T) -> Result<SlotId, T> {
        let Some(index) = self.free.pop() else {
            return Err(value);
        };
        let slot = &mut self.slots[usize::from(index)];
        slot.value = Some(value);
        self.len += 1;
        Ok(SlotId::new(index, slot.generation))
    }

    /// Frees the slot and returns its value. The slot's generation moves on so
    /// `id` never resolves again.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slots.get_mut(usize::from(id.index))?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slots
            .get(usize::from(id.index))
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.slots
            .get_mut(usize::from(id.index))
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    /// Snapshot of the occupied slots in index order. The returned list is
    /// owned, so callers may remove entries while walking it.
    pub fn occupied(&self) -> Vec<SlotId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (SlotId::new(index as u16, slot.generation), value))
        })
    }

    /// Removes every value and returns them in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        let ids = self.occupied();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn clear(&mut self) {
        self.drain();
    }
}
