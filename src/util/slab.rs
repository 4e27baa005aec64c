use std::fmt;

/// A generational key into a [`Slab`]. Two keys compare equal only if both
/// the slot index and the generation at time of insertion match, so a
/// stale key referring to a freed-and-reused slot is never mistaken for
/// the new occupant.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlabKey {
    index: usize,
    generation: u64,
}

impl fmt::Debug for SlabKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlabKey({}#{})", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { value: T, generation: u64 },
    Vacant { next_free: Option<usize>, generation: u64 },
}

/// A preallocated, free-list-backed store of `T`, indexed by [`SlabKey`].
///
/// Insertion reuses the lowest-index freed slot, the same strategy the
/// mio's slab uses (`nxt` chases the most recently freed index).
/// Removal bumps the slot's generation so old keys are detected as stale
/// rather than silently resolving to whatever was inserted afterward.
pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    next_free: Option<usize>,
    len: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slab<T> {
    pub fn new() -> Self {
        Slab { slots: Vec::new(), next_free: None, len: 0 }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Slab { slots: Vec::with_capacity(cap), next_free: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> SlabKey {
        match self.next_free {
            Some(index) => {
                let generation = match self.slots[index] {
                    Slot::Vacant { generation, .. } => generation,
                    Slot::Occupied { .. } => unreachable!("free list pointed at occupied slot"),
                };
                let next_free = match &self.slots[index] {
                    Slot::Vacant { next_free, .. } => *next_free,
                    Slot::Occupied { .. } => unreachable!(),
                };
                self.next_free = next_free;
                self.slots[index] = Slot::Occupied { value, generation };
                self.len += 1;
                SlabKey { index, generation }
            }
            None => {
                let index = self.slots.len();
                self.slots.push(Slot::Occupied { value, generation: 0 });
                self.len += 1;
                SlabKey { index, generation: 0 }
            }
        }
    }

    pub fn remove(&mut self, key: SlabKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation => {
                let next_free = self.next_free;
                let old = std::mem::replace(
                    slot,
                    Slot::Vacant { next_free, generation: key.generation.wrapping_add(1) },
                );
                self.next_free = Some(key.index);
                self.len -= 1;
                match old {
                    Slot::Occupied { value, .. } => Some(value),
                    Slot::Vacant { .. } => unreachable!(),
                }
            }
            _ => None,
        }
    }

    pub fn get(&self, key: SlabKey) -> Option<&T> {
        match self.slots.get(key.index) {
            Some(Slot::Occupied { value, generation }) if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: SlabKey) -> Option<&mut T> {
        match self.slots.get_mut(key.index) {
            Some(Slot::Occupied { value, generation }) if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, key: SlabKey) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlabKey, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { value, generation } => {
                Some((SlabKey { index, generation: *generation }, value))
            }
            Slot::Vacant { .. } => None,
        })
    }
}
