use std::{
    fmt,
    num::NonZeroU32,
    sync::atomic::{AtomicU64, Ordering::Relaxed},
};

use derive_where::derive_where;

// === RawArena === //

/// A generational arena mapping [`RawHandle`]s to values of type `T`.
///
/// Each slot pairs a value with a generation counter. Occupied slots have odd generations and
/// vacant slots have even ones, so bumping the generation on every insertion and removal means a
/// handle minted for one occupant can never resolve to a later occupant of the same slot. This
/// is what lets instance identity be a plain handle comparison.
///
/// Every arena is stamped with the [`WorldId`] of its owner and only resolves handles carrying
/// that same id.
#[derive_where(Default)]
pub struct RawArena<T> {
    owner: WorldId,
    free_slots: Vec<u32>,
    slots: Vec<Slot<T>>,
    len: usize,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

impl<T> fmt::Debug for RawArena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawArena")
            .field("owner", &self.owner)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T> RawArena<T> {
    pub fn new(owner: WorldId) -> Self {
        Self {
            owner,
            free_slots: Vec::new(),
            slots: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> RawHandle {
        self.len += 1;

        if let Some(slot_idx) = self.free_slots.pop() {
            let slot = &mut self.slots[slot_idx as usize];
            debug_assert!(slot.value.is_none());

            slot.generation += 1;
            slot.value = Some(value);

            return RawHandle::from_parts(self.owner, slot_idx, slot.generation);
        }

        let slot_idx = u32::try_from(self.slots.len()).expect("too many slots");

        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });

        RawHandle::from_parts(self.owner, slot_idx, 1)
    }

    pub fn remove(&mut self, handle: RawHandle) -> Option<T> {
        let slot = self.slot_mut(handle)?;

        let value = slot.value.take();
        slot.generation += 1;
        let reusable = slot.generation < u32::MAX - 1;

        self.len -= 1;

        // A slot whose generation would overflow on its next insertion is retired for good.
        if reusable {
            self.free_slots.push(handle.slot());
        }

        value
    }

    pub fn get(&self, handle: RawHandle) -> Option<&T> {
        if handle.owner != self.owner {
            return None;
        }

        self.slots
            .get(handle.slot() as usize)
            .filter(|slot| slot.generation == handle.generation().get())
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: RawHandle) -> Option<&mut T> {
        self.slot_mut(handle).and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: RawHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_mut(&mut self, handle: RawHandle) -> Option<&mut Slot<T>> {
        if handle.owner != self.owner {
            return None;
        }

        self.slots
            .get_mut(handle.slot() as usize)
            .filter(|slot| slot.generation == handle.generation().get())
    }
}

// === WorldId === //

/// Identifies the [`World`](crate::World) owning an arena. Ids are never reused within a
/// process.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct WorldId(u64);

impl WorldId {
    /// Never returns the `Default` id, which owns arenas created outside of any world.
    pub fn fresh() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        Self(NEXT_ID.fetch_add(1, Relaxed))
    }
}

// === RawHandle === //

/// The identity of one instance stored in a [`RawArena`].
///
/// Two handles are equal only if they were minted by the same insertion into the same arena.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct RawHandle {
    owner: WorldId,
    slot_idx: u32,
    generation: NonZeroU32,
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, v{}]", self.slot_idx, self.generation.get())
    }
}

impl RawHandle {
    /// A handle which never resolves to anything.
    pub const DANGLING: Self = Self {
        owner: WorldId(u64::MAX),
        slot_idx: u32::MAX,
        generation: NonZeroU32::new(u32::MAX).unwrap(),
    };

    fn from_parts(owner: WorldId, slot_idx: u32, generation: u32) -> Self {
        debug_assert!(generation % 2 == 1);

        Self {
            owner,
            slot_idx,
            generation: NonZeroU32::new(generation).expect("occupied generations are odd"),
        }
    }

    pub const fn owner(self) -> WorldId {
        self.owner
    }

    pub const fn slot(self) -> u32 {
        self.slot_idx
    }

    pub const fn generation(self) -> NonZeroU32 {
        self.generation
    }
}
