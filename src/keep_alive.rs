use std::{
    cell::RefCell,
    fmt,
    num::NonZeroU32,
    rc::{Rc, Weak},
};

// === KeepAliveManager === //

type CondemnedQueue = RefCell<Vec<KeepAliveIndex>>;

/// Tracks which instances are still owned by at least one [`KeepAlive`] guard.
///
/// Dropping the last guard for an index does not destroy anything by itself. The index is pushed
/// onto a queue of candidates and only becomes condemned once [`take_condemned`] observes that no
/// guard was re-created for it in the meantime.
///
/// [`take_condemned`]: KeepAliveManager::take_condemned
pub struct KeepAliveManager<T> {
    slots: Vec<KeepAliveSlot<T>>,
    free_slots: Vec<KeepAliveIndex>,
    candidates: Rc<CondemnedQueue>,
}

struct KeepAliveSlot<T> {
    pointee: Weak<KeepAlivePointee>,
    userdata: Option<T>,
}

impl<T> fmt::Debug for KeepAliveManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAliveManager")
            .field("slots", &self.slots.len())
            .field("candidates", &self.candidates.borrow().len())
            .finish_non_exhaustive()
    }
}

impl<T> Default for KeepAliveManager<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            candidates: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl<T> KeepAliveManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, userdata: T) -> KeepAlive {
        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                let index = KeepAliveIndex::from_usize(self.slots.len())
                    .expect("allocated too many keep-alive slots");

                self.slots.push(KeepAliveSlot {
                    pointee: Weak::new(),
                    userdata: None,
                });

                index
            }
        };

        let pointee = self.make_pointee(index);
        let slot = &mut self.slots[index.as_usize()];

        slot.pointee = Rc::downgrade(&pointee);
        slot.userdata = Some(userdata);

        KeepAlive(pointee)
    }

    /// Obtains a guard for an index which has not been condemned yet, re-creating it if every
    /// previous guard was already dropped.
    pub fn upgrade(&mut self, index: KeepAliveIndex) -> KeepAlive {
        debug_assert!(self.slots[index.as_usize()].userdata.is_some());

        if let Some(pointee) = self.slots[index.as_usize()].pointee.upgrade() {
            return KeepAlive(pointee);
        }

        let pointee = self.make_pointee(index);
        self.slots[index.as_usize()].pointee = Rc::downgrade(&pointee);

        KeepAlive(pointee)
    }

    pub fn take_condemned(&mut self) -> Option<T> {
        loop {
            let candidate = self.candidates.borrow_mut().pop()?;
            let slot = &mut self.slots[candidate.as_usize()];

            // Resurrected since its last guard went away.
            if slot.pointee.strong_count() > 0 {
                continue;
            }

            // Queued more than once.
            let Some(userdata) = slot.userdata.take() else {
                continue;
            };

            slot.pointee = Weak::new();
            self.free_slots.push(candidate);

            return Some(userdata);
        }
    }

    fn make_pointee(&self, index: KeepAliveIndex) -> Rc<KeepAlivePointee> {
        Rc::new(KeepAlivePointee {
            candidates: Rc::downgrade(&self.candidates),
            index,
        })
    }
}

struct KeepAlivePointee {
    candidates: Weak<CondemnedQueue>,
    index: KeepAliveIndex,
}

impl Drop for KeepAlivePointee {
    fn drop(&mut self) {
        let Some(candidates) = self.candidates.upgrade() else {
            return;
        };

        candidates.borrow_mut().push(self.index);
    }
}

// === KeepAliveIndex === //

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct KeepAliveIndex(NonZeroU32);

impl KeepAliveIndex {
    /// An index no manager will ever hand out.
    pub const MAX: Self = Self::from_usize((u32::MAX - 1) as usize).unwrap();

    pub const fn as_usize(self) -> usize {
        (self.0.get() - 1) as usize
    }

    pub const fn from_usize(idx: usize) -> Option<Self> {
        let idx = idx.saturating_add(1) as u64;

        if idx > u32::MAX as u64 {
            return None;
        }

        match NonZeroU32::new(idx as u32) {
            Some(idx) => Some(Self(idx)),
            None => None,
        }
    }
}

// === KeepAlive === //

/// A reference-counted guard keeping one instance from being reclaimed.
#[derive(Clone)]
pub struct KeepAlive(Rc<KeepAlivePointee>);

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeepAlive").field(&self.0.index).finish()
    }
}

impl Eq for KeepAlive {}

impl PartialEq for KeepAlive {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl KeepAlive {
    pub fn index(&self) -> KeepAliveIndex {
        self.0.index
    }
}
