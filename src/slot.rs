use std::{any::type_name, fmt, mem};

use crate::{
    Condemned, Error, KeepAlive, KeepAliveIndex, Policy, RawArena, RawHandle, Result, Singleton,
    W, WorldId, WorldKeepAliveManager,
};

// === ValiditySlot === //

/// The per-type cell naming the current instance.
///
/// This is the only source of truth about which instance is current. An instance is current if
/// and only if its handle is the one recorded here and it has not been reclaimed.
#[derive(Debug, Default)]
pub enum ValiditySlot {
    #[default]
    Unbound,
    /// The slot owns the instance and keeps it from being reclaimed.
    Owning {
        handle: RawHandle,
        keep_alive: KeepAlive,
    },
    /// The slot merely observes the instance. It goes away once every external [`Strong`]
    /// reference is dropped and the world is flushed.
    ///
    /// [`Strong`]: crate::Strong
    Observing(RawHandle),
}

impl ValiditySlot {
    pub fn handle(&self) -> Option<RawHandle> {
        match self {
            ValiditySlot::Unbound => None,
            ValiditySlot::Owning { handle, .. } | ValiditySlot::Observing(handle) => Some(*handle),
        }
    }

    pub fn is_owning(&self) -> bool {
        matches!(self, ValiditySlot::Owning { .. })
    }

    pub fn take(&mut self) -> ValiditySlot {
        mem::take(self)
    }
}

// === ClassState === //

pub(crate) struct InstanceEntry<T> {
    pub value: T,
    pub keep_alive: KeepAliveIndex,
    pub initialized: bool,
}

/// Everything the [`World`](crate::World) tracks for one [`Singleton`] type: its instances, its
/// validity slot and its effective policy.
pub struct ClassState<T> {
    arena: RawArena<InstanceEntry<T>>,
    slot: ValiditySlot,
    policy: Policy,
    locked: bool,
}

impl<T> fmt::Debug for ClassState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassState")
            .field("class", &type_name::<T>())
            .field("slot", &self.slot)
            .field("policy", &self.policy)
            .field("locked", &self.locked)
            .field("live", &self.arena.len())
            .finish()
    }
}

impl<T: Singleton> ClassState<T> {
    pub fn new(policy: Policy, owner: WorldId) -> Self {
        Self {
            arena: RawArena::new(owner),
            slot: ValiditySlot::Unbound,
            policy,
            locked: false,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Whether the policy has been frozen by a first instantiation attempt.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn slot(&self) -> &ValiditySlot {
        &self.slot
    }

    pub(crate) fn update_policy(&mut self, f: impl FnOnce(Policy) -> Policy) -> Result<()> {
        if self.locked {
            return Err(Error::PolicyLocked {
                class: type_name::<T>(),
                reason: "the singleton has already been instantiated",
            });
        }

        self.policy = f(self.policy);
        Ok(())
    }

    pub(crate) fn lock(&mut self) -> bool {
        !mem::replace(&mut self.locked, true)
    }

    /// Resolves the slot, discarding a stale handle to a reclaimed instance.
    pub fn current(&self) -> Option<RawHandle> {
        self.slot
            .handle()
            .filter(|&handle| self.arena.contains(handle))
    }

    pub fn is_current(&self, handle: RawHandle) -> bool {
        self.current() == Some(handle)
    }

    pub fn is_alive(&self, handle: RawHandle) -> bool {
        self.arena.contains(handle)
    }

    pub fn live_count(&self) -> usize {
        self.arena.len()
    }

    pub fn get(&self, handle: RawHandle) -> Option<&T> {
        self.arena.get(handle).map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, handle: RawHandle) -> Option<&mut T> {
        self.arena.get_mut(handle).map(|entry| &mut entry.value)
    }

    pub(crate) fn entry_mut(&mut self, handle: RawHandle) -> Option<&mut InstanceEntry<T>> {
        self.arena.get_mut(handle)
    }

    pub(crate) fn spawn(
        &mut self,
        manager: &mut WorldKeepAliveManager,
        value: T,
    ) -> (RawHandle, KeepAlive) {
        let handle = self.arena.insert(InstanceEntry {
            value,
            keep_alive: KeepAliveIndex::MAX,
            initialized: false,
        });

        let keep_alive = manager.allocate(Condemned {
            destructor: Self::reclaim,
            handle,
        });

        if let Some(entry) = self.arena.get_mut(handle) {
            entry.keep_alive = keep_alive.index();
        }

        (handle, keep_alive)
    }

    pub(crate) fn upgrade(
        &self,
        manager: &mut WorldKeepAliveManager,
        handle: RawHandle,
    ) -> Option<KeepAlive> {
        let entry = self.arena.get(handle)?;

        Some(manager.upgrade(entry.keep_alive))
    }

    /// Records `handle` as the current instance, owning it or observing it depending on the
    /// storage policy. Returns the previous slot contents.
    pub(crate) fn bind(&mut self, handle: RawHandle, keep_alive: &KeepAlive) -> ValiditySlot {
        let next = if self.policy.weak_storage {
            ValiditySlot::Observing(handle)
        } else {
            ValiditySlot::Owning {
                handle,
                keep_alive: keep_alive.clone(),
            }
        };

        mem::replace(&mut self.slot, next)
    }

    pub(crate) fn unbind(&mut self) -> ValiditySlot {
        self.slot.take()
    }

    fn reclaim(handle: RawHandle, w: W) {
        let value = w.class_mut::<T>().arena.remove(handle);

        if value.is_some() {
            tracing::debug!(
                target: "sole::lifecycle",
                class = type_name::<T>(),
                ?handle,
                "instance reclaimed",
            );
        }

        // Dropped outside of the class borrow since the value may own further strong handles.
        drop(value);
    }
}
