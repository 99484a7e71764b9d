use std::{
    any::{Any, TypeId, type_name},
    cell::Cell,
    fmt,
    ptr::NonNull,
};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{ClassState, Error, KeepAliveManager, RawHandle, Result, Singleton, WorldId};

// === World === //

thread_local! {
    static WORLD_TLS: Cell<Option<NonNull<World>>> = const { Cell::new(None) };
}

pub type W<'a> = &'a mut World;
pub type Wr<'a> = &'a World;

/// The context owning every singleton instance together with each type's validity slot.
///
/// All lifecycle operations take the world as their last argument. Nothing is stored in
/// process-wide statics, and handles minted by one world never resolve in another.
pub struct World {
    id: WorldId,
    classes: FxHashMap<TypeId, Box<dyn Any>>,
    manager: WorldKeepAliveManager,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("classes", &self.classes.len())
            .finish_non_exhaustive()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            id: WorldId::fresh(),
            classes: FxHashMap::default(),
            manager: WorldKeepAliveManager::default(),
        }
    }

    pub fn id(&self) -> WorldId {
        self.id
    }

    pub fn class<T: Singleton>(&self) -> Option<&ClassState<T>> {
        self.classes
            .get(&TypeId::of::<T>())
            .map(|state| downcast_state::<T>(state.as_ref()))
    }

    pub fn class_mut<T: Singleton>(&mut self) -> &mut ClassState<T> {
        self.class_and_manager_mut::<T>().0
    }

    pub fn class_and_manager_mut<T: Singleton>(
        &mut self,
    ) -> (&mut ClassState<T>, &mut WorldKeepAliveManager) {
        let id = self.id;
        let state = self
            .classes
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(ClassState::<T>::new(T::POLICY, id)));

        let state = state
            .downcast_mut::<ClassState<T>>()
            .expect("class state stored under the wrong type");

        (state, &mut self.manager)
    }

    /// Destroys every instance whose last strong reference has been dropped.
    ///
    /// Weakly-stored singletons only become unbound once this runs.
    pub fn flush(&mut self) {
        while let Some(condemned) = self.manager.take_condemned() {
            (condemned.destructor)(condemned.handle, self);
        }
    }

    /// Number of instances of `T` which have not been reclaimed yet, current or retired.
    pub fn live_instances<T: Singleton>(&self) -> usize {
        self.class::<T>().map_or(0, |class| class.live_count())
    }

    /// Turns off the ensure-init wrapper for `T`.
    ///
    /// Only allowed before `T` is first instantiated.
    pub fn disable_ensure_init<T: Singleton>(&mut self) -> Result<()> {
        let class = self.class_mut::<T>();

        if !class.policy().ensure_init {
            return Err(Error::PolicyMismatch {
                class: type_name::<T>(),
                reason: "not an ensure-init singleton",
            });
        }

        class.update_policy(|policy| policy.without_ensure_init())?;
        debug!(target: "sole::lifecycle", class = type_name::<T>(), "ensure-init disabled");

        Ok(())
    }

    /// Makes guarded accesses to retired instances of `T` succeed while the instance is alive.
    /// [`Handle::is_instance_valid`](crate::Handle::is_instance_valid) keeps reporting the truth.
    ///
    /// Only allowed before `T` is first instantiated.
    pub fn suppress_invalidation_errors<T: Singleton>(&mut self) -> Result<()> {
        let class = self.class_mut::<T>();

        if !class.policy().explicit_reinit {
            return Err(Error::PolicyMismatch {
                class: type_name::<T>(),
                reason: "not an explicitly reinitializable singleton",
            });
        }

        class.update_policy(|policy| policy.suppress_invalidation_errors())?;
        debug!(
            target: "sole::lifecycle",
            class = type_name::<T>(),
            "invalidation errors suppressed",
        );

        Ok(())
    }

    pub fn provide_tls<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = scopeguard::guard(WORLD_TLS.replace(Some(NonNull::from(self))), |old| {
            WORLD_TLS.set(old);
        });

        f()
    }

    pub fn fetch_tls<R>(f: impl FnOnce(Option<&World>) -> R) -> R {
        // SAFETY: the pointer is only published for the duration of `provide_tls`, during which
        // the world is immutably borrowed.
        f(WORLD_TLS.get().map(|v| unsafe { v.as_ref() }))
    }

    pub fn debug<T>(&self, value: T) -> WorldDebug<'_, T> {
        WorldDebug::new(value, self)
    }
}

fn downcast_state<T: Singleton>(state: &dyn Any) -> &ClassState<T> {
    state
        .downcast_ref::<ClassState<T>>()
        .expect("class state stored under the wrong type")
}

// === WorldDebug === //

// Not `#[must_use]` because these are often printed using `dbg!()`.
#[derive(Copy, Clone)]
pub struct WorldDebug<'a, T> {
    world: &'a World,
    value: T,
}

impl<'a, T> WorldDebug<'a, T> {
    pub fn new(value: T, w: Wr<'a>) -> Self {
        Self { value, world: w }
    }
}

impl<T: fmt::Debug> fmt::Debug for WorldDebug<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.world.provide_tls(|| self.value.fmt(f))
    }
}

// === KeepAlive === //

pub type WorldKeepAliveManager = KeepAliveManager<Condemned>;

/// What to run once an instance's last [`KeepAlive`](crate::KeepAlive) has been dropped.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct Condemned {
    pub destructor: fn(handle: RawHandle, w: W),
    pub handle: RawHandle,
}
