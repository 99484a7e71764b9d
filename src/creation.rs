//! The construction algorithm shared by every policy combination.

use std::any::type_name;

use tracing::{debug, error, warn};

use crate::{
    CriticalUnregisterError, Error, Handle, RawHandle, Result, Singleton, Strong,
    UnregisterError, ValiditySlot, W,
};

pub(crate) fn current<T: Singleton>(w: W) -> Option<Strong<T::Handle>> {
    let (class, manager) = w.class_and_manager_mut::<T>();
    let handle = class.current()?;
    let keep_alive = class.upgrade(manager, handle)?;

    Some(Strong::new(T::Handle::from_raw(handle), keep_alive))
}

pub(crate) fn construct<T: Singleton>(args: T::Args, w: W) -> Result<Strong<T::Handle>> {
    let class = type_name::<T>();
    let policy = T::policy(w);

    if policy.is_abstract {
        return Err(Error::AbstractInit { class });
    }

    if let Some(existing) = current::<T>(w) {
        if policy.forbid_implicit_reinit {
            return Err(Error::ImplicitReinit { class });
        }

        // Creation on first use: later arguments are ignored.
        drop(args);
        return Ok(existing);
    }

    create_and_register::<T>(args, w)
}

pub(crate) fn reinit<T: Singleton>(args: T::Args, w: W) -> Result<Strong<T::Handle>> {
    let class = type_name::<T>();
    let policy = T::policy(w);

    if policy.is_abstract {
        return Err(Error::AbstractInit { class });
    }

    if !policy.explicit_reinit {
        return Err(Error::ReinitUnsupported { class });
    }

    unregister::<T>(None, w)?;
    debug!(target: "sole::lifecycle", class, "reinitializing");

    create_and_register::<T>(args, w)
}

pub(crate) fn invalidate<T: Singleton>(raise: bool, w: W) -> Result<()> {
    let class = type_name::<T>();

    if !T::policy(w).explicit_reinit {
        return Err(Error::ReinitUnsupported { class });
    }

    unregister::<T>(None, w)?;

    if raise {
        return Err(Error::Invalidation { class });
    }

    Ok(())
}

pub(crate) fn ensure_base_init<H: Handle>(handle: H, w: W) -> Result<()> {
    let class = type_name::<H::Object>();

    let state = w.class_mut::<H::Object>();

    if !state.is_current(handle.raw()) {
        return Err(Error::Invalidation { class });
    }

    let Some(entry) = state.entry_mut(handle.raw()) else {
        return Err(Error::Invalidation { class });
    };

    if entry.initialized {
        return Ok(());
    }

    // Marked before running so a re-entrant call from within the hook is a no-op.
    entry.initialized = true;

    let result = H::Object::base_init(handle, w);

    if result.is_err() {
        if let Some(entry) = w.class_mut::<H::Object>().entry_mut(handle.raw()) {
            entry.initialized = false;
        }
    }

    result.map_err(|source| Error::Init { class, source })
}

fn create_and_register<T: Singleton>(args: T::Args, w: W) -> Result<Strong<T::Handle>> {
    let class = type_name::<T>();

    // Opt-outs may no longer be applied once instantiation has been attempted.
    if w.class_mut::<T>().lock() {
        debug!(target: "sole::lifecycle", class, policy = ?T::policy(w), "policy locked");
    }

    let value = T::create(args).map_err(|source| Error::Init { class, source })?;

    // The caller's strong reference is created before the slot is bound so that weak storage
    // never observes an instance nobody owns.
    let (class_state, manager) = w.class_and_manager_mut::<T>();
    let (raw, keep_alive) = class_state.spawn(manager, value);
    let strong = Strong::new(T::Handle::from_raw(raw), keep_alive);

    debug_assert!(
        class_state.current().is_none(),
        "bound a new instance over a current one",
    );

    // Any stale handle left in the slot refers to an instance which was already reclaimed.
    drop(class_state.bind(raw, Strong::keep_alive(&strong)));

    debug!(
        target: "sole::lifecycle",
        class,
        handle = ?raw,
        weak = !class_state.slot().is_owning(),
        "instance registered",
    );

    run_initializers::<T>(*strong, w)?;

    Ok(strong)
}

fn run_initializers<T: Singleton>(handle: T::Handle, w: W) -> Result<()> {
    let class = type_name::<T>();
    let ensure_init = T::policy(w).ensure_init;

    let result = if ensure_init {
        handle
            .ensure_base_init(w)
            .and_then(|()| T::init(handle, w).map_err(|source| Error::Init { class, source }))
    } else {
        T::init(handle, w).map_err(|source| Error::Init { class, source })
    };

    let Err(original) = result else {
        return Ok(());
    };

    if !ensure_init {
        return Err(original);
    }

    warn!(
        target: "sole::lifecycle",
        class,
        handle = ?handle.raw(),
        error = %original,
        "initialization failed, rolling back",
    );

    match unregister::<T>(Some(handle.raw()), w) {
        Ok(()) => {
            if let Some(entry) = w.class_mut::<T>().entry_mut(handle.raw()) {
                entry.initialized = false;
            }

            Err(original)
        }
        Err(rollback) => {
            error!(
                target: "sole::lifecycle",
                class,
                error = %rollback,
                "rollback failed, slot state is untrustworthy",
            );

            Err(Error::CriticalUnregister(CriticalUnregisterError {
                class,
                original: Box::new(original),
                rollback,
            }))
        }
    }
}

/// Empties the validity slot of `T`, running [`Singleton::on_unregister`] for the instance being
/// discarded.
///
/// If `expected` is given, the slot must still name that instance. An empty slot is never an
/// error.
fn unregister<T: Singleton>(expected: Option<RawHandle>, w: W) -> Result<(), UnregisterError> {
    let class = type_name::<T>();
    let current = w.class::<T>().and_then(|state| state.current());

    if let Some(expected) = expected {
        if current != Some(expected) {
            return Err(UnregisterError::SlotMismatch { class });
        }
    }

    if let Some(current) = current {
        T::on_unregister(T::Handle::from_raw(current), w)
            .map_err(|source| UnregisterError::Hook { class, source })?;

        // The hook may have replaced the instance itself.
        if w.class::<T>().and_then(|state| state.current()) != Some(current) {
            return Err(UnregisterError::SlotMismatch { class });
        }
    }

    let previous = w.class_mut::<T>().unbind();

    if let Some(handle) = current {
        debug!(
            target: "sole::lifecycle",
            class,
            ?handle,
            owning = matches!(previous, ValiditySlot::Owning { .. }),
            "instance unregistered",
        );
    }

    // Releasing an owning slot may condemn the instance. It is reclaimed on the next flush.
    drop(previous);

    Ok(())
}
