use std::{any::type_name, fmt, hash};

use bytemuck::TransparentWrapper;

use crate::{
    BoxError, Error, FieldRef, Policy, RawHandle, Result, Strong, W, WorldDebug, Wr, creation,
};

// === rich_fmt === //

mod rich_fmt {
    use std::{
        any::{TypeId, type_name},
        cell::UnsafeCell,
        fmt::{self, Debug},
    };

    use rustc_hash::{FxBuildHasher, FxHashSet};

    use crate::{RawHandle, World};

    use super::Handle;

    thread_local! {
        static REENTRANT_DEBUGS: UnsafeCell<FxHashSet<(RawHandle, TypeId)>> =
            const { UnsafeCell::new(FxHashSet::with_hasher(FxBuildHasher)) };
    }

    #[must_use]
    fn reentrant_debug_guard<T: Handle>(handle: T) -> Option<impl Sized> {
        // SAFETY: `REENTRANT_DEBUGS` is only accessed in this module and never across a call
        // which could re-enter it.
        let was_inserted = REENTRANT_DEBUGS.with(|set| {
            unsafe { &mut *set.get() }.insert((handle.raw(), TypeId::of::<T::Object>()))
        });

        if !was_inserted {
            return None;
        }

        Some(scopeguard::guard((), move |()| {
            REENTRANT_DEBUGS.with(|set| {
                unsafe { &mut *set.get() }.remove(&(handle.raw(), TypeId::of::<T::Object>()))
            });
        }))
    }

    pub fn format_handle<T: Handle>(f: &mut fmt::Formatter<'_>, handle: T) -> fmt::Result {
        World::fetch_tls(|w| {
            f.write_str(type_name::<T::Object>())?;
            handle.raw().fmt(f)?;

            let Some(w) = w else {
                return Ok(());
            };

            let Some(_reentrancy_guard) = reentrant_debug_guard(handle) else {
                return Ok(());
            };

            f.write_str(": ")?;

            let Some(class) = w.class::<T::Object>() else {
                return f.write_str("<dangling>");
            };

            match class.get(handle.raw()) {
                Some(value) if class.is_current(handle.raw()) => value.fmt(f),
                Some(_) => f.write_str("<retired>"),
                None => f.write_str("<dangling>"),
            }
        })
    }
}

pub use self::rich_fmt::format_handle;

// === Singleton === //

/// A type with at most one current instance per [`World`](crate::World).
///
/// Implementors provide [`create`](Singleton::create) and optionally the initializer hooks. Every
/// other method is a class-level lifecycle operation which should not be overridden.
///
/// Construction runs in this order:
///
/// 1. [`create`](Singleton::create) builds the value. Nothing is registered yet, so a failure here
///    leaves the type untouched.
/// 2. The value is stored in the world and recorded in the type's validity slot. The caller's
///    [`Strong`] reference exists before the slot is populated so a weakly-stored instance cannot
///    be reclaimed halfway through its construction.
/// 3. Under [`Policy::ensure_init`], [`base_init`](Singleton::base_init) runs unless the
///    instance was already marked as initialized.
/// 4. [`init`](Singleton::init) runs. The instance is already current at this point so the body
///    may look it up through [`get_instance`](Singleton::get_instance).
///
/// If step 3 or 4 fails under `ensure_init`, the slot is rolled back to unbound.
pub trait Singleton: 'static + Sized + fmt::Debug {
    type Handle: Handle<Object = Self>;
    type Args;

    const POLICY: Policy = Policy::EXPLICIT_REINIT;

    fn create(args: Self::Args) -> Result<Self, BoxError>;

    /// The shared initializer. Runs at most once per instance.
    fn base_init(me: Self::Handle, w: W) -> Result<(), BoxError> {
        _ = (me, w);
        Ok(())
    }

    /// The constructor body.
    fn init(me: Self::Handle, w: W) -> Result<(), BoxError> {
        _ = (me, w);
        Ok(())
    }

    /// Runs whenever the current instance is discarded by [`reinit`](Singleton::reinit),
    /// [`invalidate`](Singleton::invalidate) or an ensure-init rollback, while it is still
    /// current.
    fn on_unregister(me: Self::Handle, w: W) -> Result<(), BoxError> {
        _ = (me, w);
        Ok(())
    }

    /// Returns the current instance or creates it, depending on the type's policy.
    fn construct(args: Self::Args, w: W) -> Result<Strong<Self::Handle>> {
        creation::construct::<Self>(args, w)
    }

    /// Retires the current instance, if any, and constructs a fresh one.
    fn reinit(args: Self::Args, w: W) -> Result<Strong<Self::Handle>> {
        creation::reinit::<Self>(args, w)
    }

    /// Retires the current instance, if any. Fails with [`Error::Invalidation`] afterwards if
    /// `raise` is set.
    fn invalidate(raise: bool, w: W) -> Result<()> {
        creation::invalidate::<Self>(raise, w)
    }

    fn get_instance(w: W) -> Result<Strong<Self::Handle>> {
        Self::maybe_get_instance(w).ok_or(Error::NoInstance {
            class: type_name::<Self>(),
        })
    }

    fn maybe_get_instance(w: W) -> Option<Strong<Self::Handle>> {
        creation::current::<Self>(w)
    }

    fn instance_exists(w: Wr) -> bool {
        w.class::<Self>()
            .is_some_and(|class| class.current().is_some())
    }

    /// The effective policy, including one-shot opt-outs.
    fn policy(w: Wr) -> Policy {
        w.class::<Self>()
            .map_or(Self::POLICY, |class| class.policy())
    }
}

// === Handle === //

pub trait Handle:
    'static
    + Sized
    + Send
    + Sync
    + fmt::Debug
    + Copy
    + Eq
    + hash::Hash
    + Ord
    + TransparentWrapper<RawHandle>
{
    type Object: Singleton<Handle = Self>;

    fn from_raw(raw: RawHandle) -> Self {
        TransparentWrapper::wrap(raw)
    }

    fn raw(self) -> RawHandle {
        TransparentWrapper::peel(self)
    }

    /// Whether this handle refers to the current instance of its type.
    ///
    /// This is the one accessor which is never guarded.
    fn is_instance_valid(self, w: Wr) -> bool {
        w.class::<Self::Object>()
            .is_some_and(|class| class.is_current(self.raw()))
    }

    /// Whether the instance has not been reclaimed yet. Retired instances may still be alive.
    fn is_alive(self, w: Wr) -> bool {
        w.class::<Self::Object>()
            .is_some_and(|class| class.is_alive(self.raw()))
    }

    /// Runs the invalidation guard without accessing the instance.
    fn validate(self, w: Wr) -> Result<()> {
        self.try_r(w).map(|_| ())
    }

    /// Borrows the instance, failing with [`Error::Invalidation`] if it has been retired.
    fn try_r(self, w: Wr) -> Result<&Self::Object> {
        let invalidated = || Error::Invalidation {
            class: type_name::<Self::Object>(),
        };

        let class = w.class::<Self::Object>().ok_or_else(invalidated)?;

        if !class.policy().suppress_invalidation_errors && !class.is_current(self.raw()) {
            return Err(invalidated());
        }

        class.get(self.raw()).ok_or_else(invalidated)
    }

    /// Mutably borrows the instance, failing with [`Error::Invalidation`] if it has been
    /// retired.
    fn try_m(self, w: W) -> Result<&mut Self::Object> {
        let invalidated = || Error::Invalidation {
            class: type_name::<Self::Object>(),
        };

        let class = w.class_mut::<Self::Object>();

        if !class.policy().suppress_invalidation_errors && !class.is_current(self.raw()) {
            return Err(invalidated());
        }

        class.get_mut(self.raw()).ok_or_else(invalidated)
    }

    #[track_caller]
    fn r(self, w: Wr) -> &Self::Object {
        match self.try_r(w) {
            Ok(v) => v,
            Err(err) => panic!("attempted to access {self:?}: {err}"),
        }
    }

    #[track_caller]
    fn m(self, w: W) -> &mut Self::Object {
        match self.try_m(w) {
            Ok(v) => v,
            Err(err) => panic!("attempted to access {self:?}: {err}"),
        }
    }

    fn as_strong_if_alive(self, w: W) -> Option<Strong<Self>> {
        let (class, manager) = w.class_and_manager_mut::<Self::Object>();
        let keep_alive = class.upgrade(manager, self.raw())?;

        Some(Strong::new(self, keep_alive))
    }

    /// Runs [`Singleton::base_init`] unless this instance already ran it. Fails with
    /// [`Error::Invalidation`] if the instance has been retired.
    fn ensure_base_init(self, w: W) -> Result<()> {
        creation::ensure_base_init(self, w)
    }

    /// Wraps `value`, typically a clone of one of the instance's fields, into a strong
    /// [`FieldRef`] which checks that this instance is still current on every access.
    fn wrap_value<V>(self, value: V, w: W) -> Result<FieldRef<Self, V>> {
        self.validate_current(w)?;

        let strong = self.as_strong_if_alive(w).ok_or(Error::Invalidation {
            class: type_name::<Self::Object>(),
        })?;

        FieldRef::strong(strong, value, w)
    }

    /// Like [`wrap_value`](Handle::wrap_value) but the resulting reference does not keep the
    /// instance alive.
    fn wrap_value_weak<V>(self, value: V, w: Wr) -> Result<FieldRef<Self, V>> {
        FieldRef::weak(self, value, w)
    }

    #[doc(hidden)]
    fn validate_current(self, w: Wr) -> Result<()> {
        if self.is_instance_valid(w) {
            Ok(())
        } else {
            Err(Error::Invalidation {
                class: type_name::<Self::Object>(),
            })
        }
    }

    fn debug(self, w: Wr) -> WorldDebug<'_, Self> {
        WorldDebug::new(self, w)
    }
}

// === Macros === //

#[doc(hidden)]
pub mod singleton_internals {
    pub use {
        super::format_handle,
        crate::{Handle, RawHandle},
        bytemuck::TransparentWrapper,
        paste::paste,
        std::{
            clone::Clone,
            cmp::{Eq, Ord, PartialEq, PartialOrd},
            fmt,
            hash::Hash,
            marker::Copy,
        },
    };
}

/// Declares the handle newtype for one or more [`Singleton`] types.
///
/// `singleton!(pub Config)` defines `pub struct ConfigHandle` and implements [`Handle`] for it.
/// The visibility must match the one of the singleton type itself.
#[macro_export]
macro_rules! singleton {
    ( $( $vis:vis $ty:ident ),*$(,)? ) => {$(
        $crate::singleton_internals::paste! {
            #[derive(
                $crate::singleton_internals::Copy,
                $crate::singleton_internals::Clone,
                $crate::singleton_internals::Hash,
                $crate::singleton_internals::Eq,
                $crate::singleton_internals::PartialEq,
                $crate::singleton_internals::Ord,
                $crate::singleton_internals::PartialOrd,
            )]
            #[repr(transparent)]
            $vis struct [<$ty Handle>]($crate::singleton_internals::RawHandle);

            unsafe impl $crate::singleton_internals::TransparentWrapper<
                $crate::singleton_internals::RawHandle,
            > for [<$ty Handle>]
            {
            }

            impl $crate::singleton_internals::fmt::Debug for [<$ty Handle>] {
                fn fmt(
                    &self,
                    f: &mut $crate::singleton_internals::fmt::Formatter<'_>,
                ) -> $crate::singleton_internals::fmt::Result {
                    $crate::singleton_internals::format_handle(f, *self)
                }
            }

            impl $crate::singleton_internals::Handle for [<$ty Handle>] {
                type Object = $ty;
            }
        }
    )*};
}
