use std::{fmt, ops::Deref};

use derive_where::derive_where;

use crate::{FieldRef, Handle, KeepAlive, Result, Wr};

// === Strong === //

/// A strong reference to a singleton instance.
///
/// This is comprised of two parts: the handle itself (`T`) and the [`KeepAlive`] guard keeping
/// the instance from being reclaimed. It [`Deref`]s to the handle, so every [`Handle`] method is
/// available on it.
///
/// Holding a `Strong` keeps an instance *alive*, not *current*: once the type is reinitialized
/// the instance is retired and guarded accesses through it fail.
#[derive_where(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Strong<T: Handle> {
    handle: T,
    #[derive_where(skip)]
    keep_alive: KeepAlive,
}

impl<T: Handle> fmt::Debug for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt(f)
    }
}

impl<T: Handle> Deref for Strong<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<T: Handle> Strong<T> {
    pub fn new(handle: T, keep_alive: KeepAlive) -> Self {
        Self { handle, keep_alive }
    }

    /// Note that this is an associated function, not a method.
    pub fn keep_alive(me: &Self) -> &KeepAlive {
        &me.keep_alive
    }

    /// Extracts the weak handle `T`. Same as [`Deref::deref`].
    pub fn as_weak(&self) -> T {
        self.handle
    }

    /// Wraps `value` into a strong [`FieldRef`] sharing this reference's keep-alive.
    pub fn wrap_value<V>(&self, value: V, w: Wr) -> Result<FieldRef<T, V>> {
        FieldRef::strong(self.clone(), value, w)
    }
}
