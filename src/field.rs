use std::{any::type_name, fmt};

use crate::{Error, Handle, Result, Strong, W, Wr};

// === Strength === //

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum Strength {
    /// The reference co-owns its source instance.
    Strong,
    /// The reference only observes its source instance and never extends its lifetime.
    Weak,
}

// === FieldRef === //

/// A value captured from a singleton instance which is only handed out while that instance is
/// still current.
///
/// The value is captured once, when the reference is created, and never re-fetched. Every access
/// re-validates the source instead, so a `FieldRef` taken from a retired instance fails with
/// [`Error::Invalidation`] rather than exposing stale state. Unlike guarded handle accesses,
/// field references ignore [`Policy::suppress_invalidation_errors`](crate::Policy).
///
/// ```
/// use sole::{Handle as _, Singleton, World, singleton};
///
/// #[derive(Debug)]
/// pub struct Settings {
///     theme: String,
/// }
///
/// singleton!(pub Settings);
///
/// impl Singleton for Settings {
///     type Handle = SettingsHandle;
///     type Args = &'static str;
///
///     fn create(theme: &'static str) -> Result<Self, sole::BoxError> {
///         Ok(Settings { theme: theme.to_string() })
///     }
/// }
///
/// let mut w = World::new();
/// let w = &mut w;
///
/// let settings = Settings::construct("dark", w).unwrap();
/// let theme = settings.r(w).theme.clone();
/// let theme = settings.wrap_value(theme, w).unwrap();
///
/// assert_eq!(theme.get(w).unwrap(), "dark");
///
/// Settings::reinit("light", w).unwrap();
/// assert!(theme.get(w).is_err());
/// ```
pub struct FieldRef<H: Handle, V> {
    source: Source<H>,
    value: V,
}

enum Source<H: Handle> {
    Strong(Strong<H>),
    Weak(H),
}

impl<H: Handle> Source<H> {
    fn handle(&self) -> H {
        match self {
            Source::Strong(strong) => strong.as_weak(),
            Source::Weak(handle) => *handle,
        }
    }
}

impl<H: Handle, V: fmt::Debug> fmt::Debug for FieldRef<H, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRef")
            .field("source", &self.source.handle())
            .field("strength", &self.strength())
            .field("value", &self.value)
            .finish()
    }
}

impl<H: Handle, V: Clone> Clone for FieldRef<H, V> {
    fn clone(&self) -> Self {
        let source = match &self.source {
            Source::Strong(strong) => Source::Strong(strong.clone()),
            Source::Weak(handle) => Source::Weak(*handle),
        };

        Self {
            source,
            value: self.value.clone(),
        }
    }
}

impl<H: Handle, V> FieldRef<H, V> {
    /// Wraps `value` behind a strong reference to `source`.
    pub fn strong(source: Strong<H>, value: V, w: Wr) -> Result<Self> {
        let me = Self {
            source: Source::Strong(source),
            value,
        };
        me.validate(w)?;

        Ok(me)
    }

    /// Wraps `value` behind a weak reference to `source`.
    ///
    /// The source is resolved once to confirm that it is current, without retaining a strong
    /// reference to it.
    pub fn weak(source: H, value: V, w: Wr) -> Result<Self> {
        let me = Self {
            source: Source::Weak(source),
            value,
        };
        me.validate(w)?;

        Ok(me)
    }

    pub fn source(&self) -> H {
        self.source.handle()
    }

    pub fn strength(&self) -> Strength {
        match self.source {
            Source::Strong(_) => Strength::Strong,
            Source::Weak(_) => Strength::Weak,
        }
    }

    /// Fails with [`Error::Invalidation`] if the source instance is no longer current or, for
    /// weak references, has been reclaimed.
    pub fn validate(&self, w: Wr) -> Result<()> {
        if self.source.handle().is_instance_valid(w) {
            Ok(())
        } else {
            Err(Error::Invalidation {
                class: type_name::<H::Object>(),
            })
        }
    }

    pub fn get(&self, w: Wr) -> Result<&V> {
        self.validate(w)?;
        Ok(&self.value)
    }

    pub fn get_mut(&mut self, w: Wr) -> Result<&mut V> {
        self.validate(w)?;
        Ok(&mut self.value)
    }

    /// Creates a reference of the same strength over `value`, sharing the source.
    pub fn forward<U>(&self, value: U, w: W) -> Result<FieldRef<H, U>> {
        self.forward_as(value, self.strength(), w)
    }

    pub fn forward_strong<U>(&self, value: U, w: W) -> Result<FieldRef<H, U>> {
        self.forward_as(value, Strength::Strong, w)
    }

    pub fn forward_weak<U>(&self, value: U, w: Wr) -> Result<FieldRef<H, U>> {
        self.validate(w)?;
        FieldRef::weak(self.source.handle(), value, w)
    }

    /// Forwards into a value projected from the captured one, e.g. a nested field.
    pub fn map<U>(&self, f: impl FnOnce(&V) -> U, w: W) -> Result<FieldRef<H, U>> {
        self.validate(w)?;

        let value = f(&self.value);
        self.forward(value, w)
    }

    pub fn forward_as<U>(&self, value: U, strength: Strength, w: W) -> Result<FieldRef<H, U>> {
        self.validate(w)?;

        match (&self.source, strength) {
            (Source::Strong(strong), Strength::Strong) => {
                FieldRef::strong(strong.clone(), value, w)
            }
            (Source::Weak(handle), Strength::Strong) => {
                let strong = handle.as_strong_if_alive(w).ok_or(Error::Invalidation {
                    class: type_name::<H::Object>(),
                })?;

                FieldRef::strong(strong, value, w)
            }
            (_, Strength::Weak) => FieldRef::weak(self.source.handle(), value, w),
        }
    }

    /// Extracts the captured value after validating the source one last time.
    pub fn into_value(self, w: Wr) -> Result<V> {
        self.validate(w)?;
        Ok(self.value)
    }
}
