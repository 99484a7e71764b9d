// === Policy === //

/// The set of behaviors a [`Singleton`](crate::Singleton) type opts into.
///
/// Every flag is independent. The associated constants cover the usual tiers and the `const`
/// builder methods layer the remaining flags on top of them:
///
/// ```
/// use sole::Policy;
///
/// const POLICY: Policy = Policy::ENSURE_INIT.weak();
///
/// assert!(POLICY.forbid_implicit_reinit);
/// assert!(POLICY.weak_storage);
/// ```
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct Policy {
    /// Constructing the type while an instance is current fails with
    /// [`Error::ImplicitReinit`](crate::Error::ImplicitReinit) instead of returning the existing
    /// instance.
    pub forbid_implicit_reinit: bool,

    /// Enables [`Singleton::reinit`](crate::Singleton::reinit) and
    /// [`Singleton::invalidate`](crate::Singleton::invalidate).
    pub explicit_reinit: bool,

    /// Runs [`Singleton::base_init`](crate::Singleton::base_init) exactly once per instance and
    /// rolls the slot back if any initializer fails.
    pub ensure_init: bool,

    /// The validity slot only observes the instance instead of owning it.
    pub weak_storage: bool,

    /// Guarded accesses to retired instances succeed as long as the instance is still alive.
    pub suppress_invalidation_errors: bool,

    /// The type only exists to share behavior and can never be instantiated.
    pub is_abstract: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self::EXPLICIT_REINIT
    }
}

impl Policy {
    /// Creation on first use. Later constructions return the existing instance and ignore their
    /// arguments.
    pub const SIMPLE: Self = Self {
        forbid_implicit_reinit: false,
        explicit_reinit: false,
        ensure_init: false,
        weak_storage: false,
        suppress_invalidation_errors: false,
        is_abstract: false,
    };

    pub const NO_IMPLICIT_REINIT: Self = Self {
        forbid_implicit_reinit: true,
        ..Self::SIMPLE
    };

    pub const EXPLICIT_REINIT: Self = Self {
        explicit_reinit: true,
        ..Self::NO_IMPLICIT_REINIT
    };

    pub const ENSURE_INIT: Self = Self {
        ensure_init: true,
        ..Self::EXPLICIT_REINIT
    };

    pub const fn weak(self) -> Self {
        Self {
            weak_storage: true,
            ..self
        }
    }

    pub const fn abstract_(self) -> Self {
        Self {
            is_abstract: true,
            ..self
        }
    }

    pub const fn suppress_invalidation_errors(self) -> Self {
        Self {
            suppress_invalidation_errors: true,
            ..self
        }
    }

    pub const fn without_ensure_init(self) -> Self {
        Self {
            ensure_init: false,
            ..self
        }
    }
}
