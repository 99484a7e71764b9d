use thiserror::Error;

/// Error type returned by user-supplied lifecycle hooks.
pub type BoxError = Box<dyn std::error::Error + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

// === Error === //

/// Every failure the singleton lifecycle can raise.
///
/// Errors are surfaced synchronously at the call which caused them and are never retried
/// internally. Use [`Error::category`] to tell programming mistakes apart from stale-handle
/// accesses and from the fatal rollback failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("singleton `{class}` is abstract and cannot be instantiated")]
    AbstractInit { class: &'static str },

    #[error("attempted to implicitly reinitialize singleton `{class}`")]
    ImplicitReinit { class: &'static str },

    #[error("singleton `{class}` has no current instance")]
    NoInstance { class: &'static str },

    #[error("instance of singleton `{class}` has been invalidated")]
    Invalidation { class: &'static str },

    #[error("singleton `{class}` does not support explicit reinitialization")]
    ReinitUnsupported { class: &'static str },

    #[error("policy of singleton `{class}` can no longer be changed: {reason}")]
    PolicyLocked {
        class: &'static str,
        reason: &'static str,
    },

    #[error("policy opt-out does not apply to singleton `{class}`: {reason}")]
    PolicyMismatch {
        class: &'static str,
        reason: &'static str,
    },

    #[error("failed to initialize singleton `{class}`")]
    Init {
        class: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("failed to get instance of `{class}`")]
    GetInstance {
        class: &'static str,
        #[source]
        source: RegistryError,
    },

    #[error("the registered instance of `{class}` has been reclaimed")]
    GetInvalidatedInstance { class: &'static str },

    #[error(transparent)]
    Unregister(#[from] UnregisterError),

    #[error(transparent)]
    CriticalUnregister(#[from] CriticalUnregisterError),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum ErrorCategory {
    /// The caller violated the singleton contract.
    Usage,
    /// A retired or reclaimed instance was accessed.
    Invalidation,
    /// A user hook failed while building or discarding an instance.
    Init,
    /// Slot state can no longer be trusted.
    Fatal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::AbstractInit { .. }
            | Error::ImplicitReinit { .. }
            | Error::NoInstance { .. }
            | Error::ReinitUnsupported { .. }
            | Error::PolicyLocked { .. }
            | Error::PolicyMismatch { .. }
            | Error::GetInstance { .. } => ErrorCategory::Usage,
            Error::Invalidation { .. } | Error::GetInvalidatedInstance { .. } => {
                ErrorCategory::Invalidation
            }
            Error::Init { .. } | Error::Unregister(_) => ErrorCategory::Init,
            Error::CriticalUnregister(_) => ErrorCategory::Fatal,
        }
    }

    /// Name of the singleton type this error concerns.
    pub fn class(&self) -> &'static str {
        match self {
            Error::AbstractInit { class }
            | Error::ImplicitReinit { class }
            | Error::NoInstance { class }
            | Error::Invalidation { class }
            | Error::ReinitUnsupported { class }
            | Error::PolicyLocked { class, .. }
            | Error::PolicyMismatch { class, .. }
            | Error::Init { class, .. }
            | Error::GetInstance { class, .. }
            | Error::GetInvalidatedInstance { class } => class,
            Error::Unregister(err) => err.class(),
            Error::CriticalUnregister(err) => err.class,
        }
    }

    /// Whether this is a failure to fetch an instance from a
    /// [`SingletonRegistry`](crate::SingletonRegistry), including the reclaimed case.
    pub fn is_get_instance(&self) -> bool {
        matches!(
            self,
            Error::GetInstance { .. } | Error::GetInvalidatedInstance { .. }
        )
    }
}

// === UnregisterError === //

/// Failure to discard the current instance of a singleton.
#[derive(Debug, Error)]
pub enum UnregisterError {
    #[error("slot of singleton `{class}` no longer holds the instance being discarded")]
    SlotMismatch { class: &'static str },

    #[error("unregister hook of singleton `{class}` failed")]
    Hook {
        class: &'static str,
        #[source]
        source: BoxError,
    },
}

impl UnregisterError {
    pub fn class(&self) -> &'static str {
        match self {
            UnregisterError::SlotMismatch { class } | UnregisterError::Hook { class, .. } => class,
        }
    }
}

/// Raised when rolling back a failed ensure-init construction fails itself.
///
/// This is intentionally a distinct type rather than an [`UnregisterError`] variant so that a
/// handler for ordinary unregister failures cannot swallow it.
#[derive(Debug, Error)]
#[error("rollback of singleton `{class}` failed after initialization error ({original})")]
pub struct CriticalUnregisterError {
    pub class: &'static str,
    pub original: Box<Error>,
    #[source]
    pub rollback: UnregisterError,
}

// === RegistryError === //

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum RegistryError {
    #[error("{key} is already registered")]
    AlreadyRegistered { key: String },

    #[error("{key} is not registered")]
    NotRegistered { key: String },
}
