//! Policy-configurable singletons with auditable reinitialization.
//!
//! Every [`Singleton`] type has at most one *current* instance per [`World`]. Instances are
//! addressed through generational handles and every guarded access checks that the handle still
//! names the current instance, so touching a retired instance is an error instead of a silent
//! read of stale state.
//!
//! ```
//! use sole::{Error, Handle as _, Policy, Singleton, World, singleton};
//!
//! #[derive(Debug)]
//! pub struct Config {
//!     verbose: bool,
//! }
//!
//! singleton!(pub Config);
//!
//! impl Singleton for Config {
//!     type Handle = ConfigHandle;
//!     type Args = bool;
//!
//!     const POLICY: Policy = Policy::EXPLICIT_REINIT;
//!
//!     fn create(verbose: bool) -> Result<Self, sole::BoxError> {
//!         Ok(Config { verbose })
//!     }
//! }
//!
//! let mut w = World::new();
//! let w = &mut w;
//!
//! let c1 = Config::construct(false, w).unwrap();
//! assert!(matches!(
//!     Config::construct(true, w),
//!     Err(Error::ImplicitReinit { .. }),
//! ));
//!
//! let c2 = Config::reinit(true, w).unwrap();
//!
//! assert!(!c1.is_instance_valid(w));
//! assert!(c2.is_instance_valid(w));
//! assert_ne!(c1, c2);
//!
//! // Retired instances fail closed.
//! assert!(c1.try_r(w).is_err());
//! assert!(c2.r(w).verbose);
//! ```
//!
//! Instances are destroyed lazily: dropping the last [`Strong`] reference to an instance only
//! condemns it, and [`World::flush`] reclaims everything condemned so far. This is also how
//! weakly-stored singletons (see [`Policy::weak_storage`]) go back to being unbound.

mod arena;
pub use self::arena::*;

mod creation;

mod error;
pub use self::error::*;

mod field;
pub use self::field::*;

mod handle;
pub use self::handle::*;

mod keep_alive;
pub use self::keep_alive::*;

mod policy;
pub use self::policy::*;

mod registry;
pub use self::registry::*;

mod slot;
pub use self::slot::*;

mod world;
pub use self::world::*;

mod wrappers;
pub use self::wrappers::*;

#[cfg(test)]
mod tests;
