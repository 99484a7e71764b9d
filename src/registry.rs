use std::{
    any::{Any, TypeId, type_name},
    fmt,
    hash::Hash,
    rc::{Rc, Weak},
};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{Error, RegistryError, Result};

// === Registry === //

/// A keyed store in which every key may be registered at most once unless registration is
/// forced.
#[derive(Clone)]
pub struct Registry<K, V> {
    memory: FxHashMap<K, V>,
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Registry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.memory.iter()).finish()
    }
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            memory: FxHashMap::default(),
        }
    }
}

impl<K: Hash + Eq + fmt::Debug, V> FromIterator<(K, V)> for Registry<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            memory: iter.into_iter().collect(),
        }
    }
}

impl<K: Hash + Eq + fmt::Debug, V> Registry<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under `key`. Fails with [`RegistryError::AlreadyRegistered`] if the key
    /// is taken, unless `force` is set, in which case the previous value is replaced.
    pub fn register(&mut self, key: K, value: V, force: bool) -> Result<&mut Self, RegistryError> {
        if !force && self.memory.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered {
                key: format!("{key:?}"),
            });
        }

        self.memory.insert(key, value);
        Ok(self)
    }

    /// Registers `value` unless `key` is taken. Returns whether the value was stored.
    pub fn try_register(&mut self, key: K, value: V) -> bool {
        self.register(key, value, false).is_ok()
    }

    pub fn unregister(&mut self, key: &K) -> Result<V, RegistryError> {
        self.memory
            .remove(key)
            .ok_or_else(|| RegistryError::NotRegistered {
                key: format!("{key:?}"),
            })
    }

    pub fn try_unregister(&mut self, key: &K) -> Option<V> {
        self.memory.remove(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.memory.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.memory.get_mut(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.memory.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.memory.iter()
    }

    pub fn clear(&mut self) -> &mut Self {
        self.memory.clear();
        self
    }

    /// Registers every pair without forcing, stopping at the first duplicate. Pairs before the
    /// duplicate stay registered.
    pub fn update(
        &mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<&mut Self, RegistryError> {
        for (key, value) in pairs {
            self.register(key, value, false)?;
        }

        Ok(self)
    }
}

// === SingletonRegistry === //

/// How a [`SingletonRegistry`] holds on to the values it constructs.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum Retention {
    Strong,
    /// Values are dropped as soon as every [`Rc`] handed out for them is gone.
    Weak,
}

enum Memorized {
    Strong(Rc<dyn Any>),
    Weak(Weak<dyn Any>),
}

impl Memorized {
    fn upgrade(&self) -> Option<Rc<dyn Any>> {
        match self {
            Memorized::Strong(value) => Some(value.clone()),
            Memorized::Weak(value) => value.upgrade(),
        }
    }
}

impl fmt::Debug for Memorized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Memorized::Strong(_) => f.write_str("Strong"),
            Memorized::Weak(value) if value.strong_count() > 0 => f.write_str("Weak"),
            Memorized::Weak(_) => f.write_str("Weak(<dead>)"),
        }
    }
}

/// A world-free singleton store keyed by type: at most one value per type, created through a
/// factory closure.
///
/// ```
/// use sole::SingletonRegistry;
///
/// #[derive(Debug)]
/// struct Pool(u32);
///
/// let mut registry = SingletonRegistry::new();
/// let pool = registry.construct(|| Pool(4)).unwrap();
///
/// assert_eq!(registry.get::<Pool>().unwrap().0, 4);
/// assert!(registry.construct(|| Pool(8)).is_err());
///
/// registry.reinit(|| Pool(8));
/// assert_eq!(registry.get::<Pool>().unwrap().0, 8);
/// assert_eq!(pool.0, 4);
/// ```
#[derive(Debug)]
pub struct SingletonRegistry {
    memory: Registry<TypeId, Memorized>,
    retention: Retention,
}

impl Default for SingletonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self::with_retention(Retention::Strong)
    }

    pub fn new_weak() -> Self {
        Self::with_retention(Retention::Weak)
    }

    pub fn with_retention(retention: Retention) -> Self {
        Self {
            memory: Registry::new(),
            retention,
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Builds and registers the value for `T`. Fails with [`Error::ImplicitReinit`] if a live
    /// value is already registered. The factory is not run in that case.
    pub fn construct<T: 'static>(&mut self, f: impl FnOnce() -> T) -> Result<Rc<T>> {
        if self.contains::<T>() {
            return Err(Error::ImplicitReinit {
                class: type_name::<T>(),
            });
        }

        Ok(self.store(f()))
    }

    /// Builds and registers the value for `T`, replacing any previous one.
    pub fn reinit<T: 'static>(&mut self, f: impl FnOnce() -> T) -> Rc<T> {
        self.store(f())
    }

    pub fn get<T: 'static>(&mut self) -> Result<Rc<T>> {
        let class = type_name::<T>();

        let Some(memorized) = self.memory.get(&TypeId::of::<T>()) else {
            return Err(Error::GetInstance {
                class,
                source: RegistryError::NotRegistered {
                    key: class.to_string(),
                },
            });
        };

        let Some(value) = memorized.upgrade() else {
            self.memory.try_unregister(&TypeId::of::<T>());
            debug!(target: "sole::registry", class, "forgot reclaimed instance");

            return Err(Error::GetInvalidatedInstance { class });
        };

        Ok(downcast::<T>(value))
    }

    /// Whether a live value is registered for `T`.
    pub fn contains<T: 'static>(&self) -> bool {
        self.memory
            .get(&TypeId::of::<T>())
            .is_some_and(|memorized| memorized.upgrade().is_some())
    }

    /// Drops the registry's record of `T`, returning the value if it was still alive.
    pub fn unregister<T: 'static>(&mut self) -> Option<Rc<T>> {
        let value = self.memory.try_unregister(&TypeId::of::<T>())?.upgrade()?;
        debug!(target: "sole::registry", class = type_name::<T>(), "unregistered");

        Some(downcast::<T>(value))
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn clear(&mut self) {
        self.memory.clear();
    }

    fn store<T: 'static>(&mut self, value: T) -> Rc<T> {
        let value = Rc::new(value);
        let erased: Rc<dyn Any> = value.clone();

        let memorized = match self.retention {
            Retention::Strong => Memorized::Strong(erased),
            Retention::Weak => Memorized::Weak(Rc::downgrade(&erased)),
        };

        let replaced = self.memory.contains(&TypeId::of::<T>());

        // Forced registration never fails.
        _ = self.memory.register(TypeId::of::<T>(), memorized, true);

        debug!(
            target: "sole::registry",
            class = type_name::<T>(),
            retention = ?self.retention,
            replaced,
            "registered",
        );

        value
    }
}

fn downcast<T: 'static>(value: Rc<dyn Any>) -> Rc<T> {
    match value.downcast::<T>() {
        Ok(value) => value,
        Err(_) => unreachable!("registry entry stored under the wrong type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rejects_duplicates_unless_forced() {
        let mut registry = Registry::new();
        registry.register("a", 1, false).unwrap();

        assert_eq!(
            registry.register("a", 2, false).unwrap_err(),
            RegistryError::AlreadyRegistered {
                key: "\"a\"".to_string()
            },
        );
        assert_eq!(registry.get(&"a"), Some(&1));

        registry.register("a", 2, true).unwrap();
        assert_eq!(registry.get(&"a"), Some(&2));
        assert!(!registry.try_register("a", 3));
        assert!(registry.try_register("b", 3));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister_removes_the_entry() {
        let mut registry = Registry::new();
        registry.register(1u32, "one", false).unwrap();

        assert_eq!(registry.unregister(&1), Ok("one"));
        assert!(!registry.contains(&1));
        assert_eq!(
            registry.unregister(&1),
            Err(RegistryError::NotRegistered {
                key: "1".to_string()
            }),
        );
        assert_eq!(registry.try_unregister(&1), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn update_stops_at_first_duplicate() {
        let mut registry = Registry::new();
        registry.register(2, 'x', false).unwrap();

        let err = registry.update([(1, 'a'), (2, 'b'), (3, 'c')]).unwrap_err();

        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
        assert_eq!(registry.get(&1), Some(&'a'));
        assert_eq!(registry.get(&2), Some(&'x'));
        assert!(!registry.contains(&3));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn collected_registries_can_be_edited_in_place() {
        let mut registry = [("width", 4), ("height", 3)].into_iter().collect::<Registry<_, _>>();

        *registry.get_mut(&"width").unwrap() *= 2;

        let mut entries = registry.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>();
        entries.sort();

        assert_eq!(entries, [("height", 3), ("width", 8)]);
    }

    #[derive(Debug, PartialEq)]
    struct Pool(u32);

    #[test]
    fn singleton_registry_construct_and_get() {
        let mut registry = SingletonRegistry::new();

        let err = registry.get::<Pool>().unwrap_err();
        assert!(matches!(
            err,
            Error::GetInstance {
                source: RegistryError::NotRegistered { .. },
                ..
            }
        ));

        let pool = registry.construct(|| Pool(1)).unwrap();
        assert!(Rc::ptr_eq(&pool, &registry.get::<Pool>().unwrap()));

        let mut ran = false;
        let err = registry
            .construct(|| {
                ran = true;
                Pool(2)
            })
            .unwrap_err();

        assert!(!ran);
        assert!(matches!(err, Error::ImplicitReinit { .. }));

        let replaced = registry.reinit(|| Pool(3));
        assert_eq!(*registry.get::<Pool>().unwrap(), Pool(3));
        assert!(!Rc::ptr_eq(&pool, &replaced));
    }

    #[test]
    fn weak_singleton_registry_forgets_dropped_values() {
        let mut registry = SingletonRegistry::new_weak();

        let pool = registry.construct(|| Pool(1)).unwrap();
        assert!(registry.contains::<Pool>());
        assert_eq!(registry.get::<Pool>().unwrap().0, 1);

        drop(pool);
        assert!(!registry.contains::<Pool>());

        let err = registry.get::<Pool>().unwrap_err();
        assert!(matches!(err, Error::GetInvalidatedInstance { .. }));
        assert!(err.is_get_instance());
        assert!(registry.is_empty());

        // A dead entry does not block construction.
        let pool = registry.construct(|| Pool(2)).unwrap();
        assert_eq!(pool.0, 2);
    }
}
