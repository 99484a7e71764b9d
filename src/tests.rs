use std::cell::Cell;

use crate::{
    BoxError, Error, ErrorCategory, Handle as _, Policy, Singleton, Strength, UnregisterError,
    World, singleton,
};

// === Fixtures === //

#[derive(Debug)]
struct Base;

#[derive(Debug)]
struct Config {
    verbose: bool,
}

#[derive(Debug)]
struct Counter {
    start: u32,
}

#[derive(Debug)]
struct Session {
    user: String,
}

#[derive(Debug)]
struct Tracked {
    base_runs: u32,
    init_runs: u32,
}

#[derive(Debug)]
struct Fragile {
    fail: bool,
}

#[derive(Debug)]
struct Doomed;

#[derive(Debug)]
struct Lenient {
    value: u32,
}

#[derive(Debug)]
struct Theme {
    palette: Palette,
}

#[derive(Debug, Clone, PartialEq)]
struct Palette {
    accent: String,
}

#[derive(Debug)]
struct Lazy {
    base_runs: u32,
}

#[derive(Debug)]
struct Usurper {
    first: bool,
}

#[derive(Debug)]
struct Flaky {
    fail: bool,
}

singleton!(
    Base, Config, Counter, Session, Tracked, Fragile, Doomed, Lenient, Theme, Lazy, Usurper,
    Flaky,
);

impl Singleton for Base {
    type Handle = BaseHandle;
    type Args = ();

    const POLICY: Policy = Policy::EXPLICIT_REINIT.abstract_();

    fn create((): ()) -> Result<Self, BoxError> {
        Ok(Base)
    }
}

impl Singleton for Config {
    type Handle = ConfigHandle;
    type Args = bool;

    fn create(verbose: bool) -> Result<Self, BoxError> {
        Ok(Config { verbose })
    }
}

impl Singleton for Counter {
    type Handle = CounterHandle;
    type Args = u32;

    const POLICY: Policy = Policy::SIMPLE;

    fn create(start: u32) -> Result<Self, BoxError> {
        Ok(Counter { start })
    }
}

impl Singleton for Session {
    type Handle = SessionHandle;
    type Args = &'static str;

    const POLICY: Policy = Policy::EXPLICIT_REINIT.weak();

    fn create(user: &'static str) -> Result<Self, BoxError> {
        Ok(Session {
            user: user.to_string(),
        })
    }
}

impl Singleton for Tracked {
    type Handle = TrackedHandle;
    type Args = ();

    const POLICY: Policy = Policy::ENSURE_INIT;

    fn create((): ()) -> Result<Self, BoxError> {
        Ok(Tracked {
            base_runs: 0,
            init_runs: 0,
        })
    }

    fn base_init(me: TrackedHandle, w: &mut World) -> Result<(), BoxError> {
        me.m(w).base_runs += 1;
        Ok(())
    }

    fn init(me: TrackedHandle, w: &mut World) -> Result<(), BoxError> {
        // Already initialized, so this is a no-op.
        me.ensure_base_init(w)?;

        // The instance is current while its constructor body runs.
        assert_eq!(*Self::get_instance(w)?, me);

        me.m(w).init_runs += 1;
        Ok(())
    }
}

thread_local! {
    static FRAGILE_UNREGISTERS: Cell<u32> = const { Cell::new(0) };
}

impl Singleton for Fragile {
    type Handle = FragileHandle;
    type Args = bool;

    const POLICY: Policy = Policy::ENSURE_INIT;

    fn create(fail: bool) -> Result<Self, BoxError> {
        Ok(Fragile { fail })
    }

    fn init(me: FragileHandle, w: &mut World) -> Result<(), BoxError> {
        if me.r(w).fail {
            return Err("fragile init failed".into());
        }

        Ok(())
    }

    fn on_unregister(_me: FragileHandle, _w: &mut World) -> Result<(), BoxError> {
        FRAGILE_UNREGISTERS.set(FRAGILE_UNREGISTERS.get() + 1);
        Ok(())
    }
}

impl Singleton for Doomed {
    type Handle = DoomedHandle;
    type Args = ();

    const POLICY: Policy = Policy::ENSURE_INIT;

    fn create((): ()) -> Result<Self, BoxError> {
        Ok(Doomed)
    }

    fn init(_me: DoomedHandle, _w: &mut World) -> Result<(), BoxError> {
        Err("doomed init failed".into())
    }

    fn on_unregister(_me: DoomedHandle, _w: &mut World) -> Result<(), BoxError> {
        Err("doomed unregister failed".into())
    }
}

impl Singleton for Lenient {
    type Handle = LenientHandle;
    type Args = u32;

    fn create(value: u32) -> Result<Self, BoxError> {
        Ok(Lenient { value })
    }
}

impl Singleton for Theme {
    type Handle = ThemeHandle;
    type Args = &'static str;

    const POLICY: Policy = Policy::EXPLICIT_REINIT.weak();

    fn create(accent: &'static str) -> Result<Self, BoxError> {
        Ok(Theme {
            palette: Palette {
                accent: accent.to_string(),
            },
        })
    }
}

impl Singleton for Lazy {
    type Handle = LazyHandle;
    type Args = ();

    const POLICY: Policy = Policy::ENSURE_INIT;

    fn create((): ()) -> Result<Self, BoxError> {
        Ok(Lazy { base_runs: 0 })
    }

    fn base_init(me: LazyHandle, w: &mut World) -> Result<(), BoxError> {
        me.m(w).base_runs += 1;
        Ok(())
    }
}

impl Singleton for Usurper {
    type Handle = UsurperHandle;
    type Args = bool;

    const POLICY: Policy = Policy::ENSURE_INIT;

    fn create(first: bool) -> Result<Self, BoxError> {
        Ok(Usurper { first })
    }

    fn init(me: UsurperHandle, w: &mut World) -> Result<(), BoxError> {
        if !me.r(w).first {
            return Ok(());
        }

        // Replaces itself, then fails, so the rollback finds someone else in the slot.
        Self::reinit(false, w)?;
        Err("usurper init failed".into())
    }
}

impl Singleton for Flaky {
    type Handle = FlakyHandle;
    type Args = bool;

    const POLICY: Policy = Policy::ENSURE_INIT.weak();

    fn create(fail: bool) -> Result<Self, BoxError> {
        Ok(Flaky { fail })
    }

    fn init(me: FlakyHandle, w: &mut World) -> Result<(), BoxError> {
        // The caller's strong reference already exists, so reclamation cannot reach us.
        w.flush();

        if !me.is_instance_valid(w) {
            return Err("reclaimed during construction".into());
        }

        if me.r(w).fail {
            return Err("flaky init failed".into());
        }

        Ok(())
    }
}

// === Creation === //

#[test]
fn abstract_types_cannot_be_instantiated() {
    let w = &mut World::new();

    let err = Base::construct((), w).unwrap_err();
    assert!(matches!(err, Error::AbstractInit { .. }));
    assert_eq!(err.category(), ErrorCategory::Usage);

    assert!(matches!(
        Base::reinit((), w),
        Err(Error::AbstractInit { .. })
    ));
    assert!(!Base::instance_exists(w));
}

#[test]
fn forbid_implicit_reinit_then_reinit() {
    let w = &mut World::new();

    let c1 = Config::construct(false, w).unwrap();

    let err = Config::construct(true, w).unwrap_err();
    assert!(matches!(err, Error::ImplicitReinit { .. }));
    assert!(err.class().ends_with("Config"));

    // The failed construction left the current instance alone.
    assert!(c1.is_instance_valid(w));
    assert!(!c1.r(w).verbose);

    let c2 = Config::reinit(true, w).unwrap();

    assert!(!c1.is_instance_valid(w));
    assert!(c2.is_instance_valid(w));
    assert_ne!(c1, c2);
    assert!(c2.r(w).verbose);

    assert!(matches!(
        Config::construct(false, w),
        Err(Error::ImplicitReinit { .. })
    ));

    let err = c1.try_r(w).unwrap_err();
    assert!(matches!(err, Error::Invalidation { .. }));
    assert_eq!(err.category(), ErrorCategory::Invalidation);

    // Retired instances stay retired.
    Config::reinit(false, w).unwrap();
    assert!(!c1.is_instance_valid(w));
    assert!(!c2.is_instance_valid(w));
}

#[test]
fn creation_on_first_use_ignores_later_arguments() {
    let w = &mut World::new();

    let first = Counter::construct(1, w).unwrap();
    let second = Counter::construct(2, w).unwrap();

    assert_eq!(first, second);
    assert_eq!(second.r(w).start, 1);

    assert!(matches!(
        Counter::reinit(3, w),
        Err(Error::ReinitUnsupported { .. })
    ));
    assert!(matches!(
        Counter::invalidate(false, w),
        Err(Error::ReinitUnsupported { .. })
    ));
    assert!(first.is_instance_valid(w));
}

#[test]
fn get_instance_is_idempotent() {
    let w = &mut World::new();

    assert!(matches!(
        Config::get_instance(w),
        Err(Error::NoInstance { .. })
    ));
    assert!(Config::maybe_get_instance(w).is_none());

    let config = Config::construct(false, w).unwrap();

    let a = Config::get_instance(w).unwrap();
    let b = Config::get_instance(w).unwrap();

    assert_eq!(a, b);
    assert_eq!(a, config);
    assert!(Config::instance_exists(w));
}

#[test]
fn invalidate_retires_every_handle() {
    let w = &mut World::new();

    let config = Config::construct(false, w).unwrap();
    let weak = config.as_weak();

    Config::invalidate(false, w).unwrap();

    assert!(!config.is_instance_valid(w));
    assert!(weak.try_m(w).is_err());
    assert!(!Config::instance_exists(w));
    assert!(Config::maybe_get_instance(w).is_none());

    // The strong reference keeps the retired instance alive, but not current.
    assert!(config.is_alive(w));

    // Invalidating an unbound type is fine, and `raise` reports it afterwards.
    assert!(matches!(
        Config::invalidate(true, w),
        Err(Error::Invalidation { .. })
    ));

    let fresh = Config::construct(true, w).unwrap();
    assert_ne!(fresh, config);
}

#[test]
fn retired_instances_are_reclaimed_after_flush() {
    let w = &mut World::new();

    let config = Config::construct(false, w).unwrap();
    Config::reinit(true, w).unwrap();

    assert_eq!(w.live_instances::<Config>(), 2);

    let retired = config.as_weak();
    drop(config);
    w.flush();

    assert_eq!(w.live_instances::<Config>(), 1);
    assert!(!retired.is_alive(w));
    assert!(retired.try_r(w).is_err());
}

// === Weak storage === //

#[test]
fn weak_storage_unbinds_after_last_owner_drops() {
    let w = &mut World::new();

    let session = Session::construct("ada", w).unwrap();
    let first = session.as_weak();

    assert!(matches!(
        Session::construct("bob", w),
        Err(Error::ImplicitReinit { .. })
    ));

    drop(session);

    // Reclamation is observed lazily.
    assert!(Session::instance_exists(w));
    w.flush();
    assert!(!Session::instance_exists(w));
    assert!(!first.is_instance_valid(w));

    let session = Session::construct("bob", w).unwrap();

    assert_ne!(session.as_weak(), first);
    assert_eq!(session.r(w).user, "bob");
}

#[test]
fn weak_storage_survives_while_a_strong_reference_exists() {
    let w = &mut World::new();

    let session = Session::construct("ada", w).unwrap();
    let other = Session::get_instance(w).unwrap();

    drop(session);
    w.flush();

    assert!(other.is_instance_valid(w));
    assert_eq!(other.r(w).user, "ada");

    drop(other);
    w.flush();
    assert!(Session::maybe_get_instance(w).is_none());
}

// === Field references === //

#[test]
fn field_refs_follow_their_source() {
    let w = &mut World::new();

    let config = Config::construct(true, w).unwrap();
    let verbose = config.r(w).verbose;
    let field = config.wrap_value(verbose, w).unwrap();

    assert_eq!(field.strength(), Strength::Strong);
    assert_eq!(field.source(), config.as_weak());
    assert!(*field.get(w).unwrap());

    Config::reinit(false, w).unwrap();

    let err = field.get(w).unwrap_err();
    assert!(matches!(err, Error::Invalidation { class } if class.ends_with("Config")));

    // Wrapping a retired instance fails too.
    assert!(config.as_weak().wrap_value(1u32, w).is_err());
    assert!(config.as_weak().wrap_value_weak(1u32, w).is_err());
}

#[test]
fn field_refs_forward_into_nested_values() {
    let w = &mut World::new();

    let theme = Theme::construct("teal", w).unwrap();
    let palette = theme.r(w).palette.clone();

    let palette = theme.wrap_value(palette, w).unwrap();
    let accent = palette.map(|palette| palette.accent.clone(), w).unwrap();
    let weak_accent = accent.forward_weak(accent.get(w).unwrap().len(), w).unwrap();
    let strong_again = weak_accent.forward_strong("forwarded", w).unwrap();

    assert_eq!(accent.strength(), Strength::Strong);
    assert_eq!(weak_accent.strength(), Strength::Weak);
    assert_eq!(strong_again.strength(), Strength::Strong);

    assert_eq!(accent.get(w).unwrap(), "teal");
    assert_eq!(*weak_accent.get(w).unwrap(), 4);
    assert_eq!(*strong_again.get(w).unwrap(), "forwarded");

    Theme::invalidate(false, w).unwrap();

    assert!(palette.get(w).is_err());
    assert!(accent.get(w).is_err());
    assert!(weak_accent.get(w).is_err());
    assert!(strong_again.get(w).is_err());
    assert!(accent.forward(0u8, w).is_err());
}

#[test]
fn strong_field_refs_keep_weakly_stored_sources_alive() {
    let w = &mut World::new();

    let theme = Theme::construct("teal", w).unwrap();
    let field = theme.wrap_value(7u32, w).unwrap();

    drop(theme);
    w.flush();

    assert!(Theme::instance_exists(w));
    assert_eq!(*field.get(w).unwrap(), 7);

    drop(field);
    w.flush();

    assert!(!Theme::instance_exists(w));
}

#[test]
fn weak_field_refs_never_extend_lifetime() {
    let w = &mut World::new();

    let theme = Theme::construct("teal", w).unwrap();
    let field = theme.wrap_value_weak(7u32, w).unwrap();

    assert_eq!(field.strength(), Strength::Weak);
    assert_eq!(*field.get(w).unwrap(), 7);

    drop(theme);
    w.flush();

    assert!(!Theme::instance_exists(w));
    assert!(matches!(
        field.get(w),
        Err(Error::Invalidation { class }) if class.ends_with("Theme")
    ));
    assert!(field.forward_strong(8u32, w).is_err());
}

#[test]
fn field_refs_ignore_suppression() {
    let w = &mut World::new();
    w.suppress_invalidation_errors::<Lenient>().unwrap();

    let lenient = Lenient::construct(1, w).unwrap();
    let field = lenient.wrap_value(1u32, w).unwrap();

    Lenient::reinit(2, w).unwrap();

    assert!(lenient.try_r(w).is_ok());
    assert!(field.get(w).is_err());
}

// === Ensure-init === //

#[test]
fn base_init_runs_exactly_once() {
    let w = &mut World::new();

    let tracked = Tracked::construct((), w).unwrap();

    assert_eq!(tracked.r(w).base_runs, 1);
    assert_eq!(tracked.r(w).init_runs, 1);

    tracked.ensure_base_init(w).unwrap();
    assert_eq!(tracked.r(w).base_runs, 1);

    let fresh = Tracked::reinit((), w).unwrap();
    assert_eq!(fresh.r(w).base_runs, 1);
}

#[test]
fn failed_init_rolls_the_slot_back() {
    let w = &mut World::new();
    FRAGILE_UNREGISTERS.set(0);

    let err = Fragile::construct(true, w).unwrap_err();

    assert!(matches!(err, Error::Init { .. }));
    assert_eq!(err.category(), ErrorCategory::Init);
    assert!(!Fragile::instance_exists(w));
    assert!(matches!(
        Fragile::get_instance(w),
        Err(Error::NoInstance { .. })
    ));
    assert_eq!(FRAGILE_UNREGISTERS.get(), 1);

    // Nothing owns the rolled back instance anymore.
    w.flush();
    assert_eq!(w.live_instances::<Fragile>(), 0);

    let fragile = Fragile::construct(false, w).unwrap();
    assert!(fragile.is_instance_valid(w));
}

#[test]
fn failed_rollback_is_critical() {
    let w = &mut World::new();

    let err = Doomed::construct((), w).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Fatal);

    let err = match err {
        Error::CriticalUnregister(err) => err,
        other => panic!("expected a critical unregister error, got {other:?}"),
    };

    assert!(matches!(*err.original, Error::Init { .. }));
    assert!(matches!(err.rollback, UnregisterError::Hook { .. }));
}

#[test]
fn disabled_ensure_init_keeps_failed_instances() {
    let w = &mut World::new();

    w.disable_ensure_init::<Fragile>().unwrap();
    assert!(!Fragile::policy(w).ensure_init);

    assert!(matches!(
        w.disable_ensure_init::<Fragile>(),
        Err(Error::PolicyMismatch { .. })
    ));

    let err = Fragile::construct(true, w).unwrap_err();

    assert!(matches!(err, Error::Init { .. }));
    assert!(Fragile::instance_exists(w));
}

// === Opt-outs === //

#[test]
fn opt_outs_lock_on_first_instantiation() {
    let w = &mut World::new();

    Tracked::construct((), w).unwrap();

    assert!(matches!(
        w.disable_ensure_init::<Tracked>(),
        Err(Error::PolicyLocked { .. })
    ));
    assert!(matches!(
        w.suppress_invalidation_errors::<Tracked>(),
        Err(Error::PolicyLocked { .. })
    ));
    assert!(Tracked::policy(w).ensure_init);
}

#[test]
fn opt_outs_check_the_policy() {
    let w = &mut World::new();

    assert!(matches!(
        w.disable_ensure_init::<Config>(),
        Err(Error::PolicyMismatch { .. })
    ));
    assert!(matches!(
        w.suppress_invalidation_errors::<Counter>(),
        Err(Error::PolicyMismatch { .. })
    ));
}

#[test]
fn suppression_allows_access_to_live_retired_instances() {
    let w = &mut World::new();
    w.suppress_invalidation_errors::<Lenient>().unwrap();

    let old = Lenient::construct(1, w).unwrap();
    let new = Lenient::reinit(2, w).unwrap();

    assert_eq!(old.r(w).value, 1);
    assert_eq!(new.r(w).value, 2);

    // The probe is never suppressed.
    assert!(!old.is_instance_valid(w));

    let retired = old.as_weak();
    drop(old);
    w.flush();

    // Reclaimed instances cannot be reached even with suppression.
    assert!(retired.try_r(w).is_err());
}

// === Formatting === //

#[test]
fn debug_reports_retired_instances() {
    let w = &mut World::new();

    let config = Config::construct(true, w).unwrap();
    let current = format!("{:?}", w.debug(config.as_weak()));
    assert!(current.contains("verbose: true"), "{current}");

    Config::reinit(false, w).unwrap();

    let retired = format!("{:?}", w.debug(config.as_weak()));
    assert!(retired.ends_with("<retired>"), "{retired}");
}

// === Worlds === //

#[test]
fn handles_do_not_cross_worlds() {
    let a = &mut World::new();
    let b = &mut World::new();

    assert_ne!(a.id(), b.id());

    let in_a = Config::construct(false, a).unwrap();
    let in_b = Config::construct(true, b).unwrap();

    // Same slot and generation in both worlds, yet distinct identities.
    assert_eq!(in_a.raw().slot(), in_b.raw().slot());
    assert_eq!(in_a.raw().owner(), a.id());
    assert_ne!(in_a, in_b);

    assert!(!in_a.is_instance_valid(b));
    assert!(!in_a.is_alive(b));
    assert!(matches!(in_a.try_r(b), Err(Error::Invalidation { .. })));
    assert!(in_a.try_m(b).is_err());
    assert!(in_a.as_strong_if_alive(b).is_none());
    assert!(in_a.as_weak().wrap_value_weak(0u8, b).is_err());

    let field = in_a.wrap_value(1u8, a).unwrap();
    assert!(field.get(b).is_err());
    assert_eq!(*field.get(a).unwrap(), 1);

    assert!(!in_a.r(a).verbose);
    assert!(in_b.r(b).verbose);
}

// === Rollback edge cases === //

#[test]
fn ensure_base_init_refuses_retired_instances() {
    let w = &mut World::new();
    w.disable_ensure_init::<Lazy>().unwrap();

    let old = Lazy::construct((), w).unwrap();
    let new = Lazy::reinit((), w).unwrap();

    assert!(matches!(
        old.ensure_base_init(w),
        Err(Error::Invalidation { .. })
    ));

    let old_state = w.class::<Lazy>().unwrap().get(old.raw()).unwrap();
    assert_eq!(old_state.base_runs, 0);

    new.ensure_base_init(w).unwrap();
    new.ensure_base_init(w).unwrap();
    assert_eq!(new.r(w).base_runs, 1);
}

#[test]
fn rollback_of_a_replaced_instance_is_critical() {
    let w = &mut World::new();

    let err = Usurper::construct(true, w).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Fatal);

    let err = match err {
        Error::CriticalUnregister(err) => err,
        other => panic!("expected a critical unregister error, got {other:?}"),
    };

    assert!(matches!(*err.original, Error::Init { .. }));
    assert!(matches!(err.rollback, UnregisterError::SlotMismatch { .. }));

    // The replacement installed by the failed body is left in place.
    let current = Usurper::get_instance(w).unwrap();
    assert!(!current.r(w).first);
}

#[test]
fn weak_storage_rollback_leaves_the_slot_unbound() {
    let w = &mut World::new();

    let err = Flaky::construct(true, w).unwrap_err();
    let Error::Init { source, .. } = &err else {
        panic!("expected an init error, got {err:?}");
    };
    assert_eq!(source.to_string(), "flaky init failed");

    assert!(!Flaky::instance_exists(w));
    w.flush();
    assert_eq!(w.live_instances::<Flaky>(), 0);

    let flaky = Flaky::construct(false, w).unwrap();
    assert!(flaky.is_instance_valid(w));

    drop(flaky);
    w.flush();

    assert!(Flaky::maybe_get_instance(w).is_none());
    assert_eq!(w.live_instances::<Flaky>(), 0);
}
