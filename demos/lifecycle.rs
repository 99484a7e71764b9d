use sole::{BoxError, Handle, Policy, Singleton, W, World, singleton};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "sole=debug".into()))
        .init();

    let mut w = World::new();
    let w = &mut w;

    // Example 1: explicit reinitialization retires outstanding handles.
    let config = Config::construct("config.toml", w).unwrap();
    let path = config.wrap_value(config.r(w).path.clone(), w).unwrap();
    dbg!(config.debug(w));

    let err = Config::construct("other.toml", w).unwrap_err();
    println!("second construction: {err}");

    let reloaded = Config::reinit("reloaded.toml", w).unwrap();
    dbg!(config.debug(w), reloaded.debug(w));

    println!("old handle valid: {}", config.is_instance_valid(w));
    println!("old field ref: {:?}", path.get(w).map_err(|err| err.to_string()));

    drop(config);
    drop(path);
    w.flush();

    // Example 2: weakly-stored singletons go away with their last owner.
    let cache = Cache::construct(16, w).unwrap();
    cache.warm(w);
    dbg!(cache.debug(w));

    drop(cache);
    w.flush();

    println!("cache exists after flush: {}", Cache::instance_exists(w));
}

#[derive(Debug)]
pub struct Config {
    path: String,
}

singleton!(pub Config);

impl Singleton for Config {
    type Handle = ConfigHandle;
    type Args = &'static str;

    fn create(path: &'static str) -> Result<Self, BoxError> {
        Ok(Config {
            path: path.to_string(),
        })
    }
}

#[derive(Debug)]
pub struct Cache {
    capacity: usize,
    entries: Vec<u32>,
}

singleton!(pub Cache);

impl Singleton for Cache {
    type Handle = CacheHandle;
    type Args = usize;

    const POLICY: Policy = Policy::ENSURE_INIT.weak();

    fn create(capacity: usize) -> Result<Self, BoxError> {
        Ok(Cache {
            capacity,
            entries: Vec::with_capacity(capacity),
        })
    }

    fn init(me: CacheHandle, w: W) -> Result<(), BoxError> {
        if me.r(w).capacity == 0 {
            return Err("cache capacity must be positive".into());
        }

        Ok(())
    }
}

impl CacheHandle {
    pub fn warm(self, w: W) {
        let capacity = self.r(w).capacity as u32;
        self.m(w).entries.extend(0..capacity.min(4));
    }
}
