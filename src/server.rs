// ============================================================================
// ember-cells - Server Resources
// A caching, TTL-aware wrapper in front of a resource's fetch function
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::ops::Deref;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::primitives::resource::{Resource, resource};

/// A string-keyed cache with optional per-entry TTL.
pub trait CacheStore<T> {
    fn get(&self, key: &str) -> Option<T>;
    fn set(&self, key: &str, value: T, ttl: Option<Duration>);
}

struct CacheEntry<T> {
    value: T,
    expires_at: Option<Instant>,
}

/// In-memory cache, the default store.
pub struct MemoryCache<T> {
    entries: RefCell<HashMap<String, CacheEntry<T>>>,
}

impl<T> MemoryCache<T> {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
        }
    }
}

impl<T> Default for MemoryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> CacheStore<T> for MemoryCache<T> {
    fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.borrow_mut();
        match entries.get(key) {
            Some(entry) => {
                if entry.expires_at.is_some_and(|at| Instant::now() > at) {
                    entries.remove(key);
                    None
                } else {
                    Some(entry.value.clone())
                }
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: T, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .borrow_mut()
            .insert(key.to_string(), CacheEntry { value, expires_at });
    }
}

/// Options for [`server_resource`].
pub struct ServerResourceOptions<T> {
    /// Cache store to consult; defaults to a fresh [`MemoryCache`].
    pub cache: Option<Rc<dyn CacheStore<T>>>,
    /// Lifetime of cached entries; `None` caches forever.
    pub ttl: Option<Duration>,
}

impl<T> Default for ServerResourceOptions<T> {
    fn default() -> Self {
        Self {
            cache: None,
            ttl: None,
        }
    }
}

/// A resource whose fetches go through a keyed cache first.
pub struct ServerResource<T> {
    resource: Resource<T>,
    cached: Rc<Cell<bool>>,
}

impl<T> ServerResource<T> {
    /// Whether the most recent fetch was served from the cache.
    pub fn cached(&self) -> bool {
        self.cached.get()
    }
}

impl<T> Deref for ServerResource<T> {
    type Target = Resource<T>;

    fn deref(&self) -> &Resource<T> {
        &self.resource
    }
}

/// Create a resource whose fetch function sits behind a string-keyed cache
/// with optional TTL. Cache hits skip the underlying fetch entirely; misses
/// fetch and write back.
pub fn server_resource<T, E, Fut, F>(
    key: &str,
    fetch: F,
    options: ServerResourceOptions<T>,
) -> ServerResource<T>
where
    T: Clone + Debug + 'static,
    E: std::fmt::Display + 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
    F: Fn() -> Fut + 'static,
{
    let cache: Rc<dyn CacheStore<T>> = options
        .cache
        .unwrap_or_else(|| Rc::new(MemoryCache::new()));
    let ttl = options.ttl;
    let key = key.to_string();
    let cached = Rc::new(Cell::new(false));
    let fetch = Rc::new(fetch);

    let resource = resource({
        let cached = cached.clone();
        move || {
            let cache = cache.clone();
            let key = key.clone();
            let cached = cached.clone();
            let fetch = fetch.clone();
            async move {
                if let Some(hit) = cache.get(&key) {
                    cached.set(true);
                    return Ok::<_, String>(hit);
                }
                let value = fetch().await.map_err(|err| err.to_string())?;
                cache.set(&key, value.clone(), ttl);
                cached.set(false);
                Ok(value)
            }
        }
    });

    ServerResource { resource, cached }
}
