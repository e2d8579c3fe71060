// ============================================================================
// ember-cells - Async Helpers
// Resources built from futures, polling loops, and keyed caches
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::primitives::resource::{Resource, resource};

/// Wrap an existing future in a resource.
///
/// The future runs once; its resolution is memoized, and later refreshes
/// re-deliver the memoized value instead of re-running anything.
pub fn from_future<T, E, Fut>(future: Fut) -> Resource<T>
where
    T: Clone + Debug + 'static,
    E: std::fmt::Display + 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
{
    let pending: Rc<RefCell<Option<Pin<Box<Fut>>>>> =
        Rc::new(RefCell::new(Some(Box::pin(future))));
    let memo: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));

    resource(move || {
        let pending = pending.clone();
        let memo = memo.clone();
        async move {
            let resolved = memo.borrow().clone();
            if let Some(value) = resolved {
                return Ok(value);
            }
            let future = pending.borrow_mut().take();
            match future {
                Some(future) => {
                    let value = future.await.map_err(|err| err.to_string())?;
                    *memo.borrow_mut() = Some(value.clone());
                    Ok(value)
                }
                // The one-shot future failed earlier; there is nothing left
                // to run.
                None => Err(String::from("future already consumed")),
            }
        }
    })
}

/// A resource kept fresh by a background polling task.
pub struct PollingResource<T> {
    resource: Resource<T>,
    driver: JoinHandle<()>,
}

impl<T> PollingResource<T> {
    /// Stop polling. The resource itself stays usable; explicit refreshes
    /// still work.
    pub fn stop(&self) {
        self.driver.abort();
    }
}

impl<T> Deref for PollingResource<T> {
    type Target = Resource<T>;

    fn deref(&self) -> &Resource<T> {
        &self.resource
    }
}

/// Create a resource that re-fetches on a fixed interval, in addition to the
/// construction-time fetch. Must be called within a tokio `LocalSet`.
pub fn poll<T, E, Fut, F>(fetch: F, every: Duration) -> PollingResource<T>
where
    T: Clone + Debug + 'static,
    E: std::fmt::Display + 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
    F: Fn() -> Fut + 'static,
{
    let cell = resource(fetch);

    let driver = tokio::task::spawn_local({
        let cell = cell.clone();
        async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately; the construction-time
            // fetch already covers it.
            interval.tick().await;
            loop {
                interval.tick().await;
                cell.refresh().await;
            }
        }
    });

    PollingResource {
        resource: cell,
        driver,
    }
}

/// Lazily-constructed resources keyed by string.
///
/// Each key gets one resource, created on first access and shared by every
/// later lookup.
pub struct ResourceCache<T> {
    entries: RefCell<HashMap<String, Resource<T>>>,
    make: Box<dyn Fn(&str) -> Resource<T>>,
}

impl<T: Clone + Debug + 'static> ResourceCache<T> {
    /// Build a cache whose resources fetch with `fetch(key)`.
    pub fn new<E, Fut, F>(fetch: F) -> Self
    where
        E: std::fmt::Display + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        F: Fn(String) -> Fut + 'static,
    {
        let fetch = Rc::new(fetch);
        Self {
            entries: RefCell::new(HashMap::new()),
            make: Box::new(move |key: &str| {
                let fetch = fetch.clone();
                let key = key.to_string();
                resource(move || fetch(key.clone()))
            }),
        }
    }

    /// The resource for `key`, creating (and fetching) it on first access.
    pub fn get(&self, key: &str) -> Resource<T> {
        if let Some(existing) = self.entries.borrow().get(key) {
            return existing.clone();
        }
        let created = (self.make)(key);
        self.entries
            .borrow_mut()
            .insert(key.to_string(), created.clone());
        created
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
