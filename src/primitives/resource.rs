// ============================================================================
// ember-cells - Resource Cell
// Asynchronous data cells with staleness protection
// ============================================================================
//
// A resource is a self-contained async state machine outside the dependency
// graph. Every refresh captures a fresh generation; a completed fetch may
// only apply its result while its generation is still current, so the last
// refresh always wins regardless of which underlying operation finishes
// first. Superseded work is discarded, not cancelled.
//
// The snapshot is held behind an Rc and replaced wholesale whenever any
// field changes, so consumers can use reference equality to detect
// "no change".
// ============================================================================

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use tracing::trace;

use crate::core::error::FetchError;
use crate::core::types::{CellKind, Unsubscribe, next_cell_id};
use crate::devtools::{self, UpdateEvent};
use crate::reactivity::scheduling::{TaskTag, schedule};

// =============================================================================
// SNAPSHOT
// =============================================================================

/// The tri-state view of a resource: data, loading, error.
///
/// `data` survives refreshes and failures (stale-while-revalidate): it is
/// only replaced by a newer successful fetch or a hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<FetchError>,
}

type FetchFuture<T> = Pin<Box<dyn Future<Output = Result<T, FetchError>>>>;
type Fetcher<T> = Box<dyn Fn() -> FetchFuture<T>>;
type Listener<T> = Rc<dyn Fn(Rc<ResourceSnapshot<T>>)>;

// =============================================================================
// RESOURCE INNER
// =============================================================================

pub struct ResourceInner<T> {
    id: u64,
    fetcher: Fetcher<T>,
    snapshot: RefCell<Rc<ResourceSnapshot<T>>>,
    subscribers: RefCell<Vec<(u64, Listener<T>)>>,
    next_subscriber_id: Cell<u64>,
    /// Monotonically increasing; at most one fetch outcome per generation
    /// ever mutates state.
    generation: Cell<u64>,
}

impl<T: Clone + Debug + 'static> ResourceInner<T> {
    fn new(fetcher: Fetcher<T>) -> Self {
        Self {
            id: next_cell_id(),
            fetcher,
            snapshot: RefCell::new(Rc::new(ResourceSnapshot {
                data: None,
                loading: true,
                error: None,
            })),
            subscribers: RefCell::new(Vec::new()),
            next_subscriber_id: Cell::new(0),
            generation: Cell::new(0),
        }
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn add_subscriber(&self, listener: Listener<T>) -> u64 {
        let id = self.next_subscriber_id.get();
        self.next_subscriber_id.set(id + 1);
        self.subscribers.borrow_mut().push((id, listener));
        id
    }

    fn remove_subscriber(&self, id: u64) {
        self.subscribers.borrow_mut().retain(|(sub_id, _)| *sub_id != id);
    }

    /// Deliver `snapshot` to every subscriber. Listeners are snapshotted
    /// first so one of them may (un)subscribe without a borrow panic.
    fn deliver(&self, snapshot: Rc<ResourceSnapshot<T>>) {
        let listeners: Vec<Listener<T>> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(snapshot.clone());
        }
    }
}

/// Synchronous prologue of a refresh: bump the generation, enter the loading
/// state (data untouched), queue one coalesced notification for the
/// observable loading transition.
fn begin_refresh<T: Clone + Debug + 'static>(inner: &Rc<ResourceInner<T>>) -> u64 {
    let generation = inner.generation.get() + 1;
    inner.generation.set(generation);

    let previous = inner.snapshot.borrow().clone();
    *inner.snapshot.borrow_mut() = Rc::new(ResourceSnapshot {
        data: previous.data.clone(),
        loading: true,
        error: None,
    });

    if inner.subscriber_count() > 0 {
        let node = inner.clone();
        let snapshot = inner.snapshot.borrow().clone();
        schedule(
            inner.id,
            TaskTag::Notify,
            Box::new(move || node.deliver(snapshot)),
        );
    }

    generation
}

/// Apply a completed fetch, unless a later refresh superseded it.
fn settle<T: Clone + Debug + 'static>(
    inner: &Rc<ResourceInner<T>>,
    generation: u64,
    outcome: Result<T, FetchError>,
) {
    if generation != inner.generation.get() {
        trace!(
            cell = inner.id,
            generation,
            current = inner.generation.get(),
            "discarding superseded fetch result"
        );
        return;
    }

    let previous = inner.snapshot.borrow().clone();
    let next = match outcome {
        Ok(data) => ResourceSnapshot {
            data: Some(data),
            loading: false,
            error: None,
        },
        Err(error) => ResourceSnapshot {
            // Prior data persists through failures.
            data: previous.data.clone(),
            loading: false,
            error: Some(error),
        },
    };
    *inner.snapshot.borrow_mut() = Rc::new(next);

    // An async completion is not part of any synchronous batch, so
    // subscribers hear about it immediately.
    inner.deliver(inner.snapshot.borrow().clone());
    schedule_devtools(inner);
}

fn schedule_devtools<T: Clone + Debug + 'static>(inner: &Rc<ResourceInner<T>>) {
    let node = inner.clone();
    schedule(
        inner.id,
        TaskTag::Devtools,
        Box::new(move || {
            devtools::emit(&UpdateEvent {
                kind: CellKind::Resource,
                subscriber_count: node.subscriber_count(),
                payload: format!("{:?}", node.snapshot.borrow()),
            });
        }),
    );
}

// =============================================================================
// RESOURCE<T> - the public handle
// =============================================================================

/// An asynchronous data cell wrapping a fetch operation.
///
/// Construction immediately triggers one fetch; later fetches happen only
/// through [`Resource::refresh`]. Must be created inside a tokio
/// [`LocalSet`](tokio::task::LocalSet): the initial fetch is spawned on the
/// current-thread task set, which is this crate's cooperative
/// single-threaded execution model.
#[derive(Clone)]
pub struct Resource<T> {
    inner: Rc<ResourceInner<T>>,
}

impl<T: Clone + Debug + 'static> Resource<T> {
    /// Last successfully fetched (or hydrated) data.
    pub fn data(&self) -> Option<T> {
        self.inner.snapshot.borrow().data.clone()
    }

    /// Whether a fetch is in flight.
    pub fn loading(&self) -> bool {
        self.inner.snapshot.borrow().loading
    }

    /// Last fetch failure, cleared by the next refresh.
    pub fn error(&self) -> Option<FetchError> {
        self.inner.snapshot.borrow().error.clone()
    }

    /// The stable snapshot reference. Replaced wholesale when any field
    /// changes, so `Rc::ptr_eq` detects "no change".
    pub fn snapshot(&self) -> Rc<ResourceSnapshot<T>> {
        self.inner.snapshot.borrow().clone()
    }

    /// Trigger a new fetch.
    ///
    /// The generation bump and loading transition happen at call time; the
    /// returned future drives the fetch and applies the outcome unless a
    /// later refresh won the generation race. Fetch failures are captured
    /// into the snapshot, never returned.
    pub fn refresh(&self) -> impl Future<Output = ()> + use<T> {
        let inner = self.inner.clone();
        let generation = begin_refresh(&inner);
        let fetch = (inner.fetcher)();
        async move {
            let outcome = fetch.await;
            settle(&inner, generation, outcome);
        }
    }

    /// Register a snapshot listener. Delivers the current snapshot
    /// immediately, then every subsequent one.
    pub fn subscribe(&self, listener: impl Fn(Rc<ResourceSnapshot<T>>) + 'static) -> Unsubscribe {
        let listener: Listener<T> = Rc::new(listener);
        let id = self.inner.add_subscriber(listener.clone());

        listener(self.inner.snapshot.borrow().clone());

        let node = self.inner.clone();
        Box::new(move || node.remove_subscriber(id))
    }

    /// Force-set the snapshot without fetching (server-rendered payloads).
    /// Bumps the generation so an in-flight fetch lands stale.
    pub(crate) fn hydrate(&self, data: Option<T>, loading: bool, error: Option<FetchError>) {
        let inner = &self.inner;
        inner.generation.set(inner.generation.get() + 1);
        *inner.snapshot.borrow_mut() = Rc::new(ResourceSnapshot {
            data,
            loading,
            error,
        });
        inner.deliver(inner.snapshot.borrow().clone());
        schedule_devtools(inner);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

impl<T: Clone + Debug + 'static> Debug for Resource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.inner.snapshot.borrow();
        f.debug_struct("Resource")
            .field("data", &snapshot.data)
            .field("loading", &snapshot.loading)
            .field("error", &snapshot.error)
            .finish()
    }
}

// =============================================================================
// CREATION
// =============================================================================

/// Create a resource cell around an async fetch function.
///
/// Fetch failures of any `Display` type are normalized into [`FetchError`].
/// Must be called within a tokio `LocalSet` (the construction-time fetch is
/// spawned there).
///
/// # Example
///
/// ```no_run
/// use ember_cells::resource;
///
/// # async fn demo() {
/// let user = resource(|| async { Ok::<_, String>(String::from("ada")) });
/// assert!(user.loading());
/// # }
/// ```
pub fn resource<T, E, Fut, F>(fetch: F) -> Resource<T>
where
    T: Clone + Debug + 'static,
    E: std::fmt::Display + 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
    F: Fn() -> Fut + 'static,
{
    let fetcher: Fetcher<T> = Box::new(move || {
        let fut = fetch();
        Box::pin(async move { fut.await.map_err(|err| FetchError::new(err.to_string())) })
    });

    let cell = Resource {
        inner: Rc::new(ResourceInner::new(fetcher)),
    };

    // Construction triggers the first fetch.
    tokio::task::spawn_local(cell.refresh());

    cell
}

// =============================================================================
// TESTS
// =============================================================================
