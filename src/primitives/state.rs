// ============================================================================
// ember-cells - State Cell
// The mutable, equality-checked reactive value holder
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use crate::core::types::{
    AnyDependent, AnySource, CellKind, EqualsFn, Unsubscribe, default_equals, next_cell_id,
};
use crate::devtools::{self, UpdateEvent};
use crate::reactivity::scheduling::{TaskTag, schedule};
use crate::reactivity::tracking::{mark_dependents_dirty, track_read};

// =============================================================================
// STATE NODE
// =============================================================================

/// The internal data behind a `State<T>` handle.
///
/// Separate from the handle so the node can live in the graph as
/// `Rc<dyn AnySource>` while handles stay cheap to clone.
pub struct StateNode<T> {
    id: u64,
    value: RefCell<T>,
    /// Construction-time value, kept for `reset`.
    initial: T,
    equals: EqualsFn<T>,
    subscribers: RefCell<Vec<(u64, Rc<dyn Fn(&T)>)>>,
    next_subscriber_id: Cell<u64>,
    dependents: RefCell<Vec<Weak<dyn AnyDependent>>>,
}

impl<T> StateNode<T> {
    fn new(value: T, equals: EqualsFn<T>) -> Self
    where
        T: Clone,
    {
        Self {
            id: next_cell_id(),
            initial: value.clone(),
            value: RefCell::new(value),
            equals,
            subscribers: RefCell::new(Vec::new()),
            next_subscriber_id: Cell::new(0),
            dependents: RefCell::new(Vec::new()),
        }
    }

    fn add_subscriber(&self, listener: Rc<dyn Fn(&T)>) -> u64 {
        let id = self.next_subscriber_id.get();
        self.next_subscriber_id.set(id + 1);
        self.subscribers.borrow_mut().push((id, listener));
        id
    }

    fn remove_subscriber(&self, id: u64) {
        self.subscribers.borrow_mut().retain(|(sub_id, _)| *sub_id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Deliver `value` to every subscriber. Listeners are snapshotted first
    /// so one of them may subscribe or unsubscribe without a borrow panic.
    fn notify_subscribers(&self, value: &T) {
        let listeners: Vec<Rc<dyn Fn(&T)>> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(value);
        }
    }
}

impl<T: 'static> AnySource for StateNode<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> CellKind {
        CellKind::State
    }

    fn is_dirty(&self) -> bool {
        // A state cell is always current; only deriveds carry dirtiness.
        false
    }

    fn add_dependent(&self, dependent: Weak<dyn AnyDependent>) {
        let Some(new) = dependent.upgrade() else {
            return;
        };
        let mut dependents = self.dependents.borrow_mut();
        dependents.retain(|w| w.strong_count() > 0);
        let already = dependents
            .iter()
            .any(|w| w.upgrade().is_some_and(|d| d.id() == new.id()));
        if !already {
            dependents.push(dependent);
        }
    }

    fn remove_dependent(&self, id: u64) {
        self.dependents
            .borrow_mut()
            .retain(|w| w.upgrade().is_some_and(|d| d.id() != id));
    }

    fn for_each_dependent(&self, f: &mut dyn FnMut(Rc<dyn AnyDependent>)) {
        let live: Vec<Rc<dyn AnyDependent>> = self
            .dependents
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for dependent in live {
            f(dependent);
        }
    }

    fn dependent_count(&self) -> usize {
        self.dependents
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// STATE<T> - the public handle
// =============================================================================

/// A mutable reactive cell.
///
/// Reading inside a derived computation registers a dependency edge. Writing
/// a different value (per the cell's equality predicate) dirties dependents
/// transitively and queues one coalesced notification for the turn.
///
/// # Example
///
/// ```
/// use ember_cells::{state, tick};
///
/// let count = state(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// tick();
/// assert_eq!(count.get(), 5);
/// ```
#[derive(Clone)]
pub struct State<T> {
    inner: Rc<StateNode<T>>,
}

impl<T: Clone + Debug + 'static> State<T> {
    /// Create a state cell with the default PartialEq equality.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::new_with_equals(value, default_equals)
    }

    /// Create a state cell with a custom equality predicate.
    pub fn new_with_equals(value: T, equals: EqualsFn<T>) -> Self {
        Self {
            inner: Rc::new(StateNode::new(value, equals)),
        }
    }

    /// Read the current value (cloning). Registers a dependency edge when a
    /// derived computation is active; has no side effects otherwise.
    pub fn get(&self) -> T {
        track_read(self.inner.clone() as Rc<dyn AnySource>);
        self.inner.value.borrow().clone()
    }

    /// Read through a closure without cloning. Tracks like `get`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        track_read(self.inner.clone() as Rc<dyn AnySource>);
        f(&self.inner.value.borrow())
    }

    /// Write a new value.
    ///
    /// Returns whether the value changed. A write the equality predicate
    /// considers equal is a complete no-op: no dirtying, no scheduling, no
    /// notification.
    pub fn set(&self, value: T) -> bool {
        let changed = {
            let current = self.inner.value.borrow();
            !(self.inner.equals)(&current, &value)
        };
        if !changed {
            return false;
        }

        *self.inner.value.borrow_mut() = value;

        mark_dependents_dirty(&*self.inner);

        if self.inner.subscriber_count() > 0 {
            let node = self.inner.clone();
            let current = self.inner.value.borrow().clone();
            schedule(
                self.inner.id,
                TaskTag::Notify,
                Box::new(move || node.notify_subscribers(&current)),
            );
        }

        let node = self.inner.clone();
        schedule(
            self.inner.id,
            TaskTag::Devtools,
            Box::new(move || {
                devtools::emit(&UpdateEvent {
                    kind: CellKind::State,
                    subscriber_count: node.subscriber_count(),
                    payload: format!("{:?}", node.value.borrow()),
                });
            }),
        );

        true
    }

    /// Update the value through a closure. Goes through `set`, so the
    /// equality gate still applies.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut next = self.inner.value.borrow().clone();
        f(&mut next);
        self.set(next)
    }

    /// Restore the construction-time initial value.
    pub fn reset(&self) -> bool {
        self.set(self.inner.initial.clone())
    }

    /// Register a listener for future writes.
    ///
    /// The listener is not invoked with the current value - only derived and
    /// resource subscriptions deliver immediately.
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Unsubscribe {
        let id = self.inner.add_subscriber(Rc::new(listener));
        let node = self.inner.clone();
        Box::new(move || node.remove_subscriber(id))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    pub fn dependent_count(&self) -> usize {
        self.inner.dependent_count()
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn node(&self) -> &Rc<StateNode<T>> {
        &self.inner
    }
}

impl<T: Clone + Debug + 'static> Debug for State<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// =============================================================================
// CREATION FUNCTIONS
// =============================================================================

/// Create a mutable state cell.
///
/// # Example
///
/// ```
/// use ember_cells::state;
///
/// let name = state(String::from("ada"));
/// name.set(String::from("grace"));
/// assert_eq!(name.get(), "grace");
/// ```
pub fn state<T>(value: T) -> State<T>
where
    T: Clone + Debug + PartialEq + 'static,
{
    State::new(value)
}

/// Create a state cell with a custom equality predicate.
///
/// # Example
///
/// ```
/// use ember_cells::{state_with_equals, never_equals};
///
/// // Every write counts as a change, even with an equal value.
/// let raw = state_with_equals(0, never_equals);
/// assert!(raw.set(0));
/// ```
pub fn state_with_equals<T>(value: T, equals: EqualsFn<T>) -> State<T>
where
    T: Clone + Debug + 'static,
{
    State::new_with_equals(value, equals)
}

// =============================================================================
// TESTS
// =============================================================================
