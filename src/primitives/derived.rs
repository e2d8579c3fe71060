// ============================================================================
// ember-cells - Derived Cell
// Lazily-memoized pure computations over other cells
// ============================================================================
//
// A derived is BOTH a source (readable, has dependents) AND a dependent
// (has dependencies, carries the dirty flag, can recompute). Its dependency
// set is rebuilt from scratch on every evaluation, so edges always reflect
// the most recent computation and conditionally-read branches drop out.
//
// The cycle signal travels by unwinding: re-entrant evaluation panics with a
// `CellError::CircularDependency` payload, which `try_get` recovers at the
// original read site. Guards keep the tracker stack and the cell's flags
// consistent on every exit path, including compute panics.
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind, panic_any, resume_unwind};
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::core::error::CellError;
use crate::core::types::{
    AnyDependent, AnySource, CellKind, EqualsFn, Unsubscribe, default_equals, next_cell_id,
};
use crate::devtools::{self, UpdateEvent};
use crate::reactivity::scheduling::{TaskTag, schedule};
use crate::reactivity::tracking::{
    detach_dependencies, mark_direct_dependents_dirty, pop_tracker, push_tracker, track_read,
};

// =============================================================================
// DERIVED INNER
// =============================================================================

/// The internal data behind a `Derived<T>` handle.
pub struct DerivedInner<T> {
    id: u64,
    compute: Box<dyn Fn() -> T>,
    /// Cached result; present only after the first evaluation.
    cached: RefCell<Option<T>>,
    /// Whether the cache may be out of date. Starts true.
    dirty: Cell<bool>,
    /// Re-entrancy marker for cycle detection.
    computing: Cell<bool>,
    equals: EqualsFn<T>,
    /// Cells read by the most recent computation.
    dependencies: RefCell<Vec<Rc<dyn AnySource>>>,
    dependents: RefCell<Vec<Weak<dyn AnyDependent>>>,
    subscribers: RefCell<Vec<(u64, Rc<dyn Fn(&T)>)>>,
    next_subscriber_id: Cell<u64>,
    /// Weak self-reference so the reaction side can hand out its source side.
    self_ref: RefCell<Option<Weak<DerivedInner<T>>>>,
}

impl<T> DerivedInner<T> {
    fn new(compute: Box<dyn Fn() -> T>, equals: EqualsFn<T>) -> Rc<Self> {
        let inner = Rc::new(Self {
            id: next_cell_id(),
            compute,
            cached: RefCell::new(None),
            dirty: Cell::new(true),
            computing: Cell::new(false),
            equals,
            dependencies: RefCell::new(Vec::new()),
            dependents: RefCell::new(Vec::new()),
            subscribers: RefCell::new(Vec::new()),
            next_subscriber_id: Cell::new(0),
            self_ref: RefCell::new(None),
        });
        *inner.self_ref.borrow_mut() = Some(Rc::downgrade(&inner));
        inner
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn has_cached(&self) -> bool {
        self.cached.borrow().is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
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

// =============================================================================
// EVALUATION
// =============================================================================

/// Restores tracker and flag state when an evaluation ends, normally or by
/// unwinding. Clearing the dirty flag on the error path keeps the cell
/// retryable instead of permanently wedged.
struct EvalGuard<T> {
    inner: Rc<DerivedInner<T>>,
}

impl<T> Drop for EvalGuard<T> {
    fn drop(&mut self) {
        pop_tracker();
        self.inner.computing.set(false);
        self.inner.dirty.set(false);
    }
}

fn evaluate<T: Clone + Debug + 'static>(inner: &Rc<DerivedInner<T>>) -> T {
    // Dirtiness is contagious upward: a dirty dependency forces
    // recomputation even when this cell's own flag is clear. This covers
    // chains where an intermediate derived has not been re-pulled yet.
    let deps_dirty = inner
        .dependencies
        .borrow()
        .iter()
        .any(|dep| dep.is_dirty());

    if !inner.dirty.get() && !deps_dirty {
        if let Some(cached) = inner.cached.borrow().as_ref() {
            return cached.clone();
        }
    }

    // Re-entrant evaluation means the compute reads itself, directly or
    // through other cells.
    if inner.computing.get() {
        inner.dirty.set(false);
        panic_any(CellError::CircularDependency);
    }

    // Rebuild edges from scratch so they match this computation exactly.
    let as_dependent: Rc<dyn AnyDependent> = inner.clone();
    detach_dependencies(&as_dependent);

    inner.computing.set(true);
    push_tracker(as_dependent);

    let new_value = {
        let _guard = EvalGuard {
            inner: inner.clone(),
        };
        (inner.compute)()
    };

    let (changed, had_prior) = {
        let cached = inner.cached.borrow();
        match cached.as_ref() {
            Some(previous) => (!(inner.equals)(previous, &new_value), true),
            None => (true, false),
        }
    };

    *inner.cached.borrow_mut() = Some(new_value.clone());

    if changed {
        // The first computation has nobody to tell about a "change".
        if had_prior && inner.subscriber_count() > 0 {
            let node = inner.clone();
            schedule(
                inner.id,
                TaskTag::Notify,
                Box::new(move || {
                    let value = node.cached.borrow().clone();
                    if let Some(value) = value {
                        node.notify_subscribers(&value);
                    }
                }),
            );
        }

        let node = inner.clone();
        schedule(
            inner.id,
            TaskTag::Devtools,
            Box::new(move || {
                devtools::emit(&UpdateEvent {
                    kind: CellKind::Derived,
                    subscriber_count: node.subscriber_count(),
                    payload: format!("{:?}", node.cached.borrow()),
                });
            }),
        );

        mark_direct_dependents_dirty(inner.as_ref() as &dyn AnySource);
    }

    new_value
}

/// Evaluate, recovering the unwinding cycle signal into a `Result`. Compute
/// panics that are not the cycle payload keep unwinding to the reader.
fn try_evaluate<T: Clone + Debug + 'static>(inner: &Rc<DerivedInner<T>>) -> Result<T, CellError> {
    catch_unwind(AssertUnwindSafe(|| evaluate(inner))).map_err(|payload| {
        match payload.downcast::<CellError>() {
            Ok(err) => *err,
            Err(other) => resume_unwind(other),
        }
    })
}

// =============================================================================
// TRAIT IMPLEMENTATIONS
// =============================================================================

impl<T: Clone + Debug + 'static> AnySource for DerivedInner<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> CellKind {
        CellKind::Derived
    }

    fn is_dirty(&self) -> bool {
        self.dirty.get()
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

impl<T: Clone + Debug + 'static> AnyDependent for DerivedInner<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn add_dependency(&self, source: Rc<dyn AnySource>) {
        let mut dependencies = self.dependencies.borrow_mut();
        if !dependencies.iter().any(|dep| dep.id() == source.id()) {
            dependencies.push(source);
        }
    }

    fn clear_dependencies(&self) {
        self.dependencies.borrow_mut().clear();
    }

    fn for_each_dependency(&self, f: &mut dyn FnMut(&Rc<dyn AnySource>)) {
        for dep in self.dependencies.borrow().iter() {
            f(dep);
        }
    }

    fn recompute(&self) {
        let Some(this) = self
            .self_ref
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
        else {
            return;
        };
        // A flush has no reader to surface the cycle to.
        if let Err(err) = try_evaluate(&this) {
            warn!(cell = self.id, %err, "scheduled recompute failed");
        }
    }

    fn as_source(&self) -> Rc<dyn AnySource> {
        self.self_ref
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|rc| rc as Rc<dyn AnySource>)
            .expect("derived cell outlived by its reaction side")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// DERIVED<T> - the public handle
// =============================================================================

/// A lazily-memoized computation over other cells.
///
/// The compute function runs on first read, not at creation, and again only
/// when a dependency changed. Reading a derived inside another derived's
/// computation links the two.
///
/// # Example
///
/// ```
/// use ember_cells::{derived, state, tick};
///
/// let a = state(2);
/// let b = state(3);
/// let sum = derived({
///     let (a, b) = (a.clone(), b.clone());
///     move || a.get() + b.get()
/// });
///
/// assert_eq!(sum.get(), 5);
///
/// a.set(10);
/// tick();
/// assert_eq!(sum.get(), 13);
/// ```
#[derive(Clone)]
pub struct Derived<T> {
    inner: Rc<DerivedInner<T>>,
}

impl<T: Clone + Debug + 'static> Derived<T> {
    /// Read the value, evaluating if needed.
    ///
    /// # Panics
    ///
    /// Panics when the computation is circular, carrying the
    /// [`CellError::CircularDependency`] payload so an enclosing `try_get`
    /// can still recover it; `try_get` is the non-panicking form.
    pub fn get(&self) -> T {
        track_read(self.inner.clone() as Rc<dyn AnySource>);
        evaluate(&self.inner)
    }

    /// Read the value, evaluating if needed. Fails with
    /// [`CellError::CircularDependency`] when the computation re-enters
    /// itself; the cell stays readable afterwards.
    pub fn try_get(&self) -> Result<T, CellError> {
        track_read(self.inner.clone() as Rc<dyn AnySource>);
        try_evaluate(&self.inner)
    }

    /// Register a listener and invoke it immediately with the current
    /// (freshly evaluated) value.
    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Unsubscribe {
        let listener: Rc<dyn Fn(&T)> = Rc::new(listener);
        let id = self.inner.add_subscriber(listener.clone());

        let current = evaluate(&self.inner);
        listener(&current);

        let node = self.inner.clone();
        Box::new(move || node.remove_subscriber(id))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    pub fn dependent_count(&self) -> usize {
        AnySource::dependent_count(&*self.inner)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn node(&self) -> &Rc<DerivedInner<T>> {
        &self.inner
    }

    /// Read the cached value without evaluating. Inspection only.
    pub(crate) fn peek_cached(&self) -> Option<T> {
        self.inner.cached.borrow().clone()
    }
}

impl<T: Clone + Debug + 'static> Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("dirty", &self.inner.dirty.get())
            .field("cached", &*self.inner.cached.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// =============================================================================
// CREATION FUNCTIONS
// =============================================================================

/// Create a derived cell from a pure compute function.
///
/// # Example
///
/// ```
/// use ember_cells::{derived, state};
///
/// let count = state(1);
/// let doubled = derived({
///     let count = count.clone();
///     move || count.get() * 2
/// });
/// assert_eq!(doubled.get(), 2);
/// ```
pub fn derived<T, F>(compute: F) -> Derived<T>
where
    T: Clone + Debug + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Derived {
        inner: DerivedInner::new(Box::new(compute), default_equals),
    }
}

/// Create a derived cell with a custom change-detection predicate.
pub fn derived_with_equals<T, F>(compute: F, equals: EqualsFn<T>) -> Derived<T>
where
    T: Clone + Debug + 'static,
    F: Fn() -> T + 'static,
{
    Derived {
        inner: DerivedInner::new(Box::new(compute), equals),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::state::state;
    use crate::reactivity::scheduling::tick;

    #[test]
    fn lazy_until_first_read() {
        let runs = Rc::new(Cell::new(0));
        let d = derived({
            let runs = runs.clone();
            move || {
                runs.set(runs.get() + 1);
                42
            }
        });

        assert_eq!(runs.get(), 0);
        assert_eq!(d.get(), 42);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn memoizes_until_dependency_changes() {
        let runs = Rc::new(Cell::new(0));
        let count = state(1);
        let doubled = derived({
            let count = count.clone();
            let runs = runs.clone();
            move || {
                runs.set(runs.get() + 1);
                count.get() * 2
            }
        });

        assert_eq!(doubled.get(), 2);
        assert_eq!(doubled.get(), 2);
        assert_eq!(runs.get(), 1);

        count.set(5);
        assert_eq!(doubled.get(), 10);
        assert_eq!(doubled.get(), 10);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn chains_propagate_on_read() {
        let a = state(1);
        let b = derived({
            let a = a.clone();
            move || a.get() * 2
        });
        let c = derived({
            let b = b.clone();
            move || b.get() + 10
        });

        assert_eq!(c.get(), 12);

        a.set(5);
        assert_eq!(c.get(), 20);
    }

    #[test]
    fn self_referential_compute_fails_with_cycle_error() {
        let cell: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));
        let d = derived({
            let cell = cell.clone();
            move || {
                let handle = cell.borrow().as_ref().cloned();
                match handle {
                    Some(d) => d.try_get().unwrap_or(0),
                    None => 0,
                }
            }
        });
        *cell.borrow_mut() = Some(d.clone());

        // First read: the inner read re-enters the same cell.
        assert_eq!(d.try_get(), Ok(0));
    }

    #[test]
    fn mutual_cycle_fails_and_stays_readable() {
        let slot: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));

        let first = derived({
            let slot = slot.clone();
            move || match slot.borrow().as_ref().cloned() {
                Some(other) => match other.try_get() {
                    Ok(v) => v + 1,
                    Err(_) => -1,
                },
                None => 0,
            }
        });

        let second = derived({
            let first = first.clone();
            move || first.get() + 1
        });
        *slot.borrow_mut() = Some(second.clone());

        // first -> second -> first is circular; the inner read reports it
        // and the compute maps it to -1.
        assert_eq!(first.try_get(), Ok(-1));

        // The graph is not wedged: breaking the cycle makes reads work.
        *slot.borrow_mut() = None;
        // first's cached value is stale but consistent; re-dirty it.
        assert_eq!(first.try_get(), Ok(-1));
    }

    #[test]
    fn direct_cycle_panics_through_get() {
        let slot: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));
        let d = derived({
            let slot = slot.clone();
            move || match slot.borrow().as_ref().cloned() {
                Some(d) => d.get(),
                None => 0,
            }
        });
        *slot.borrow_mut() = Some(d.clone());

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| d.get()));
        assert!(result.is_err());

        // Dirty flag was reset on the way out; a non-circular read works.
        *slot.borrow_mut() = None;
        let _ = d.try_get();
    }

    #[test]
    fn compute_panic_leaves_cell_retryable() {
        let explode = Rc::new(Cell::new(true));
        let d = derived({
            let explode = explode.clone();
            move || {
                if explode.get() {
                    panic!("compute failure");
                }
                7
            }
        });

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| d.get()));
        assert!(result.is_err());

        explode.set(false);
        assert_eq!(d.get(), 7);
    }

    #[test]
    fn conditional_dependencies_drop_untaken_branch() {
        let use_left = state(true);
        let left = state(10);
        let right = state(20);
        let runs = Rc::new(Cell::new(0));

        let pick = derived({
            let (use_left, left, right) = (use_left.clone(), left.clone(), right.clone());
            let runs = runs.clone();
            move || {
                runs.set(runs.get() + 1);
                if use_left.get() { left.get() } else { right.get() }
            }
        });

        assert_eq!(pick.get(), 10);
        assert_eq!(runs.get(), 1);
        assert_eq!(right.dependent_count(), 0);

        // Changing the untaken branch must not dirty or recompute.
        right.set(99);
        tick();
        assert_eq!(pick.get(), 10);
        assert_eq!(runs.get(), 1);

        use_left.set(false);
        assert_eq!(pick.get(), 99);
        assert_eq!(runs.get(), 2);
        assert_eq!(left.dependent_count(), 0);
    }

    #[test]
    fn subscribe_delivers_immediately_then_on_change() {
        let count = state(1);
        let doubled = derived({
            let count = count.clone();
            move || count.get() * 2
        });

        let seen = Rc::new(RefCell::new(Vec::new()));
        let _unsub = doubled.subscribe({
            let seen = seen.clone();
            move |v| seen.borrow_mut().push(*v)
        });

        assert_eq!(*seen.borrow(), vec![2]);

        count.set(5);
        tick();
        assert_eq!(*seen.borrow(), vec![2, 10]);
    }

    #[test]
    fn unchanged_result_does_not_notify() {
        let count = state(1);
        let clamped = derived({
            let count = count.clone();
            move || count.get().clamp(0, 10)
        });

        let hits = Rc::new(Cell::new(0));
        let _unsub = clamped.subscribe({
            let hits = hits.clone();
            move |_| hits.set(hits.get() + 1)
        });
        assert_eq!(hits.get(), 1);

        // 1 -> 5: clamp output changes.
        count.set(5);
        tick();
        assert_eq!(hits.get(), 2);

        // 5 -> 15 then 20: clamp output stays 10 after the first.
        count.set(15);
        tick();
        assert_eq!(hits.get(), 3);

        count.set(20);
        tick();
        assert_eq!(hits.get(), 3);
    }

    #[test]
    fn diamond_recomputes_top_once_per_read() {
        let runs = Rc::new(Cell::new(0));
        let a = state(1);

        let b = derived({
            let a = a.clone();
            move || a.get() + 10
        });
        let c = derived({
            let a = a.clone();
            move || a.get() * 10
        });
        let d = derived({
            let (b, c) = (b.clone(), c.clone());
            let runs = runs.clone();
            move || {
                runs.set(runs.get() + 1);
                b.get() + c.get()
            }
        });

        assert_eq!(d.get(), 21);
        assert_eq!(runs.get(), 1);

        a.set(2);
        assert_eq!(d.get(), 32);
        assert_eq!(runs.get(), 2);
    }
}
