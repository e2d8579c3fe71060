// ============================================================================
// ember-cells - Middleware
// Cross-cutting layers around a state cell's setter
// ============================================================================
//
// Middleware wraps only the write path. Reads and subscriptions go straight
// to the underlying cell, so a wrapped handle and the plain handle observe
// the same node.
// ============================================================================

use std::fmt::Debug;
use std::rc::Rc;

use crate::core::types::Unsubscribe;
use crate::primitives::state::State;

/// Reads the current value for a middleware layer.
pub type Getter<T> = Rc<dyn Fn() -> T>;

/// Applies a write; the innermost setter is the cell's own `set`.
pub type Setter<T> = Rc<dyn Fn(T)>;

/// One layer of the setter chain. Receives the next setter and a getter for
/// the current value, and returns the wrapped setter.
pub type Middleware<T> = Box<dyn Fn(Setter<T>, Getter<T>) -> Setter<T>>;

/// A state handle whose writes run through a middleware chain.
pub struct WithMiddleware<T> {
    cell: State<T>,
    setter: Setter<T>,
}

impl<T: Clone + Debug + 'static> WithMiddleware<T> {
    pub fn get(&self) -> T {
        self.cell.get()
    }

    /// Write through the middleware chain. A layer may transform the value,
    /// drop the write, or forward it several times.
    pub fn set(&self, value: T) {
        (self.setter)(value);
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Unsubscribe {
        self.cell.subscribe(listener)
    }

    /// The unwrapped cell handle.
    pub fn cell(&self) -> &State<T> {
        &self.cell
    }
}

/// Wrap a state cell's setter in `layers`, composed so the first layer in
/// the list runs first on every write.
pub fn with_middleware<T: Clone + Debug + 'static>(
    cell: &State<T>,
    layers: Vec<Middleware<T>>,
) -> WithMiddleware<T> {
    let getter: Getter<T> = {
        let cell = cell.clone();
        Rc::new(move || cell.get())
    };

    let mut setter: Setter<T> = {
        let cell = cell.clone();
        Rc::new(move |value| {
            cell.set(value);
        })
    };

    for layer in layers.iter().rev() {
        setter = layer(setter, getter.clone());
    }

    WithMiddleware {
        cell: cell.clone(),
        setter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::state::state;
    use crate::reactivity::scheduling::tick;
    use std::cell::{Cell, RefCell};

    fn clamping(min: i32, max: i32) -> Middleware<i32> {
        Box::new(move |next, _current| {
            let setter: Setter<i32> = Rc::new(move |value: i32| next(value.clamp(min, max)));
            setter
        })
    }

    #[test]
    fn layer_transforms_writes() {
        let count = state(0);
        let wrapped = with_middleware(&count, vec![clamping(0, 10)]);

        wrapped.set(25);
        assert_eq!(wrapped.get(), 10);
        assert_eq!(count.get(), 10);
    }

    #[test]
    fn layers_run_in_declaration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let tag = |name: &'static str, log: Rc<RefCell<Vec<&'static str>>>| -> Middleware<i32> {
            Box::new(move |next, _current| {
                let log = log.clone();
                let setter: Setter<i32> = Rc::new(move |value| {
                    log.borrow_mut().push(name);
                    next(value);
                });
                setter
            })
        };

        let count = state(0);
        let wrapped = with_middleware(
            &count,
            vec![tag("outer", log.clone()), tag("inner", log.clone())],
        );

        wrapped.set(1);
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn layer_may_drop_a_write() {
        let count = state(5);
        let gate: Middleware<i32> = Box::new(|next, current| {
            let setter: Setter<i32> = Rc::new(move |value: i32| {
                // Only allow increases.
                if value > current() {
                    next(value);
                }
            });
            setter
        });
        let wrapped = with_middleware(&count, vec![gate]);

        wrapped.set(3);
        assert_eq!(count.get(), 5);

        wrapped.set(8);
        assert_eq!(count.get(), 8);
    }

    #[test]
    fn wrapped_subscriptions_observe_the_shared_node() {
        let count = state(0);
        let wrapped = with_middleware(&count, vec![clamping(0, 10)]);

        let hits = Rc::new(Cell::new(0));
        let _unsub = wrapped.subscribe({
            let hits = hits.clone();
            move |_| hits.set(hits.get() + 1)
        });

        // Writes through the plain handle notify the wrapped subscriber too.
        count.set(4);
        tick();
        assert_eq!(hits.get(), 1);
    }
}
