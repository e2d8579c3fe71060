// ============================================================================
// ember-cells - Helpers
// Small conveniences over the core cell types
// ============================================================================

use std::fmt::Debug;

use crate::primitives::derived::{Derived, derived};
use crate::primitives::state::State;

/// Restore a state cell to its construction-time initial value.
///
/// Goes through the normal write path, so dependents and subscribers are
/// told only when the value actually changes.
pub fn reset<T: Clone + Debug + 'static>(cell: &State<T>) -> bool {
    cell.reset()
}

/// A derived view over one state cell.
///
/// # Example
///
/// ```
/// use ember_cells::{select, state};
///
/// let user = state((String::from("ada"), 36));
/// let name = select(&user, |(name, _)| name.clone());
/// assert_eq!(name.get(), "ada");
/// ```
pub fn select<S, R>(cell: &State<S>, projection: impl Fn(&S) -> R + 'static) -> Derived<R>
where
    S: Clone + Debug + 'static,
    R: Clone + Debug + PartialEq + 'static,
{
    let cell = cell.clone();
    derived(move || cell.with(|value| projection(value)))
}
