// ============================================================================
// ember-cells - Dependency Tracking
// Read registration and dirty propagation over the cell graph
// ============================================================================
//
// The borrow discipline throughout this module is collect-then-mutate: a
// cell's dependent list is snapshotted into a Vec (releasing the RefCell
// borrow) before any callback or graph mutation runs. Walks use an explicit
// stack plus a visited set because the graph may reconverge (diamonds).
// ============================================================================

use std::collections::HashSet;
use std::rc::Rc;

use tracing::trace;

use crate::core::context::with_context;
use crate::core::types::{AnyDependent, AnySource};
use crate::reactivity::scheduling::{TaskTag, schedule};

// =============================================================================
// TRACKER STACK
// =============================================================================

/// The innermost derived cell currently computing, if any.
pub fn current_tracker() -> Option<Rc<dyn AnyDependent>> {
    with_context(|ctx| ctx.current_tracker())
}

/// Push a derived cell onto the tracker stack. Must be paired with
/// `pop_tracker`; derived evaluation pairs them through a Drop guard so the
/// stack unwinds correctly even when a compute function panics.
pub fn push_tracker(dependent: Rc<dyn AnyDependent>) {
    with_context(|ctx| ctx.push_tracker(dependent));
}

/// Pop the innermost tracker.
pub fn pop_tracker() {
    with_context(|ctx| {
        ctx.pop_tracker();
    });
}

// =============================================================================
// TRACK READ
// =============================================================================

/// Register a read of `source` against the active tracker, if any.
///
/// Records the edge on both sides: the tracker's dependency list and the
/// source's dependent list. Reads outside a computation, and a cell's read
/// of itself, register nothing.
pub fn track_read(source: Rc<dyn AnySource>) {
    let Some(tracker) = current_tracker() else {
        return;
    };

    if tracker.id() == source.id() {
        return;
    }

    tracker.add_dependency(source.clone());
    source.add_dependent(Rc::downgrade(&tracker));
}

// =============================================================================
// DIRTY PROPAGATION
// =============================================================================

/// Mark every derived cell transitively reachable from `source`'s dependents
/// as dirty, scheduling a recompute task for each one that has subscribers.
///
/// Called on a state write. Deduplicates via a visited set so reconvergent
/// graphs mark each cell once.
pub fn mark_dependents_dirty(source: &dyn AnySource) {
    let mut stack: Vec<Rc<dyn AnyDependent>> = Vec::new();
    source.for_each_dependent(&mut |dep| stack.push(dep));

    let mut seen: HashSet<u64> = HashSet::new();

    while let Some(dependent) = stack.pop() {
        if !seen.insert(dependent.id()) {
            continue;
        }

        dependent.mark_dirty();

        if dependent.subscriber_count() > 0 {
            schedule_recompute(&dependent);
        }

        // Walk downstream through the dependent's own source side.
        dependent.as_source().for_each_dependent(&mut |next| {
            stack.push(next);
        });
    }

    if !seen.is_empty() {
        trace!(source = source.id(), dirtied = seen.len(), "dirty propagation");
    }
}

/// Mark the direct dependents of a derived cell dirty after its value
/// changed, scheduling recomputes for the subscribed ones.
///
/// Direct marking is enough here: anything further downstream observes the
/// dirtiness through its dependency set on next read.
pub fn mark_direct_dependents_dirty(source: &dyn AnySource) {
    source.for_each_dependent(&mut |dependent| {
        dependent.mark_dirty();
        if dependent.subscriber_count() > 0 {
            schedule_recompute(&dependent);
        }
    });
}

fn schedule_recompute(dependent: &Rc<dyn AnyDependent>) {
    let target = dependent.clone();
    schedule(
        dependent.id(),
        TaskTag::Recompute,
        Box::new(move || target.recompute()),
    );
}

// =============================================================================
// EDGE TEARDOWN
// =============================================================================

/// Remove every dependency edge of `dependent`, on both sides.
///
/// Runs before each recomputation so the dependency set always reflects the
/// most recent compute; edges to branches not taken this time are dropped.
pub fn detach_dependencies(dependent: &Rc<dyn AnyDependent>) {
    let id = dependent.id();

    let mut sources: Vec<Rc<dyn AnySource>> = Vec::new();
    dependent.for_each_dependency(&mut |source| sources.push(source.clone()));

    for source in sources {
        source.remove_dependent(id);
    }

    dependent.clear_dependencies();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::derived::derived;
    use crate::primitives::state::state;
    use crate::reactivity::scheduling::tick;

    #[test]
    fn read_outside_computation_registers_nothing() {
        let count = state(42);
        let _ = count.get();
        assert_eq!(count.dependent_count(), 0);
    }

    #[test]
    fn read_inside_computation_registers_both_sides() {
        let count = state(1);
        let doubled = derived({
            let count = count.clone();
            move || count.get() * 2
        });

        assert_eq!(doubled.get(), 2);
        assert_eq!(count.dependent_count(), 1);
    }

    #[test]
    fn duplicate_reads_register_one_edge() {
        let count = state(1);
        let sum = derived({
            let count = count.clone();
            move || count.get() + count.get()
        });

        assert_eq!(sum.get(), 2);
        assert_eq!(count.dependent_count(), 1);
    }

    #[test]
    fn write_dirties_transitive_dependents() {
        let leaf = state(1);
        let mid = derived({
            let leaf = leaf.clone();
            move || leaf.get() + 1
        });
        let top = derived({
            let mid = mid.clone();
            move || mid.get() + 1
        });

        assert_eq!(top.get(), 3);

        leaf.set(10);
        tick();

        assert_eq!(top.get(), 12);
    }

    #[test]
    fn dropped_dependent_is_pruned_from_source() {
        let count = state(1);
        {
            let doubled = derived({
                let count = count.clone();
                move || count.get() * 2
            });
            assert_eq!(doubled.get(), 2);
            assert_eq!(count.dependent_count(), 1);
        }

        // The derived is gone; the next write prunes its dead entry.
        count.set(2);
        tick();
        assert_eq!(count.dependent_count(), 0);
    }
}
