// ============================================================================
// ember-cells - Scheduling
// The batching scheduler: per-cell task queue, turn boundary, transactions
// ============================================================================
//
// All notification work created during one synchronous turn coalesces into a
// single flush. Tasks are keyed by cell and deduplicated by tag, so N writes
// to one cell in a turn deliver one notification carrying the final value.
//
// A host event loop would run the flush at the end of the microtask queue.
// This runtime has no microtasks, so the turn boundary is explicit: `tick()`
// drains the queue, and the outermost `transaction` close does the same.
// ============================================================================

use tracing::debug;

use crate::core::context::with_context;

/// A queued unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Deduplication tag for queued tasks. One task per (cell, tag) pair can be
/// pending at a time; a later enqueue replaces the earlier task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskTag {
    /// Re-evaluate a subscribed derived cell.
    Recompute,
    /// Deliver a value or snapshot to subscribers.
    Notify,
    /// Best-effort devtools emission.
    Devtools,
}

/// Flushes per turn before the scheduler assumes a task is re-enqueueing
/// itself forever.
const MAX_FLUSH_ITERATIONS: u32 = 1000;

// =============================================================================
// ENQUEUE
// =============================================================================

/// Queue `task` under `(key, tag)`, replacing any task already queued for
/// the pair this turn. Outside a transaction this also marks a flush as
/// pending for the turn boundary.
pub fn schedule(key: u64, tag: TaskTag, task: Task) {
    with_context(|ctx| {
        ctx.enqueue(key, tag, task);
        if !ctx.is_transacting() && !ctx.is_flush_pending() {
            ctx.set_flush_pending(true);
        }
    });
}

// =============================================================================
// TURN BOUNDARY
// =============================================================================

/// End the current turn: drain and run every queued task.
///
/// Tasks that enqueue new work during the flush (a recompute scheduling its
/// notification, a listener writing a cell) belong to the same logical turn,
/// so the drain loops until the queue is quiet - the equivalent of a
/// microtask chain running to completion. A turn that never quiets down
/// panics rather than spinning forever.
///
/// No-op while a transaction is open; the outermost transaction close will
/// flush instead.
pub fn tick() {
    let in_transaction = with_context(|ctx| ctx.is_transacting());
    if !in_transaction {
        run_turn();
    }
}

fn run_turn() {
    // A flush already on the stack will pick up newly queued work itself.
    let already_flushing = with_context(|ctx| ctx.is_flushing());
    if already_flushing {
        return;
    }

    with_context(|ctx| ctx.set_flushing(true));

    struct FlushGuard;
    impl Drop for FlushGuard {
        fn drop(&mut self) {
            with_context(|ctx| ctx.set_flushing(false));
        }
    }
    let _guard = FlushGuard;

    let mut iterations = 0u32;
    loop {
        let batch = with_context(|ctx| {
            ctx.set_flush_pending(false);
            ctx.take_queue()
        });

        if batch.is_empty() {
            break;
        }

        iterations += 1;
        if iterations > MAX_FLUSH_ITERATIONS {
            panic!(
                "maximum flush depth exceeded; a scheduled task keeps \
                 enqueueing new work every turn"
            );
        }

        let task_count: usize = batch.values().map(|tags| tags.len()).sum();
        debug!(tasks = task_count, iteration = iterations, "flush");

        // The queue is already drained, so tasks enqueueing new work go
        // into a fresh batch instead of mutating the one being executed.
        for (_key, tags) in batch {
            for (_tag, task) in tags {
                task();
            }
        }
    }
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

/// Run `f` with flushing suspended, delivering one coalesced flush when the
/// outermost transaction closes.
///
/// Transactions nest; only the outermost close flushes. A panic inside `f`
/// propagates after the depth counter is restored - writes performed before
/// the panic stay in effect and are still flushed. Transactions delay
/// notification; they do not roll back mutations.
pub fn transaction<R>(f: impl FnOnce() -> R) -> R {
    with_context(|ctx| ctx.enter_transaction());

    struct TransactionGuard;
    impl Drop for TransactionGuard {
        fn drop(&mut self) {
            let depth = with_context(|ctx| ctx.exit_transaction());
            if depth == 0 {
                let pending = with_context(|ctx| ctx.has_queued_work());
                if pending {
                    run_turn();
                }
            }
        }
    }
    let _guard = TransactionGuard;

    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn flush_runs_tasks_in_key_then_tag_order() {
        let order = Rc::new(RefCell::new(Vec::new()));

        for (key, tag, label) in [
            (2, TaskTag::Notify, "b-notify"),
            (1, TaskTag::Recompute, "a-recompute"),
            (1, TaskTag::Notify, "a-notify"),
        ] {
            let order = order.clone();
            schedule(key, tag, Box::new(move || order.borrow_mut().push(label)));
        }

        tick();
        assert_eq!(
            *order.borrow(),
            vec!["b-notify", "a-recompute", "a-notify"]
        );
    }

    #[test]
    fn later_task_replaces_earlier_for_same_key_and_tag() {
        let ran = Rc::new(RefCell::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let ran = ran.clone();
            schedule(9, TaskTag::Notify, Box::new(move || ran.borrow_mut().push(label)));
        }

        tick();
        assert_eq!(*ran.borrow(), vec!["third"]);
    }

    #[test]
    fn task_enqueued_during_flush_runs_in_same_turn() {
        let hits = Rc::new(Cell::new(0));

        let inner = hits.clone();
        schedule(
            1,
            TaskTag::Notify,
            Box::new(move || {
                let inner2 = inner.clone();
                schedule(2, TaskTag::Notify, Box::new(move || inner2.set(inner2.get() + 10)));
                inner.set(inner.get() + 1);
            }),
        );

        tick();
        assert_eq!(hits.get(), 11);
    }

    #[test]
    fn transaction_defers_until_outermost_close() {
        let ran = Rc::new(Cell::new(false));

        transaction(|| {
            transaction(|| {
                let ran = ran.clone();
                schedule(4, TaskTag::Notify, Box::new(move || ran.set(true)));
            });
            // Inner transaction closed, but we are still inside the outer.
            assert!(!ran.get());
        });

        assert!(ran.get());
    }

    #[test]
    fn tick_inside_transaction_is_a_no_op() {
        let ran = Rc::new(Cell::new(false));

        transaction(|| {
            let ran_inner = ran.clone();
            schedule(5, TaskTag::Notify, Box::new(move || ran_inner.set(true)));
            tick();
            assert!(!ran.get());
        });

        assert!(ran.get());
    }

    #[test]
    fn panicking_transaction_restores_depth_and_flushes_prior_writes() {
        let ran = Rc::new(Cell::new(false));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            transaction(|| {
                let ran = ran.clone();
                schedule(6, TaskTag::Notify, Box::new(move || ran.set(true)));
                panic!("mid-transaction failure");
            });
        }));

        assert!(result.is_err());
        assert!(ran.get(), "work queued before the panic still flushes");
        assert!(!crate::core::context::is_transacting());
    }

    #[test]
    fn transaction_returns_closure_result() {
        let value = transaction(|| 41 + 1);
        assert_eq!(value, 42);
    }
}
