// ============================================================================
// ember-cells - Runtime Context
// Thread-local state shared by tracking and scheduling
// ============================================================================
//
// The tracker stack and the scheduler queue are process-wide shared state in
// the engine's design, but they are owned by one context object and mutated
// only synchronously. Keeping the context thread-local (instead of a true
// global) gives every thread - in particular, every test thread - its own
// isolated runtime instance.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::core::types::AnyDependent;
use crate::reactivity::scheduling::{Task, TaskTag};

/// Thread-local runtime state for the reactive engine.
pub struct RuntimeContext {
    /// Stack of derived cells currently computing. The innermost entry is
    /// the active tracker; reads register edges against it.
    tracker_stack: RefCell<Vec<Rc<dyn AnyDependent>>>,

    /// Pending tasks, keyed by cell id and deduplicated by tag. Both maps
    /// preserve insertion order, so a flush runs tasks in queue order by
    /// key, then by tag insertion order.
    queue: RefCell<IndexMap<u64, IndexMap<TaskTag, Task>>>,

    /// Whether a flush is already scheduled for the current turn.
    flush_pending: Cell<bool>,

    /// Open transaction depth. While non-zero, flushes are suspended.
    transaction_depth: Cell<u32>,

    /// Whether a flush is executing right now.
    flushing: Cell<bool>,
}

impl RuntimeContext {
    fn new() -> Self {
        Self {
            tracker_stack: RefCell::new(Vec::new()),
            queue: RefCell::new(IndexMap::new()),
            flush_pending: Cell::new(false),
            transaction_depth: Cell::new(0),
            flushing: Cell::new(false),
        }
    }

    // =========================================================================
    // TRACKER STACK
    // =========================================================================

    pub fn push_tracker(&self, dependent: Rc<dyn AnyDependent>) {
        self.tracker_stack.borrow_mut().push(dependent);
    }

    pub fn pop_tracker(&self) -> Option<Rc<dyn AnyDependent>> {
        self.tracker_stack.borrow_mut().pop()
    }

    /// The innermost active tracker, if any computation is running.
    pub fn current_tracker(&self) -> Option<Rc<dyn AnyDependent>> {
        self.tracker_stack.borrow().last().cloned()
    }

    pub fn tracker_depth(&self) -> usize {
        self.tracker_stack.borrow().len()
    }

    // =========================================================================
    // SCHEDULER QUEUE
    // =========================================================================

    /// Insert a task for (key, tag), replacing any task already queued under
    /// the same pair. Last enqueue in a turn wins.
    pub fn enqueue(&self, key: u64, tag: TaskTag, task: Task) {
        self.queue
            .borrow_mut()
            .entry(key)
            .or_default()
            .insert(tag, task);
    }

    /// Atomically drain the whole queue. The queue is empty when this
    /// returns, so tasks that enqueue new work during execution land in a
    /// fresh batch.
    pub fn take_queue(&self) -> IndexMap<u64, IndexMap<TaskTag, Task>> {
        self.queue.replace(IndexMap::new())
    }

    pub fn queued_task_count(&self) -> usize {
        self.queue.borrow().values().map(IndexMap::len).sum()
    }

    pub fn has_queued_work(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    pub fn set_flush_pending(&self, pending: bool) -> bool {
        self.flush_pending.replace(pending)
    }

    pub fn is_flush_pending(&self) -> bool {
        self.flush_pending.get()
    }

    pub fn set_flushing(&self, flushing: bool) -> bool {
        self.flushing.replace(flushing)
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.get()
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    /// Increment transaction depth, returning the new depth.
    pub fn enter_transaction(&self) -> u32 {
        let depth = self.transaction_depth.get() + 1;
        self.transaction_depth.set(depth);
        depth
    }

    /// Decrement transaction depth, returning the new depth.
    pub fn exit_transaction(&self) -> u32 {
        let depth = self.transaction_depth.get().saturating_sub(1);
        self.transaction_depth.set(depth);
        depth
    }

    pub fn is_transacting(&self) -> bool {
        self.transaction_depth.get() > 0
    }
}

// =============================================================================
// THREAD-LOCAL ACCESS
// =============================================================================

thread_local! {
    static CONTEXT: RuntimeContext = RuntimeContext::new();
}

/// Access the thread-local runtime context.
pub fn with_context<R>(f: impl FnOnce(&RuntimeContext) -> R) -> R {
    CONTEXT.with(f)
}

/// Whether a derived computation is currently tracking reads.
pub fn is_tracking() -> bool {
    with_context(|ctx| ctx.tracker_depth() > 0)
}

/// Whether a transaction is currently open on this thread.
pub fn is_transacting() -> bool {
    with_context(|ctx| ctx.is_transacting())
}
