// ============================================================================
// ember-cells - Devtools Bridge
// Best-effort update events for external tooling
// ============================================================================
//
// Cells enqueue a devtools task alongside their notifications; at flush the
// task emits an UpdateEvent here. Emission must never disturb the data flow:
// listener and sink failures are caught, logged, and discarded.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use tracing::warn;

use crate::core::types::{CellKind, Unsubscribe};

/// A cell update observed by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub kind: CellKind,
    pub subscriber_count: usize,
    /// Debug rendering of the new value or snapshot.
    pub payload: String,
}

/// An injected external consumer of update events. The default is no sink.
pub trait DevtoolsSink {
    fn emit(&self, event: &UpdateEvent);
}

struct Bridge {
    listeners: RefCell<Vec<(u64, Rc<dyn Fn(&UpdateEvent)>)>>,
    next_listener_id: Cell<u64>,
    sink: RefCell<Option<Rc<dyn DevtoolsSink>>>,
}

thread_local! {
    static BRIDGE: Bridge = Bridge {
        listeners: RefCell::new(Vec::new()),
        next_listener_id: Cell::new(0),
        sink: RefCell::new(None),
    };
}

/// Register a local update listener.
pub fn on_update(listener: impl Fn(&UpdateEvent) + 'static) -> Unsubscribe {
    let id = BRIDGE.with(|bridge| {
        let id = bridge.next_listener_id.get();
        bridge.next_listener_id.set(id + 1);
        bridge.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    });
    Box::new(move || {
        BRIDGE.with(|bridge| {
            bridge
                .listeners
                .borrow_mut()
                .retain(|(listener_id, _)| *listener_id != id);
        });
    })
}

/// Install (or clear) the external sink.
pub fn set_sink(sink: Option<Rc<dyn DevtoolsSink>>) {
    BRIDGE.with(|bridge| {
        *bridge.sink.borrow_mut() = sink;
    });
}

/// Emit an event to every listener and the sink, swallowing failures.
pub fn emit(event: &UpdateEvent) {
    let listeners: Vec<Rc<dyn Fn(&UpdateEvent)>> = BRIDGE.with(|bridge| {
        bridge
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    });

    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
            warn!(kind = event.kind.as_str(), "devtools listener panicked; ignoring");
        }
    }

    let sink = BRIDGE.with(|bridge| bridge.sink.borrow().clone());
    if let Some(sink) = sink {
        if catch_unwind(AssertUnwindSafe(|| sink.emit(event))).is_err() {
            warn!(kind = event.kind.as_str(), "devtools sink panicked; ignoring");
        }
    }
}
