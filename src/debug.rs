// ============================================================================
// ember-cells - Inspection
// Read-only reflection over cells for debugging tools
// ============================================================================
//
// Inspection must not mutate graph state, so a derived cell reports its
// cached value as-is instead of evaluating.
// ============================================================================

use std::fmt::Debug;

use crate::core::types::{AnyDependent, AnySource, CellKind};
use crate::primitives::derived::Derived;
use crate::primitives::resource::Resource;
use crate::primitives::state::State;

/// A read-only summary of a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellInfo {
    pub kind: CellKind,
    /// Debug rendering of the current value or snapshot. A derived that has
    /// never been read reports `<uncomputed>`.
    pub value: String,
    pub subscriber_count: usize,
    pub dependent_count: usize,
}

/// One entry of a derived cell's current dependency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyInfo {
    pub kind: CellKind,
    pub dirty: bool,
}

/// Read-only inspection, implemented by every cell kind.
pub trait Inspect {
    fn inspect(&self) -> CellInfo;
}

impl<T: Clone + Debug + 'static> Inspect for State<T> {
    fn inspect(&self) -> CellInfo {
        CellInfo {
            kind: CellKind::State,
            value: self.with(|v| format!("{v:?}")),
            subscriber_count: self.subscriber_count(),
            dependent_count: self.dependent_count(),
        }
    }
}

impl<T: Clone + Debug + 'static> Inspect for Derived<T> {
    fn inspect(&self) -> CellInfo {
        let node = self.node();
        let value = if node.has_cached() {
            format!("{:?}", self.peek_cached().expect("cached value present"))
        } else {
            String::from("<uncomputed>")
        };
        CellInfo {
            kind: CellKind::Derived,
            value,
            subscriber_count: self.subscriber_count(),
            dependent_count: self.dependent_count(),
        }
    }
}

impl<T: Clone + Debug + 'static> Inspect for Resource<T> {
    fn inspect(&self) -> CellInfo {
        CellInfo {
            kind: CellKind::Resource,
            value: format!("{:?}", self.snapshot()),
            subscriber_count: self.subscriber_count(),
            dependent_count: 0,
        }
    }
}

/// The current dependency list of a derived cell, one entry per edge.
///
/// Reflects the most recent computation; empty before the first read.
pub fn list_dependencies<T: Clone + Debug + 'static>(cell: &Derived<T>) -> Vec<DependencyInfo> {
    let mut out = Vec::new();
    let node: &dyn AnyDependent = &**cell.node();
    node.for_each_dependency(&mut |dep: &std::rc::Rc<dyn AnySource>| {
        out.push(DependencyInfo {
            kind: dep.kind(),
            dirty: dep.is_dirty(),
        });
    });
    out
}
