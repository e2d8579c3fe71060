// ============================================================================
// ember-cells - Core Module
// Fundamental types, errors, and the thread-local runtime context
// ============================================================================

pub mod context;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use context::{RuntimeContext, is_tracking, is_transacting, with_context};
pub use error::{CellError, FetchError, StorageError};
pub use types::{
    AnyDependent, AnySource, CellKind, EqualsFn, Unsubscribe, default_equals, next_cell_id,
};
