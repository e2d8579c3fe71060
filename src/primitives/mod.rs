// ============================================================================
// ember-cells - Primitives Module
// The three cell kinds: state, derived, resource
// ============================================================================

pub mod derived;
pub mod resource;
pub mod state;

// Re-export for convenience
pub use derived::{Derived, DerivedInner, derived, derived_with_equals};
pub use resource::{Resource, ResourceInner, ResourceSnapshot, resource};
pub use state::{State, StateNode, state, state_with_equals};
