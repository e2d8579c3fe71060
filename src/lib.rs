// ============================================================================
// ember-cells - Batched Reactive State for Rust
// ============================================================================
//
// A small reactive dependency-graph engine: mutable state cells, lazily
// memoized derived values, and async resource cells stay consistent with
// each other while redundant recomputation and notification coalesce into a
// single batch per turn.
//
// Execution is cooperative and single-threaded: cells live behind Rc, the
// runtime context is thread-local, and nothing locks. The only suspension
// point is a resource's fetch, driven on a tokio current-thread LocalSet.
// ============================================================================

pub mod core;
pub mod primitives;
pub mod reactivity;

pub mod async_helpers;
pub mod debug;
pub mod devtools;
pub mod helpers;
pub mod middleware;
pub mod persist;
pub mod server;
pub mod ssr;

// Re-export the primary API at the crate root
pub use crate::core::error::{CellError, FetchError, StorageError};
pub use crate::core::types::{CellKind, EqualsFn, Unsubscribe, default_equals};
pub use primitives::derived::{Derived, derived, derived_with_equals};
pub use primitives::resource::{Resource, ResourceSnapshot, resource};
pub use primitives::state::{State, state, state_with_equals};
pub use reactivity::equality::{
    always_equals, equals, never_equals, safe_equals_f32, safe_equals_f64,
};
pub use reactivity::scheduling::{tick, transaction};

// Re-export collaborator surfaces
pub use async_helpers::{PollingResource, ResourceCache, from_future, poll};
pub use debug::{CellInfo, DependencyInfo, Inspect, list_dependencies};
pub use devtools::{DevtoolsSink, UpdateEvent, on_update, set_sink};
pub use helpers::{reset, select};
pub use middleware::{Getter, Middleware, Setter, WithMiddleware, with_middleware};
pub use persist::{MemoryStorage, Storage, persist};
pub use server::{CacheStore, MemoryCache, ServerResource, ServerResourceOptions, server_resource};
pub use ssr::{
    DehydratedResource, dehydrate_resource, dehydrate_state, hydrate_resource, hydrate_state,
};

// =============================================================================
// TESTS
// =============================================================================
