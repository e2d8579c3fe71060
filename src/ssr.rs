// ============================================================================
// ember-cells - Server-Side Rendering
// Dehydrate cells into plain payloads and hydrate them back
// ============================================================================
//
// Dehydrated payloads are plain serde-serializable values so a server can
// embed them in a rendered page. Hydrating a resource force-sets its
// snapshot without fetching; the generation bump makes the construction-time
// fetch, still in flight, land stale instead of clobbering hydrated data.
// ============================================================================

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::core::error::FetchError;
use crate::primitives::resource::Resource;
use crate::primitives::state::State;

/// A resource snapshot in transportable form. The error field carries only
/// the message; hydration rebuilds a [`FetchError`] from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DehydratedResource<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Read a state cell's current value for embedding in a payload.
pub fn dehydrate_state<T: Clone + Debug + 'static>(cell: &State<T>) -> T {
    cell.with(|value| value.clone())
}

/// Apply a server-provided value to a state cell.
pub fn hydrate_state<T: Clone + Debug + 'static>(cell: &State<T>, value: T) {
    cell.set(value);
}

/// Capture a resource's observable snapshot.
pub fn dehydrate_resource<T: Clone + Debug + 'static>(cell: &Resource<T>) -> DehydratedResource<T> {
    let snapshot = cell.snapshot();
    DehydratedResource {
        data: snapshot.data.clone(),
        loading: snapshot.loading,
        error: snapshot.error.as_ref().map(|e| e.message().to_string()),
    }
}

/// Force-set a resource's snapshot from a dehydrated payload, bypassing a
/// real fetch. Subscribers are notified immediately.
pub fn hydrate_resource<T: Clone + Debug + 'static>(
    cell: &Resource<T>,
    payload: DehydratedResource<T>,
) {
    cell.hydrate(
        payload.data,
        payload.loading,
        payload.error.map(FetchError::new),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::resource::resource;
    use crate::primitives::state::state;
    use std::cell::Cell;
    use std::rc::Rc;
    use tokio::task::LocalSet;

    #[test]
    fn state_round_trip() {
        let source = state(17);
        let payload = dehydrate_state(&source);

        let target = state(0);
        hydrate_state(&target, payload);
        assert_eq!(target.get(), 17);
    }

    #[tokio::test]
    async fn resource_round_trip_without_refetch() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let source = resource({
                    let calls = calls.clone();
                    move || {
                        calls.set(calls.get() + 1);
                        async move { Ok::<_, String>(String::from("rendered")) }
                    }
                });
                source.refresh().await;
                let payload = dehydrate_resource(&source);

                let target_calls = Rc::new(Cell::new(0));
                let target = resource({
                    let target_calls = target_calls.clone();
                    move || {
                        target_calls.set(target_calls.get() + 1);
                        async move { Ok::<_, String>(String::from("fetched")) }
                    }
                });
                hydrate_resource(&target, payload);

                assert_eq!(target.data(), Some(String::from("rendered")));
                assert!(!target.loading());
                assert_eq!(target.error(), None);

                // The construction-time fetch resolves later but is stale.
                for _ in 0..16 {
                    tokio::task::yield_now().await;
                }
                assert_eq!(target.data(), Some(String::from("rendered")));
            })
            .await;
    }

    #[tokio::test]
    async fn error_snapshot_round_trips_as_message() {
        LocalSet::new()
            .run_until(async {
                let source: Resource<i32> = resource(|| async { Err(String::from("down")) });
                source.refresh().await;

                let payload = dehydrate_resource(&source);
                assert_eq!(payload.error.as_deref(), Some("down"));

                let target: Resource<i32> = resource(|| async { Ok::<_, String>(0) });
                hydrate_resource(&target, payload);
                assert_eq!(target.error(), Some(FetchError::new("down")));
            })
            .await;
    }

    #[test]
    fn dehydrated_payload_serializes() {
        let payload = DehydratedResource {
            data: Some(5),
            loading: false,
            error: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: DehydratedResource<i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
