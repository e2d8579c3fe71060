// ============================================================================
// ember-cells - Persistence
// Write-through storage for state cells
// ============================================================================
//
// The persistence layer is a one-way consumer of the core's public contract:
// it reads an initial value at attach time and writes through on every
// subscription notification. Storage and serialization failures are logged
// and swallowed; they never interrupt the notification path.
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::core::error::StorageError;
use crate::core::types::Unsubscribe;
use crate::primitives::state::State;

/// A string-keyed storage backend.
pub trait Storage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory storage, the default backend.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RefCell<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Attach persistence to a state cell.
///
/// Reads `key` from `storage` and, when a stored value exists and differs,
/// applies it to the cell (the cell's own equality gate avoids a redundant
/// notification). Every subsequent subscription notification is written
/// through. Returns the write-through unsubscriber; dropping it without
/// calling stops persistence only when the cell itself is dropped.
pub fn persist<T>(cell: &State<T>, key: &str, storage: Rc<dyn Storage>) -> Unsubscribe
where
    T: Clone + Debug + Serialize + DeserializeOwned + 'static,
{
    match storage.get(key) {
        Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                cell.set(value);
            }
            Err(err) => warn!(key, %err, "ignoring unreadable persisted value"),
        },
        Ok(None) => {}
        Err(err) => warn!(key, %err, "storage read failed; using initial value"),
    }

    let key = key.to_string();
    cell.subscribe(move |value| match serde_json::to_string(value) {
        Ok(raw) => {
            if let Err(err) = storage.set(&key, &raw) {
                warn!(key = %key, %err, "storage write failed; value not persisted");
            }
        }
        Err(err) => warn!(key = %key, %err, "value not serializable; not persisted"),
    })
}
