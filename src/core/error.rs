// ============================================================================
// ember-cells - Error Types
// The error taxonomy for the reactive engine and its collaborators
// ============================================================================

use thiserror::Error;

/// Errors raised by the reactive graph itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    /// A derived cell's compute function re-entered itself, directly or
    /// through a chain of other cells. Surfaced synchronously to the reader;
    /// the cell's dirty flag is reset first so a later, non-circular read
    /// can retry cleanly.
    #[error("circular dependency detected in derived computation")]
    CircularDependency,
}

/// A normalized resource fetch failure.
///
/// Fetch functions may fail with any error type; the failure is captured
/// into the resource's snapshot as a `FetchError` carrying the stringified
/// cause. It is never returned from `refresh()` itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetchError {
    message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A persistence backend failure.
///
/// Storage errors are swallowed at the persistence boundary (logged, never
/// propagated into the notification path), but backends report them
/// explicitly so callers wiring their own storage can observe failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("storage backend error: {0}")]
pub struct StorageError(pub String);
