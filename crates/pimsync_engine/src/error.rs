//! Error types for the sync engine.

use pimsync_protocol::{CollectionKey, DataClass, DeviceId};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while driving a sync dialogue.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The data controller's backing store is unreachable; the
    /// collection dialogue is aborted with cursor and ledger untouched.
    #[error("data controller unavailable for {class}: {message}")]
    ControllerUnavailable {
        /// Data class of the failing controller.
        class: DataClass,
        /// Underlying failure description.
        message: String,
    },

    /// No data controller is registered for the data class.
    #[error("no data controller registered for {0}")]
    UnknownDataClass(DataClass),

    /// Attempted to move a cursor backwards or in place. This is a
    /// programming defect, never a protocol condition.
    #[error(
        "cursor regression for {device}/{collection}: stored {stored}, attempted {attempted}"
    )]
    CursorRegression {
        /// The device owning the cursor.
        device: DeviceId,
        /// The collection the cursor belongs to.
        collection: CollectionKey,
        /// Counter currently stored.
        stored: u64,
        /// Counter the caller tried to store.
        attempted: u64,
    },
}

impl EngineError {
    /// Returns true if an identical retry of the dialogue is safe.
    ///
    /// Every engine error leaves cursor and ledger unmodified, so all of
    /// them are retryable; the distinction matters for callers that map
    /// errors onto transport-level backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ControllerUnavailable { .. })
    }
}
