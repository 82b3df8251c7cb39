//! Per-collection sync cursor storage.

use crate::error::{EngineError, EngineResult};
use parking_lot::RwLock;
use pimsync_protocol::{CollectionKey, DeviceId, Timestamp};
use std::collections::HashMap;
use tracing::{debug, error};

/// The stored sync state of one (device, collection) pair.
///
/// The counter is a count of completed sync dialogues, not a timestamp;
/// it never wraps or repeats for the lifetime of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCursor {
    /// Number of completed dialogues.
    pub counter: u64,
    /// Snapshot timestamp of the last completed dialogue; incremental
    /// change detection starts here.
    pub last_sync: Timestamp,
}

/// Durable mapping of (device, collection) to the current sync cursor.
pub struct CursorStore {
    cursors: RwLock<HashMap<(DeviceId, CollectionKey), SyncCursor>>,
}

impl CursorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Validates a client-submitted cursor.
    ///
    /// Cursor 0 is always valid and means "start fresh". Any other value
    /// must match the stored counter exactly; a mismatch is the signal
    /// that the client's state was lost.
    pub fn validate(&self, device: &DeviceId, collection: &CollectionKey, cursor: u64) -> bool {
        if cursor == 0 {
            return true;
        }

        self.cursors
            .read()
            .get(&(device.clone(), collection.clone()))
            .map(|stored| stored.counter == cursor)
            .unwrap_or(false)
    }

    /// Returns the stored cursor, if any.
    pub fn get(&self, device: &DeviceId, collection: &CollectionKey) -> Option<SyncCursor> {
        self.cursors
            .read()
            .get(&(device.clone(), collection.clone()))
            .copied()
    }

    /// Advances the cursor after a completed dialogue.
    ///
    /// Counters only move forward; an attempt to store a counter at or
    /// below the current value is a defect and is rejected.
    pub fn advance(
        &self,
        device: &DeviceId,
        collection: &CollectionKey,
        new_counter: u64,
        timestamp: Timestamp,
    ) -> EngineResult<()> {
        let mut cursors = self.cursors.write();
        let key = (device.clone(), collection.clone());

        if let Some(stored) = cursors.get(&key) {
            if new_counter <= stored.counter {
                error!(
                    device = %device,
                    collection = %collection,
                    stored = stored.counter,
                    attempted = new_counter,
                    "rejected cursor regression"
                );
                return Err(EngineError::CursorRegression {
                    device: device.clone(),
                    collection: collection.clone(),
                    stored: stored.counter,
                    attempted: new_counter,
                });
            }
        }

        debug!(device = %device, collection = %collection, counter = new_counter, "cursor advanced");
        cursors.insert(
            key,
            SyncCursor {
                counter: new_counter,
                last_sync: timestamp,
            },
        );
        Ok(())
    }

    /// Removes the cursor for one collection.
    pub fn reset(&self, device: &DeviceId, collection: &CollectionKey) {
        self.cursors
            .write()
            .remove(&(device.clone(), collection.clone()));
    }

    /// Removes every cursor belonging to a device.
    pub fn reset_device(&self, device: &DeviceId) {
        self.cursors.write().retain(|(d, _), _| d != device);
    }
}

impl Default for CursorStore {
    fn default() -> Self {
        Self::new()
    }
}
