//! Per-device ledger of items already delivered to the client.

use parking_lot::RwLock;
use pimsync_protocol::{CollectionKey, DataClass, DeviceId, ItemId};
use std::collections::{BTreeSet, HashMap};

type LedgerKey = (DeviceId, DataClass, CollectionKey);

/// Tracks which items each device has already received per collection.
///
/// The delta computer diffs this ledger against the data controller's
/// current id set: ids missing from the ledger are true adds, ledger
/// entries without a server item are true deletes. Diffing the ledger
/// instead of trusting timestamps keeps deltas correct across filter
/// changes and lost responses.
pub struct ContentStateTracker {
    ledgers: RwLock<HashMap<LedgerKey, BTreeSet<ItemId>>>,
}

impl ContentStateTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            ledgers: RwLock::new(HashMap::new()),
        }
    }

    /// Records that an item has been delivered to the device.
    ///
    /// Marking an already-marked item is a no-op; client retries replay
    /// the same response-processing step and must not fail.
    pub fn mark_delivered(
        &self,
        device: &DeviceId,
        class: DataClass,
        collection: &CollectionKey,
        item: ItemId,
    ) {
        self.ledgers
            .write()
            .entry((device.clone(), class, collection.clone()))
            .or_default()
            .insert(item);
    }

    /// Forgets that an item was delivered. Unmarking an absent entry is
    /// a no-op.
    pub fn unmark(
        &self,
        device: &DeviceId,
        class: DataClass,
        collection: &CollectionKey,
        item: &ItemId,
    ) {
        if let Some(ledger) = self
            .ledgers
            .write()
            .get_mut(&(device.clone(), class, collection.clone()))
        {
            ledger.remove(item);
        }
    }

    /// Returns the sorted set of delivered item ids for one collection.
    pub fn delivered_set(
        &self,
        device: &DeviceId,
        class: DataClass,
        collection: &CollectionKey,
    ) -> BTreeSet<ItemId> {
        self.ledgers
            .read()
            .get(&(device.clone(), class, collection.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Purges the ledger for one collection (cursor reset).
    pub fn reset(&self, device: &DeviceId, class: DataClass, collection: &CollectionKey) {
        self.ledgers
            .write()
            .remove(&(device.clone(), class, collection.clone()));
    }

    /// Purges every ledger belonging to a device.
    pub fn reset_device(&self, device: &DeviceId) {
        self.ledgers.write().retain(|(d, _, _), _| d != device);
    }
}

impl Default for ContentStateTracker {
    fn default() -> Self {
        Self::new()
    }
}
