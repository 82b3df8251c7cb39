//! Transient remainders of windowed deltas.

use crate::delta::DeltaSet;
use parking_lot::RwLock;
use pimsync_protocol::{CollectionKey, DataClass, DeviceId, Timestamp};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// The unsent remainder of a windowed delta.
///
/// A continuation exists only between a `more_available` response and
/// the client's follow-up request with the same cursor. It carries the
/// snapshot timestamp of the dialogue that computed the delta, which
/// becomes the stored last-sync when the drain completes, so changes
/// that land while a window drains are picked up by the next full delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    /// The collection the remainder belongs to.
    pub collection: CollectionKey,
    /// The cursor the client must re-present to drain further.
    pub cursor: u64,
    /// Items not yet sent.
    pub remainder: DeltaSet,
    /// Delta-computation time of the originating dialogue.
    pub snapshot: Timestamp,
}

struct StoredContinuation {
    continuation: Continuation,
    stored_at: Instant,
}

/// Keyed store of windowed-delta remainders, with expiry.
///
/// Keyed by (device, data class); a newer continuation for the same key
/// replaces the old one, and an entry is discarded when it is consumed,
/// superseded by a different cursor, or older than the TTL.
pub struct ContinuationStore {
    entries: RwLock<HashMap<(DeviceId, DataClass), StoredContinuation>>,
    ttl: Duration,
}

impl ContinuationStore {
    /// Creates a store with the given entry lifetime.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Stores a continuation, replacing any previous one for the key.
    pub fn store(&self, device: &DeviceId, class: DataClass, continuation: Continuation) {
        debug!(
            device = %device,
            class = %class,
            cursor = continuation.cursor,
            remaining = continuation.remainder.total(),
            "stored continuation"
        );
        self.entries.write().insert(
            (device.clone(), class),
            StoredContinuation {
                continuation,
                stored_at: Instant::now(),
            },
        );
    }

    /// Takes the continuation matching the presented cursor.
    ///
    /// Whatever entry is found for the key is removed: a matching fresh
    /// one is returned, while a stale one (expired, keyed to another
    /// cursor, or belonging to a sibling collection of the same class)
    /// is silently dropped so the caller recomputes from the ledger.
    pub fn take(
        &self,
        device: &DeviceId,
        class: DataClass,
        collection: &CollectionKey,
        cursor: u64,
    ) -> Option<Continuation> {
        let stored = self.entries.write().remove(&(device.clone(), class))?;

        if stored.continuation.cursor != cursor || &stored.continuation.collection != collection {
            debug!(device = %device, class = %class, "discarded superseded continuation");
            return None;
        }
        if stored.stored_at.elapsed() > self.ttl {
            debug!(device = %device, class = %class, "discarded expired continuation");
            return None;
        }

        Some(stored.continuation)
    }

    /// Drops any continuation for the key.
    pub fn remove(&self, device: &DeviceId, class: DataClass) {
        self.entries.write().remove(&(device.clone(), class));
    }

    /// Drops every continuation belonging to a device.
    pub fn reset_device(&self, device: &DeviceId) {
        self.entries.write().retain(|(d, _), _| d != device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pimsync_protocol::ItemId;
    use std::collections::BTreeSet;

    fn remainder(ids: &[&str]) -> DeltaSet {
        DeltaSet {
            adds: ids.iter().map(|id| ItemId::from(*id)).collect(),
            changes: BTreeSet::new(),
            deletes: BTreeSet::new(),
        }
    }

    fn continuation(cursor: u64) -> Continuation {
        Continuation {
            collection: CollectionKey::from("c1"),
            cursor,
            remainder: remainder(&["a", "b"]),
            snapshot: Timestamp::from_millis(100),
        }
    }

    fn c1() -> CollectionKey {
        CollectionKey::from("c1")
    }

    #[test]
    fn take_matching_cursor() {
        let store = ContinuationStore::new(Duration::from_secs(60));
        let device = DeviceId::from("d1");

        store.store(&device, DataClass::Contacts, continuation(3));

        let taken = store.take(&device, DataClass::Contacts, &c1(), 3).unwrap();
        assert_eq!(taken.cursor, 3);
        assert_eq!(taken.remainder.total(), 2);

        // Consumed: a second take finds nothing.
        assert!(store.take(&device, DataClass::Contacts, &c1(), 3).is_none());
    }

    #[test]
    fn mismatching_cursor_discards_entry() {
        let store = ContinuationStore::new(Duration::from_secs(60));
        let device = DeviceId::from("d1");

        store.store(&device, DataClass::Contacts, continuation(3));

        assert!(store.take(&device, DataClass::Contacts, &c1(), 4).is_none());
        // The stale entry is gone, not kept around.
        assert!(store.take(&device, DataClass::Contacts, &c1(), 3).is_none());
    }

    #[test]
    fn sibling_collection_cannot_drain_the_entry() {
        let store = ContinuationStore::new(Duration::from_secs(60));
        let device = DeviceId::from("d1");

        store.store(&device, DataClass::Contacts, continuation(3));

        let sibling = CollectionKey::from("c2");
        assert!(store.take(&device, DataClass::Contacts, &sibling, 3).is_none());
    }

    #[test]
    fn expired_entry_is_dropped() {
        let store = ContinuationStore::new(Duration::ZERO);
        let device = DeviceId::from("d1");

        store.store(&device, DataClass::Contacts, continuation(3));
        std::thread::sleep(Duration::from_millis(5));

        assert!(store.take(&device, DataClass::Contacts, &c1(), 3).is_none());
    }

    #[test]
    fn keys_are_scoped_per_class() {
        let store = ContinuationStore::new(Duration::from_secs(60));
        let device = DeviceId::from("d1");

        store.store(&device, DataClass::Contacts, continuation(3));

        assert!(store.take(&device, DataClass::Tasks, &c1(), 3).is_none());
        assert!(store.take(&device, DataClass::Contacts, &c1(), 3).is_some());
    }

    #[test]
    fn reset_device_cascades() {
        let store = ContinuationStore::new(Duration::from_secs(60));
        let device = DeviceId::from("d1");
        let other = DeviceId::from("d2");

        store.store(&device, DataClass::Contacts, continuation(3));
        store.store(&other, DataClass::Contacts, continuation(5));

        store.reset_device(&device);

        assert!(store.take(&device, DataClass::Contacts, &c1(), 3).is_none());
        assert!(store.take(&other, DataClass::Contacts, &c1(), 5).is_some());
    }
}
