//! The data-controller capability: per-data-class storage access.

use parking_lot::{Mutex, RwLock};
use pimsync_protocol::{CollectionKey, DataClass, ItemId, Payload, Timestamp};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Result type for data-controller calls.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Failure taxonomy of the data controller.
///
/// `Unavailable` is fatal to the collection dialogue; every other
/// variant is folded into a per-item outcome and never aborts a batch.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// The caller may not perform this mutation on the item.
    #[error("access denied")]
    AccessDenied,

    /// The item does not exist.
    #[error("item not found")]
    NotFound,

    /// The item could not be created.
    #[error("create failed: {0}")]
    CreateFailed(String),

    /// The backing store is unreachable.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    /// Any other storage-level failure.
    #[error("{0}")]
    Other(String),
}

impl ControllerError {
    /// Returns true if the failure aborts the collection dialogue
    /// instead of becoming a per-item outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ControllerError::Unavailable(_))
    }
}

/// Storage access for one data class.
///
/// The engine consumes this capability for everything item-shaped; it
/// never touches a data store directly. Implementations exist per data
/// class (contacts, calendar, tasks, mail) and are resolved through a
/// [`ControllerRegistry`] once per request.
pub trait DataController: Send + Sync {
    /// Searches for an existing item matching the payload. Used to
    /// deduplicate adds submitted during an initial sync.
    fn find_matching(
        &self,
        collection: &CollectionKey,
        payload: &Payload,
    ) -> ControllerResult<Option<ItemId>>;

    /// Creates a new item and returns its server id.
    fn create(&self, collection: &CollectionKey, payload: &Payload) -> ControllerResult<ItemId>;

    /// Replaces an existing item's body.
    fn update(
        &self,
        collection: &CollectionKey,
        item: &ItemId,
        payload: &Payload,
    ) -> ControllerResult<()>;

    /// Deletes an item.
    fn delete(&self, collection: &CollectionKey, item: &ItemId) -> ControllerResult<()>;

    /// Returns all current item ids visible under the filter.
    fn all_item_ids(
        &self,
        collection: &CollectionKey,
        filter: u32,
    ) -> ControllerResult<BTreeSet<ItemId>>;

    /// Returns ids of items modified after the given time.
    fn changed_since(
        &self,
        collection: &CollectionKey,
        since: Timestamp,
    ) -> ControllerResult<BTreeSet<ItemId>>;

    /// Reads the bodies of the given items. Ids that no longer exist
    /// are simply absent from the result.
    fn fetch_items(&self, items: &[ItemId]) -> ControllerResult<BTreeMap<ItemId, Payload>>;

    /// The controller's current time.
    ///
    /// Modification stamps and `changed_since` comparisons live on the
    /// controller's clock, not the engine's; the engine records this
    /// value as the last-sync watermark of a dialogue. Controllers whose
    /// store has its own notion of time (a database `now()`) should
    /// return that.
    fn current_timestamp(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Maps each data class to its controller implementation.
///
/// Dispatch happens over the closed [`DataClass`] enum; there is no
/// string-typed class lookup and no process-wide controller instance.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: HashMap<DataClass, Arc<dyn DataController>>,
}

impl ControllerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            controllers: HashMap::new(),
        }
    }

    /// Registers the controller serving a data class.
    pub fn register(mut self, class: DataClass, controller: Arc<dyn DataController>) -> Self {
        self.controllers.insert(class, controller);
        self
    }

    /// Resolves the controller for a data class.
    pub fn resolve(&self, class: DataClass) -> Option<Arc<dyn DataController>> {
        self.controllers.get(&class).cloned()
    }
}

#[derive(Debug, Clone)]
struct StoredItem {
    payload: Payload,
    modified: Timestamp,
}

/// In-memory data controller used by tests and integration harnesses.
///
/// Modification stamps are strictly monotonic even within one
/// millisecond, so `changed_since` behaves deterministically under
/// rapid test mutations. The filter parameter is accepted and ignored.
pub struct MemoryController {
    collections: RwLock<HashMap<CollectionKey, BTreeMap<ItemId, StoredItem>>>,
    last_stamp: Mutex<u64>,
    unavailable: AtomicBool,
    fail_creates: AtomicBool,
    denied: RwLock<BTreeSet<ItemId>>,
}

impl MemoryController {
    /// Creates an empty controller.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            last_stamp: Mutex::new(0),
            unavailable: AtomicBool::new(false),
            fail_creates: AtomicBool::new(false),
            denied: RwLock::new(BTreeSet::new()),
        }
    }

    fn next_stamp(&self) -> Timestamp {
        let mut last = self.last_stamp.lock();
        let now = Timestamp::now().as_millis();
        *last = now.max(*last + 1);
        Timestamp::from_millis(*last)
    }

    fn check_available(&self) -> ControllerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ControllerError::Unavailable("store offline".into()))
        } else {
            Ok(())
        }
    }

    /// Inserts an item with a known id, stamping it as modified now.
    pub fn seed(&self, collection: &CollectionKey, id: impl Into<ItemId>, payload: Payload) {
        let stamp = self.next_stamp();
        self.collections
            .write()
            .entry(collection.clone())
            .or_default()
            .insert(
                id.into(),
                StoredItem {
                    payload,
                    modified: stamp,
                },
            );
    }

    /// Switches the simulated backing store on or off.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes every following create fail.
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Denies mutations against an item id.
    pub fn deny_mutations(&self, id: impl Into<ItemId>) {
        self.denied.write().insert(id.into());
    }

    /// Reads one item's body directly (test helper).
    pub fn get(&self, collection: &CollectionKey, id: &ItemId) -> Option<Payload> {
        self.collections
            .read()
            .get(collection)
            .and_then(|items| items.get(id))
            .map(|item| item.payload.clone())
    }

    /// Number of items currently in the collection (test helper).
    pub fn len(&self, collection: &CollectionKey) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|items| items.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryController {
    fn default() -> Self {
        Self::new()
    }
}

impl DataController for MemoryController {
    fn find_matching(
        &self,
        collection: &CollectionKey,
        payload: &Payload,
    ) -> ControllerResult<Option<ItemId>> {
        self.check_available()?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|items| {
                items
                    .iter()
                    .find(|(_, item)| &item.payload == payload)
                    .map(|(id, _)| id.clone())
            }))
    }

    fn create(&self, collection: &CollectionKey, payload: &Payload) -> ControllerResult<ItemId> {
        self.check_available()?;
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(ControllerError::CreateFailed("store rejected item".into()));
        }

        let id = ItemId::new(uuid::Uuid::new_v4().to_string());
        let stamp = self.next_stamp();
        self.collections
            .write()
            .entry(collection.clone())
            .or_default()
            .insert(
                id.clone(),
                StoredItem {
                    payload: payload.clone(),
                    modified: stamp,
                },
            );
        Ok(id)
    }

    fn update(
        &self,
        collection: &CollectionKey,
        item: &ItemId,
        payload: &Payload,
    ) -> ControllerResult<()> {
        self.check_available()?;
        if self.denied.read().contains(item) {
            return Err(ControllerError::AccessDenied);
        }

        let stamp = self.next_stamp();
        let mut collections = self.collections.write();
        let stored = collections
            .get_mut(collection)
            .and_then(|items| items.get_mut(item))
            .ok_or(ControllerError::NotFound)?;

        stored.payload = payload.clone();
        stored.modified = stamp;
        Ok(())
    }

    fn delete(&self, collection: &CollectionKey, item: &ItemId) -> ControllerResult<()> {
        self.check_available()?;
        if self.denied.read().contains(item) {
            return Err(ControllerError::AccessDenied);
        }

        self.collections
            .write()
            .get_mut(collection)
            .and_then(|items| items.remove(item))
            .map(|_| ())
            .ok_or(ControllerError::NotFound)
    }

    fn all_item_ids(
        &self,
        collection: &CollectionKey,
        _filter: u32,
    ) -> ControllerResult<BTreeSet<ItemId>> {
        self.check_available()?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|items| items.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn changed_since(
        &self,
        collection: &CollectionKey,
        since: Timestamp,
    ) -> ControllerResult<BTreeSet<ItemId>> {
        self.check_available()?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, item)| item.modified > since)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_items(&self, items: &[ItemId]) -> ControllerResult<BTreeMap<ItemId, Payload>> {
        self.check_available()?;
        let collections = self.collections.read();
        let mut found = BTreeMap::new();

        for stored in collections.values() {
            for id in items {
                if let Some(item) = stored.get(id) {
                    found.insert(id.clone(), item.payload.clone());
                }
            }
        }
        Ok(found)
    }

    fn current_timestamp(&self) -> Timestamp {
        // Pins the watermark to the stamp timeline: mutations applied
        // after this call always stamp strictly later, and mutations
        // applied before never stamp later. That keeps `changed_since`
        // exact even when everything happens within one millisecond.
        let mut last = self.last_stamp.lock();
        *last = Timestamp::now().as_millis().max(*last);
        Timestamp::from_millis(*last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection() -> CollectionKey {
        CollectionKey::from("c1")
    }

    #[test]
    fn create_and_fetch() {
        let controller = MemoryController::new();
        let id = controller.create(&collection(), &vec![1, 2, 3]).unwrap();

        let fetched = controller.fetch_items(&[id.clone()]).unwrap();
        assert_eq!(fetched.get(&id), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn find_matching_by_payload() {
        let controller = MemoryController::new();
        controller.seed(&collection(), "existing", vec![7, 7]);

        let hit = controller.find_matching(&collection(), &vec![7, 7]).unwrap();
        assert_eq!(hit, Some(ItemId::from("existing")));

        let miss = controller.find_matching(&collection(), &vec![8]).unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn update_missing_item_is_not_found() {
        let controller = MemoryController::new();
        let result = controller.update(&collection(), &ItemId::from("ghost"), &vec![1]);
        assert!(matches!(result, Err(ControllerError::NotFound)));
    }

    #[test]
    fn denied_items_refuse_mutations() {
        let controller = MemoryController::new();
        controller.seed(&collection(), "locked", vec![1]);
        controller.deny_mutations("locked");

        let update = controller.update(&collection(), &ItemId::from("locked"), &vec![2]);
        assert!(matches!(update, Err(ControllerError::AccessDenied)));

        let delete = controller.delete(&collection(), &ItemId::from("locked"));
        assert!(matches!(delete, Err(ControllerError::AccessDenied)));

        // The item is untouched.
        assert_eq!(controller.get(&collection(), &ItemId::from("locked")), Some(vec![1]));
    }

    #[test]
    fn changed_since_uses_strict_ordering() {
        let controller = MemoryController::new();
        controller.seed(&collection(), "a", vec![1]);

        let all = controller.all_item_ids(&collection(), 0).unwrap();
        assert_eq!(all.len(), 1);

        // Nothing changed after "now".
        let later = Timestamp::from_millis(u64::MAX);
        assert!(controller.changed_since(&collection(), later).unwrap().is_empty());

        // Everything changed after the epoch.
        let epoch = Timestamp::from_millis(0);
        assert_eq!(controller.changed_since(&collection(), epoch).unwrap().len(), 1);
    }

    #[test]
    fn stamps_are_strictly_monotonic() {
        let controller = MemoryController::new();
        controller.seed(&collection(), "a", vec![1]);
        let first = controller.next_stamp();
        controller.update(&collection(), &ItemId::from("a"), &vec![2]).unwrap();

        let changed = controller.changed_since(&collection(), first).unwrap();
        assert_eq!(changed.len(), 1);
    }

    #[test]
    fn unavailable_store_fails_everything() {
        let controller = MemoryController::new();
        controller.seed(&collection(), "a", vec![1]);
        controller.set_unavailable(true);

        let err = controller.all_item_ids(&collection(), 0).unwrap_err();
        assert!(err.is_fatal());

        controller.set_unavailable(false);
        assert!(controller.all_item_ids(&collection(), 0).is_ok());
    }

    #[test]
    fn registry_resolves_per_class() {
        let contacts = Arc::new(MemoryController::new());
        let registry = ControllerRegistry::new().register(DataClass::Contacts, contacts);

        assert!(registry.resolve(DataClass::Contacts).is_some());
        assert!(registry.resolve(DataClass::Email).is_none());
    }
}
