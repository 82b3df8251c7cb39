//! Collection metadata per device.

use parking_lot::RwLock;
use pimsync_protocol::{CollectionKey, DataClass, DeviceId};
use std::collections::HashMap;

/// Metadata the engine keeps for one synchronized collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderState {
    /// Data class the collection belongs to.
    pub data_class: DataClass,
    /// Filter parameter last applied to this collection.
    pub last_filter: u32,
}

/// Durable mapping of (device, collection) to collection metadata.
///
/// The registry is fed by the external folder-discovery component; the
/// sync engine only reads it to resolve collections and to detect that
/// the catalog changed under the client. A request naming an
/// unregistered collection, or one whose data class no longer matches,
/// is answered with the collection-unknown condition.
pub struct FolderRegistry {
    folders: RwLock<HashMap<(DeviceId, CollectionKey), FolderState>>,
}

impl FolderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            folders: RwLock::new(HashMap::new()),
        }
    }

    /// Registers or re-registers a collection for a device.
    pub fn register(&self, device: &DeviceId, collection: &CollectionKey, data_class: DataClass) {
        self.folders.write().insert(
            (device.clone(), collection.clone()),
            FolderState {
                data_class,
                last_filter: 0,
            },
        );
    }

    /// Looks up the state of a collection.
    pub fn get(&self, device: &DeviceId, collection: &CollectionKey) -> Option<FolderState> {
        self.folders
            .read()
            .get(&(device.clone(), collection.clone()))
            .copied()
    }

    /// Records the filter applied by the latest completed dialogue.
    pub fn update_filter(&self, device: &DeviceId, collection: &CollectionKey, filter: u32) {
        if let Some(state) = self
            .folders
            .write()
            .get_mut(&(device.clone(), collection.clone()))
        {
            state.last_filter = filter;
        }
    }

    /// Removes one collection.
    pub fn remove(&self, device: &DeviceId, collection: &CollectionKey) {
        self.folders
            .write()
            .remove(&(device.clone(), collection.clone()));
    }

    /// Removes every collection belonging to a device.
    pub fn reset_device(&self, device: &DeviceId) {
        self.folders.write().retain(|(d, _), _| d != device);
    }
}

impl Default for FolderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let registry = FolderRegistry::new();
        let device = DeviceId::from("d1");
        let collection = CollectionKey::from("cal-1");

        assert!(registry.get(&device, &collection).is_none());

        registry.register(&device, &collection, DataClass::Calendar);
        let state = registry.get(&device, &collection).unwrap();
        assert_eq!(state.data_class, DataClass::Calendar);
        assert_eq!(state.last_filter, 0);
    }

    #[test]
    fn update_filter_persists() {
        let registry = FolderRegistry::new();
        let device = DeviceId::from("d1");
        let collection = CollectionKey::from("cal-1");

        registry.register(&device, &collection, DataClass::Calendar);
        registry.update_filter(&device, &collection, 8);

        assert_eq!(registry.get(&device, &collection).unwrap().last_filter, 8);

        // Updating an unregistered collection is a no-op.
        registry.update_filter(&device, &CollectionKey::from("missing"), 4);
        assert!(registry.get(&device, &CollectionKey::from("missing")).is_none());
    }

    #[test]
    fn reset_device_cascades() {
        let registry = FolderRegistry::new();
        let device = DeviceId::from("d1");
        let other = DeviceId::from("d2");

        registry.register(&device, &CollectionKey::from("a"), DataClass::Contacts);
        registry.register(&other, &CollectionKey::from("a"), DataClass::Contacts);

        registry.reset_device(&device);

        assert!(registry.get(&device, &CollectionKey::from("a")).is_none());
        assert!(registry.get(&other, &CollectionKey::from("a")).is_some());
    }
}
