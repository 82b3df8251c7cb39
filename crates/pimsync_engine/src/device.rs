//! Registered devices.

use parking_lot::RwLock;
use pimsync_protocol::DeviceId;
use std::collections::HashMap;

/// A device known to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Stable identifier the device presents on every request.
    pub id: DeviceId,
    /// Account owning the device.
    pub account: String,
    /// Protocol version the device speaks.
    pub protocol_version: u16,
}

/// Durable mapping of device id to device record.
///
/// A device's identity is immutable once registered; re-registering
/// refreshes only its mutable attributes (the device-info refresh the
/// protocol performs when a client reconnects with new metadata).
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a device, or refreshes it if already known.
    pub fn register(&self, device: Device) -> Device {
        let mut devices = self.devices.write();
        match devices.get_mut(&device.id) {
            Some(existing) => {
                existing.account = device.account;
                existing.protocol_version = device.protocol_version;
                existing.clone()
            }
            None => {
                devices.insert(device.id.clone(), device.clone());
                device
            }
        }
    }

    /// Looks up a device.
    pub fn get(&self, id: &DeviceId) -> Option<Device> {
        self.devices.read().get(id).cloned()
    }

    /// Removes a device record. Cascade cleanup of the device's sync
    /// state is the orchestrator's job.
    pub fn remove(&self, id: &DeviceId) -> Option<Device> {
        self.devices.write().remove(id)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(version: u16) -> Device {
        Device {
            id: DeviceId::from("phone-1"),
            account: "alice".into(),
            protocol_version: version,
        }
    }

    #[test]
    fn register_then_lookup() {
        let registry = DeviceRegistry::new();
        registry.register(device(25));

        let found = registry.get(&DeviceId::from("phone-1")).unwrap();
        assert_eq!(found.account, "alice");
        assert_eq!(found.protocol_version, 25);
    }

    #[test]
    fn reregistering_refreshes_attributes() {
        let registry = DeviceRegistry::new();
        registry.register(device(25));
        registry.register(device(141));

        let found = registry.get(&DeviceId::from("phone-1")).unwrap();
        assert_eq!(found.protocol_version, 141);
    }

    #[test]
    fn remove_returns_the_record() {
        let registry = DeviceRegistry::new();
        registry.register(device(25));

        assert!(registry.remove(&DeviceId::from("phone-1")).is_some());
        assert!(registry.get(&DeviceId::from("phone-1")).is_none());
        assert!(registry.remove(&DeviceId::from("phone-1")).is_none());
    }
}
