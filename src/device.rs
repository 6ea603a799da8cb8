//! Rendering devices.
//!
//! A [`Device`] describes a graphics device surfaces can render on directly. Devices are
//! shared between surfaces through a [`DeviceRegistry`], which hands out the same
//! `Arc<Device>` for the same [`DeviceId`] and remembers the first registered device as the
//! default one.
//!
//! # Example
//!
//! ```rust
//! use gosub_surface::device::{Device, DeviceId, DeviceRegistry};
//!
//! let registry = DeviceRegistry::new();
//! registry.init();
//!
//! let dev = registry
//!     .acquire(DeviceId(226), |id| Ok(Device::new(id, 0x8086, 0x2a42, "card0")))
//!     .unwrap();
//! assert_eq!(registry.default_device().unwrap().id, dev.id);
//!
//! drop(dev);
//! assert!(registry.release(DeviceId(226)));
//! registry.shutdown();
//! ```

use crate::errors::SurfaceError;
use hashbrown::HashMap;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};

/// Platform identity of a device (its device number).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub vendor_id: u32,
    pub chip_id: u32,
    pub name: String,
}

impl Device {
    pub fn new(id: DeviceId, vendor_id: u32, chip_id: u32, name: &str) -> Self {
        Self {
            id,
            vendor_id,
            chip_id,
            name: name.to_string(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    initialized: bool,
    devices: HashMap<DeviceId, Arc<Device>>,
    default: Option<DeviceId>,
}

/// Known devices, keyed by identity.
///
/// The registry must be initialized before use and can be shut down and initialized again.
#[derive(Default)]
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
}

lazy_static! {
    static ref GLOBAL_REGISTRY: DeviceRegistry = DeviceRegistry::new();
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry. It starts uninitialized.
    pub fn global() -> &'static DeviceRegistry {
        &GLOBAL_REGISTRY
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn init(&self) {
        let mut state = self.lock();
        if !state.initialized {
            log::debug!("DeviceRegistry: initialized");
            state.initialized = true;
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Forgets every device. Surfaces still holding a device keep it alive on their own.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if !state.devices.is_empty() {
            log::debug!("DeviceRegistry: dropping {} device(s) on shutdown", state.devices.len());
        }
        state.devices.clear();
        state.default = None;
        state.initialized = false;
    }

    /// Returns the known device for `id`, or registers the one built by `create`.
    ///
    /// The first registered device becomes the default device.
    pub fn acquire<F>(&self, id: DeviceId, create: F) -> Result<Arc<Device>, SurfaceError>
    where
        F: FnOnce(DeviceId) -> Result<Device, SurfaceError>,
    {
        {
            let state = self.lock();
            if !state.initialized {
                return Err(SurfaceError::InvalidArgument("device registry is not initialized"));
            }
            if let Some(device) = state.devices.get(&id) {
                return Ok(device.clone());
            }
        }

        // Built without holding the lock; another caller may have registered it meanwhile.
        let device = Arc::new(create(id)?);

        let mut state = self.lock();
        if !state.initialized {
            return Err(SurfaceError::InvalidArgument("device registry is not initialized"));
        }
        let device = state.devices.entry(id).or_insert(device).clone();
        if state.default.is_none() {
            state.default = Some(id);
        }
        log::debug!("DeviceRegistry: device {} ({}) registered", id, device.name);
        Ok(device)
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.lock().devices.get(&id).cloned()
    }

    pub fn default_device(&self) -> Option<Arc<Device>> {
        let state = self.lock();
        state.default.and_then(|id| state.devices.get(&id).cloned())
    }

    /// Makes `id` the default device. Returns false for unknown devices.
    pub fn set_default(&self, id: DeviceId) -> bool {
        let mut state = self.lock();
        if !state.devices.contains_key(&id) {
            return false;
        }
        state.default = Some(id);
        true
    }

    /// Drops a device nobody else refers to. Returns false while it is still in use or unknown.
    pub fn release(&self, id: DeviceId) -> bool {
        let mut state = self.lock();
        match state.devices.get(&id) {
            Some(device) if Arc::strong_count(device) == 1 => {}
            Some(_) => return false,
            None => return false,
        }

        state.devices.remove(&id);
        if state.default == Some(id) {
            state.default = None;
        }
        log::debug!("DeviceRegistry: device {} released", id);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One row of the [`DriverTable`]. `None` matches any id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverEntry {
    pub vendor_id: Option<u32>,
    pub chip_id: Option<u32>,
    pub driver: String,
    pub description: String,
}

/// Maps PCI vendor and chip ids to the driver handling them. First match wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverTable {
    entries: Vec<DriverEntry>,
}

impl DriverTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the drivers known to the direct-rendering backend.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for (chip, desc) in [
            (0x29a2, "Intel(R) 965G"),
            (0x2982, "Intel(R) G35"),
            (0x2992, "Intel(R) 965Q"),
            (0x2972, "Intel(R) 946GZ"),
            (0x2a02, "Intel(R) 965GM"),
            (0x2a12, "Intel(R) 965GME/GLE"),
            (0x2e02, "Intel(R) Integrated Graphics Device"),
            (0x2e22, "Intel(R) G45/G43"),
            (0x2e12, "Intel(R) Q45/Q43"),
            (0x2e32, "Intel(R) G41"),
            (0x2a42, "Mobile Intel(R) GM45 Express"),
        ] {
            table.add(Some(0x8086), Some(chip), "i965", desc);
        }
        for (chip, desc) in [
            (0x2582, "Intel(R) 915G"),
            (0x2592, "Intel(R) 915GM"),
            (0x258a, "Intel(R) E7221G"),
            (0x2772, "Intel(R) 945G"),
            (0x27a2, "Intel(R) 945GM"),
            (0x27ae, "Intel(R) 945GME"),
            (0x29c2, "Intel(R) G33"),
            (0x29b2, "Intel(R) Q35"),
            (0x29d2, "Intel(R) Q33"),
            (0xa011, "Intel(R) Pineview M"),
            (0xa001, "Intel(R) Pineview"),
        ] {
            table.add(Some(0x8086), Some(chip), "i915", desc);
        }
        table.add(Some(0x8086), None, "intel", "Other Intel graphics devices");
        table.add(Some(0x1002), None, "radeon", "AMD Radeon graphics devices");
        table
    }

    pub fn add(&mut self, vendor_id: Option<u32>, chip_id: Option<u32>, driver: &str, description: &str) {
        self.entries.push(DriverEntry {
            vendor_id,
            chip_id,
            driver: driver.to_string(),
            description: description.to_string(),
        });
    }

    pub fn lookup(&self, vendor_id: u32, chip_id: u32) -> Option<&DriverEntry> {
        self.entries.iter().find(|e| {
            e.vendor_id.map_or(true, |v| v == vendor_id) && e.chip_id.map_or(true, |c| c == chip_id)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intel(id: DeviceId) -> Result<Device, SurfaceError> {
        Ok(Device::new(id, 0x8086, 0x2a42, "card0"))
    }

    #[test]
    fn acquire_requires_init() {
        let registry = DeviceRegistry::new();
        assert!(matches!(
            registry.acquire(DeviceId(1), intel),
            Err(SurfaceError::InvalidArgument(_))
        ));
        registry.init();
        assert!(registry.acquire(DeviceId(1), intel).is_ok());
    }

    #[test]
    fn same_id_gives_same_device() {
        let registry = DeviceRegistry::new();
        registry.init();
        let a = registry.acquire(DeviceId(7), intel).unwrap();
        let b = registry
            .acquire(DeviceId(7), |_| panic!("device should already be known"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn first_device_is_default() {
        let registry = DeviceRegistry::new();
        registry.init();
        registry.acquire(DeviceId(1), intel).unwrap();
        registry.acquire(DeviceId(2), intel).unwrap();
        assert_eq!(registry.default_device().unwrap().id, DeviceId(1));

        assert!(registry.set_default(DeviceId(2)));
        assert!(!registry.set_default(DeviceId(9)));
        assert_eq!(registry.default_device().unwrap().id, DeviceId(2));
    }

    #[test]
    fn release_only_unused_devices() {
        let registry = DeviceRegistry::new();
        registry.init();
        let dev = registry.acquire(DeviceId(3), intel).unwrap();
        assert!(!registry.release(DeviceId(3)));

        drop(dev);
        assert!(registry.release(DeviceId(3)));
        assert!(registry.is_empty());
        assert!(registry.default_device().is_none());
        assert!(!registry.release(DeviceId(3)));
    }

    #[test]
    fn failed_creation_registers_nothing() {
        let registry = DeviceRegistry::new();
        registry.init();
        let err = registry
            .acquire(DeviceId(4), |_| Err(SurfaceError::device("open")))
            .unwrap_err();
        assert!(matches!(err, SurfaceError::DeviceError { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn shutdown_forgets_devices() {
        let registry = DeviceRegistry::new();
        registry.init();
        let dev = registry.acquire(DeviceId(5), intel).unwrap();
        registry.shutdown();
        assert!(!registry.is_initialized());
        assert!(registry.get(DeviceId(5)).is_none());
        assert_eq!(dev.name, "card0");
    }

    #[test]
    fn global_registry_is_shared() {
        assert!(std::ptr::eq(DeviceRegistry::global(), DeviceRegistry::global()));
    }

    #[test]
    fn driver_lookup_with_wildcards() {
        let table = DriverTable::builtin();
        assert_eq!(table.lookup(0x8086, 0x2a42).unwrap().driver, "i965");
        assert_eq!(table.lookup(0x8086, 0x27a2).unwrap().driver, "i915");
        assert_eq!(table.lookup(0x8086, 0x0412).unwrap().driver, "intel");
        assert_eq!(table.lookup(0x1002, 0x1234).unwrap().driver, "radeon");
        assert!(table.lookup(0x10de, 0x1234).is_none());

        let mut table = DriverTable::new();
        table.add(None, None, "generic", "Anything");
        assert_eq!(table.lookup(1, 2).unwrap().driver, "generic");
    }
}
