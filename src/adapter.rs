//! Local adapter state
//!
//! Each adapter owns its device table and a map of active ACL connections
//! (remote address to raw connection handle) maintained from link-layer
//! events. Devices are looked up by address; nothing outside the adapter
//! holds a device reference across an await point.

use crate::{
    HostError,
    address::DeviceAddress,
    constants::{MAX_CONNECTIONS, MAX_DEVICES},
    device::Device,
};
use heapless::FnvIndexMap;

/// Identifier of a local adapter (the `N` in `/hciN`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdapterId(pub u16);

/// A local Bluetooth adapter with its devices and active connections
#[derive(Debug)]
pub struct Adapter {
    /// Adapter id
    pub id: AdapterId,
    /// Address of the local controller
    pub address: DeviceAddress,
    devices: FnvIndexMap<DeviceAddress, Device, MAX_DEVICES>,
    connections: FnvIndexMap<DeviceAddress, u16, MAX_CONNECTIONS>,
}

impl Adapter {
    /// Create an adapter with empty device and connection tables
    #[must_use]
    pub fn new(id: AdapterId, address: DeviceAddress) -> Self {
        Self {
            id,
            address,
            devices: FnvIndexMap::new(),
            connections: FnvIndexMap::new(),
        }
    }

    /// Create a device for `address` and return it
    ///
    /// # Errors
    /// Returns [`HostError::AlreadyExists`] if the device is already present
    /// and [`HostError::Failed`] if the table is full
    pub fn create_device(&mut self, address: DeviceAddress) -> Result<&Device, HostError> {
        if self.devices.contains_key(&address) {
            return Err(HostError::AlreadyExists);
        }
        self.devices
            .insert(address, Device::new(self.id, address))
            .map_err(|_| HostError::Failed)?;
        self.devices.get(&address).ok_or(HostError::Failed)
    }

    /// The device for `address`, if known
    #[must_use]
    pub fn device(&self, address: DeviceAddress) -> Option<&Device> {
        self.devices.get(&address)
    }

    /// Mutable access to the device for `address`
    pub fn device_mut(&mut self, address: DeviceAddress) -> Option<&mut Device> {
        self.devices.get_mut(&address)
    }

    /// Remove and return the device for `address`
    ///
    /// The caller is responsible for releasing the device's driver bindings.
    ///
    /// # Errors
    /// Returns [`HostError::NotFound`] if the device is not known
    pub fn remove_device(&mut self, address: DeviceAddress) -> Result<Device, HostError> {
        self.devices.remove(&address).ok_or(HostError::NotFound)
    }

    /// Addresses of all known devices
    pub fn device_addresses(&self) -> impl Iterator<Item = DeviceAddress> + '_ {
        self.devices.keys().copied()
    }

    /// Record an established ACL connection, replacing any stale entry
    ///
    /// # Errors
    /// Returns [`HostError::Failed`] if the connection table is full
    pub fn add_connection(&mut self, remote: DeviceAddress, handle: u16) -> Result<(), HostError> {
        if let Some(existing) = self.connections.get_mut(&remote) {
            *existing = handle;
            return Ok(());
        }
        self.connections
            .insert(remote, handle)
            .map(|_| ())
            .map_err(|_| HostError::Failed)
    }

    /// The raw connection handle for `remote`, if connected
    #[must_use]
    pub fn connection(&self, remote: DeviceAddress) -> Option<u16> {
        self.connections.get(&remote).copied()
    }

    /// Drop the connection entry matching `handle`, returning its remote
    pub fn remove_connection_by_handle(&mut self, handle: u16) -> Option<DeviceAddress> {
        let remote = self
            .connections
            .iter()
            .find_map(|(remote, h)| (*h == handle).then_some(*remote))?;
        self.connections.remove(&remote);
        Some(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> DeviceAddress {
        DeviceAddress::new([0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB])
    }

    fn adapter() -> Adapter {
        Adapter::new(
            AdapterId(0),
            DeviceAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
        )
    }

    #[test]
    fn test_create_device_rejects_duplicates() {
        let mut adapter = adapter();
        let path = adapter.create_device(remote()).unwrap().path.clone();
        assert_eq!(path.as_str(), "/hci0/dev_66_77_88_99_AA_BB");
        assert!(matches!(
            adapter.create_device(remote()),
            Err(HostError::AlreadyExists)
        ));
    }

    #[test]
    fn test_remove_device() {
        let mut adapter = adapter();
        adapter.create_device(remote()).unwrap();
        let removed = adapter.remove_device(remote()).unwrap();
        assert_eq!(removed.address, remote());
        assert!(matches!(
            adapter.remove_device(remote()),
            Err(HostError::NotFound)
        ));
    }

    #[test]
    fn test_connection_table_replaces_and_removes_by_handle() {
        let mut adapter = adapter();
        adapter.add_connection(remote(), 0x0001).unwrap();
        adapter.add_connection(remote(), 0x0042).unwrap();
        assert_eq!(adapter.connection(remote()), Some(0x0042));

        assert_eq!(adapter.remove_connection_by_handle(0x0001), None);
        assert_eq!(
            adapter.remove_connection_by_handle(0x0042),
            Some(remote())
        );
        assert_eq!(adapter.connection(remote()), None);
    }
}
