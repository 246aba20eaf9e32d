//! Device driver registry
//!
//! Drivers are registered process-wide as `&'static dyn` trait objects and
//! matched against the service-class UUIDs a browse turns up. A successful
//! probe yields an opaque [`DriverData`] token that is handed back on
//! removal. Registration keeps duplicates; unregistration removes the first
//! entry with the same address.

use crate::{HostError, constants::MAX_DRIVERS, device::Device, sdp::ServiceRecord};
use heapless::Vec;

/// Opaque per-binding token minted by a driver's probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverData(pub u32);

/// Errors a driver can return from its probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// The driver inspected the device and declined it
    Rejected,
    /// The driver has no capacity for another device
    NoResources,
}

/// A driver for devices exposing particular service classes
pub trait DeviceDriver: Sync {
    /// Short identifier used in log output
    fn name(&self) -> &'static str;

    /// Service-class UUIDs this driver wants, in canonical 36-char form
    fn uuids(&self) -> &'static [&'static str];

    /// Take ownership of a matching device
    ///
    /// `records` holds the service records whose primary class matched one
    /// of the driver's UUIDs.
    ///
    /// # Errors
    /// Returns an error if the driver declines the device
    fn probe(&self, device: &Device, records: &[ServiceRecord]) -> Result<DriverData, DriverError>;

    /// Release a device previously probed, with the token probe returned
    fn remove(&self, device: &Device, data: DriverData);
}

/// Copyable handle to a registered driver
#[derive(Clone, Copy)]
pub struct DriverRef(pub &'static dyn DeviceDriver);

impl DriverRef {
    fn is(&self, driver: &'static dyn DeviceDriver) -> bool {
        core::ptr::addr_eq(core::ptr::from_ref(self.0), core::ptr::from_ref(driver))
    }
}

impl core::fmt::Debug for DriverRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("DriverRef").field(&self.0.name()).finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for DriverRef {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "DriverRef({})", self.0.name());
    }
}

impl PartialEq for DriverRef {
    fn eq(&self, other: &Self) -> bool {
        self.is(other.0)
    }
}

impl Eq for DriverRef {}

/// A driver bound to a device, with the token its probe minted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverBinding {
    /// The bound driver
    pub driver: DriverRef,
    /// Token to hand back on removal
    pub data: DriverData,
}

/// Process-wide table of registered drivers
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: Vec<DriverRef, MAX_DRIVERS>,
}

impl DriverRegistry {
    /// Create an empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Append a driver; the same driver may be registered more than once
    ///
    /// # Errors
    /// Returns [`HostError::Failed`] if the table is full
    pub fn register(&mut self, driver: &'static dyn DeviceDriver) -> Result<(), HostError> {
        self.drivers
            .push(DriverRef(driver))
            .map_err(|_| HostError::Failed)
    }

    /// Remove the first entry referring to `driver`
    ///
    /// # Errors
    /// Returns [`HostError::NotFound`] if the driver is not registered
    pub fn unregister(&mut self, driver: &'static dyn DeviceDriver) -> Result<(), HostError> {
        let pos = self
            .drivers
            .iter()
            .position(|d| d.is(driver))
            .ok_or(HostError::NotFound)?;
        self.drivers.remove(pos);
        Ok(())
    }

    /// Registered drivers in registration order
    pub fn iter(&self) -> impl Iterator<Item = DriverRef> + '_ {
        self.drivers.iter().copied()
    }

    /// Number of registered drivers
    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether no drivers are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
