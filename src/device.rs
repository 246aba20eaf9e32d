//! Per-peer device state
//!
//! A [`Device`] is owned by its adapter's device table and referenced
//! everywhere else by address, never by pointer. The object path is derived
//! from the owning adapter id and the address at creation time and never
//! changes.

use crate::{
    Requestor,
    adapter::AdapterId,
    address::DeviceAddress,
    constants::{MAX_BINDINGS, MAX_PATH_LEN},
    discovery::WatchId,
    driver::DriverBinding,
    uuid::UuidSet,
};
use core::fmt::Write;
use heapless::{String, Vec};

/// Discovery status of a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveryState {
    /// Whether a browse session is currently in flight
    pub active: bool,
    /// Identity of the requestor that started the session
    pub requestor: Option<Requestor>,
    /// Liveness watch released when the session completes
    pub watch: Option<WatchId>,
}

/// A remote device known to a local adapter
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Device {
    /// Remote device address
    pub address: DeviceAddress,
    /// Object path, `/hci{N}/dev_XX_XX_XX_XX_XX_XX`
    pub path: String<MAX_PATH_LEN>,
    /// Id of the owning adapter
    pub adapter: AdapterId,
    /// Known service-class UUIDs, sorted and de-duplicated
    pub uuids: UuidSet,
    /// Drivers currently bound to this device
    pub bindings: Vec<DriverBinding, MAX_BINDINGS>,
    /// Discovery status
    pub discovery: DiscoveryState,
    /// Identity of the agent registered for this device, if any
    pub agent: Option<Requestor>,
    /// Whether the device is discarded instead of persisted on removal
    pub temporary: bool,
    /// IO capability advertised for pairing
    pub cap: u8,
    /// Authentication requirements advertised for pairing
    pub auth: u8,
    disconnect_generation: u32,
    disconnect_armed: bool,
}

impl Device {
    /// Create a device owned by `adapter`, deriving its object path
    #[must_use]
    pub fn new(adapter: AdapterId, address: DeviceAddress) -> Self {
        Self {
            address,
            path: Self::build_path(adapter, address),
            adapter,
            uuids: UuidSet::new(),
            bindings: Vec::new(),
            discovery: DiscoveryState::default(),
            agent: None,
            temporary: false,
            cap: 0,
            auth: 0,
            disconnect_generation: 0,
            disconnect_armed: false,
        }
    }

    fn build_path(adapter: AdapterId, address: DeviceAddress) -> String<MAX_PATH_LEN> {
        let mut path = String::new();
        write!(path, "/hci{}/dev_", adapter.0).ok();
        for c in address.format_hex().chars() {
            path.push(if c == ':' { '_' } else { c }).ok();
        }
        path
    }

    /// Arm the disconnect grace timer, superseding any pending one
    ///
    /// Returns the generation the new timer must present on expiry; expiry
    /// events carrying an older generation are stale and must be discarded.
    pub fn arm_disconnect(&mut self) -> u32 {
        self.disconnect_generation = self.disconnect_generation.wrapping_add(1);
        self.disconnect_armed = true;
        self.disconnect_generation
    }

    /// Accept or reject a grace-timer expiry
    ///
    /// Returns `true` exactly once per armed timer, and only for the
    /// generation [`arm_disconnect`](Self::arm_disconnect) handed out last.
    pub fn settle_disconnect(&mut self, generation: u32) -> bool {
        if self.disconnect_armed && self.disconnect_generation == generation {
            self.disconnect_armed = false;
            true
        } else {
            false
        }
    }

    /// Drop any pending grace timer without acting on it
    pub fn cancel_disconnect(&mut self) {
        self.disconnect_armed = false;
    }

    /// Notify every bound driver of release and clear the binding list
    ///
    /// Called when the device is removed from its adapter.
    pub fn release_bindings(&mut self) {
        while let Some(binding) = self.bindings.pop() {
            binding.driver.0.remove(self, binding.data);
        }
    }
}
