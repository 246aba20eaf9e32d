#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(async_fn_in_trait, clippy::too_many_lines)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

mod address;
mod binder;
mod discovery;

#[cfg(test)]
mod testing;

pub mod access;
pub mod adapter;
pub mod api;
pub mod constants;
pub mod device;
pub mod driver;
pub mod hid;
pub mod processor;
pub mod sdp;
pub mod storage;
pub mod transport;
pub mod uuid;

use crate::constants::{
    DISCONNECT_GRACE_SECS, MAX_ADAPTERS, MAX_BROWSES, MAX_CHANNELS, MAX_PATH_LEN,
    MAX_PENDING_NOTIFICATIONS, MAX_REQUESTOR_LEN, MAX_SESSION_RECORDS,
};
use crate::{
    access::AuthVerdict,
    adapter::{Adapter, AdapterId},
    device::Device,
    discovery::{BrowseSession, BrowseTarget, WatchTable},
    driver::{DeviceDriver, DriverRef, DriverRegistry},
    hid::HidServer,
    sdp::{RecordEntry, SdpError, ServiceRecord},
    transport::{Psm, SocketId},
    uuid::UuidSet,
};
use embassy_sync::channel::Channel;
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    mutex::{MappedMutexGuard, Mutex, MutexGuard},
};
use heapless::{FnvIndexMap, String, Vec};

pub use address::{AddressPair, DeviceAddress};
pub use discovery::WatchId;

pub(crate) static REQUEST_CHANNEL: Channel<CriticalSectionRawMutex, Request, MAX_CHANNELS> =
    Channel::new();

pub(crate) static RESPONSE_CHANNEL: Channel<CriticalSectionRawMutex, Response, MAX_CHANNELS> =
    Channel::new();

pub(crate) static EVENT_CHANNEL: Channel<CriticalSectionRawMutex, Event, MAX_CHANNELS> =
    Channel::new();

pub(crate) static NOTIFICATION_CHANNEL: Channel<
    CriticalSectionRawMutex,
    Notification,
    MAX_PENDING_NOTIFICATIONS,
> = Channel::new();

pub(crate) static TIMER_CHANNEL: Channel<CriticalSectionRawMutex, TimerCommand, MAX_CHANNELS> =
    Channel::new();

/// Global `DeviceHost`, initialized by the embedder at runtime
pub(crate) static DEVICE_HOST: Mutex<CriticalSectionRawMutex, Option<DeviceHost>> =
    Mutex::new(None);

/// Initialize the global `DeviceHost` with the given options.
///
/// Must be called before using any API functions or spawning the processor
/// tasks.
///
/// # Errors
///
/// Returns an error if the `DeviceHost` has already been initialized.
///
/// # Example
///
/// ```rust,no_run
/// use wagtail::{HostOptions, init_device_host};
///
/// # async fn example() -> Result<(), &'static str> {
/// init_device_host(HostOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn init_device_host(options: HostOptions) -> Result<(), &'static str> {
    let mut guard = DEVICE_HOST.lock().await;
    if guard.is_some() {
        return Err("DeviceHost already initialized");
    }
    *guard = Some(DeviceHost::with_options(options));
    Ok(())
}

/// Get a locked reference to the global `DeviceHost`.
///
/// Intended for the processor tasks; API users should go through the `api`
/// module instead.
///
/// # Errors
///
/// Returns an error if the `DeviceHost` has not been initialized.
///
/// # Panics
///
/// Panics if the mutex guard cannot be mapped (cannot happen after the
/// initialization check above).
pub async fn device_host<'a>()
-> Result<MappedMutexGuard<'a, CriticalSectionRawMutex, DeviceHost>, &'static str> {
    let guard = DEVICE_HOST.lock().await;
    if guard.is_none() {
        return Err("DeviceHost not initialized");
    }
    Ok(MutexGuard::map(guard, |opt| opt.as_mut().unwrap()))
}

/// Identity of an RPC client, as reported by the management transport
pub type Requestor = String<MAX_REQUESTOR_LEN>;

/// Errors returned by device-host operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostError {
    /// A discovery session is already active on this device
    Busy,
    /// The caller is not the owner of the operation it tried to cancel
    NotAuthorized,
    /// No active connection exists for the device
    NotConnected,
    /// An underlying query, cancel, or transport primitive failed
    Failed,
    /// A malformed argument was supplied (address, UUID pattern)
    InvalidArgument,
    /// The referenced adapter or device is not known
    NotFound,
    /// The entity to create is already present
    AlreadyExists,
}

/// Point-in-time snapshot of a device's public properties
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    /// Remote device address
    pub address: DeviceAddress,
    /// Object path
    pub path: String<MAX_PATH_LEN>,
    /// Id of the owning adapter
    pub adapter: AdapterId,
    /// Known service-class UUIDs
    pub uuids: UuidSet,
    /// Whether the device is discarded instead of persisted on removal
    pub temporary: bool,
    /// IO capability advertised for pairing
    pub cap: u8,
    /// Authentication requirements advertised for pairing
    pub auth: u8,
    /// Whether a browse session is in flight
    pub discovering: bool,
}

impl From<&Device> for DeviceInfo {
    fn from(device: &Device) -> Self {
        Self {
            address: device.address,
            path: device.path.clone(),
            adapter: device.adapter,
            uuids: device.uuids.clone(),
            temporary: device.temporary,
            cap: device.cap,
            auth: device.auth,
            discovering: device.discovery.active,
        }
    }
}

/// Options for configuring a `DeviceHost` instance
#[derive(Debug, Clone, Copy)]
pub struct HostOptions {
    /// Grace period in seconds between a disconnect request and the
    /// low-level disconnect command
    pub disconnect_grace_secs: u64,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            disconnect_grace_secs: DISCONNECT_GRACE_SECS,
        }
    }
}

/// Shared host state: adapters with their devices, the driver registry,
/// in-flight browse sessions, requestor watches, and HID servers
pub struct DeviceHost {
    pub(crate) adapters: FnvIndexMap<AdapterId, Adapter, MAX_ADAPTERS>,
    pub(crate) drivers: DriverRegistry,
    pub(crate) browses: FnvIndexMap<AddressPair, BrowseSession, MAX_BROWSES>,
    pub(crate) watches: WatchTable,
    pub(crate) servers: FnvIndexMap<DeviceAddress, HidServer, MAX_ADAPTERS>,
    pub(crate) notifications: Vec<Notification, MAX_PENDING_NOTIFICATIONS>,
    options: HostOptions,
}

impl DeviceHost {
    /// Create a `DeviceHost` with default options
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(HostOptions::default())
    }

    /// Create a `DeviceHost` with the given options
    #[must_use]
    pub fn with_options(options: HostOptions) -> Self {
        Self {
            adapters: FnvIndexMap::new(),
            drivers: DriverRegistry::new(),
            browses: FnvIndexMap::new(),
            watches: WatchTable::new(),
            servers: FnvIndexMap::new(),
            notifications: Vec::new(),
            options,
        }
    }

    /// Get a reference to the options
    #[must_use]
    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    /// Register a local adapter
    ///
    /// # Errors
    /// Returns [`HostError::AlreadyExists`] for a duplicate id and
    /// [`HostError::Failed`] if the table is full
    pub fn add_adapter(&mut self, id: AdapterId, address: DeviceAddress) -> Result<(), HostError> {
        if self.adapters.contains_key(&id) {
            return Err(HostError::AlreadyExists);
        }
        self.adapters
            .insert(id, Adapter::new(id, address))
            .map(|_| ())
            .map_err(|_| HostError::Failed)
    }

    /// The adapter with the given id, if registered
    #[must_use]
    pub fn adapter(&self, id: AdapterId) -> Option<&Adapter> {
        self.adapters.get(&id)
    }

    pub(crate) fn adapter_mut(&mut self, id: AdapterId) -> Option<&mut Adapter> {
        self.adapters.get_mut(&id)
    }

    /// The (local, remote) pair for a device reference, if the adapter exists
    pub(crate) fn pair_for(
        &self,
        adapter: AdapterId,
        remote: DeviceAddress,
    ) -> Option<AddressPair> {
        self.adapters
            .get(&adapter)
            .map(|a| AddressPair::new(a.address, remote))
    }

    /// Append a driver to the process-wide registry
    ///
    /// # Errors
    /// Returns [`HostError::Failed`] if the registry is full
    pub fn register_driver(&mut self, driver: &'static dyn DeviceDriver) -> Result<(), HostError> {
        self.drivers.register(driver)
    }

    /// Remove the first registry entry referring to `driver`
    ///
    /// # Errors
    /// Returns [`HostError::NotFound`] if the driver is not registered
    pub fn unregister_driver(
        &mut self,
        driver: &'static dyn DeviceDriver,
    ) -> Result<(), HostError> {
        self.drivers.unregister(driver)
    }

    /// Snapshot the public properties of a device
    ///
    /// # Errors
    /// Returns [`HostError::NotFound`] if the adapter or device is unknown
    pub fn device_info(
        &self,
        adapter: AdapterId,
        address: DeviceAddress,
    ) -> Result<DeviceInfo, HostError> {
        self.adapters
            .get(&adapter)
            .and_then(|a| a.device(address))
            .map(DeviceInfo::from)
            .ok_or(HostError::NotFound)
    }

    fn device_state_mut(
        &mut self,
        adapter: AdapterId,
        address: DeviceAddress,
    ) -> Result<&mut Device, HostError> {
        self.adapters
            .get_mut(&adapter)
            .and_then(|a| a.device_mut(address))
            .ok_or(HostError::NotFound)
    }

    /// Mark a device as temporary (discarded on removal) or permanent
    ///
    /// # Errors
    /// Returns [`HostError::NotFound`] if the adapter or device is unknown
    pub fn set_temporary(
        &mut self,
        adapter: AdapterId,
        address: DeviceAddress,
        temporary: bool,
    ) -> Result<(), HostError> {
        self.device_state_mut(adapter, address)?.temporary = temporary;
        Ok(())
    }

    /// Set the IO capability advertised for pairing
    ///
    /// # Errors
    /// Returns [`HostError::NotFound`] if the adapter or device is unknown
    pub fn set_capability(
        &mut self,
        adapter: AdapterId,
        address: DeviceAddress,
        cap: u8,
    ) -> Result<(), HostError> {
        self.device_state_mut(adapter, address)?.cap = cap;
        Ok(())
    }

    /// Set the authentication requirements advertised for pairing
    ///
    /// # Errors
    /// Returns [`HostError::NotFound`] if the adapter or device is unknown
    pub fn set_authorization(
        &mut self,
        adapter: AdapterId,
        address: DeviceAddress,
        auth: u8,
    ) -> Result<(), HostError> {
        self.device_state_mut(adapter, address)?.auth = auth;
        Ok(())
    }

    /// Attach or clear the transient agent reference of a device
    ///
    /// # Errors
    /// Returns [`HostError::NotFound`] if the adapter or device is unknown
    pub fn set_agent(
        &mut self,
        adapter: AdapterId,
        address: DeviceAddress,
        agent: Option<Requestor>,
    ) -> Result<(), HostError> {
        self.device_state_mut(adapter, address)?.agent = agent;
        Ok(())
    }

    /// Queue a notification for the embedder; a full queue drops it
    pub(crate) fn push_notification(&mut self, notification: Notification) {
        if self.notifications.push(notification).is_err() {
            warn!("[HOST] notification queue full, dropping");
        }
    }

    /// Drain queued notifications for forwarding outside the host lock
    pub(crate) fn take_notifications(&mut self) -> Vec<Notification, MAX_PENDING_NOTIFICATIONS> {
        core::mem::take(&mut self.notifications)
    }
}

impl Default for DeviceHost {
    fn default() -> Self {
        Self::new()
    }
}

/// API requests sent to the processing tasks
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Request {
    /// Register a local adapter
    AddAdapter {
        id: AdapterId,
        address: DeviceAddress,
    },
    /// Remove an adapter with all its devices and its HID server
    RemoveAdapter { id: AdapterId },
    /// Create a device and bootstrap it with a full browse
    CreateDevice {
        requestor: Requestor,
        adapter: AdapterId,
        address: DeviceAddress,
    },
    /// Remove a device, releasing its drivers
    RemoveDevice {
        adapter: AdapterId,
        address: DeviceAddress,
    },
    /// Start service discovery on a device
    DiscoverServices {
        requestor: Requestor,
        adapter: AdapterId,
        address: DeviceAddress,
        target: BrowseTarget,
    },
    /// Cancel an in-flight discovery
    CancelDiscovery {
        requestor: Requestor,
        adapter: AdapterId,
        address: DeviceAddress,
    },
    /// Request a timed disconnect of a device's baseband link
    Disconnect {
        adapter: AdapterId,
        address: DeviceAddress,
    },
    /// Register a profile driver
    RegisterDriver(DriverRef),
    /// Unregister a profile driver
    UnregisterDriver(DriverRef),
    /// Start the HID transport server on an adapter
    StartServer { local: DeviceAddress },
    /// Stop the HID transport server on an adapter
    StopServer { local: DeviceAddress },
    /// Snapshot a device's properties
    GetDevice {
        adapter: AdapterId,
        address: DeviceAddress,
    },
    /// Mark a device temporary or permanent
    SetTemporary {
        adapter: AdapterId,
        address: DeviceAddress,
        temporary: bool,
    },
    /// Set a device's pairing IO capability
    SetCapability {
        adapter: AdapterId,
        address: DeviceAddress,
        cap: u8,
    },
    /// Set a device's authentication requirements
    SetAuthorization {
        adapter: AdapterId,
        address: DeviceAddress,
        auth: u8,
    },
    /// Attach or clear a device's agent reference
    SetAgent {
        adapter: AdapterId,
        address: DeviceAddress,
        agent: Option<Requestor>,
    },
}

/// API responses sent back from the processing tasks
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Response {
    /// Adapter registered
    AdapterAdded,
    /// Adapter and all its devices removed
    AdapterRemoved,
    /// Device created, bootstrap browse started
    DeviceCreated,
    /// Device removed
    DeviceRemoved,
    /// Discovery session started
    DiscoveryStarted,
    /// Discovery session cancelled
    DiscoveryCancelled,
    /// Disconnect requested, grace timer armed
    Disconnecting,
    /// Driver registered
    DriverRegistered,
    /// Driver unregistered
    DriverUnregistered,
    /// HID server listening
    ServerStarted,
    /// HID server stopped
    ServerStopped,
    /// Device property snapshot
    Device(DeviceInfo),
    /// Property updated
    PropertySet,
    /// Error occurred
    Error(HostError),
}

/// External events feeding the processor: collaborator completions and
/// link-layer changes
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Outcome of one SDP query started through [`sdp::SdpClient::search`]
    SearchResult {
        /// Pair the query was keyed by
        pair: AddressPair,
        /// Parsed records; empty on error or no-match
        records: Vec<ServiceRecord, MAX_SESSION_RECORDS>,
        /// Transport-level failure, if the query did not complete
        error: Option<SdpError>,
    },
    /// An inbound channel was accepted by the low-level transport
    ChannelAccepted {
        /// Address of the listening adapter
        local: DeviceAddress,
        /// Address of the connecting peer
        remote: DeviceAddress,
        /// PSM the connection arrived on
        psm: Psm,
        /// Opaque socket issued by the transport
        socket: SocketId,
    },
    /// Verdict for an authorization request
    Authorization {
        /// Pair the request was keyed by
        pair: AddressPair,
        /// The decision
        verdict: AuthVerdict,
    },
    /// An ACL link to a peer came up
    LinkEstablished {
        /// Owning adapter
        adapter: AdapterId,
        /// Remote address
        remote: DeviceAddress,
        /// Raw connection handle
        handle: u16,
    },
    /// An ACL link went down
    LinkTerminated {
        /// Owning adapter
        adapter: AdapterId,
        /// Raw connection handle
        handle: u16,
    },
    /// An RPC client disconnected from the management transport
    RequestorLost {
        /// Identity the client used
        requestor: Requestor,
    },
    /// A disconnect grace timer fired
    DisconnectExpired {
        /// Pair the timer was armed for
        pair: AddressPair,
        /// Generation handed out when the timer was armed
        generation: u32,
    },
}

/// Terminal and broadcast emissions produced by the host, drained through
/// [`api::next_notification`]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    /// A discovery session finished; the terminal reply to a service search
    DiscoveryComplete {
        /// Requestor that started the session
        requestor: Requestor,
        /// Every record retained by the session
        records: Vec<RecordEntry, MAX_SESSION_RECORDS>,
    },
    /// A bootstrap browse finished; the terminal reply to a device creation
    DeviceCreated {
        /// Requestor that created the device
        requestor: Requestor,
        /// Object path of the new device
        path: String<MAX_PATH_LEN>,
    },
    /// A device's UUID set was rewritten after discovery
    UuidsChanged {
        /// Object path of the device
        path: String<MAX_PATH_LEN>,
        /// The new canonical set
        uuids: UuidSet,
    },
    /// A timed disconnect was requested on a device
    DisconnectRequested {
        /// Object path of the device
        path: String<MAX_PATH_LEN>,
    },
    /// A HID session completed authorization and is connected
    HidConnected {
        /// Address of the listening adapter
        local: DeviceAddress,
        /// Address of the peer
        remote: DeviceAddress,
    },
}

/// Arm command from the service loop to the grace-timer task
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct TimerCommand {
    pub pair: AddressPair,
    pub generation: u32,
    pub grace_secs: u64,
}
