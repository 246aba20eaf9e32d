//! Wagtail API functions
//!
//! This module provides the public API for interacting with the processing
//! tasks. The functions use static channels to communicate with the service
//! loop and are designed to be called from application code; they are not
//! coupled to any specific management transport and can sit behind a D-Bus
//! shim, an RPC server, or a CLI alike.
//!
//! Requests are answered in order: each function sends one request and waits
//! for the matching response. Terminal and broadcast emissions (discovery
//! replies, property changes, HID connections) arrive separately through
//! [`next_notification`], and collaborator implementations report their
//! completions through [`submit_event`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use wagtail::adapter::AdapterId;
//! use wagtail::{DeviceAddress, api};
//!
//! # async fn example() -> Result<(), wagtail::HostError> {
//! let adapter = AdapterId(0);
//! let remote = DeviceAddress::new([0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB]);
//!
//! api::add_adapter(adapter, DeviceAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])).await?;
//! api::create_device(":1.42", adapter, remote).await?;
//! api::discover_services(":1.42", adapter, remote, "0x1124").await?;
//! let _info = api::get_device(adapter, remote).await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    DeviceInfo, EVENT_CHANNEL, Event, HostError, NOTIFICATION_CHANNEL, Notification,
    REQUEST_CHANNEL, RESPONSE_CHANNEL, Request, Requestor, Response,
    adapter::AdapterId,
    address::DeviceAddress,
    discovery::BrowseTarget,
    driver::{DeviceDriver, DriverRef},
    uuid::ProfileUuid,
};

fn parse_requestor(requestor: &str) -> Result<Requestor, HostError> {
    Requestor::try_from(requestor).map_err(|()| HostError::InvalidArgument)
}

/// Register a local adapter with the host.
///
/// # Errors
///
/// Returns an error if an adapter with this id already exists, the adapter
/// table is full, or the response is unexpected.
pub async fn add_adapter(id: AdapterId, address: DeviceAddress) -> Result<(), HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::AddAdapter { id, address })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::AdapterAdded => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Remove an adapter, tearing down all its devices and its HID server.
///
/// # Errors
///
/// Returns an error if the adapter is not known or the response is
/// unexpected.
pub async fn remove_adapter(id: AdapterId) -> Result<(), HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::RemoveAdapter { id })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::AdapterRemoved => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Create a device on an adapter and bootstrap it with a full browse.
///
/// The reply only confirms that the device exists and its browse started;
/// the terminal [`Notification::DeviceCreated`] arrives when the browse
/// completes.
///
/// # Errors
///
/// Returns an error if the requestor identity is too long, the device
/// already exists, the bootstrap browse cannot start, or the response is
/// unexpected.
pub async fn create_device(
    requestor: &str,
    adapter: AdapterId,
    address: DeviceAddress,
) -> Result<(), HostError> {
    let requestor = parse_requestor(requestor)?;
    REQUEST_CHANNEL
        .sender()
        .send(Request::CreateDevice {
            requestor,
            adapter,
            address,
        })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::DeviceCreated => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Remove a device, releasing its drivers and tearing down its sessions.
///
/// # Errors
///
/// Returns an error if the adapter or device is not known or the response is
/// unexpected.
pub async fn remove_device(adapter: AdapterId, address: DeviceAddress) -> Result<(), HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::RemoveDevice { adapter, address })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::DeviceRemoved => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Start service discovery on a device.
///
/// An empty `pattern` requests a full browse over the well-known
/// service-class sequence. Otherwise the pattern must be a full textual UUID
/// or a 16-bit service class in hex (with an optional `0x` prefix), and only
/// that UUID is queried. The reply confirms the session started; the
/// terminal [`Notification::DiscoveryComplete`] arrives when it finishes.
///
/// # Errors
///
/// Returns [`HostError::InvalidArgument`] for a malformed pattern or
/// requestor without starting anything, [`HostError::Busy`] if a session is
/// already active on the device, and other errors if the opening query
/// cannot be issued.
pub async fn discover_services(
    requestor: &str,
    adapter: AdapterId,
    address: DeviceAddress,
    pattern: &str,
) -> Result<(), HostError> {
    let requestor = parse_requestor(requestor)?;
    let target = if pattern.is_empty() {
        BrowseTarget::FullBrowse
    } else {
        BrowseTarget::Targeted(ProfileUuid::parse_pattern(pattern)?)
    };
    REQUEST_CHANNEL
        .sender()
        .send(Request::DiscoverServices {
            requestor,
            adapter,
            address,
            target,
        })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::DiscoveryStarted => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Cancel an in-flight discovery session on a device.
///
/// Only the requestor that started the session may cancel it.
///
/// # Errors
///
/// Returns [`HostError::NotAuthorized`] if `requestor` does not own the
/// session, and [`HostError::Failed`] if no session is active or the
/// underlying query cannot be cancelled.
pub async fn cancel_discovery(
    requestor: &str,
    adapter: AdapterId,
    address: DeviceAddress,
) -> Result<(), HostError> {
    let requestor = parse_requestor(requestor)?;
    REQUEST_CHANNEL
        .sender()
        .send(Request::CancelDiscovery {
            requestor,
            adapter,
            address,
        })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::DiscoveryCancelled => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Request a timed disconnect of the baseband link to a device.
///
/// The link is not torn down immediately: a grace timer is armed and the
/// low-level disconnect goes out only if the link is still up when it
/// expires. A [`Notification::DisconnectRequested`] is emitted so profile
/// layers can flush state first.
///
/// # Errors
///
/// Returns [`HostError::NotConnected`] if no link to the device exists, and
/// [`HostError::NotFound`] if the adapter or device is unknown.
pub async fn disconnect(adapter: AdapterId, address: DeviceAddress) -> Result<(), HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::Disconnect { adapter, address })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::Disconnecting => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Register a profile driver to be probed against discovered devices.
///
/// # Errors
///
/// Returns an error if the registry is full or the response is unexpected.
pub async fn register_driver(driver: &'static dyn DeviceDriver) -> Result<(), HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::RegisterDriver(DriverRef(driver)))
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::DriverRegistered => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Unregister a previously registered profile driver.
///
/// Existing bindings made through the driver stay alive until their device
/// is removed or the driver's UUIDs disappear from a discovery result.
///
/// # Errors
///
/// Returns an error if the driver is not registered or the response is
/// unexpected.
pub async fn unregister_driver(driver: &'static dyn DeviceDriver) -> Result<(), HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::UnregisterDriver(DriverRef(driver)))
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::DriverUnregistered => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Start the HID transport server on the adapter with address `local`.
///
/// # Errors
///
/// Returns an error if no adapter has this address, a server is already
/// running on it, or a listener cannot be opened.
pub async fn start_server(local: DeviceAddress) -> Result<(), HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::StartServer { local })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::ServerStarted => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Stop the HID transport server on the adapter with address `local`.
///
/// # Errors
///
/// Returns an error if no server is running on this address or the response
/// is unexpected.
pub async fn stop_server(local: DeviceAddress) -> Result<(), HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::StopServer { local })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::ServerStopped => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Snapshot the public properties of a device.
///
/// # Errors
///
/// Returns an error if the adapter or device is not known or the response is
/// unexpected.
pub async fn get_device(
    adapter: AdapterId,
    address: DeviceAddress,
) -> Result<DeviceInfo, HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::GetDevice { adapter, address })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::Device(info) => Ok(info),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Mark a device as temporary (discarded on removal) or permanent.
///
/// # Errors
///
/// Returns an error if the adapter or device is not known or the response is
/// unexpected.
pub async fn set_temporary(
    adapter: AdapterId,
    address: DeviceAddress,
    temporary: bool,
) -> Result<(), HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::SetTemporary {
            adapter,
            address,
            temporary,
        })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::PropertySet => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Set the pairing IO capability advertised for a device.
///
/// # Errors
///
/// Returns an error if the adapter or device is not known or the response is
/// unexpected.
pub async fn set_capability(
    adapter: AdapterId,
    address: DeviceAddress,
    cap: u8,
) -> Result<(), HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::SetCapability {
            adapter,
            address,
            cap,
        })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::PropertySet => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Set the authentication requirements advertised for a device.
///
/// # Errors
///
/// Returns an error if the adapter or device is not known or the response is
/// unexpected.
pub async fn set_authorization(
    adapter: AdapterId,
    address: DeviceAddress,
    auth: u8,
) -> Result<(), HostError> {
    REQUEST_CHANNEL
        .sender()
        .send(Request::SetAuthorization {
            adapter,
            address,
            auth,
        })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::PropertySet => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Attach an agent reference to a device, or clear it with `None`.
///
/// # Errors
///
/// Returns an error if the agent identity is too long, the adapter or device
/// is not known, or the response is unexpected.
pub async fn set_agent(
    adapter: AdapterId,
    address: DeviceAddress,
    agent: Option<&str>,
) -> Result<(), HostError> {
    let agent = match agent {
        Some(s) => Some(parse_requestor(s)?),
        None => None,
    };
    REQUEST_CHANNEL
        .sender()
        .send(Request::SetAgent {
            adapter,
            address,
            agent,
        })
        .await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::PropertySet => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(HostError::Failed),
    }
}

/// Feed an external event into the processor.
///
/// Collaborator implementations call this to report search results, accepted
/// channels, authorization verdicts, and link-layer changes. The management
/// transport calls it with [`Event::RequestorLost`] when an RPC client goes
/// away.
pub async fn submit_event(event: Event) {
    EVENT_CHANNEL.sender().send(event).await;
}

/// Wait for the next notification emitted by the host.
///
/// Notifications carry the terminal replies of discovery sessions and
/// broadcast state changes; they are produced in the order the host decided
/// them.
pub async fn next_notification() -> Notification {
    NOTIFICATION_CHANNEL.receiver().receive().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::remote_addr;
    use embassy_futures::block_on;

    #[test]
    fn test_discover_services_rejects_malformed_pattern() {
        let result = block_on(discover_services(
            ":1.1",
            AdapterId(0),
            remote_addr(),
            "not-a-pattern",
        ));
        assert_eq!(result, Err(HostError::InvalidArgument));
    }

    #[test]
    fn test_overlong_requestor_is_rejected() {
        let result = block_on(create_device(
            "requestor-identity-way-beyond-the-limit",
            AdapterId(0),
            remote_addr(),
        ));
        assert_eq!(result, Err(HostError::InvalidArgument));
    }
}
