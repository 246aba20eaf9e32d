//! Low-level transport collaborators
//!
//! The host never owns sockets. A [`ChannelTransport`] opens and closes
//! PSM listeners and moves bytes on accepted channels, identified by opaque
//! [`SocketId`]s; accepted connections are reported back to the host as
//! channel events. [`LinkControl`] tears down baseband links by connection
//! handle.

use crate::address::DeviceAddress;
use bt_hci::param::{ConnHandle, DisconnectReason};

/// Protocol/Service Multiplexer identifying an L2CAP service endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Psm(pub u16);

/// Opaque identifier for an accepted channel, issued by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocketId(pub u32);

/// Errors surfaced by the transport collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The listener could not be set up on the requested PSM
    ListenFailed,
    /// The write was not accepted by the channel
    SendFailed,
    /// The channel or link is already gone
    Closed,
}

/// L2CAP channel collaborator
pub trait ChannelTransport {
    /// Start accepting connections on `psm` for the adapter at `local`
    ///
    /// # Errors
    /// Returns an error if the listener could not be established
    async fn listen(&mut self, local: DeviceAddress, psm: Psm) -> Result<(), TransportError>;

    /// Stop accepting connections on `psm` for `local`; absence is not an
    /// error
    async fn close_listener(&mut self, local: DeviceAddress, psm: Psm);

    /// Write `data` on an accepted channel
    ///
    /// # Errors
    /// Returns an error if the bytes could not be queued
    async fn send(&mut self, socket: SocketId, data: &[u8]) -> Result<(), TransportError>;

    /// Close an accepted channel; closing twice is harmless
    async fn close(&mut self, socket: SocketId);
}

/// Baseband link collaborator
pub trait LinkControl {
    /// Disconnect the ACL link identified by `handle`
    ///
    /// # Errors
    /// Returns an error if the disconnect could not be issued
    async fn disconnect(
        &mut self,
        handle: ConnHandle,
        reason: DisconnectReason,
    ) -> Result<(), TransportError>;
}
