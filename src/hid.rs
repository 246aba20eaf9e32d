//! HID transport server
//!
//! Listens on the control and interrupt L2CAP channels of one adapter and
//! walks accepted channel pairs through authorization. HID mandates the
//! control channel first: an interrupt channel with no session behind it is
//! closed on the spot, and a control connection from a peer the host has no
//! device for is answered with a `VIRTUAL_CABLE_UNPLUG` before closing.
//!
//! Requested disconnects are not issued immediately. A grace timer is armed
//! and the low-level disconnect goes out only if the timer settles with the
//! link still up; re-arming supersedes the previous timer through a
//! generation counter on the device.

use crate::{
    DeviceHost, HostError, Notification, TimerCommand,
    access::{AccessControl, AuthVerdict},
    adapter::AdapterId,
    address::{AddressPair, DeviceAddress},
    constants::{HID_CONTROL_PSM, HID_INTERRUPT_PSM, HID_VIRTUAL_CABLE_UNPLUG, MAX_HID_SESSIONS},
    transport::{ChannelTransport, LinkControl, Psm, SocketId},
    uuid::{HID_SVCLASS, ProfileUuid},
};
use bt_hci::param::{ConnHandle, DisconnectReason};
use heapless::FnvIndexMap;

/// Channel state of one peer on a HID server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HidSession {
    /// Socket of the accepted control channel
    pub control: Option<SocketId>,
    /// Socket of the accepted interrupt channel
    pub interrupt: Option<SocketId>,
    /// An authorization verdict is outstanding
    pub authorization_pending: bool,
    /// Both channels are up and the peer was authorized
    pub connected: bool,
}

/// HID transport server bound to one adapter address
#[derive(Debug)]
pub struct HidServer {
    /// Adapter address the server listens on
    pub local: DeviceAddress,
    sessions: FnvIndexMap<DeviceAddress, HidSession, MAX_HID_SESSIONS>,
}

impl HidServer {
    fn new(local: DeviceAddress) -> Self {
        Self {
            local,
            sessions: FnvIndexMap::new(),
        }
    }

    /// Session state for a peer, if one exists
    #[must_use]
    pub fn session(&self, remote: DeviceAddress) -> Option<&HidSession> {
        self.sessions.get(&remote)
    }
}

async fn teardown_session<T: ChannelTransport, A: AccessControl>(
    transport: &mut T,
    access: &mut A,
    pair: AddressPair,
    session: &HidSession,
) {
    if let Some(socket) = session.control {
        transport.close(socket).await;
    }
    if let Some(socket) = session.interrupt {
        transport.close(socket).await;
    }
    if session.authorization_pending {
        access.cancel_authorization(pair).await;
    }
}

impl DeviceHost {
    /// Start a HID server listening on the adapter with address `local`
    pub(crate) async fn start_hid_server<T: ChannelTransport>(
        &mut self,
        transport: &mut T,
        local: DeviceAddress,
    ) -> Result<(), HostError> {
        if !self.adapters.values().any(|a| a.address == local) {
            return Err(HostError::NotFound);
        }
        if self.servers.contains_key(&local) {
            return Err(HostError::AlreadyExists);
        }
        transport
            .listen(local, Psm(HID_CONTROL_PSM))
            .await
            .map_err(|_| HostError::Failed)?;
        if transport
            .listen(local, Psm(HID_INTERRUPT_PSM))
            .await
            .is_err()
        {
            transport.close_listener(local, Psm(HID_CONTROL_PSM)).await;
            return Err(HostError::Failed);
        }
        if self.servers.insert(local, HidServer::new(local)).is_err() {
            transport.close_listener(local, Psm(HID_CONTROL_PSM)).await;
            transport
                .close_listener(local, Psm(HID_INTERRUPT_PSM))
                .await;
            return Err(HostError::Failed);
        }
        info!("[HID] server started on {:?}", local);
        Ok(())
    }

    /// Stop the HID server on `local`, closing its listeners and sessions
    pub(crate) async fn stop_hid_server<T: ChannelTransport, A: AccessControl>(
        &mut self,
        transport: &mut T,
        access: &mut A,
        local: DeviceAddress,
    ) -> Result<(), HostError> {
        let Some(server) = self.servers.remove(&local) else {
            return Err(HostError::NotFound);
        };
        for (remote, session) in &server.sessions {
            teardown_session(transport, access, AddressPair::new(local, *remote), session).await;
        }
        transport.close_listener(local, Psm(HID_CONTROL_PSM)).await;
        transport
            .close_listener(local, Psm(HID_INTERRUPT_PSM))
            .await;
        info!("[HID] server stopped on {:?}", local);
        Ok(())
    }

    /// Tear down the session for `pair`, if one exists
    pub(crate) async fn drop_hid_session<T: ChannelTransport, A: AccessControl>(
        &mut self,
        transport: &mut T,
        access: &mut A,
        pair: AddressPair,
    ) {
        if let Some(server) = self.servers.get_mut(&pair.local)
            && let Some(session) = server.sessions.remove(&pair.remote)
        {
            teardown_session(transport, access, pair, &session).await;
            debug!("[HID] dropped session for {:?}", pair);
        }
    }

    /// Route an accepted inbound channel to its session
    pub(crate) async fn handle_channel_accepted<T: ChannelTransport, A: AccessControl>(
        &mut self,
        transport: &mut T,
        access: &mut A,
        local: DeviceAddress,
        remote: DeviceAddress,
        psm: Psm,
        socket: SocketId,
    ) {
        if !self.servers.contains_key(&local) {
            warn!("[HID] channel accepted with no server on {:?}", local);
            transport.close(socket).await;
            return;
        }
        match psm.0 {
            HID_CONTROL_PSM => self.accept_control(transport, local, remote, socket).await,
            HID_INTERRUPT_PSM => {
                self.accept_interrupt(transport, access, local, remote, socket)
                    .await;
            }
            _ => {
                warn!("[HID] channel accepted on unexpected psm {:#x}", psm.0);
                transport.close(socket).await;
            }
        }
    }

    async fn accept_control<T: ChannelTransport>(
        &mut self,
        transport: &mut T,
        local: DeviceAddress,
        remote: DeviceAddress,
        socket: SocketId,
    ) {
        let known = self
            .adapters
            .values()
            .any(|a| a.address == local && a.device(remote).is_some());
        let Some(server) = self.servers.get_mut(&local) else {
            transport.close(socket).await;
            return;
        };
        if let Some(session) = server.sessions.get_mut(&remote) {
            if let Some(old) = session.control.replace(socket) {
                transport.close(old).await;
            }
            return;
        }
        if !known {
            // a peer without a device record is told to unplug its
            // virtual cable
            debug!("[HID] rejecting control channel from {:?}", remote);
            if transport
                .send(socket, &[HID_VIRTUAL_CABLE_UNPLUG])
                .await
                .is_err()
            {
                warn!("[HID] failed to send unplug to {:?}", remote);
            }
            transport.close(socket).await;
            return;
        }
        let session = HidSession {
            control: Some(socket),
            ..HidSession::default()
        };
        if server.sessions.insert(remote, session).is_err() {
            warn!("[HID] session table full, closing channel from {:?}", remote);
            transport.close(socket).await;
        }
    }

    async fn accept_interrupt<T: ChannelTransport, A: AccessControl>(
        &mut self,
        transport: &mut T,
        access: &mut A,
        local: DeviceAddress,
        remote: DeviceAddress,
        socket: SocketId,
    ) {
        let settled = {
            let Some(session) = self
                .servers
                .get_mut(&local)
                .and_then(|s| s.sessions.get_mut(&remote))
            else {
                debug!("[HID] interrupt channel with no control from {:?}", remote);
                transport.close(socket).await;
                return;
            };
            if let Some(old) = session.interrupt.replace(socket) {
                transport.close(old).await;
            }
            session.authorization_pending || session.connected
        };
        if settled {
            return;
        }
        let pair = AddressPair::new(local, remote);
        match access
            .request_authorization(pair, &ProfileUuid::from_u16(HID_SVCLASS))
            .await
        {
            Ok(()) => {
                if let Some(session) = self
                    .servers
                    .get_mut(&local)
                    .and_then(|s| s.sessions.get_mut(&remote))
                {
                    session.authorization_pending = true;
                }
            }
            Err(e) => {
                warn!("[HID] authorization request failed for {:?}: {:?}", pair, e);
                if let Some(session) = self
                    .servers
                    .get_mut(&local)
                    .and_then(|s| s.sessions.remove(&remote))
                {
                    teardown_session(transport, access, pair, &session).await;
                }
            }
        }
    }

    /// Apply an authorization verdict to the session it was requested for
    ///
    /// Verdicts for sessions that no longer exist are discarded. A refusal
    /// also withdraws any bonding authorization still open for the pair.
    pub(crate) async fn handle_authorization<T: ChannelTransport, A: AccessControl>(
        &mut self,
        transport: &mut T,
        access: &mut A,
        pair: AddressPair,
        verdict: AuthVerdict,
    ) {
        let granted = matches!(verdict, AuthVerdict::Granted);
        {
            let Some(session) = self
                .servers
                .get_mut(&pair.local)
                .and_then(|s| s.sessions.get_mut(&pair.remote))
            else {
                debug!("[HID] verdict for unknown session {:?}", pair);
                return;
            };
            session.authorization_pending = false;
            if granted {
                session.connected = true;
            }
        }
        if granted {
            info!("[HID] peer {:?} authorized and connected", pair.remote);
            self.push_notification(Notification::HidConnected {
                local: pair.local,
                remote: pair.remote,
            });
        } else if let Some(session) = self
            .servers
            .get_mut(&pair.local)
            .and_then(|s| s.sessions.remove(&pair.remote))
        {
            info!("[HID] peer {:?} refused, closing channels", pair.remote);
            if let Some(socket) = session.control {
                transport.close(socket).await;
            }
            if let Some(socket) = session.interrupt {
                transport.close(socket).await;
            }
            access.cancel_authorization(pair).await;
        }
    }

    /// Record an established ACL link in the adapter's connection table
    pub(crate) fn handle_link_established(
        &mut self,
        adapter: AdapterId,
        remote: DeviceAddress,
        handle: u16,
    ) {
        let Some(owner) = self.adapters.get_mut(&adapter) else {
            warn!("[HID] link event for unknown adapter {:?}", adapter);
            return;
        };
        if owner.add_connection(remote, handle).is_err() {
            warn!("[HID] connection table full on {:?}", adapter);
        } else {
            debug!("[HID] link {:#x} established to {:?}", handle, remote);
        }
    }

    /// Forget a terminated ACL link and the HID session riding on it
    ///
    /// The channels died with the link, so only internal state is dropped;
    /// a still-pending authorization is withdrawn.
    pub(crate) async fn handle_link_terminated<A: AccessControl>(
        &mut self,
        access: &mut A,
        adapter: AdapterId,
        handle: u16,
    ) {
        let Some(owner) = self.adapters.get_mut(&adapter) else {
            return;
        };
        let local = owner.address;
        let Some(remote) = owner.remove_connection_by_handle(handle) else {
            debug!("[HID] link {:#x} terminated with no connection entry", handle);
            return;
        };
        if let Some(device) = owner.device_mut(remote) {
            device.cancel_disconnect();
        }
        debug!("[HID] link {:#x} to {:?} terminated", handle, remote);
        if let Some(server) = self.servers.get_mut(&local)
            && let Some(session) = server.sessions.remove(&remote)
            && session.authorization_pending
        {
            access.cancel_authorization(AddressPair::new(local, remote)).await;
        }
    }

    /// Request a timed disconnect of the link to a device
    ///
    /// Arms the grace timer and returns the command for the timer task; the
    /// low-level disconnect is issued by [`Self::handle_disconnect_expiry`]
    /// when the timer settles.
    pub(crate) fn request_disconnect(
        &mut self,
        adapter: AdapterId,
        address: DeviceAddress,
    ) -> Result<TimerCommand, HostError> {
        let grace_secs = self.options().disconnect_grace_secs;
        let Some(owner) = self.adapters.get_mut(&adapter) else {
            return Err(HostError::NotFound);
        };
        let local = owner.address;
        if owner.device(address).is_none() {
            return Err(HostError::NotFound);
        }
        if owner.connection(address).is_none() {
            return Err(HostError::NotConnected);
        }
        let Some(device) = owner.device_mut(address) else {
            return Err(HostError::NotFound);
        };
        let generation = device.arm_disconnect();
        let path = device.path.clone();
        info!("[HID] disconnect requested for {}", path);
        self.push_notification(Notification::DisconnectRequested { path });
        Ok(TimerCommand {
            pair: AddressPair::new(local, address),
            generation,
            grace_secs,
        })
    }

    /// Issue the low-level disconnect for a settled grace timer
    ///
    /// Stale generations (cancelled or superseded timers) and links that
    /// already went down on their own are ignored.
    pub(crate) async fn handle_disconnect_expiry<L: LinkControl>(
        &mut self,
        link: &mut L,
        pair: AddressPair,
        generation: u32,
    ) {
        let Some(owner) = self
            .adapters
            .values_mut()
            .find(|a| a.address == pair.local)
        else {
            return;
        };
        let Some(device) = owner.device_mut(pair.remote) else {
            return;
        };
        if !device.settle_disconnect(generation) {
            debug!("[HID] stale disconnect timer for {:?}", pair);
            return;
        }
        let Some(handle) = owner.connection(pair.remote) else {
            debug!("[HID] link to {:?} already down", pair.remote);
            return;
        };
        info!(
            "[HID] grace elapsed, disconnecting {:?} (handle {:#x})",
            pair.remote, handle
        );
        if link
            .disconnect(
                ConnHandle::new(handle),
                DisconnectReason::RemoteUserTerminatedConn,
            )
            .await
            .is_err()
        {
            warn!("[HID] disconnect command failed for {:?}", pair.remote);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessError;
    use crate::constants::DISCONNECT_GRACE_SECS;
    use crate::testing::{
        HID_UUID, RecordingAccess, RecordingLink, RecordingTransport, local_addr, remote_addr,
        test_pair,
    };
    use embassy_futures::block_on;

    fn host_with_server(transport: &mut RecordingTransport) -> DeviceHost {
        let mut host = DeviceHost::new();
        host.add_adapter(AdapterId(0), local_addr()).unwrap();
        host.adapter_mut(AdapterId(0))
            .unwrap()
            .create_device(remote_addr())
            .unwrap();
        block_on(host.start_hid_server(transport, local_addr())).unwrap();
        host
    }

    fn accept(
        host: &mut DeviceHost,
        transport: &mut RecordingTransport,
        access: &mut RecordingAccess,
        psm: u16,
        socket: u32,
    ) {
        block_on(host.handle_channel_accepted(
            transport,
            access,
            local_addr(),
            remote_addr(),
            Psm(psm),
            SocketId(socket),
        ));
    }

    #[test]
    fn test_start_server_listens_on_both_psms() {
        let mut transport = RecordingTransport::new();
        let mut host = host_with_server(&mut transport);

        assert!(transport.is_listening(local_addr(), Psm(HID_CONTROL_PSM)));
        assert!(transport.is_listening(local_addr(), Psm(HID_INTERRUPT_PSM)));

        let result = block_on(host.start_hid_server(&mut transport, local_addr()));
        assert_eq!(result, Err(HostError::AlreadyExists));
    }

    #[test]
    fn test_start_server_requires_known_adapter_address() {
        let mut transport = RecordingTransport::new();
        let mut host = DeviceHost::new();
        host.add_adapter(AdapterId(0), local_addr()).unwrap();

        let result = block_on(host.start_hid_server(&mut transport, remote_addr()));
        assert_eq!(result, Err(HostError::NotFound));
        assert!(transport.listeners.is_empty());
    }

    #[test]
    fn test_interrupt_listen_failure_rolls_back_control_listener() {
        let mut transport = RecordingTransport::new();
        transport.script_listen(Ok(()));
        transport.script_listen(Err(crate::transport::TransportError::ListenFailed));
        let mut host = DeviceHost::new();
        host.add_adapter(AdapterId(0), local_addr()).unwrap();

        let result = block_on(host.start_hid_server(&mut transport, local_addr()));

        assert_eq!(result, Err(HostError::Failed));
        assert!(!transport.is_listening(local_addr(), Psm(HID_CONTROL_PSM)));
        assert!(host.servers.is_empty());
    }

    #[test]
    fn test_channel_pair_is_authorized_then_connected() {
        let mut transport = RecordingTransport::new();
        let mut access = RecordingAccess::new();
        let mut host = host_with_server(&mut transport);

        accept(&mut host, &mut transport, &mut access, HID_CONTROL_PSM, 1);
        assert!(access.requests.is_empty());

        accept(&mut host, &mut transport, &mut access, HID_INTERRUPT_PSM, 2);
        assert_eq!(access.requests.len(), 1);
        assert_eq!(access.requests[0].0, test_pair());
        assert!(access.requests[0].1.matches(HID_UUID));

        block_on(host.handle_authorization(
            &mut transport,
            &mut access,
            test_pair(),
            AuthVerdict::Granted,
        ));

        let session = host
            .servers
            .get(&local_addr())
            .unwrap()
            .session(remote_addr())
            .unwrap();
        assert!(session.connected);
        assert!(!session.authorization_pending);
        assert_eq!(session.control, Some(SocketId(1)));
        assert_eq!(session.interrupt, Some(SocketId(2)));
        assert!(transport.closed.is_empty());

        let notifications = host.take_notifications();
        assert!(matches!(
            notifications.first(),
            Some(Notification::HidConnected { remote, .. }) if *remote == remote_addr()
        ));
    }

    #[test]
    fn test_unknown_peer_control_channel_gets_unplug_then_close() {
        let mut transport = RecordingTransport::new();
        let mut access = RecordingAccess::new();
        let mut host = DeviceHost::new();
        host.add_adapter(AdapterId(0), local_addr()).unwrap();
        block_on(host.start_hid_server(&mut transport, local_addr())).unwrap();

        accept(&mut host, &mut transport, &mut access, HID_CONTROL_PSM, 7);

        assert_eq!(transport.sends.len(), 1);
        assert_eq!(transport.sends[0].0, SocketId(7));
        assert_eq!(transport.sends[0].1.as_slice(), &[HID_VIRTUAL_CABLE_UNPLUG]);
        assert_eq!(transport.closed.as_slice(), &[SocketId(7)]);
        assert!(
            host.servers
                .get(&local_addr())
                .unwrap()
                .session(remote_addr())
                .is_none()
        );
    }

    #[test]
    fn test_interrupt_channel_without_control_is_closed_silently() {
        let mut transport = RecordingTransport::new();
        let mut access = RecordingAccess::new();
        let mut host = host_with_server(&mut transport);

        accept(&mut host, &mut transport, &mut access, HID_INTERRUPT_PSM, 9);

        assert!(transport.sends.is_empty());
        assert_eq!(transport.closed.as_slice(), &[SocketId(9)]);
        assert!(
            host.servers
                .get(&local_addr())
                .unwrap()
                .session(remote_addr())
                .is_none()
        );
    }

    #[test]
    fn test_replacement_control_channel_closes_the_old_socket() {
        let mut transport = RecordingTransport::new();
        let mut access = RecordingAccess::new();
        let mut host = host_with_server(&mut transport);

        accept(&mut host, &mut transport, &mut access, HID_CONTROL_PSM, 1);
        accept(&mut host, &mut transport, &mut access, HID_CONTROL_PSM, 3);

        assert_eq!(transport.closed.as_slice(), &[SocketId(1)]);
        let session = host
            .servers
            .get(&local_addr())
            .unwrap()
            .session(remote_addr())
            .unwrap();
        assert_eq!(session.control, Some(SocketId(3)));
    }

    #[test]
    fn test_denied_authorization_tears_the_session_down() {
        let mut transport = RecordingTransport::new();
        let mut access = RecordingAccess::new();
        let mut host = host_with_server(&mut transport);
        accept(&mut host, &mut transport, &mut access, HID_CONTROL_PSM, 1);
        accept(&mut host, &mut transport, &mut access, HID_INTERRUPT_PSM, 2);

        block_on(host.handle_authorization(
            &mut transport,
            &mut access,
            test_pair(),
            AuthVerdict::Denied,
        ));

        assert_eq!(transport.closed.as_slice(), &[SocketId(1), SocketId(2)]);
        assert_eq!(access.cancels.as_slice(), &[test_pair()]);
        assert!(
            host.servers
                .get(&local_addr())
                .unwrap()
                .session(remote_addr())
                .is_none()
        );
        assert!(host.take_notifications().is_empty());
    }

    #[test]
    fn test_failed_authorization_request_closes_both_channels() {
        let mut transport = RecordingTransport::new();
        let mut access = RecordingAccess::new();
        access.request_outcome = Err(AccessError::NoAgent);
        let mut host = host_with_server(&mut transport);

        accept(&mut host, &mut transport, &mut access, HID_CONTROL_PSM, 1);
        accept(&mut host, &mut transport, &mut access, HID_INTERRUPT_PSM, 2);

        assert_eq!(access.requests.len(), 1);
        assert_eq!(transport.closed.as_slice(), &[SocketId(1), SocketId(2)]);
        assert!(
            host.servers
                .get(&local_addr())
                .unwrap()
                .session(remote_addr())
                .is_none()
        );
    }

    #[test]
    fn test_stale_verdict_without_session_is_discarded() {
        let mut transport = RecordingTransport::new();
        let mut access = RecordingAccess::new();
        let mut host = host_with_server(&mut transport);

        block_on(host.handle_authorization(
            &mut transport,
            &mut access,
            test_pair(),
            AuthVerdict::Granted,
        ));

        assert!(transport.closed.is_empty());
        assert!(access.cancels.is_empty());
        assert!(host.take_notifications().is_empty());
    }

    #[test]
    fn test_stop_server_closes_sessions_listeners_and_pending_authorization() {
        let mut transport = RecordingTransport::new();
        let mut access = RecordingAccess::new();
        let mut host = host_with_server(&mut transport);
        accept(&mut host, &mut transport, &mut access, HID_CONTROL_PSM, 1);
        accept(&mut host, &mut transport, &mut access, HID_INTERRUPT_PSM, 2);

        block_on(host.stop_hid_server(&mut transport, &mut access, local_addr())).unwrap();

        assert_eq!(transport.closed.as_slice(), &[SocketId(1), SocketId(2)]);
        assert_eq!(access.cancels.as_slice(), &[test_pair()]);
        assert!(transport
            .closed_listeners
            .contains(&(local_addr(), Psm(HID_CONTROL_PSM))));
        assert!(transport
            .closed_listeners
            .contains(&(local_addr(), Psm(HID_INTERRUPT_PSM))));
        assert!(host.servers.is_empty());
    }

    #[test]
    fn test_link_terminated_drops_connection_and_session() {
        let mut transport = RecordingTransport::new();
        let mut access = RecordingAccess::new();
        let mut host = host_with_server(&mut transport);
        host.handle_link_established(AdapterId(0), remote_addr(), 0x2A);
        accept(&mut host, &mut transport, &mut access, HID_CONTROL_PSM, 1);
        accept(&mut host, &mut transport, &mut access, HID_INTERRUPT_PSM, 2);

        block_on(host.handle_link_terminated(&mut access, AdapterId(0), 0x2A));

        assert_eq!(
            host.adapter(AdapterId(0)).unwrap().connection(remote_addr()),
            None
        );
        assert!(
            host.servers
                .get(&local_addr())
                .unwrap()
                .session(remote_addr())
                .is_none()
        );
        // the channels died with the link, nothing to close
        assert!(transport.closed.is_empty());
        assert_eq!(access.cancels.as_slice(), &[test_pair()]);
    }

    #[test]
    fn test_request_disconnect_arms_the_grace_timer() {
        let mut transport = RecordingTransport::new();
        let mut host = host_with_server(&mut transport);
        host.handle_link_established(AdapterId(0), remote_addr(), 0x2A);

        let command = host.request_disconnect(AdapterId(0), remote_addr()).unwrap();

        assert_eq!(command.pair, test_pair());
        assert_eq!(command.grace_secs, DISCONNECT_GRACE_SECS);
        let notifications = host.take_notifications();
        assert!(matches!(
            notifications.first(),
            Some(Notification::DisconnectRequested { path })
                if path.as_str() == "/hci0/dev_66_77_88_99_AA_BB"
        ));
    }

    #[test]
    fn test_request_disconnect_without_connection() {
        let mut transport = RecordingTransport::new();
        let mut host = host_with_server(&mut transport);

        let result = host.request_disconnect(AdapterId(0), remote_addr());
        assert!(matches!(result, Err(HostError::NotConnected)));

        let result = host.request_disconnect(AdapterId(0), local_addr());
        assert!(matches!(result, Err(HostError::NotFound)));
    }

    #[test]
    fn test_settled_timer_disconnects_exactly_once() {
        let mut transport = RecordingTransport::new();
        let mut link = RecordingLink::new();
        let mut host = host_with_server(&mut transport);
        host.handle_link_established(AdapterId(0), remote_addr(), 0x2A);

        let command = host.request_disconnect(AdapterId(0), remote_addr()).unwrap();
        block_on(host.handle_disconnect_expiry(&mut link, command.pair, command.generation));
        block_on(host.handle_disconnect_expiry(&mut link, command.pair, command.generation));

        assert_eq!(link.disconnects.len(), 1);
        assert_eq!(link.disconnects[0].0.raw(), 0x2A);
        assert!(matches!(
            link.disconnects[0].1,
            DisconnectReason::RemoteUserTerminatedConn
        ));
    }

    #[test]
    fn test_rearmed_timer_supersedes_the_previous_generation() {
        let mut transport = RecordingTransport::new();
        let mut link = RecordingLink::new();
        let mut host = host_with_server(&mut transport);
        host.handle_link_established(AdapterId(0), remote_addr(), 0x2A);

        let first = host.request_disconnect(AdapterId(0), remote_addr()).unwrap();
        let second = host.request_disconnect(AdapterId(0), remote_addr()).unwrap();

        block_on(host.handle_disconnect_expiry(&mut link, first.pair, first.generation));
        assert!(link.disconnects.is_empty());

        block_on(host.handle_disconnect_expiry(&mut link, second.pair, second.generation));
        assert_eq!(link.disconnects.len(), 1);
    }

    #[test]
    fn test_expiry_after_the_link_went_down_is_a_noop() {
        let mut transport = RecordingTransport::new();
        let mut access = RecordingAccess::new();
        let mut link = RecordingLink::new();
        let mut host = host_with_server(&mut transport);
        host.handle_link_established(AdapterId(0), remote_addr(), 0x2A);

        let command = host.request_disconnect(AdapterId(0), remote_addr()).unwrap();
        block_on(host.handle_link_terminated(&mut access, AdapterId(0), 0x2A));
        block_on(host.handle_disconnect_expiry(&mut link, command.pair, command.generation));

        assert!(link.disconnects.is_empty());
    }
}
